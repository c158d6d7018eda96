//! Realtime playback core for an SFZ-style software sampler.
//!
//! This crate owns polyphonic voice allocation, the program/layer matching
//! engine, and the per-block DSP chain that turns a matched layer and a
//! stream of note/controller events into audio. Sample storage, disk
//! streaming, and SFZ parsing are external collaborators described by traits
//! in `sampler-common` and in [`config`].
//!
//! # Quick start
//! ```no_run
//! use sampler_core::{Module, Channel};
//!
//! let module = Module::new(44_100, 2);
//! let mut channel = Channel::new();
//! channel.set_cc(7, 127);
//! let _ = module; let _ = channel;
//! ```

#![warn(missing_docs)]

mod diagnostics;
#[cfg(test)]
pub(crate) mod testutil;

pub mod channel;
pub mod config;
pub mod dsp;
pub mod layer;
pub mod matcher;
pub mod module;
pub mod program;
pub mod types;
pub mod voice;

pub use channel::Channel;
pub use diagnostics::Diagnostics;
pub use layer::Layer;
pub use matcher::next_layer;
pub use module::Module;
pub use program::{Program, ProgramCommand, ProgramReply, Rll};
pub use types::{FilterType, LoopMode, TriggerMode, VoiceMode};
pub use voice::Voice;

/// Errors returned by the non-realtime control surface (program/layer
/// construction). The realtime per-block path never returns a `Result`: any
/// failure there is resolved by silently inactivating the voice and, where
/// applicable, reporting through [`Diagnostics`].
#[derive(thiserror::Error, Debug)]
pub enum SamplerError {
    /// A requested `spgm:<section>` config section does not exist.
    #[error("config section not found: {section}")]
    ConfigSectionNotFound {
        /// The section name that was requested.
        section: String,
    },

    /// Loading an SFZ file failed.
    #[error("failed to load SFZ file {path}: {reason}")]
    SfzLoadFailure {
        /// Path that failed to load.
        path: String,
        /// Loader-supplied failure reason.
        reason: String,
    },

    /// A prefetch pipe could not be allocated for a streaming voice.
    ///
    /// Not normally returned as a hard error — voice start degrades to
    /// preloaded-only playback and reports this through [`Diagnostics`]
    /// instead. Kept as a variant so non-realtime callers that want to
    /// treat exhaustion as fatal can still match on it.
    #[error("prefetch pipe pool exhausted")]
    PipeExhausted,

    /// A layer has no effective waveform and cannot be used.
    #[error("layer in section {section} has no effective waveform")]
    LayerMissingWaveform {
        /// The config subsection the layer was built from.
        section: String,
    },

    /// Generic error, for collaborator failures not covered above.
    #[error("{0}")]
    Other(String),
}

impl From<String> for SamplerError {
    fn from(msg: String) -> Self {
        SamplerError::Other(msg)
    }
}

impl From<&str> for SamplerError {
    fn from(msg: &str) -> Self {
        SamplerError::Other(msg.to_string())
    }
}

/// Result type for sampler control-surface operations.
pub type Result<T> = std::result::Result<T, SamplerError>;
