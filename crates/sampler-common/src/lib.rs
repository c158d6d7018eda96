//! Shared traits and types for the sampler playback core.
//!
//! This crate defines the boundary between the realtime voice/DSP engine in
//! `sampler-core` and the collaborators it does not implement itself: sample
//! data storage ([`Waveform`]), disk streaming ([`PrefetchPipe`]), and the
//! modulation routing tables shared by the per-block DSP chain.

#![warn(missing_docs)]

pub mod modulation;
pub mod pipe;
pub mod waveform;

pub use modulation::{ModDest, ModSource, ModulationEntry, POLARITY_OFFSET, POLARITY_SCALE};
pub use pipe::PrefetchPipe;
pub use waveform::{Waveform, WaveformLevel};
