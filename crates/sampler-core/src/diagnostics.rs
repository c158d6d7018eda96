//! Non-fatal event reporting, used in place of a logging framework.
//!
//! The realtime path never logs; it reports degraded conditions (pipe
//! exhaustion, a layer skipped at load time) through this small sink trait so
//! a caller can route them to whatever telemetry it likes, or ignore them via
//! the no-op default.

/// Sink for non-fatal conditions raised by program loading and voice start.
pub trait Diagnostics: Send + Sync {
    /// A layer could not be constructed while iterating a program's
    /// `layerN` entries and was skipped; the program load still succeeds.
    fn layer_skipped(&self, section: &str, reason: &str) {
        let _ = (section, reason);
    }

    /// A voice start wanted to stream from disk but the pipe pool was
    /// empty; the voice still starts, restricted to its preloaded region.
    fn pipe_exhausted(&self, note: u8, channel: u8) {
        let _ = (note, channel);
    }
}

/// A [`Diagnostics`] implementation that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl Diagnostics for NullDiagnostics {}
