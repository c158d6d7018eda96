//! Minimal DSP glue sufficient to run the per-block voice chain.
//!
//! Coefficient computation and signal math only; nothing here owns a voice's
//! state array, that lives on [`crate::voice::Voice`] so the hot loop stays a
//! flat struct with no per-block allocation.

pub mod biquad;
pub mod envelope;
pub mod lfo;
pub mod math;
pub mod mix;
pub mod onepole;

pub use biquad::BiquadCoeffs;
pub use envelope::{Envelope, EnvelopeShape};
pub use lfo::Lfo;
pub use onepole::OnePoleCoeffs;
