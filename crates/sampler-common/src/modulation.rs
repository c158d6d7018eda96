//! Modulation routing: sources, destinations, and the per-block entry list.

/// A modulation source feeding a [`ModulationEntry`].
///
/// `Cc(n)` reads a MIDI controller directly (`channel.cc[n] / 127`); the
/// others read from the voice's per-block source vector built in step 4 of
/// the per-block process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModSource {
    /// A raw MIDI controller number.
    Cc(u8),
    /// Note-on velocity, normalized.
    Velocity,
    /// Current pitch offset in semitones / 100.
    Pitch,
    /// Polyphonic aftertouch (reserved, always 0 in this implementation).
    PolyAftertouch,
    /// Pitch envelope output.
    PitchEnvelope,
    /// Filter envelope output.
    FilterEnvelope,
    /// Amplitude envelope output.
    AmpEnvelope,
    /// Amplitude LFO output.
    AmpLfo,
    /// Filter LFO output.
    FilterLfo,
    /// Pitch LFO output.
    PitchLfo,
}

/// A modulation destination on a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModDest {
    /// Linear gain offset in dB.
    Gain,
    /// Pitch offset in cents.
    Pitch,
    /// Filter cutoff offset, same units as `logcutoff`.
    Cutoff,
    /// Filter resonance offset in dB.
    Resonance,
    /// Tone-control gain offset in dB.
    ToneControl,
}

/// One routing entry: `dest += apply(source, flags) * amount [* apply(source2, flags>>2)]`.
#[derive(Debug, Clone)]
pub struct ModulationEntry {
    /// Primary source.
    pub src: ModSource,
    /// Optional secondary source, multiplied into the contribution.
    pub src2: Option<ModSource>,
    /// Destination this entry feeds.
    pub dest: ModDest,
    /// Scale applied to the combined source value.
    pub amount: f64,
    /// Low 2 bits select the primary polarity/scale pair; bits 2-3 (when
    /// `src2` is set) select the secondary pair. See [`POLARITY_OFFSET`] /
    /// [`POLARITY_SCALE`].
    pub flags: u8,
}

/// Offset applied before scaling, indexed by a 2-bit polarity/scale selector.
///
/// Selector `0` is unipolar, `1` is unipolar-inverted-offset, `2`/`3` are
/// bipolar pairs — see [`POLARITY_SCALE`] for the matching multiplier.
pub const POLARITY_OFFSET: [f64; 4] = [0.0, -1.0, -1.0, 1.0];

/// Scale applied after [`POLARITY_OFFSET`], indexed by the same selector.
pub const POLARITY_SCALE: [f64; 4] = [1.0, 1.0, 2.0, -2.0];

/// Apply the offset/scale pair selected by the low 2 bits of `flags` to a
/// `[0,1]`-normalized source value.
pub fn apply_polarity(value: f64, selector: u8) -> f64 {
    let idx = (selector & 0b11) as usize;
    value * POLARITY_SCALE[idx] + POLARITY_OFFSET[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unipolar_identity() {
        assert!((apply_polarity(0.3, 0) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn bipolar_selectors_span_negative_to_positive() {
        // selector 2: v*2-1 maps [0,1] -> [-1,1]
        assert!((apply_polarity(1.0, 2) - 1.0).abs() < 1e-12);
        assert!((apply_polarity(0.0, 2) - -1.0).abs() < 1e-12);
        // selector 3: v*-2+1 maps [0,1] -> [1,-1], inverted bipolar shape
        assert!((apply_polarity(0.0, 3) - 1.0).abs() < 1e-12);
        assert!((apply_polarity(1.0, 3) - -1.0).abs() < 1e-12);
    }
}
