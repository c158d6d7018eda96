//! DAHDSR-style envelope generator.
//!
//! Used for the amplitude, filter, and pitch envelopes. Durations are
//! expressed in samples so the generator can be advanced a whole block at a
//! time without per-sample branching in the caller.

/// One envelope stage: ramp linearly to `end_value` over `duration_samples`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeStage {
    /// Length of this stage in samples. Zero means "instant".
    pub duration_samples: u64,
    /// Level this stage ramps toward.
    pub end_value: f64,
}

/// The shape of an envelope: delay, attack, hold, decay stages ending at the
/// sustain level, plus a release duration used once the voice lets go.
#[derive(Debug, Clone)]
pub struct EnvelopeShape {
    /// Stages run in order before sustain: delay, attack, hold, decay.
    pub stages: [EnvelopeStage; 4],
    /// Level held indefinitely after the decay stage, until release.
    pub sustain_value: f64,
    /// Release stage: ramps from the level at release time to 0.
    pub release: EnvelopeStage,
}

impl Default for EnvelopeShape {
    fn default() -> Self {
        Self {
            stages: [
                EnvelopeStage {
                    duration_samples: 0,
                    end_value: 0.0,
                },
                EnvelopeStage {
                    duration_samples: 0,
                    end_value: 1.0,
                },
                EnvelopeStage {
                    duration_samples: 0,
                    end_value: 1.0,
                },
                EnvelopeStage {
                    duration_samples: 0,
                    end_value: 1.0,
                },
            ],
            sustain_value: 1.0,
            release: EnvelopeStage {
                duration_samples: 0,
                end_value: 0.0,
            },
        }
    }
}

/// Runtime envelope stage index, matching the order stages run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Stages 0-3 of the shape (delay/attack/hold/decay).
    Shaping(u8),
    /// Holding at `sustain_value`.
    Sustain,
    /// Ramping to 0 after release.
    Release,
    /// Fully finished; output is 0 and the owning voice may be inactivated.
    Done,
}

/// A running envelope instance.
#[derive(Debug, Clone)]
pub struct Envelope {
    shape: EnvelopeShape,
    stage: Stage,
    pos_in_stage: u64,
    value: f64,
    value_at_stage_start: f64,
}

impl Envelope {
    /// Start a fresh envelope from `shape`.
    pub fn new(shape: EnvelopeShape) -> Self {
        Self {
            shape,
            stage: Stage::Shaping(0),
            pos_in_stage: 0,
            value: 0.0,
            value_at_stage_start: 0.0,
        }
    }

    /// Replace the shape in place (used when a layer change mid-voice swaps
    /// the active layer's envelope parameters), preserving the current
    /// stage and value.
    pub fn update_shape(&mut self, shape: EnvelopeShape) {
        self.shape = shape;
    }

    /// Current envelope output, in `[0, 1]` under normal shapes.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Current stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// True once the envelope has finished its release and decayed to
    /// silence.
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Fast-finish: used when the decay stage targets an end value at or
    /// below zero, in which case the envelope should jump straight to
    /// `Done` instead of ramping all the way through silence.
    pub fn fast_finish_if_silent_decay(&mut self) {
        if let Stage::Shaping(3) = self.stage {
            if self.shape.stages[3].end_value <= 0.0 {
                self.stage = Stage::Done;
                self.value = 0.0;
            }
        }
    }

    /// Mark the note released, switching the envelope onto its release
    /// ramp on the next `advance` call.
    pub fn release(&mut self) {
        if self.stage != Stage::Release && self.stage != Stage::Done {
            self.stage = Stage::Release;
            self.pos_in_stage = 0;
            self.value_at_stage_start = self.value;
        }
    }

    /// Advance the envelope by `block_len` samples and return the value at
    /// the end of the block.
    pub fn advance(&mut self, block_len: u64) -> f64 {
        let mut remaining = block_len;
        while remaining > 0 {
            match self.stage {
                Stage::Shaping(idx) => {
                    let s = self.shape.stages[idx as usize];
                    if s.duration_samples == 0 {
                        self.value = s.end_value;
                        self.advance_stage();
                        continue;
                    }
                    let step = remaining.min(s.duration_samples - self.pos_in_stage);
                    self.pos_in_stage += step;
                    let t = self.pos_in_stage as f64 / s.duration_samples as f64;
                    self.value = self.value_at_stage_start + (s.end_value - self.value_at_stage_start) * t;
                    remaining -= step;
                    if self.pos_in_stage >= s.duration_samples {
                        self.advance_stage();
                    }
                }
                Stage::Sustain => {
                    self.value = self.shape.sustain_value;
                    remaining = 0;
                }
                Stage::Release => {
                    let s = self.shape.release;
                    if s.duration_samples == 0 {
                        self.value = s.end_value;
                        self.stage = Stage::Done;
                        remaining = 0;
                        continue;
                    }
                    let step = remaining.min(s.duration_samples - self.pos_in_stage);
                    self.pos_in_stage += step;
                    let t = self.pos_in_stage as f64 / s.duration_samples as f64;
                    self.value = self.value_at_stage_start + (s.end_value - self.value_at_stage_start) * t;
                    remaining -= step;
                    if self.pos_in_stage >= s.duration_samples {
                        self.stage = Stage::Done;
                        self.value = 0.0;
                    }
                }
                Stage::Done => {
                    self.value = 0.0;
                    remaining = 0;
                }
            }
        }
        self.value
    }

    fn advance_stage(&mut self) {
        self.pos_in_stage = 0;
        self.value_at_stage_start = self.value;
        self.stage = match self.stage {
            Stage::Shaping(3) => Stage::Sustain,
            Stage::Shaping(idx) => Stage::Shaping(idx + 1),
            other => other,
        };
    }
}
