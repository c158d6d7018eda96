//! Layer (region) data: the frozen, runtime-ready parameters for one SFZ
//! region, plus the small amount of state the matcher mutates at runtime.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use sampler_common::{ModulationEntry, Waveform};

use crate::dsp::EnvelopeShape;
use crate::types::{FilterType, LoopMode, TriggerMode};

/// A callback run once at voice start, after all other parameter
/// realization, before the playback cursor is seeded. Used for things a
/// layer wants to customize per-note (e.g. a randomised per-note offset).
pub type NoteInitFn = Box<dyn Fn(&mut crate::voice::Voice) + Send + Sync>;

/// Shared handle to a layer. A layer is referenced from a program's full
/// layer list and, simultaneously, from the run-time layer list built over
/// it. `Arc` lets both hold the same allocation; the handover of a whole
/// [`crate::program::Program`] from the control thread to the audio thread
/// (see the concurrency model) requires every layer it owns to be
/// `Send + Sync`, which rules out `Rc`/`RefCell` here — the matcher's
/// mutable round-robin state is carried in [`MatchState`]'s atomics instead.
pub type LayerHandle = Arc<Layer>;

/// One EQ band's parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqBand {
    /// Center/corner frequency in Hz before velocity scaling.
    pub effective_freq: f64,
    /// Hz added per unit of (scaled) velocity.
    pub vel2freq: f64,
    /// Bandwidth in octaves.
    pub bw: f64,
    /// Gain in dB before velocity scaling.
    pub gain: f64,
    /// dB added per unit of (scaled) velocity.
    pub vel2gain: f64,
}

bitflags::bitflags! {
    /// Which of the three EQ bands are enabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EqBitmask: u8 {
        /// First EQ band.
        const EQ1 = 0b001;
        /// Second EQ band.
        const EQ2 = 0b010;
        /// Third EQ band.
        const EQ3 = 0b100;
    }
}

/// Round-robin / keyswitch state mutated by the matcher on the audio
/// thread. Kept separate from the rest of the (conceptually immutable)
/// layer data so the mutable surface is small and explicit; atomics let
/// the whole `Layer` stay `Sync` despite this being runtime-mutable.
#[derive(Debug)]
pub struct MatchState {
    /// 1-based position in the round-robin cycle; a layer triggers only
    /// when this equals 1.
    current_seq_position: AtomicU32,
    /// Last note seen that matched this layer's keyswitch range.
    last_key: AtomicI32,
}

impl Default for MatchState {
    fn default() -> Self {
        Self {
            current_seq_position: AtomicU32::new(1),
            last_key: AtomicI32::new(-1),
        }
    }
}

impl MatchState {
    /// Current round-robin position.
    pub fn current_seq_position(&self) -> u32 {
        self.current_seq_position.load(Ordering::Relaxed)
    }

    /// Overwrite the round-robin position (used by `runtime_prepare` to
    /// clamp an out-of-range value after an edit).
    pub fn set_current_seq_position(&self, value: u32) {
        self.current_seq_position.store(value, Ordering::Relaxed);
    }

    /// Advance the round-robin position by one, wrapping at `seq_length`,
    /// returning whether the position was 1 (i.e. this visit triggers).
    pub fn advance_seq_position(&self, seq_length: u32) -> bool {
        let prev = self.current_seq_position.fetch_add(1, Ordering::Relaxed);
        let triggers = prev == 1;
        if prev + 1 > seq_length {
            self.current_seq_position.store(1, Ordering::Relaxed);
        }
        triggers
    }

    /// Last note that matched this layer's keyswitch tracking range.
    pub fn last_key(&self) -> i32 {
        self.last_key.load(Ordering::Relaxed)
    }

    /// Record a new keyswitch note.
    pub fn set_last_key(&self, note: i32) {
        self.last_key.store(note, Ordering::Relaxed);
    }
}

/// One fully runtime-prepared region.
pub struct Layer {
    /// Key range, inclusive.
    pub lokey: u8,
    /// Key range, inclusive.
    pub hikey: u8,
    /// Velocity range, inclusive.
    pub lovel: u8,
    /// Velocity range, inclusive.
    pub hivel: u8,
    /// Channel range, inclusive, 1-based.
    pub lochan: u8,
    /// Channel range, inclusive, 1-based.
    pub hichan: u8,
    /// Random gate range, `lorand <= r < hirand`.
    pub lorand: f64,
    /// Random gate range, `lorand <= r < hirand`.
    pub hirand: f64,

    /// Keyswitch note that must have been last pressed, or -1 to disable.
    pub sw_last: i32,
    /// Keyswitch tracking range start.
    pub sw_lokey: u8,
    /// Keyswitch tracking range end.
    pub sw_hikey: u8,
    /// Required-down switch bit, or -1.
    pub sw_down: i32,
    /// Required-up switch bit, or -1.
    pub sw_up: i32,
    /// Required previous note, or -1.
    pub sw_previous: i32,
    /// Whether any keyswitch condition above is active.
    pub eff_use_keyswitch: bool,

    /// What fires this layer.
    pub trigger: TriggerMode,
    /// Round-robin cycle length, >= 1.
    pub seq_length: u32,

    /// Loop start/end frames in the waveform.
    pub loop_start: u64,
    /// Loop start/end frames in the waveform.
    pub loop_end: u64,
    /// Resolved loop behavior.
    pub eff_loop_mode: LoopMode,
    /// Crossfade length for loop joins, in frames.
    pub loop_overlap: u64,
    /// Sample-count-based playback length; > 0 overrides note-off handling
    /// the same way `one_shot` does.
    pub count: u64,
    /// Raw configured end frame: 0 means "whole waveform", -1 (encoded as
    /// `u64::MAX`) means "nothing", otherwise a literal frame index.
    pub end: i64,

    /// Amplitude envelope shape.
    pub amp_env: EnvelopeShape,
    /// Filter envelope shape.
    pub fil_env: EnvelopeShape,
    /// Pitch envelope shape.
    pub pitch_env: EnvelopeShape,

    /// Amp LFO frequency in Hz.
    pub amp_lfo_freq: f64,
    /// Filter LFO frequency in Hz.
    pub fil_lfo_freq: f64,
    /// Pitch LFO frequency in Hz.
    pub pitch_lfo_freq: f64,

    /// Modulation routing entries.
    pub modulations: Vec<ModulationEntry>,

    /// Filter topology.
    pub fil_type: FilterType,
    /// Filter cutoff in the same log-cutoff units as the DSP chain
    /// (`logcutoff` scale, 0..=12798), or -1 to disable filtering.
    pub logcutoff: f64,
    /// Linear resonance before dB scaling.
    pub resonance_linearized: f64,
    /// dB subtracted from output per semitone of key above `fil_keycenter`.
    pub fil_keytrack: f64,
    /// Key the filter cutoff is not shifted at.
    pub fil_keycenter: u8,
    /// How much velocity affects cutoff.
    pub fil_veltrack: f64,

    /// The three EQ bands.
    pub eq: [EqBand; 3],
    /// Which EQ bands are enabled.
    pub eq_bitmask: EqBitmask,

    /// Tone-control high-shelf corner frequency; 0 disables tone control.
    pub tonectl_freq: f64,
    /// Tone-control gain in dB.
    pub tonectl: f64,

    /// Base volume in dB.
    pub volume_linearized: f64,
    /// Pan, `-100` (hard left) to `100` (hard right).
    pub pan: f64,
    /// How much velocity affects amplitude, percent.
    pub amp_veltrack: f64,
    /// Per-velocity gain curve, 128 entries, each nominally in `[0,1]`.
    pub eff_velcurve: [f64; 128],
    /// Release-trigger attenuation in dB per second of time since the
    /// original note-on.
    pub rt_decay: f64,

    /// Start delay in samples.
    pub delay: u64,
    /// Extra random start delay, uniform in `[0, delay_random)`, samples.
    pub delay_random: u64,
    /// Start offset in frames.
    pub offset: u64,
    /// Extra random start offset, uniform in `[0, offset_random)`, frames.
    pub offset_random: u64,
    /// Additional fixed offset applied after randomisation, frames.
    pub reloffset: i64,

    /// Aux send 1 bus number, 0 disables.
    pub effect1bus: u32,
    /// Aux send 2 bus number, 0 disables.
    pub effect2bus: u32,
    /// Aux send 1 gain, linear.
    pub effect1: f64,
    /// Aux send 2 gain, linear.
    pub effect2: f64,

    /// Output bus shift, added to the channel's own shift.
    pub output: u32,
    /// Choke group, 0 means none.
    pub group: u32,
    /// Choke group this layer silences when it starts, 0 means none.
    pub off_by: u32,

    /// Pitch tuning in whole semitones.
    pub transpose: i32,
    /// Fine tuning in cents.
    pub tune: f64,
    /// How much key distance from `pitch_keycenter` affects pitch, percent.
    pub pitch_keytrack: f64,
    /// Key that plays back at the waveform's native pitch.
    pub pitch_keycenter: u8,
    /// Pitch bend range up, in cents.
    pub bend_up: f64,
    /// Pitch bend range down, in cents.
    pub bend_down: f64,

    /// Resolved waveform to play, or `None` if this layer cannot sound.
    pub eff_waveform: Option<Arc<dyn Waveform>>,
    /// Native playback frequency of `eff_waveform` in Hz.
    pub eff_freq: f64,

    /// Timestretch enabled.
    pub timestretch: bool,
    /// Timestretch jump length, frames.
    pub timestretch_jump: u64,
    /// Timestretch crossfade length, frames.
    pub timestretch_crossfade: u64,

    /// If set, this layer only triggers via this CC rather than note-on.
    pub on_cc_number: i32,

    /// Note-init callbacks run once at voice start.
    pub nifs: Vec<NoteInitFn>,

    /// Round-robin/keyswitch state, mutated by the matcher on the audio
    /// thread only (see design notes).
    pub match_state: MatchState,
}

impl Default for Layer {
    fn default() -> Self {
        Self {
            lokey: 0,
            hikey: 127,
            lovel: 0,
            hivel: 127,
            lochan: 1,
            hichan: 16,
            lorand: 0.0,
            hirand: 1.0,
            sw_last: -1,
            sw_lokey: 0,
            sw_hikey: 127,
            sw_down: -1,
            sw_up: -1,
            sw_previous: -1,
            eff_use_keyswitch: false,
            trigger: TriggerMode::Attack,
            seq_length: 1,
            loop_start: 0,
            loop_end: 0,
            eff_loop_mode: LoopMode::NoLoop,
            loop_overlap: 0,
            count: 0,
            end: 0,
            amp_env: EnvelopeShape::default(),
            fil_env: EnvelopeShape::default(),
            pitch_env: EnvelopeShape::default(),
            amp_lfo_freq: 0.0,
            fil_lfo_freq: 0.0,
            pitch_lfo_freq: 0.0,
            modulations: Vec::new(),
            fil_type: FilterType::None,
            logcutoff: -1.0,
            resonance_linearized: 0.7,
            fil_keytrack: 0.0,
            fil_keycenter: 60,
            fil_veltrack: 0.0,
            eq: [EqBand::default(); 3],
            eq_bitmask: EqBitmask::empty(),
            tonectl_freq: 0.0,
            tonectl: 0.0,
            volume_linearized: 0.0,
            pan: 0.0,
            amp_veltrack: 100.0,
            eff_velcurve: [1.0; 128],
            rt_decay: 0.0,
            delay: 0,
            delay_random: 0,
            offset: 0,
            offset_random: 0,
            reloffset: 0,
            effect1bus: 0,
            effect2bus: 0,
            effect1: 0.0,
            effect2: 0.0,
            output: 0,
            group: 0,
            off_by: 0,
            transpose: 0,
            tune: 0.0,
            pitch_keytrack: 100.0,
            pitch_keycenter: 60,
            bend_up: 200.0,
            bend_down: -200.0,
            eff_waveform: None,
            eff_freq: 44_100.0,
            timestretch: false,
            timestretch_jump: 0,
            timestretch_crossfade: 0,
            on_cc_number: -1,
            nifs: Vec::new(),
            match_state: MatchState::default(),
        }
    }
}

impl Layer {
    /// Recompute derived fields after construction or an edit. Must run
    /// before the layer is linked into a program.
    pub fn runtime_prepare(&mut self) {
        if let Some(wf) = &self.eff_waveform {
            if self.end == 0 {
                self.end = wf.frames() as i64;
            }
        }
        if self.end > 0 {
            let frames = self
                .eff_waveform
                .as_ref()
                .map(|w| w.frames() as i64)
                .unwrap_or(self.end);
            self.end = self.end.min(frames);
        }
        self.eff_use_keyswitch =
            self.sw_last != -1 || self.sw_down != -1 || self.sw_up != -1 || self.sw_previous != -1;
        if self.match_state.current_seq_position() == 0
            || self.match_state.current_seq_position() > self.seq_length
        {
            self.match_state.set_current_seq_position(1);
        }
    }

    /// Resolved end frame (see `end`'s doc comment), clamped to the
    /// waveform's frame count, 0 if there is no effective waveform.
    pub fn resolved_end(&self) -> u64 {
        match self.eff_waveform.as_ref() {
            Some(wf) => {
                let frames = wf.frames();
                if self.end < 0 {
                    0
                } else {
                    (self.end as u64).min(frames)
                }
            }
            None => 0,
        }
    }
}
