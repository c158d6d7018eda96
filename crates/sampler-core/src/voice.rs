//! A single playing voice: its playback cursor, per-voice DSP state, and the
//! per-block process that turns a matched layer into audio.

use std::sync::Arc;

use sampler_common::modulation::apply_polarity;
use sampler_common::{ModDest, ModSource, PrefetchPipe, Waveform};

use crate::channel::Channel;
use crate::dsp::{BiquadCoeffs, Envelope, Lfo, OnePoleCoeffs};
use crate::dsp::biquad::BiquadState;
use crate::dsp::lfo::LfoParams;
use crate::dsp::math::db2gain;
use crate::dsp::mix::{mix_block_into, mix_block_into_with_gain};
use crate::dsp::onepole::OnePoleState;
use crate::layer::{EqBitmask, LayerHandle};
use crate::program::Program;
use crate::types::{FilterType, LoopMode, TriggerMode, VoiceMode};
use crate::Diagnostics;

/// Biquad/one-pole ring-out threshold: a filter whose retained energy is
/// below this is considered silent.
const FILTER_SILENCE_EPS: f64 = 1.0 / 65536.0;

/// A release-trigger voice is never started once its projected attenuation
/// at the moment of release exceeds this many dB.
const RELEASE_TRIGGER_ATTENUATION_LIMIT_DB: f64 = 84.0;

/// 14-bit full-scale value a raw 7-bit CC byte is normalized against in the
/// gain formula (`cc_byte * 128`), matching the channel CC defaults chosen
/// in `Channel::new` (see design notes).
const CC_FULL_SCALE: f64 = 127.0 * 128.0;

/// A voice's position in exactly one of the module's free list or a
/// channel's running list.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoiceLink {
    pub(crate) prev: Option<usize>,
    pub(crate) next: Option<usize>,
}

/// The 32.32 fixed-point playback cursor and loop bookkeeping for one voice.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen {
    /// Current source-frame position, 32.32 fixed point.
    pub bigpos: u64,
    /// Frames advanced per output sample, 32.32 fixed point, including any
    /// pitch modulation this block.
    pub bigdelta: u64,
    /// Like `bigdelta` but ignoring timestretch (used to drive the
    /// stretch engine's own clock when active).
    pub virtdelta: u64,
    /// Loop start frame, or `None` if not looping.
    pub loop_start: Option<u64>,
    /// Loop end frame (exclusive), meaningful only when `loop_start` is set.
    pub loop_end: u64,
    /// Non-looping stop point (exclusive).
    pub cur_sample_end: u64,
}

impl Gen {
    fn seek(&mut self, frame: u64) {
        self.bigpos = frame << 32;
    }
}

/// One playing (or free-list-parked) voice.
pub struct Voice {
    /// Playback mode, `Inactive` while parked on the free list.
    pub mode: VoiceMode,
    pub(crate) link: VoiceLink,

    channel_no: Option<u8>,
    program: Option<Arc<Program>>,
    layer: Option<LayerHandle>,
    current_pipe: Option<Box<dyn PrefetchPipe>>,

    gen: Gen,

    amp_env: Envelope,
    fil_env: Envelope,
    pitch_env: Envelope,
    amp_lfo: Lfo,
    fil_lfo: Lfo,
    pitch_lfo: Lfo,

    filter: BiquadState,
    filter2: BiquadState,
    filter_coeffs: BiquadCoeffs,
    filter_coeffs2: BiquadCoeffs,
    extra_onepole: OnePoleState,
    extra_onepole_coeffs: OnePoleCoeffs,
    tonectl: OnePoleState,
    tonectl_coeffs: OnePoleCoeffs,
    eq: [BiquadState; 3],
    eq_coeffs: [BiquadCoeffs; 3],

    output_pair_no: u32,
    send1bus: u32,
    send2bus: u32,
    send1gain: f64,
    send2gain: f64,

    note: u8,
    vel: u8,
    age: u64,
    delay: u64,
    /// Monotonically increasing id, set at `activate`, used to disambiguate
    /// "is this still the voice I started" after indices get reused.
    pub serial_no: u64,
    released: bool,

    last_waveform_frames: u64,
    last_level: Option<usize>,
    last_level_min_rate: u64,
    last_eq_bitmask: EqBitmask,
    layer_changed: bool,

    gain_fromvel: f64,
    loop_mode: LoopMode,

    /// Per-note modulation source vector, rebuilt every block (step 4).
    mod_sources: ModSourceVector,
}

/// Per-block modulation source values, indexed by [`ModSource`] variant.
#[derive(Debug, Clone, Copy, Default)]
struct ModSourceVector {
    velocity: f64,
    pitch: f64,
    poly_aftertouch: f64,
    pitch_env: f64,
    filter_env: f64,
    amp_env: f64,
    amp_lfo: f64,
    filter_lfo: f64,
    pitch_lfo: f64,
}

impl ModSourceVector {
    fn get(&self, src: ModSource) -> Option<f64> {
        match src {
            ModSource::Cc(_) => None,
            ModSource::Velocity => Some(self.velocity),
            ModSource::Pitch => Some(self.pitch),
            ModSource::PolyAftertouch => Some(self.poly_aftertouch),
            ModSource::PitchEnvelope => Some(self.pitch_env),
            ModSource::FilterEnvelope => Some(self.filter_env),
            ModSource::AmpEnvelope => Some(self.amp_env),
            ModSource::AmpLfo => Some(self.amp_lfo),
            ModSource::FilterLfo => Some(self.filter_lfo),
            ModSource::PitchLfo => Some(self.pitch_lfo),
        }
    }
}

/// Destination accumulator for one block's modulation application (step 6).
#[derive(Debug, Clone, Copy, Default)]
struct ModDestVector {
    gain: f64,
    pitch: f64,
    cutoff: f64,
    resonance: f64,
    tonectl: f64,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            mode: VoiceMode::Inactive,
            link: VoiceLink::default(),
            channel_no: None,
            program: None,
            layer: None,
            current_pipe: None,
            gen: Gen::default(),
            amp_env: Envelope::new(Default::default()),
            fil_env: Envelope::new(Default::default()),
            pitch_env: Envelope::new(Default::default()),
            amp_lfo: Lfo::new(LfoParams::default()),
            fil_lfo: Lfo::new(LfoParams::default()),
            pitch_lfo: Lfo::new(LfoParams::default()),
            filter: BiquadState::default(),
            filter2: BiquadState::default(),
            filter_coeffs: BiquadCoeffs::identity(),
            filter_coeffs2: BiquadCoeffs::identity(),
            extra_onepole: OnePoleState::default(),
            extra_onepole_coeffs: OnePoleCoeffs::identity(),
            tonectl: OnePoleState::default(),
            tonectl_coeffs: OnePoleCoeffs::identity(),
            eq: [BiquadState::default(); 3],
            eq_coeffs: [BiquadCoeffs::identity(); 3],
            output_pair_no: 0,
            send1bus: 0,
            send2bus: 0,
            send1gain: 0.0,
            send2gain: 0.0,
            note: 0,
            vel: 0,
            age: 0,
            delay: 0,
            serial_no: 0,
            released: false,
            last_waveform_frames: 0,
            last_level: None,
            last_level_min_rate: 0,
            last_eq_bitmask: EqBitmask::empty(),
            layer_changed: false,
            gain_fromvel: 1.0,
            loop_mode: LoopMode::NoLoop,
            mod_sources: ModSourceVector::default(),
        }
    }
}

impl Voice {
    /// A fresh, parked voice.
    pub fn new() -> Self {
        Self::default()
    }

    /// `activate(mode)`: precondition `mode == Inactive`. Linking into the
    /// channel's running list and unlinking from the module's free list is
    /// the caller's (`Module`'s) responsibility; this only flips the mode.
    pub fn activate(&mut self, mode: VoiceMode, serial_no: u64) {
        debug_assert_eq!(self.mode, VoiceMode::Inactive);
        self.mode = mode;
        self.serial_no = serial_no;
    }

    /// `inactivate(expect_active)`: returns any held pipe, clears the voice's
    /// references, and flips the mode back to `Inactive`. Linking into the
    /// module's free list is the caller's responsibility.
    pub fn inactivate(&mut self, expect_active: bool) -> Option<Box<dyn PrefetchPipe>> {
        debug_assert_eq!(self.mode != VoiceMode::Inactive, expect_active);
        self.mode = VoiceMode::Inactive;
        self.channel_no = None;
        self.program = None;
        self.layer = None;
        self.released = false;
        self.current_pipe.take()
    }

    /// Whether this voice belongs to `channel_no` (1-based) and is currently
    /// playing `layer`.
    pub fn is_playing(&self, channel_no: u8, layer: &LayerHandle) -> bool {
        self.mode != VoiceMode::Inactive
            && self.channel_no == Some(channel_no)
            && self
                .layer
                .as_ref()
                .map(|l| Arc::ptr_eq(l, layer))
                .unwrap_or(false)
    }

    /// The choke group of the layer this voice is currently playing, if
    /// active and the layer names one.
    pub fn group(&self) -> Option<u32> {
        self.layer.as_ref().map(|l| l.group).filter(|g| *g != 0)
    }

    /// The note this voice is currently playing, if active.
    pub fn note(&self) -> Option<u8> {
        (self.mode != VoiceMode::Inactive).then_some(self.note)
    }

    /// Whether `release` has been called on this voice since it started.
    pub fn released(&self) -> bool {
        self.released
    }

    /// `start(channel, layer, note, vel, exgroups, exgroupcount)`: prepares
    /// the voice to play `layer` for `note`/`vel` on `channel_no`. Returns
    /// `false` (and leaves the voice untouched) if this is a release trigger
    /// whose projected attenuation already exceeds the audibility limit.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        module_srate: u32,
        channel_no: u8,
        channel: &Channel,
        program: Arc<Program>,
        layer: LayerHandle,
        note: u8,
        vel: u8,
        current_time: u64,
        offset_random_draw: u64,
        delay_random_draw: u64,
        pipe: Option<Box<dyn PrefetchPipe>>,
        exgroups: &mut Vec<u32>,
        max_groups: usize,
        diagnostics: &dyn Diagnostics,
    ) -> bool {
        if layer.trigger == TriggerMode::Release {
            let age_samples = channel.age_since_noteon(note, current_time);
            let age_seconds = age_samples as f64 / module_srate as f64;
            if age_seconds * layer.rt_decay > RELEASE_TRIGGER_ATTENUATION_LIMIT_DB {
                return false;
            }
        }

        let waveform = layer.eff_waveform.clone();
        let frames = waveform.as_ref().map(|w| w.frames()).unwrap_or(0);
        let preloaded_frames = waveform.as_ref().map(|w| w.preloaded_frames()).unwrap_or(0);

        if pipe.is_none() && frames > preloaded_frames && preloaded_frames > 0 {
            diagnostics.pipe_exhausted(note, channel_no);
        }
        self.current_pipe = pipe;

        self.delay = layer.delay + delay_random_draw;
        self.gain_fromvel = 1.0
            + (layer.eff_velcurve[vel as usize & 0x7f] - 1.0) * layer.amp_veltrack / 100.0;

        self.amp_lfo = Lfo::new(LfoParams {
            freq: layer.amp_lfo_freq,
            delay_samples: 0,
            fade_samples: 0,
        });
        self.fil_lfo = Lfo::new(LfoParams {
            freq: layer.fil_lfo_freq,
            delay_samples: 0,
            fade_samples: 0,
        });
        self.pitch_lfo = Lfo::new(LfoParams {
            freq: layer.pitch_lfo_freq,
            delay_samples: 0,
            fade_samples: 0,
        });
        self.filter.reset();
        self.filter2.reset();
        self.extra_onepole.reset();
        self.tonectl.reset();
        for band in &mut self.eq {
            band.reset();
        }
        if layer.tonectl_freq != 0.0 {
            self.tonectl_coeffs =
                OnePoleCoeffs::high_shelf(layer.tonectl_freq, module_srate as f64, db2gain(layer.tonectl));
        }

        self.amp_env = Envelope::new(layer.amp_env.clone());
        self.fil_env = Envelope::new(layer.fil_env.clone());
        self.pitch_env = Envelope::new(layer.pitch_env.clone());

        let max_end = if frames == 0 {
            0
        } else {
            layer.resolved_end()
        };
        let offset = (layer.offset + offset_random_draw)
            .saturating_add_signed(layer.reloffset)
            .min(max_end);

        if layer.group != 0 && !exgroups.contains(&layer.group) && exgroups.len() < max_groups {
            exgroups.push(layer.group);
        }

        let mode = match waveform.as_ref().map(|w| w.channels()).unwrap_or(1) {
            2 => VoiceMode::Stereo16,
            _ => VoiceMode::Mono16,
        };

        self.channel_no = Some(channel_no);
        self.program = Some(program);
        self.layer = Some(layer.clone());
        self.note = note;
        self.vel = vel;
        self.age = 0;
        self.released = false;
        self.last_waveform_frames = frames;
        self.last_level = None;
        self.last_level_min_rate = 0;
        self.last_eq_bitmask = layer.eq_bitmask;
        self.loop_mode = layer.eff_loop_mode;
        self.output_pair_no = layer.output;
        self.send1bus = layer.effect1bus;
        self.send2bus = layer.effect2bus;
        self.send1gain = layer.effect1;
        self.send2gain = layer.effect2;
        self.layer_changed = true;

        for nif in &layer.nifs {
            nif(self);
        }

        self.gen = Gen::default();
        self.gen.cur_sample_end = layer.resolved_end();
        if let Some(pipe) = &mut self.current_pipe {
            // The pipe's buffer window already starts at frame 0 of
            // playback; skip it ahead by `offset` instead of seeking the
            // local cursor, which stays window-relative.
            pipe.consumed(offset);
        } else {
            self.gen.seek(offset);
        }

        self.mode = mode;
        true
    }

    /// `release(is_polyaft)`.
    pub fn release(&mut self, is_polyaft: bool) {
        let Some(layer) = &self.layer else { return };
        let applies = (layer.eff_loop_mode == LoopMode::OneShotChokeable) == is_polyaft;
        if !applies {
            return;
        }
        if self.age < self.delay {
            self.released = true;
            return;
        }
        if layer.eff_loop_mode == LoopMode::OneShot || layer.count > 0 {
            return;
        }
        self.released = true;
        if layer.eff_loop_mode == LoopMode::LoopSustain {
            if let Some(pipe) = &mut self.current_pipe {
                pipe.break_loop(self.gen.cur_sample_end);
            }
        }
    }

    fn modulation_value(&self, channel: &Channel, src: ModSource) -> f64 {
        match src {
            ModSource::Cc(n) => channel.cc(n) as f64 / 127.0,
            other => self.mod_sources.get(other).unwrap_or(0.0),
        }
    }

    fn apply_modulations(&self, channel: &Channel, layer: &LayerHandle, dest: &mut ModDestVector) {
        for entry in &layer.modulations {
            let mut value = apply_polarity(
                self.modulation_value(channel, entry.src),
                entry.flags,
            );
            if let Some(src2) = entry.src2 {
                value *= apply_polarity(self.modulation_value(channel, src2), entry.flags >> 2);
            }
            let contribution = value * entry.amount;
            match entry.dest {
                ModDest::Gain => dest.gain += contribution,
                ModDest::Pitch => dest.pitch += contribution,
                ModDest::Cutoff => dest.cutoff += contribution,
                ModDest::Resonance => dest.resonance += contribution,
                ModDest::ToneControl => dest.tonectl += contribution,
            }
        }
    }

    /// Voice per-block process (the 19-step chain). `outputs` is one stereo
    /// buffer per output bus, indexed exactly as `output_pair_no`/aux bus
    /// numbers resolve; `srate`/`aux_offset` come from the owning module.
    #[allow(clippy::too_many_arguments)]
    pub fn process_block(
        &mut self,
        channel: &Channel,
        block_len: u32,
        srate: f64,
        output_pairs: u32,
        aux_offset: u32,
        outputs: &mut [crate::module::OutputBus],
    ) {
        if self.mode == VoiceMode::Inactive {
            return;
        }
        let Some(layer) = self.layer.clone() else {
            self.mode = VoiceMode::Inactive;
            return;
        };

        // 1. Envelope fast-finish.
        self.amp_env.fast_finish_if_silent_decay();

        // 2. Delay.
        self.age += block_len as u64;
        if self.age < self.delay {
            return;
        }

        // 3. Layer change.
        if self.layer_changed {
            if layer.eff_waveform.is_none() {
                self.mode = VoiceMode::Inactive;
                return;
            }
            self.last_waveform_frames = layer.eff_waveform.as_ref().unwrap().frames();
            self.gen.cur_sample_end = layer.resolved_end();
            if layer.eq_bitmask != self.last_eq_bitmask {
                for (i, band) in self.eq.iter_mut().enumerate() {
                    let bit = match i {
                        0 => EqBitmask::EQ1,
                        1 => EqBitmask::EQ2,
                        _ => EqBitmask::EQ3,
                    };
                    if layer.eq_bitmask.contains(bit) && !self.last_eq_bitmask.contains(bit) {
                        band.reset();
                    }
                }
                self.last_eq_bitmask = layer.eq_bitmask;
            }
            for i in 0..3 {
                let band = layer.eq[i];
                let velscl = self.vel as f64 / 127.0;
                let freq = band.effective_freq + velscl * band.vel2freq;
                let gain = db2gain(0.5 * (band.gain + velscl * band.vel2gain));
                self.eq_coeffs[i] = BiquadCoeffs::peaking_eq(freq.max(1.0), srate, band.bw.max(0.01), gain);
            }
            self.layer_changed = false;
        }

        // 4. Modulation sources.
        let pitch_note = (self.note as f64 - layer.pitch_keycenter as f64) * layer.pitch_keytrack
            / 100.0
            + layer.tune
            + 100.0 * layer.transpose as f64;
        let pitchwheel = channel.pitchwheel() as f64;
        let bend_range = if pitchwheel > 0.0 {
            layer.bend_up
        } else {
            layer.bend_down
        };
        let pitch_bend = pitchwheel * bend_range / 8192.0;

        self.mod_sources.velocity = self.vel as f64 / 127.0;
        self.mod_sources.pitch = (pitch_note + pitch_bend) / 100.0;
        self.mod_sources.poly_aftertouch = 0.0;
        self.mod_sources.pitch_env = self.pitch_env.advance(block_len as u64) / 100.0;
        self.mod_sources.filter_env = self.fil_env.advance(block_len as u64) / 100.0;
        self.mod_sources.amp_env = self.amp_env.advance(block_len as u64) / 100.0;
        if self.released {
            self.pitch_env.release();
            self.fil_env.release();
            self.amp_env.release();
        }
        self.mod_sources.amp_lfo = self.amp_lfo.advance(block_len as u64, srate);
        self.mod_sources.filter_lfo = self.fil_lfo.advance(block_len as u64, srate);
        self.mod_sources.pitch_lfo = self.pitch_lfo.advance(block_len as u64, srate);

        // 5. Tail check.
        if self.amp_env.is_finished() {
            let four_pole = matches!(layer.fil_type, FilterType::Lp24 | FilterType::Hp24);
            let filters_silent = !self.filter.is_audible(FILTER_SILENCE_EPS)
                && (!four_pole || !self.filter2.is_audible(FILTER_SILENCE_EPS));
            if filters_silent {
                self.mode = VoiceMode::Inactive;
                return;
            }
        }

        // 6. Modulation application.
        let mut dest = ModDestVector {
            gain: 0.0,
            pitch: pitch_note + pitch_bend,
            cutoff: 0.0,
            resonance: 0.0,
            tonectl: 0.0,
        };
        self.apply_modulations(channel, &layer, &mut dest);
        if layer.trigger == TriggerMode::Release {
            dest.gain -= self.age as f64 * layer.rt_decay / srate;
        }

        // 7. Pitch -> rate.
        let freq = layer.eff_freq * 2f64.powf(dest.pitch / 1200.0);
        let freq64 = ((freq / srate) * (1u64 << 32) as f64).max(0.0) as u64;

        // 8. Band-limited level selection.
        let mut data_source: Option<&[i16]> = None;
        if self.current_pipe.is_none() {
            if let Some(wf) = &layer.eff_waveform {
                let levels = wf.levels();
                if !levels.is_empty() {
                    let cached_ok = self
                        .last_level
                        .map(|idx| freq64 > self.last_level_min_rate && freq64 <= levels[idx].max_rate)
                        .unwrap_or(false);
                    if !cached_ok {
                        let mut found = None;
                        let mut prev_cap = 0u64;
                        for (idx, level) in levels.iter().enumerate() {
                            if level.max_rate >= freq64 {
                                found = Some(idx);
                                break;
                            }
                            prev_cap = level.max_rate;
                        }
                        self.last_level = found;
                        self.last_level_min_rate = prev_cap;
                    }
                    if let Some(idx) = self.last_level {
                        data_source = Some(&levels[idx].data);
                    }
                }
                if data_source.is_none() {
                    data_source = Some(wf.data());
                }
            }
        }

        // 9. Loop selection.
        let play_loop = layer.loop_end > 0
            && (layer.eff_loop_mode == LoopMode::LoopContinuous
                || (layer.eff_loop_mode == LoopMode::LoopSustain && !self.released))
            && layer.on_cc_number == -1;
        if play_loop {
            self.gen.loop_start = Some(layer.loop_start);
            self.gen.loop_end = layer.loop_end;
        } else {
            self.gen.loop_start = None;
            self.gen.loop_end = self.gen.cur_sample_end;
        }

        // 12. Timestretch: not implemented (see design notes); both deltas
        // track the resolved playback rate.
        self.gen.bigdelta = freq64;
        self.gen.virtdelta = freq64;

        // 13. Gain & pan.
        let cc7 = channel.cc(7) as f64 * 128.0;
        let cc11 = channel.cc(11) as f64 * 128.0;
        let mut gain = self.amp_env.value()
            * db2gain(layer.volume_linearized)
            * self.gain_fromvel
            * (cc7 / CC_FULL_SCALE)
            * (cc11 / CC_FULL_SCALE);
        if dest.gain != 0.0 {
            gain *= db2gain(dest.gain);
        }
        gain = gain.min(2.0);
        let cc10 = channel.cc(10) as f64 / 127.0;
        let pan = (((layer.pan + 100.0) / 200.0) + (cc10 - 0.5) * 2.0).clamp(0.0, 1.0);
        let lgain = (gain * (1.0 - pan) / 32768.0) as f32;
        let rgain = (gain * pan / 32768.0) as f32;

        // 14. Filter coefficients.
        if layer.logcutoff >= 0.0 {
            let keytrack = (self.note as f64 - layer.fil_keycenter as f64) * layer.fil_keytrack;
            let veltrack = (self.vel as f64 / 127.0) * layer.fil_veltrack;
            let logcutoff =
                (layer.logcutoff + dest.cutoff + keytrack + veltrack).clamp(0.0, 12798.0);
            let cutoff_hz = 440.0 * 2f64.powf((logcutoff - 6900.0) / 1200.0);
            let four_pole = matches!(
                layer.fil_type,
                FilterType::Lp24 | FilterType::Hp24 | FilterType::Lp24Hybrid | FilterType::Lp24Nr | FilterType::Hp24Nr
            );
            let resonance = (layer.resonance_linearized
                * db2gain(if four_pole { 0.5 } else { 1.0 } * dest.resonance))
            .clamp(0.7, 32.0);
            match layer.fil_type {
                FilterType::Lp12 | FilterType::Lp24 => {
                    self.filter_coeffs = BiquadCoeffs::lowpass(cutoff_hz, srate, resonance);
                    self.filter_coeffs2 = self.filter_coeffs;
                }
                FilterType::Hp12 | FilterType::Hp24 => {
                    self.filter_coeffs = BiquadCoeffs::highpass(cutoff_hz, srate, resonance);
                    self.filter_coeffs2 = self.filter_coeffs;
                }
                FilterType::Bp6 | FilterType::Bp12 => {
                    self.filter_coeffs = BiquadCoeffs::bandpass(cutoff_hz, srate, resonance);
                    self.filter_coeffs2 = self.filter_coeffs;
                }
                FilterType::Lp6 | FilterType::Lp12Nr | FilterType::Lp24Nr => {
                    self.extra_onepole_coeffs = OnePoleCoeffs::lowpass(cutoff_hz, srate);
                }
                FilterType::Hp6 | FilterType::Hp12Nr | FilterType::Hp24Nr => {
                    self.extra_onepole_coeffs = OnePoleCoeffs::highpass(cutoff_hz, srate);
                }
                FilterType::Lp24Hybrid => {
                    self.filter_coeffs = BiquadCoeffs::lowpass(cutoff_hz, srate, resonance);
                    self.extra_onepole_coeffs = OnePoleCoeffs::lowpass(cutoff_hz, srate);
                }
                FilterType::None => {}
            }
        }

        // 15. Tone control.
        if layer.tonectl_freq != 0.0 {
            let gain_db = layer.tonectl + dest.tonectl;
            let shelf_gain = if gain_db.abs() < 1e-6 { 1.0 } else { db2gain(gain_db) };
            self.tonectl_coeffs = OnePoleCoeffs::high_shelf(layer.tonectl_freq, srate, shelf_gain);
        }

        // 16. Sample generation. A streaming pipe serves a small sliding
        // window starting at frame 0 every call; `gen.bigpos`'s fractional
        // part carries across windows, its integer part does not (that part
        // is reported back to the pipe via `consumed` instead). Loop
        // wraparound for a streaming voice is the pipe's own job (see
        // `release`'s use of `break_loop`), not this local cursor's.
        let mut scratch = vec![0.0f32; block_len as usize * 2];
        let still_playing = if let Some(pipe) = &mut self.current_pipe {
            let remaining = pipe.remaining();
            if remaining <= 4 {
                self.mode = VoiceMode::Inactive;
                return;
            }
            let channels = layer.eff_waveform.as_ref().map(|w| w.channels()).unwrap_or(1);
            let to_generate = block_len.min((remaining - 4) as u32);
            let buf_frames = pipe.buffer_frames() as u64;
            let mut window = Gen {
                bigpos: self.gen.bigpos & 0xFFFF_FFFF,
                bigdelta: self.gen.bigdelta,
                virtdelta: self.gen.virtdelta,
                loop_start: None,
                loop_end: buf_frames,
                cur_sample_end: buf_frames,
            };
            let buf = pipe.buffer();
            let played = generate_samples(&mut window, buf, channels, buf_frames, to_generate, &mut scratch);
            let consumed_frames = window.bigpos >> 32;
            pipe.consumed(consumed_frames);
            self.gen.bigpos = window.bigpos - (consumed_frames << 32);
            played
        } else if let Some(data) = data_source {
            let channels = layer.eff_waveform.as_ref().map(|w| w.channels()).unwrap_or(1);
            generate_samples(
                &mut self.gen,
                data,
                channels,
                self.last_waveform_frames,
                block_len,
                &mut scratch,
            )
        } else {
            false
        };

        // 17. DSP chain: filter, second filter, tone control, EQ.
        for i in (0..scratch.len()).step_by(2) {
            let (mut l, mut r) = (scratch[i] as f64, scratch[i + 1] as f64);
            match layer.fil_type {
                FilterType::Lp12 | FilterType::Hp12 | FilterType::Bp6 => {
                    let (ol, or) = self.filter.process(&self.filter_coeffs, l, r);
                    l = ol;
                    r = or;
                }
                FilterType::Lp24 | FilterType::Hp24 | FilterType::Bp12 => {
                    let (ol, or) = self.filter.process(&self.filter_coeffs, l, r);
                    let (ol, or) = self.filter2.process(&self.filter_coeffs2, ol, or);
                    l = ol;
                    r = or;
                }
                FilterType::Lp6
                | FilterType::Hp6
                | FilterType::Lp12Nr
                | FilterType::Hp12Nr
                | FilterType::Lp24Nr
                | FilterType::Hp24Nr => {
                    let (ol, or) = self.extra_onepole.process(&self.extra_onepole_coeffs, l, r);
                    l = ol;
                    r = or;
                }
                FilterType::Lp24Hybrid => {
                    let (ol, or) = self.filter.process(&self.filter_coeffs, l, r);
                    let (ol, or) = self.extra_onepole.process(&self.extra_onepole_coeffs, ol, or);
                    l = ol;
                    r = or;
                }
                FilterType::None => {}
            }
            if layer.tonectl_freq != 0.0 {
                let (ol, or) = self.tonectl.process(&self.tonectl_coeffs, l, r);
                l = ol;
                r = or;
            }
            for (band_idx, band) in self.eq.iter_mut().enumerate() {
                let bit = match band_idx {
                    0 => EqBitmask::EQ1,
                    1 => EqBitmask::EQ2,
                    _ => EqBitmask::EQ3,
                };
                if layer.eq_bitmask.contains(bit) {
                    let (ol, or) = band.process(&self.eq_coeffs[band_idx], l, r);
                    l = ol;
                    r = or;
                }
            }
            scratch[i] = (l as f32) * lgain;
            scratch[i + 1] = (r as f32) * rgain;
        }

        // 18. Mix-out.
        let pair = ((layer.output + channel.output_shift) % output_pairs.max(1)) as usize;
        if let Some(bus) = outputs.get_mut(pair) {
            mix_block_into(&scratch, &mut bus.left, &mut bus.right);
        }
        if self.send1bus != 0 && self.send1gain != 0.0 {
            let idx = aux_offset as usize + (self.send1bus as usize - 1);
            if let Some(bus) = outputs.get_mut(idx) {
                mix_block_into_with_gain(&scratch, &mut bus.left, &mut bus.right, self.send1gain as f32, self.send1gain as f32);
            }
        }
        if self.send2bus != 0 && self.send2gain != 0.0 {
            let idx = aux_offset as usize + (self.send2bus as usize - 1);
            if let Some(bus) = outputs.get_mut(idx) {
                mix_block_into_with_gain(&scratch, &mut bus.left, &mut bus.right, self.send2gain as f32, self.send2gain as f32);
            }
        }

        // 19. Generator end-of-stream.
        if !still_playing {
            self.mode = VoiceMode::Inactive;
        }
    }
}

/// Linear-interpolated playback with loop wraparound. Returns whether the
/// voice is still playing after generating up to `block_len` frames; the
/// tail of `scratch` past whatever was generated is left zeroed.
///
/// Simplified relative to the reference design: no band-limited splice
/// buffer at loop joins, no timestretch. See design notes.
fn generate_samples(
    gen: &mut Gen,
    data: &[i16],
    channels: u32,
    frames_available: u64,
    block_len: u32,
    scratch: &mut [f32],
) -> bool {
    for v in scratch.iter_mut() {
        *v = 0.0;
    }
    if frames_available == 0 || gen.bigdelta == 0 {
        return false;
    }
    let mut pos = gen.bigpos;
    let mut playing = true;
    for i in 0..block_len as usize {
        if !playing {
            break;
        }
        let idx = pos >> 32;
        if let Some(loop_start) = gen.loop_start {
            if idx >= gen.loop_end {
                let overshoot = pos - (gen.loop_end << 32);
                pos = (loop_start << 32) + overshoot;
            }
        } else if idx >= gen.cur_sample_end.min(frames_available) {
            playing = false;
            break;
        }
        let idx = (pos >> 32).min(frames_available - 1) as usize;
        let next_idx = (idx + 1).min(frames_available as usize - 1);
        let frac = (pos & 0xFFFF_FFFF) as f64 / (1u64 << 32) as f64;
        if channels == 2 {
            let l0 = data[idx * 2] as f64;
            let l1 = data[next_idx * 2] as f64;
            let r0 = data[idx * 2 + 1] as f64;
            let r1 = data[next_idx * 2 + 1] as f64;
            scratch[2 * i] = (l0 + (l1 - l0) * frac) as f32;
            scratch[2 * i + 1] = (r0 + (r1 - r0) * frac) as f32;
        } else {
            let s0 = data[idx] as f64;
            let s1 = data[next_idx] as f64;
            let v = (s0 + (s1 - s0) * frac) as f32;
            scratch[2 * i] = v;
            scratch[2 * i + 1] = v;
        }
        pos += gen.bigdelta;
    }
    gen.bigpos = pos;
    playing
}
