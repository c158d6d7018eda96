//! The sampler module: owns the fixed voice pool, the sample clock, and
//! ties channels, programs, and voices together for note dispatch and
//! per-block processing.

use std::sync::Arc;

use sampler_common::PrefetchPipe;

use crate::channel::Channel;
use crate::matcher::next_layer;
use crate::program::Program;
use crate::types::VoiceMode;
use crate::voice::Voice;
use crate::Diagnostics;

/// Number of simultaneously allocatable voices. Fixed at construction time;
/// a pool this size comfortably covers a handful of channels each holding a
/// sustain pedal's worth of notes plus their release tails.
pub const MAX_VOICES: usize = 64;

/// Choke groups tracked per note-on dispatch; bounds how many distinct
/// `group` values one `start` call will remember for exclusive-group
/// bookkeeping.
const MAX_EXCLUSIVE_GROUPS: usize = 8;

/// One stereo output bus. `Module::process_block` owns `output_pairs` of
/// these as the main mix banks, followed by aux send buses starting at
/// `aux_offset`.
#[derive(Debug, Clone, Default)]
pub struct OutputBus {
    /// Left channel samples, one per frame in the block.
    pub left: Vec<f32>,
    /// Right channel samples, one per frame in the block.
    pub right: Vec<f32>,
}

impl OutputBus {
    /// A zeroed bus sized for `block_len` frames.
    pub fn sized(block_len: usize) -> Self {
        Self {
            left: vec![0.0; block_len],
            right: vec![0.0; block_len],
        }
    }

    /// Zero both channels in place, reused across blocks to avoid
    /// reallocating.
    pub fn clear(&mut self) {
        self.left.iter_mut().for_each(|v| *v = 0.0);
        self.right.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Owns the voice pool, the running sample clock, and output bus layout.
/// A `Module` is the audio thread's side of the system: note dispatch and
/// `process_block` run here, while program construction and assignment
/// happen on the control thread via [`Channel::set_program`].
pub struct Module {
    /// Output sample rate.
    pub srate: u32,
    /// `1.0 / srate`, precomputed since it's read every block.
    pub srate_inv: f64,
    /// Number of main output bus pairs.
    pub output_pairs: u32,
    /// First aux send bus index; aux bus `n` (1-based) lives at
    /// `aux_offset + n - 1`.
    pub aux_offset: u32,
    serial_no: u64,
    current_time: u64,
    voices: Vec<Voice>,
    free_head: Option<usize>,
}

impl Module {
    /// A module with a full voice pool and no elapsed time.
    pub fn new(srate: u32, output_pairs: u32) -> Self {
        let mut voices: Vec<Voice> = (0..MAX_VOICES).map(|_| Voice::new()).collect();
        let mut free_head = None;
        for idx in (0..MAX_VOICES).rev() {
            voices[idx].link.next = free_head;
            free_head = Some(idx);
        }
        Self {
            srate,
            srate_inv: 1.0 / srate as f64,
            output_pairs,
            aux_offset: output_pairs,
            serial_no: 0,
            current_time: 0,
            voices,
            free_head,
        }
    }

    /// Samples elapsed since the module was constructed.
    pub fn current_time(&self) -> u64 {
        self.current_time
    }

    /// Number of voices currently playing (not on the free list).
    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.mode != VoiceMode::Inactive).count()
    }

    fn allocate_voice(&mut self) -> Option<usize> {
        let idx = self.free_head?;
        self.free_head = self.voices[idx].link.next;
        self.voices[idx].link = Default::default();
        Some(idx)
    }

    fn free_voice(&mut self, idx: usize) {
        self.voices[idx].link = Default::default();
        self.voices[idx].link.next = self.free_head;
        self.free_head = Some(idx);
    }

    fn link_running(&mut self, channel: &mut Channel, idx: usize) {
        self.voices[idx].link.prev = None;
        self.voices[idx].link.next = channel.running_head;
        if let Some(head) = channel.running_head {
            self.voices[head].link.prev = Some(idx);
        }
        channel.running_head = Some(idx);
    }

    fn unlink_running(&mut self, channel: &mut Channel, idx: usize) {
        let prev = self.voices[idx].link.prev;
        let next = self.voices[idx].link.next;
        match prev {
            Some(p) => self.voices[p].link.next = next,
            None => channel.running_head = next,
        }
        if let Some(n) = next {
            self.voices[n].link.prev = prev;
        }
    }

    fn inactivate_and_free(&mut self, channel: &mut Channel, idx: usize) {
        self.unlink_running(channel, idx);
        let _ = self.voices[idx].inactivate(true);
        self.free_voice(idx);
    }

    /// Dispatch a note-on: run the matcher over `program`'s attack layers,
    /// start a voice for whatever matches, and choke the layer's `off_by`
    /// group if it names one. Returns the started voice's pool index.
    #[allow(clippy::too_many_arguments)]
    pub fn note_on(
        &mut self,
        channel_no: u8,
        channel: &mut Channel,
        program: &Arc<Program>,
        note: u8,
        vel: u8,
        random: f64,
        pipe: Option<Box<dyn PrefetchPipe>>,
        diagnostics: &dyn Diagnostics,
    ) -> Option<usize> {
        let rll = program.rll();
        let (_, layer) = next_layer(&rll.attack_layers, channel, channel_no, note, vel, random)?;

        let idx = match self.allocate_voice() {
            Some(idx) => idx,
            None => {
                diagnostics.pipe_exhausted(note, channel_no);
                return None;
            }
        };

        self.serial_no += 1;
        self.voices[idx].activate(VoiceMode::Mono16, self.serial_no);

        let mut exgroups = Vec::new();
        let off_by = layer.off_by;
        let started = self.voices[idx].start(
            self.srate,
            channel_no,
            channel,
            program.clone(),
            layer,
            note,
            vel,
            self.current_time,
            0,
            0,
            pipe,
            &mut exgroups,
            MAX_EXCLUSIVE_GROUPS,
            diagnostics,
        );

        if !started {
            let _ = self.voices[idx].inactivate(false);
            self.free_voice(idx);
            return None;
        }

        channel.note_on(note, self.current_time);
        self.link_running(channel, idx);

        if off_by != 0 {
            self.choke_group(channel, off_by, idx);
        }

        Some(idx)
    }

    /// Inactivate every running voice on `channel` whose layer's `group`
    /// equals `group`, except `keep_idx` itself.
    fn choke_group(&mut self, channel: &mut Channel, group: u32, keep_idx: usize) {
        let mut idx = channel.running_head;
        while let Some(i) = idx {
            let next = self.voices[i].link.next;
            if i != keep_idx && self.voices[i].group() == Some(group) {
                self.inactivate_and_free(channel, i);
            }
            idx = next;
        }
    }

    /// Dispatch a note-off: release every running voice on `channel`
    /// currently playing `note`, then start any release-triggered layer
    /// the program matches for it.
    #[allow(clippy::too_many_arguments)]
    pub fn note_off(
        &mut self,
        channel_no: u8,
        channel: &mut Channel,
        program: &Arc<Program>,
        note: u8,
        vel: u8,
        random: f64,
        pipe: Option<Box<dyn PrefetchPipe>>,
        diagnostics: &dyn Diagnostics,
    ) {
        let mut idx = channel.running_head;
        while let Some(i) = idx {
            let next = self.voices[i].link.next;
            if self.voices[i].note() == Some(note) {
                self.voices[i].release(false);
            }
            idx = next;
        }

        let rll = program.rll();
        let Some((_, layer)) = next_layer(&rll.release_layers, channel, channel_no, note, vel, random)
        else {
            return;
        };
        let Some(vidx) = self.allocate_voice() else {
            return;
        };

        self.serial_no += 1;
        self.voices[vidx].activate(VoiceMode::Mono16, self.serial_no);
        let mut exgroups = Vec::new();
        let started = self.voices[vidx].start(
            self.srate,
            channel_no,
            channel,
            program.clone(),
            layer,
            note,
            vel,
            self.current_time,
            0,
            0,
            pipe,
            &mut exgroups,
            MAX_EXCLUSIVE_GROUPS,
            diagnostics,
        );
        if started {
            self.link_running(channel, vidx);
        } else {
            let _ = self.voices[vidx].inactivate(false);
            self.free_voice(vidx);
        }
    }

    /// Release every running voice on `channel` (sustain pedal up /
    /// all-notes-off), without regard to which note they're playing.
    pub fn release_all(&mut self, channel: &Channel, is_polyaft: bool) {
        let mut idx = channel.running_head;
        while let Some(i) = idx {
            let next = self.voices[i].link.next;
            self.voices[i].release(is_polyaft);
            idx = next;
        }
    }

    /// Process one block: runs every running voice on every channel,
    /// mixing into freshly-cleared `buses`, and reclaims any voice that
    /// inactivates this block back onto the free list. Advances the
    /// module's sample clock by `block_len`.
    pub fn process_block(&mut self, channels: &mut [Channel], block_len: u32, buses: &mut [OutputBus]) {
        for bus in buses.iter_mut() {
            bus.clear();
        }
        let srate = self.srate as f64;
        let output_pairs = self.output_pairs;
        let aux_offset = self.aux_offset;

        for channel in channels.iter_mut() {
            let mut idx = channel.running_head;
            while let Some(i) = idx {
                let next = self.voices[i].link.next;
                self.voices[i].process_block(channel, block_len, srate, output_pairs, aux_offset, buses);
                if self.voices[i].mode == VoiceMode::Inactive {
                    self.inactivate_and_free(channel, i);
                }
                idx = next;
            }
        }

        self.current_time += block_len as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::NullDiagnostics;
    use crate::layer::Layer;
    use crate::testutil::MemoryWaveform;

    fn program_with_layer(mut layer: Layer) -> Arc<Program> {
        layer.runtime_prepare();
        let mut program = Program::new(0, "p".to_string(), String::new());
        program.add_layer(layer);
        Arc::new(program)
    }

    #[test]
    fn note_on_allocates_and_links_a_voice() {
        let mut module = Module::new(44_100, 1);
        let mut channel = Channel::new();
        let layer = Layer {
            eff_waveform: Some(Arc::new(MemoryWaveform::mono(vec![0i16; 1000]))),
            ..Layer::default()
        };
        let program = program_with_layer(layer);

        let idx = module.note_on(1, &mut channel, &program, 60, 100, 0.0, None, &NullDiagnostics);
        assert!(idx.is_some());
        assert_eq!(module.active_voice_count(), 1);
        assert!(channel.running_head.is_some());
    }

    #[test]
    fn note_off_releases_matching_voices() {
        let mut module = Module::new(44_100, 1);
        let mut channel = Channel::new();
        let layer = Layer {
            eff_waveform: Some(Arc::new(MemoryWaveform::mono(vec![0i16; 1_000_000]))),
            ..Layer::default()
        };
        let program = program_with_layer(layer);

        module.note_on(1, &mut channel, &program, 60, 100, 0.0, None, &NullDiagnostics);
        module.note_off(1, &mut channel, &program, 60, 0, 0.0, None, &NullDiagnostics);

        let idx = channel.running_head.unwrap();
        assert!(module.voices[idx].released());
    }

    #[test]
    fn process_block_reclaims_finished_voices() {
        let mut module = Module::new(44_100, 1);
        let mut channels = vec![Channel::new()];
        let layer = Layer {
            eff_waveform: Some(Arc::new(MemoryWaveform::mono(vec![0i16; 50]))),
            ..Layer::default()
        };
        let program = program_with_layer(layer);
        module.note_on(1, &mut channels[0], &program, 60, 100, 0.0, None, &NullDiagnostics);
        assert_eq!(module.active_voice_count(), 1);

        let mut buses = vec![OutputBus::sized(64)];
        for _ in 0..5 {
            module.process_block(&mut channels, 64, &mut buses);
        }
        assert_eq!(module.active_voice_count(), 0);
        assert!(channels[0].running_head.is_none());
    }
}
