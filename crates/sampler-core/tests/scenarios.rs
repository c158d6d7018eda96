//! End-to-end playback scenarios driven through the public API only:
//! matcher, voice, and module, the way a host embedding this crate would
//! use them.

use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;

use sampler_common::{ModDest, ModSource, ModulationEntry, PrefetchPipe, Waveform, WaveformLevel};
use sampler_core::layer::{Layer, LayerHandle};
use sampler_core::module::OutputBus;
use sampler_core::types::{LoopMode, TriggerMode};
use sampler_core::{next_layer, Channel, Diagnostics, Module, Program, Voice};

struct Silent;
impl Diagnostics for Silent {}

/// A fully preloaded waveform with constant sample data, optionally with
/// band-limited mip levels attached.
struct ConstWaveform {
    frames: u64,
    data: Vec<i16>,
    levels: Vec<WaveformLevel>,
}

impl ConstWaveform {
    fn mono(data: Vec<i16>) -> Self {
        Self {
            frames: data.len() as u64,
            data,
            levels: Vec::new(),
        }
    }

    fn with_levels(mut self, levels: Vec<WaveformLevel>) -> Self {
        self.levels = levels;
        self
    }
}

impl Waveform for ConstWaveform {
    fn channels(&self) -> u32 {
        1
    }
    fn frames(&self) -> u64 {
        self.frames
    }
    fn preloaded_frames(&self) -> u64 {
        self.frames
    }
    fn data(&self) -> &[i16] {
        &self.data
    }
    fn levels(&self) -> &[WaveformLevel] {
        &self.levels
    }
}

/// A waveform with no preloaded data at all, played entirely through a
/// [`PrefetchPipe`].
struct StreamingWaveform {
    frames: u64,
}

impl Waveform for StreamingWaveform {
    fn channels(&self) -> u32 {
        1
    }
    fn frames(&self) -> u64 {
        self.frames
    }
    fn preloaded_frames(&self) -> u64 {
        0
    }
    fn data(&self) -> &[i16] {
        &[]
    }
    fn levels(&self) -> &[WaveformLevel] {
        &[]
    }
}

/// Loop bookkeeping shared with the test via a clone of the `Arc<Mutex<_>>`,
/// since the pipe itself is moved into the voice as a `Box<dyn PrefetchPipe>`.
struct LoopState {
    loop_start: Option<u64>,
    loop_end: u64,
}

struct SharedPipe {
    remaining: usize,
    buffer: Vec<i16>,
    state: Arc<Mutex<LoopState>>,
}

impl PrefetchPipe for SharedPipe {
    fn remaining(&self) -> usize {
        self.remaining
    }
    fn buffer(&self) -> &[i16] {
        &self.buffer
    }
    fn buffer_frames(&self) -> usize {
        self.buffer.len()
    }
    fn consumed(&mut self, count: u64) {
        self.remaining = self.remaining.saturating_sub(count as usize);
    }
    fn file_loop_start(&self) -> Option<u64> {
        self.state.lock().unwrap().loop_start
    }
    fn file_loop_end(&self) -> u64 {
        self.state.lock().unwrap().loop_end
    }
    fn break_loop(&mut self, new_end: u64) {
        let mut state = self.state.lock().unwrap();
        state.loop_start = None;
        state.loop_end = new_end;
    }
}

fn program_with_layers(layers: Vec<Layer>) -> Arc<Program> {
    let mut program = Program::new(0, "p".to_string(), String::new());
    for layer in layers {
        program.add_layer(layer);
    }
    Arc::new(program)
}

// 1. A single mono layer covering the whole keyboard, panned hard left,
// plays out its full frame count and then inactivates.
#[test]
fn simple_mono_note_plays_hard_left_then_inactivates() {
    let data = vec![1000i16; 1000];
    let wf: Arc<dyn Waveform> = Arc::new(ConstWaveform::mono(data));
    let layer = Layer {
        eff_waveform: Some(wf),
        pan: -100.0,
        ..Layer::default()
    };
    let program = program_with_layers(vec![layer]);

    let mut channel = Channel::new();
    channel.set_cc(10, 0); // pan CC defaults to center; force it to force an exact hard-left result

    let mut module = Module::new(44_100, 1);
    let idx = module.note_on(1, &mut channel, &program, 60, 100, 0.0, None, &Silent);
    assert!(idx.is_some());
    assert_eq!(module.active_voice_count(), 1);

    let block_len = 100u32;
    let mut buses = vec![OutputBus::sized(block_len as usize)];
    let mut channels = vec![channel];
    let mut blocks = 0;
    let mut first_block_samples = None;
    while module.active_voice_count() > 0 && blocks < 20 {
        module.process_block(&mut channels, block_len, &mut buses);
        if first_block_samples.is_none() {
            first_block_samples = Some((buses[0].left[0], buses[0].right[0]));
        }
        blocks += 1;
    }

    assert_eq!(module.active_voice_count(), 0);
    assert!((10..=12).contains(&blocks));
    let (left, right) = first_block_samples.unwrap();
    assert_relative_eq!(left, 1000.0 / 32768.0, epsilon = 1e-4);
    assert_eq!(right, 0.0);
}

// 2. Three layers sharing a round-robin group trigger in list order,
// cycling back to the first once all three have fired.
#[test]
fn round_robin_of_three_cycles_in_list_order() {
    let seq_length = 3u32;
    let mut layers: Vec<LayerHandle> = Vec::new();
    for i in 0..seq_length {
        let mut layer = Layer {
            eff_waveform: Some(Arc::new(ConstWaveform::mono(vec![0i16; 16]))),
            ..Layer::default()
        };
        layer.seq_length = seq_length;
        layer.runtime_prepare();
        layer
            .match_state
            .set_current_seq_position(1 + ((seq_length - i) % seq_length));
        layers.push(Arc::new(layer));
    }
    let channel = Channel::new();

    let triggered: Vec<usize> = (0..10)
        .map(|_| next_layer(&layers, &channel, 1, 60, 100, 0.0).unwrap().0)
        .collect();
    assert_eq!(triggered, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
}

// 3. Two layers gated behind distinct keyswitch notes, sharing a tracking
// range that doesn't overlap their playable key range: pressing one
// keyswitch note selects its layer and deselects the other until the
// other keyswitch note is struck.
#[test]
fn keyswitch_selects_between_two_switched_layers() {
    let mut a = Layer {
        eff_waveform: Some(Arc::new(ConstWaveform::mono(vec![0i16; 16]))),
        lokey: 60,
        hikey: 72,
        sw_last: 36,
        sw_lokey: 36,
        sw_hikey: 38,
        ..Layer::default()
    };
    a.runtime_prepare();
    let mut b = Layer {
        eff_waveform: Some(Arc::new(ConstWaveform::mono(vec![0i16; 16]))),
        lokey: 60,
        hikey: 72,
        sw_last: 37,
        sw_lokey: 36,
        sw_hikey: 38,
        ..Layer::default()
    };
    b.runtime_prepare();
    let layers = vec![Arc::new(a), Arc::new(b)];
    let channel = Channel::new();

    assert!(next_layer(&layers, &channel, 1, 36, 100, 0.0).is_none());
    assert_eq!(next_layer(&layers, &channel, 1, 60, 100, 0.0).unwrap().0, 0);
    assert!(next_layer(&layers, &channel, 1, 37, 100, 0.0).is_none());
    assert_eq!(next_layer(&layers, &channel, 1, 60, 100, 0.0).unwrap().0, 1);
    assert_eq!(next_layer(&layers, &channel, 1, 60, 100, 0.0).unwrap().0, 1);
}

// 4. A release-trigger layer with a large `rt_decay` never actually starts
// once the original note has been held long enough that its projected
// attenuation is already inaudible.
#[test]
fn release_trigger_gated_by_projected_attenuation() {
    let attack_wf: Arc<dyn Waveform> = Arc::new(ConstWaveform::mono(vec![500i16; 2_000_000]));
    let attack_layer = Layer {
        eff_waveform: Some(attack_wf),
        trigger: TriggerMode::Attack,
        ..Layer::default()
    };
    let release_wf: Arc<dyn Waveform> = Arc::new(ConstWaveform::mono(vec![500i16; 100]));
    let release_layer = Layer {
        eff_waveform: Some(release_wf),
        trigger: TriggerMode::Release,
        rt_decay: 100.0,
        ..Layer::default()
    };
    let program = program_with_layers(vec![attack_layer, release_layer]);

    let mut module = Module::new(44_100, 1);
    let mut channels = vec![Channel::new()];
    let idx = module.note_on(1, &mut channels[0], &program, 60, 100, 0.0, None, &Silent);
    assert!(idx.is_some());
    assert_eq!(module.active_voice_count(), 1);

    let mut buses = vec![OutputBus::sized(44_100)];
    module.process_block(&mut channels, 44_100, &mut buses); // one second elapsed
    assert_eq!(module.active_voice_count(), 1);

    module.note_off(1, &mut channels[0], &program, 60, 0, 0.0, None, &Silent);
    // rt_decay=100 dB/s * 1s = 100 dB > the audibility limit, so the
    // release-trigger layer never actually starts a second voice.
    assert_eq!(module.active_voice_count(), 1);
}

// 5. A loop-sustain voice served through a streaming pipe breaks its loop
// at release instead of continuing to cycle.
#[test]
fn streaming_loop_breaks_on_release() {
    let wf: Arc<dyn Waveform> = Arc::new(StreamingWaveform { frames: 10_000 });
    let layer = Layer {
        eff_waveform: Some(wf),
        eff_loop_mode: LoopMode::LoopSustain,
        loop_start: 100,
        loop_end: 5_000,
        end: 10_000,
        ..Layer::default()
    };
    let layer: LayerHandle = Arc::new(layer);

    let state = Arc::new(Mutex::new(LoopState {
        loop_start: Some(0),
        loop_end: u64::MAX,
    }));
    let pipe = SharedPipe {
        remaining: 1_000_000,
        buffer: vec![0i16; 256],
        state: state.clone(),
    };

    let program = Arc::new(Program::new(0, "p".to_string(), String::new()));
    let channel = Channel::new();
    let mut voice = Voice::new();
    let mut exgroups = Vec::new();
    let started = voice.start(
        44_100,
        1,
        &channel,
        program,
        layer,
        60,
        100,
        0,
        0,
        0,
        Some(Box::new(pipe)),
        &mut exgroups,
        4,
        &Silent,
    );
    assert!(started);

    let mut outputs = vec![OutputBus::sized(64)];
    voice.process_block(&channel, 64, 44_100.0, 1, 1, &mut outputs);

    assert!(state.lock().unwrap().loop_start.is_some());
    voice.release(false);
    assert_eq!(state.lock().unwrap().loop_start, None);
    assert_eq!(state.lock().unwrap().loop_end, 10_000);
}

// 6. A pitch-down modulation sweep crosses three band-limited mip levels;
// each level's distinct constant sample value shows up in the mix as the
// sweep passes its threshold, both descending and ascending in rate.
#[test]
fn band_limited_level_selection_tracks_a_pitch_sweep() {
    let frames = 100_000usize;
    let base = ConstWaveform::mono(vec![0i16; frames]).with_levels(vec![
        WaveformLevel {
            max_rate: 1_000_000_000,
            data: vec![111i16; frames],
        },
        WaveformLevel {
            max_rate: 2_000_000_000,
            data: vec![222i16; frames],
        },
        WaveformLevel {
            max_rate: 4_000_000_000,
            data: vec![333i16; frames],
        },
    ]);
    let wf: Arc<dyn Waveform> = Arc::new(base);

    let layer = Layer {
        eff_waveform: Some(wf),
        pan: -100.0,
        modulations: vec![ModulationEntry {
            src: ModSource::Cc(1),
            src2: None,
            dest: ModDest::Pitch,
            amount: -4000.0,
            flags: 0,
        }],
        ..Layer::default()
    };
    let program = program_with_layers(vec![layer]);

    let mut channel = Channel::new();
    channel.set_cc(10, 0);
    let mut module = Module::new(44_100, 1);
    let idx = module.note_on(1, &mut channel, &program, 60, 100, 0.0, None, &Silent);
    assert!(idx.is_some());
    let mut channels = vec![channel];
    let mut buses = vec![OutputBus::sized(8)];

    let mut sample_at = |channels: &mut [Channel], buses: &mut [OutputBus], cc1: u8| -> f32 {
        channels[0].set_cc(1, cc1);
        module.process_block(channels, 8, buses);
        buses[0].left[0]
    };

    // Descending rate (increasing cc1 magnitude of the downward pitch
    // sweep) selects level 0, then 1, then 2.
    assert_relative_eq!(sample_at(&mut channels, &mut buses, 89), 111.0 / 32768.0, epsilon = 1e-4);
    assert_relative_eq!(sample_at(&mut channels, &mut buses, 58), 222.0 / 32768.0, epsilon = 1e-4);
    assert_relative_eq!(sample_at(&mut channels, &mut buses, 20), 333.0 / 32768.0, epsilon = 1e-4);

    // Ascending rate back through the same thresholds re-selects the
    // coarser-then-finer levels, not just whatever was last cached.
    assert_relative_eq!(sample_at(&mut channels, &mut buses, 58), 222.0 / 32768.0, epsilon = 1e-4);
    assert_relative_eq!(sample_at(&mut channels, &mut buses, 89), 111.0 / 32768.0, epsilon = 1e-4);
}
