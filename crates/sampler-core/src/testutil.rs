//! Test-only waveform/pipe fixtures shared across module test suites.

use sampler_common::{PrefetchPipe, Waveform, WaveformLevel};

/// A fully in-memory waveform, used wherever tests need something that
/// implements [`Waveform`] without touching disk.
pub struct MemoryWaveform {
    channels: u32,
    frames: u64,
    data: Vec<i16>,
    levels: Vec<WaveformLevel>,
}

impl MemoryWaveform {
    /// A mono waveform with every sample fully preloaded.
    pub fn mono(data: Vec<i16>) -> Self {
        let frames = data.len() as u64;
        Self {
            channels: 1,
            frames,
            data,
            levels: Vec::new(),
        }
    }

    /// A stereo waveform built from interleaved samples.
    pub fn stereo(data: Vec<i16>) -> Self {
        let frames = data.len() as u64 / 2;
        Self {
            channels: 2,
            frames,
            data,
            levels: Vec::new(),
        }
    }

    /// Attach band-limited mip levels for cache/scan tests.
    pub fn with_levels(mut self, levels: Vec<WaveformLevel>) -> Self {
        self.levels = levels;
        self
    }
}

impl Waveform for MemoryWaveform {
    fn channels(&self) -> u32 {
        self.channels
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

/// A waveform with only a partial preloaded head, the rest served through
/// a [`FakePipe`].
pub struct StreamingWaveform {
    channels: u32,
    frames: u64,
    preloaded_frames: u64,
    preloaded_data: Vec<i16>,
}

impl StreamingWaveform {
    /// Build a mono streaming waveform with `preloaded` frames resident.
    pub fn mono(total_frames: u64, preloaded: u64) -> Self {
        Self {
            channels: 1,
            frames: total_frames,
            preloaded_frames: preloaded,
            preloaded_data: vec![0i16; preloaded as usize],
        }
    }
}

impl Waveform for StreamingWaveform {
    fn channels(&self) -> u32 {
        self.channels
    }

    fn frames(&self) -> u64 {
        self.frames
    }

    fn preloaded_frames(&self) -> u64 {
        self.preloaded_frames
    }

    fn data(&self) -> &[i16] {
        &self.preloaded_data
    }

    fn levels(&self) -> &[WaveformLevel] {
        &[]
    }
}

/// A minimal [`PrefetchPipe`] double that never actually fetches from
/// disk; `remaining()` is fixed at construction and `buffer()` is a zeroed
/// scratch area. Records loop-break calls for assertions.
pub struct FakePipe {
    remaining: usize,
    buffer: Vec<i16>,
    loop_start: Option<u64>,
    loop_end: u64,
    pub consumed_total: u64,
}

impl FakePipe {
    /// Construct a pipe that reports `remaining` frames available and
    /// serves `buffer_frames` zeroed frames per read.
    pub fn new(remaining: usize, buffer_frames: usize) -> Self {
        Self {
            remaining,
            buffer: vec![0i16; buffer_frames],
            loop_start: Some(0),
            loop_end: u64::MAX,
            consumed_total: 0,
        }
    }
}

impl PrefetchPipe for FakePipe {
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
        self.consumed_total += count;
        self.remaining = self.remaining.saturating_sub(count as usize);
    }

    fn file_loop_start(&self) -> Option<u64> {
        self.loop_start
    }

    fn file_loop_end(&self) -> u64 {
        self.loop_end
    }

    fn break_loop(&mut self, new_end: u64) {
        self.loop_start = None;
        self.loop_end = new_end;
    }
}
