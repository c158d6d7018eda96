//! Per-channel MIDI-ish state: CCs, pitch wheel, switches, and the running
//! voice list, plus the control-thread -> audio-thread program handover.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::program::Program;

/// Number of note-start timestamps tracked, one per MIDI note.
const NOTE_COUNT: usize = 128;

/// Default full-scale value used for volume/expression CCs on a freshly
/// constructed channel, chosen so the gain formula's default contribution
/// is exactly unity (see design notes).
const DEFAULT_CC_FULL: u8 = 127;
/// Default centered value used for pan-like CCs.
const DEFAULT_CC_CENTER: u8 = 64;

/// One MIDI-style input channel.
pub struct Channel {
    /// Raw 7-bit controller values.
    cc: [u8; 128],
    /// Pitch wheel position, roughly `-8192..=8191`.
    pitchwheel: i16,
    /// 128-bit keyswitch bitset, one bit per note.
    switchmask: [u32; 4],
    /// Most recent note-on, or -1 if none yet.
    previous_note: i32,
    /// Per-note last note-on timestamp, in samples, for release-trigger
    /// age computation.
    prev_note_start_time: [u64; NOTE_COUNT],
    /// Added to a layer's own output bus shift.
    pub output_shift: u32,
    /// Head index into the module's voice pool for this channel's running
    /// voices, or `None` if none are playing.
    pub(crate) running_head: Option<usize>,
    /// The program currently assigned to this channel. Swapped by the
    /// control thread, read by the audio thread.
    active_program: RwLock<Option<Arc<Program>>>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    /// A fresh channel with MIDI power-on-like CC defaults (see design
    /// notes): full volume/expression, centered pan.
    pub fn new() -> Self {
        let mut cc = [0u8; 128];
        cc[7] = DEFAULT_CC_FULL;
        cc[10] = DEFAULT_CC_CENTER;
        cc[11] = DEFAULT_CC_FULL;
        Self {
            cc,
            pitchwheel: 0,
            switchmask: [0; 4],
            previous_note: -1,
            prev_note_start_time: [0; NOTE_COUNT],
            output_shift: 0,
            running_head: None,
            active_program: RwLock::new(None),
        }
    }

    /// Read a controller value.
    pub fn cc(&self, number: u8) -> u8 {
        self.cc[number as usize & 0x7f]
    }

    /// Write a controller value.
    pub fn set_cc(&mut self, number: u8, value: u8) {
        self.cc[number as usize & 0x7f] = value;
    }

    /// Current pitch wheel position.
    pub fn pitchwheel(&self) -> i16 {
        self.pitchwheel
    }

    /// Set the pitch wheel position.
    pub fn set_pitchwheel(&mut self, value: i16) {
        self.pitchwheel = value;
    }

    /// Most recently triggered note, or -1 if none yet this session.
    pub fn previous_note(&self) -> i32 {
        self.previous_note
    }

    /// Whether keyswitch bit `n` is currently held down.
    pub fn switch_bit(&self, n: u32) -> bool {
        let word = (n / 32) as usize;
        if word >= self.switchmask.len() {
            return false;
        }
        self.switchmask[word] & (1 << (n % 32)) != 0
    }

    /// Press or release keyswitch bit `n`.
    pub fn set_switch_bit(&mut self, n: u32, down: bool) {
        let word = (n / 32) as usize;
        if word >= self.switchmask.len() {
            return;
        }
        if down {
            self.switchmask[word] |= 1 << (n % 32);
        } else {
            self.switchmask[word] &= !(1 << (n % 32));
        }
    }

    /// Record a note-on: updates `previous_note` and the note's start
    /// timestamp, used for release-trigger age computation.
    pub fn note_on(&mut self, note: u8, current_time: u64) {
        self.previous_note = note as i32;
        self.prev_note_start_time[note as usize & 0x7f] = current_time;
    }

    /// Samples elapsed since `note`'s last recorded note-on.
    pub fn age_since_noteon(&self, note: u8, current_time: u64) -> u64 {
        current_time.saturating_sub(self.prev_note_start_time[note as usize & 0x7f])
    }

    /// Replace the active program. This is the control-thread side of the
    /// atomic-pointer-swap handover described in the concurrency model.
    pub fn set_program(&self, program: Option<Arc<Program>>) {
        *self.active_program.write() = program;
    }

    /// Read the active program. This is the audio-thread side of the
    /// handover; the read lock is uncontended in the common case since
    /// program replacement is rare.
    pub fn active_program(&self) -> Option<Arc<Program>> {
        self.active_program.read().clone()
    }
}
