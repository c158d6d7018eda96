//! Small shared enums used across layer, voice, and program.

/// What event fires a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    /// Fires on note-on. The common case.
    #[default]
    Attack,
    /// Fires on note-off.
    Release,
    /// Fires only on the first note-on with no other note currently held on
    /// the channel.
    First,
    /// Fires on note-on that legato-overlaps a currently held note.
    Legato,
}

/// How a voice loops once it reaches `loop_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Play straight through, no loop.
    #[default]
    NoLoop,
    /// Play once, ignore note-off.
    OneShot,
    /// Play once, but note-off on the same key/group chokes it.
    OneShotChokeable,
    /// Loop forever regardless of note state.
    LoopContinuous,
    /// Loop while the note is held, play the tail out after release.
    LoopSustain,
}

/// Per-band/per-voice filter topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    /// Filter disabled.
    #[default]
    None,
    /// RBJ low-pass, 2-pole.
    Lp12,
    /// Two cascaded RBJ low-passes, 4-pole.
    Lp24,
    /// RBJ high-pass, 2-pole.
    Hp12,
    /// Two cascaded RBJ high-passes, 4-pole.
    Hp24,
    /// RBJ band-pass, 2-pole.
    Bp6,
    /// Two cascaded RBJ band-passes.
    Bp12,
    /// One-pole low-pass.
    Lp6,
    /// Two one-pole low-passes, no resonance.
    Lp12Nr,
    /// Four one-pole low-passes, no resonance.
    Lp24Nr,
    /// One-pole high-pass.
    Hp6,
    /// Two one-pole high-passes, no resonance.
    Hp12Nr,
    /// Four one-pole high-passes, no resonance.
    Hp24Nr,
    /// 4-pole low-pass built from an RBJ stage plus an independent one-pole
    /// "extra" stage (the one topology that populates both filter stages
    /// from two different coefficient sets).
    Lp24Hybrid,
}

/// Voice playback mode, selected from the waveform's channel count once a
/// voice is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceMode {
    /// Not playing; sitting on the module's free list.
    #[default]
    Inactive,
    /// Playing a mono source, still mixed to a stereo output pair.
    Mono16,
    /// Playing a stereo source.
    Stereo16,
}
