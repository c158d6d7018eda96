//! The program/layer matching engine: given a note-on (or release), picks
//! the next layer in a sequence that should sound.
//!
//! Every layer with a waveform is visited on every call — including ones
//! that end up out of range for this note — and has its round-robin
//! counter advanced exactly once. This is what lets several layers sharing
//! a key/velocity range cycle through a stable round-robin order instead of
//! drifting out of sync with each other; see `DESIGN.md` for why this
//! differs from a naive "only advance the layer that matched" approach.

use crate::channel::Channel;
use crate::layer::LayerHandle;

/// Scan every layer in `layers`, advancing each one's round-robin counter,
/// and return the single layer (if any) that matches
/// `(note, vel, channel_no, random)` on `channel` and whose counter was at
/// 1 before this call's advance.
///
/// `channel_no` is 1-based, matching `LayerHandle.lochan/hichan`.
pub fn next_layer(
    layers: &[LayerHandle],
    channel: &Channel,
    channel_no: u8,
    note: u8,
    vel: u8,
    random: f64,
) -> Option<(usize, LayerHandle)> {
    let mut result = None;

    for (index, layer) in layers.iter().enumerate() {
        if layer.eff_waveform.is_none() {
            continue;
        }

        if layer.sw_last != -1 && (layer.sw_lokey..=layer.sw_hikey).contains(&note) {
            layer.match_state.set_last_key(note as i32);
        }

        let range_ok = (layer.lokey..=layer.hikey).contains(&note)
            && (layer.lovel..=layer.hivel).contains(&vel)
            && (layer.lochan..=layer.hichan).contains(&channel_no)
            && random >= layer.lorand
            && random < layer.hirand;

        let keyswitch_ok = !layer.eff_use_keyswitch
            || ((layer.sw_last == -1 || layer.sw_last == layer.match_state.last_key())
                && (layer.sw_down == -1 || channel.switch_bit(layer.sw_down as u32))
                && (layer.sw_up == -1 || !channel.switch_bit(layer.sw_up as u32))
                && (layer.sw_previous == -1 || layer.sw_previous == channel.previous_note()));

        let matched = range_ok && keyswitch_ok;
        let was_due = layer.match_state.advance_seq_position(layer.seq_length);

        if matched && was_due && result.is_none() {
            result = Some((index, layer.clone()));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Layer;
    use crate::testutil::MemoryWaveform;
    use std::sync::Arc;

    fn test_waveform() -> Arc<dyn sampler_common::Waveform> {
        Arc::new(MemoryWaveform::mono(vec![0i16; 16]))
    }

    fn basic_layer() -> Layer {
        let mut layer = Layer {
            eff_waveform: Some(test_waveform()),
            ..Layer::default()
        };
        layer.runtime_prepare();
        layer
    }

    #[test]
    fn round_robin_cycles_in_list_order() {
        // Siblings sharing a round-robin group are seeded with staggered
        // phases by the loader so the group cycles in list order; the
        // seeding formula is `1 + ((seq_length - i) % seq_length)`.
        let seq_length = 3u32;
        let mut layers = Vec::new();
        for i in 0..seq_length {
            let mut l = basic_layer();
            l.seq_length = seq_length;
            l.match_state
                .set_current_seq_position(1 + ((seq_length - i) % seq_length));
            layers.push(Arc::new(l));
        }
        let channel = Channel::new();
        let mut triggered = Vec::new();
        for _ in 0..10 {
            let (idx, _) = next_layer(&layers, &channel, 1, 60, 100, 0.0).unwrap();
            triggered.push(idx);
        }
        assert_eq!(triggered, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn single_layer_triggers_every_kth_attempt() {
        let mut l = basic_layer();
        l.seq_length = 4;
        let layers = vec![Arc::new(l)];
        let channel = Channel::new();
        let triggers: Vec<bool> = (0..12)
            .map(|_| next_layer(&layers, &channel, 1, 60, 100, 0.0).is_some())
            .collect();
        assert_eq!(
            triggers,
            vec![
                true, false, false, false, true, false, false, false, true, false, false, false
            ]
        );
    }

    #[test]
    fn out_of_range_note_never_matches() {
        let mut l = basic_layer();
        l.lokey = 70;
        l.hikey = 80;
        let layers = vec![Arc::new(l)];
        let channel = Channel::new();
        assert!(next_layer(&layers, &channel, 1, 60, 100, 0.0).is_none());
    }

    #[test]
    fn keyswitch_gates_triggering() {
        let mut a = basic_layer();
        a.sw_last = 36;
        a.sw_lokey = 36;
        a.sw_hikey = 38;
        a.runtime_prepare();
        let layers = vec![Arc::new(a)];
        let channel = Channel::new();

        // Note 60 doesn't satisfy sw_last until the keyswitch note (36)
        // has been pressed at least once.
        assert!(next_layer(&layers, &channel, 1, 60, 100, 0.0).is_none());
        let _ = next_layer(&layers, &channel, 1, 36, 100, 0.0);
        assert!(next_layer(&layers, &channel, 1, 60, 100, 0.0).is_some());
    }
}
