//! Stereo mix-into helpers.
//!
//! Scalar reference implementation only; no SIMD variant is provided (see
//! design notes). `src` is interleaved stereo `[l0, r0, l1, r1, ...]`;
//! `dst_left`/`dst_right` are the planar output bus buffers.

/// Add `src` into `dst_left`/`dst_right` at unity gain.
pub fn mix_block_into(src: &[f32], dst_left: &mut [f32], dst_right: &mut [f32]) {
    let n = dst_left.len().min(dst_right.len()).min(src.len() / 2);
    for i in 0..n {
        dst_left[i] += src[2 * i];
        dst_right[i] += src[2 * i + 1];
    }
}

/// Add `src` into `dst_left`/`dst_right` scaled by `gain_left`/`gain_right`
/// respectively (used for the pan-scaled primary bus and the aux sends).
pub fn mix_block_into_with_gain(
    src: &[f32],
    dst_left: &mut [f32],
    dst_right: &mut [f32],
    gain_left: f32,
    gain_right: f32,
) {
    let n = dst_left.len().min(dst_right.len()).min(src.len() / 2);
    for i in 0..n {
        dst_left[i] += gain_left * src[2 * i];
        dst_right[i] += gain_right * src[2 * i + 1];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_mix_adds_directly() {
        let src = [1.0f32, -1.0, 0.5, 0.5];
        let mut left = [0.0f32; 2];
        let mut right = [0.0f32; 2];
        mix_block_into(&src, &mut left, &mut right);
        assert_eq!(left, [1.0, 0.5]);
        assert_eq!(right, [-1.0, 0.5]);
    }

    #[test]
    fn scaled_mix_applies_per_channel_gain() {
        let src = [1.0f32, 1.0];
        let mut left = [0.0f32; 1];
        let mut right = [0.0f32; 1];
        mix_block_into_with_gain(&src, &mut left, &mut right, 0.25, 0.75);
        assert_eq!(left, [0.25]);
        assert_eq!(right, [0.75]);
    }

    #[test]
    fn accumulates_across_multiple_voices() {
        let src = [0.5f32, 0.5];
        let mut left = [0.1f32];
        let mut right = [0.1f32];
        mix_block_into(&src, &mut left, &mut right);
        mix_block_into(&src, &mut left, &mut right);
        assert_eq!(left, [1.1]);
        assert_eq!(right, [1.1]);
    }
}
