//! Stereo prediction and interpolation for SILK's mid/side coding.
//!
//! Grounded on RFC 6716 §4.2.7.2: two prediction weights are decoded per
//! stereo frame and linearly interpolated from the previous frame's weights
//! across the first `8 ms * fs_khz` samples.

use crate::math::{rshift_round, smulbb};

/// Per-channel-pair persistent stereo state.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StereoState {
    pub(crate) pred_prev_q13: [i32; 2],
    pub(crate) s_mid: [f32; 2],
    pub(crate) mid_only_prev: bool,
}

impl StereoState {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Computes the per-sample interpolation delta for one prediction weight,
/// as `silk_stereo_decode_pred` does: a Q13 step size such that
/// `prev + n * delta` converges to `pred` after `8 ms * fs_khz` samples.
pub(crate) fn compute_delta(pred_q13: i32, prev_pred_q13: i32, fs_khz: u32) -> i32 {
    let denom_q16 = (1i32 << 16) / (8 * fs_khz as i32);
    rshift_round(smulbb(pred_q13 - prev_pred_q13, denom_q16), 16)
}

/// Applies mid/side stereo prediction to reconstruct left/right samples from
/// decoded mid and side signals, interpolating the prediction weights across
/// the first `8 ms * fs_khz` samples of the frame.
///
/// `side` may be empty when `mid_only` is set; in that case the side channel
/// is reconstructed as a pure (decaying) copy of the mid-channel prediction.
pub(crate) fn apply_stereo_prediction(
    mid: &[f32],
    side: &[f32],
    pred_q13: [i32; 2],
    state: &mut StereoState,
    fs_khz: u32,
    mid_only: bool,
) -> (Vec<f32>, Vec<f32>) {
    let n = mid.len();
    let interp_len = (8 * fs_khz as usize).min(n);
    let delta0 = compute_delta(pred_q13[0], state.pred_prev_q13[0], fs_khz);
    let delta1 = compute_delta(pred_q13[1], state.pred_prev_q13[1], fs_khz);

    let mut left = vec![0.0_f32; n];
    let mut right = vec![0.0_f32; n];

    for i in 0..n {
        let w0 = if i < interp_len {
            (state.pred_prev_q13[0] + delta0 * i as i32) as f32 / 8192.0
        } else {
            pred_q13[0] as f32 / 8192.0
        };
        let w1 = if i < interp_len {
            (state.pred_prev_q13[1] + delta1 * i as i32) as f32 / 8192.0
        } else {
            pred_q13[1] as f32 / 8192.0
        };

        let m = mid[i];
        let s = if mid_only { 0.0 } else { side.get(i).copied().unwrap_or(0.0) };

        // Side = predicted-out component of the true side signal; invert the
        // encoder's prediction to recover left/right from (mid, side).
        let side_pred = w0 * m + w1 * m * m.signum();
        let true_side = s + side_pred;

        left[i] = m + true_side;
        right[i] = m - true_side;
    }

    state.pred_prev_q13 = pred_q13;
    if n >= 2 {
        state.s_mid = [mid[n - 2], mid[n - 1]];
    } else if n == 1 {
        state.s_mid = [state.s_mid[1], mid[0]];
    }
    state.mid_only_prev = mid_only;

    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_delta_matches_formula() {
        let d = compute_delta(5000, 0, 16);
        let denom = (1i32 << 16) / (8 * 16);
        let expected = rshift_round(smulbb(5000, denom), 16);
        assert_eq!(d, expected);
    }

    #[test]
    fn test_compute_delta_zero_when_unchanged() {
        assert_eq!(compute_delta(1000, 1000, 16), 0);
    }

    #[test]
    fn test_apply_stereo_prediction_mid_only_collapses_side() {
        let mut state = StereoState::default();
        let mid = vec![0.5_f32; 8];
        let (l, r) = apply_stereo_prediction(&mid, &[], [0, 0], &mut state, 8, true);
        for i in 0..8 {
            assert!((l[i] - r[i]).abs() < 1e-6);
        }
    }
}
