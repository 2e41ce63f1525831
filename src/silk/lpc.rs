//! LPC and long-term-prediction synthesis.
//!
//! Grounded on RFC 6716 §4.2.7.9: per-subframe LTP filtering in the
//! residual domain (voiced only), followed by direct-form LPC synthesis
//! with a circular history buffer. The long-term history is kept as an
//! index-based ring (write cursor + modulo indexing) rather than a
//! shifting-copy buffer, per the reference's `out_buf`/`s_LPC_Q14` design.

use crate::silk::tables::LTP_ORDER;

/// Per-channel synthesis history: the last `max_lpc_order` reconstructed
/// samples (for LPC recursion) plus a deep ring of `max_pitch_lag + LTP_ORDER`
/// samples (for LTP lookback), both carried across subframes and frames.
#[derive(Clone, Debug)]
pub(crate) struct LpcState {
    pub(crate) history: Vec<f32>,
    ltp_ring: Vec<f32>,
    ltp_write: usize,
}

impl LpcState {
    pub(crate) fn new(max_lpc_order: usize, max_pitch_lag: usize) -> Self {
        Self {
            history: vec![0.0; max_lpc_order],
            ltp_ring: vec![0.0; max_pitch_lag + LTP_ORDER],
            ltp_write: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.history.iter_mut().for_each(|v| *v = 0.0);
        self.ltp_ring.iter_mut().for_each(|v| *v = 0.0);
        self.ltp_write = 0;
    }

    fn push_ltp(&mut self, sample: f32) {
        self.ltp_ring[self.ltp_write] = sample;
        self.ltp_write = (self.ltp_write + 1) % self.ltp_ring.len();
    }

    /// Reads the sample `delay` steps before the next write position.
    fn ltp_at(&self, delay: usize) -> f32 {
        let len = self.ltp_ring.len();
        let idx = (self.ltp_write + len - (delay % len) - 1) % len;
        self.ltp_ring[idx]
    }
}

/// Applies the 5-tap LTP filter to one subframe's excitation in place,
/// using `lag` samples of the channel's pitch-deep history.
pub(crate) fn apply_ltp(excitation: &mut [f32], state: &LpcState, lag: usize, taps: &[f32; LTP_ORDER]) {
    for (n, sample) in excitation.iter_mut().enumerate() {
        let mut pred = 0.0_f32;
        for (k, &tap) in taps.iter().enumerate() {
            let delay = lag + 2 - k;
            // Samples not yet produced this subframe still read from the
            // ring's state as of subframe start, matching the reference's
            // "LTP predicts from history, not from this subframe's own
            // not-yet-synthesized output" ordering.
            if delay > n {
                pred += tap * state.ltp_at(delay - n);
            }
        }
        *sample += pred;
    }
}

/// Runs direct-form LPC synthesis over one subframe, writing reconstructed
/// samples into `out` and updating `state.history`/the LTP ring.
///
/// `excitation[n]` already includes any LTP contribution and the subframe
/// gain scaling; synthesis computes
/// `out[n] = excitation[n] + sum_{k=1..order} lpc[k-1] * out[n-k]`,
/// saturating to the 16-bit range expressed in `[-1, 1]` float.
pub(crate) fn synthesize(excitation: &[f32], lpc: &[f32], state: &mut LpcState, out: &mut [f32]) {
    let order = lpc.len();
    debug_assert_eq!(state.history.len(), order);

    for (n, &exc) in excitation.iter().enumerate() {
        let mut pred = 0.0_f32;
        for (k, &coef) in lpc.iter().enumerate() {
            let sample = if k < n {
                out[n - 1 - k]
            } else {
                state.history[order - 1 - (k - n)]
            };
            pred += coef * sample;
        }

        let y = (exc + pred).clamp(-1.0, 32767.0 / 32768.0);
        out[n] = y;
        state.push_ltp(y);
    }

    let keep = order.min(out.len());
    state.history.rotate_left(keep);
    let hist_len = state.history.len();
    state.history[hist_len - keep..].copy_from_slice(&out[out.len() - keep..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesize_silence_stays_silent() {
        let mut state = LpcState::new(10, 300);
        let lpc = vec![0.1_f32; 10];
        let excitation = vec![0.0_f32; 40];
        let mut out = vec![0.0_f32; 40];
        synthesize(&excitation, &lpc, &mut state, &mut out);
        assert!(out.iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_apply_ltp_is_noop_with_zero_taps() {
        let state = LpcState::new(10, 300);
        let mut excitation = vec![1.0_f32; 10];
        let before = excitation.clone();
        apply_ltp(&mut excitation, &state, 100, &[0.0; LTP_ORDER]);
        assert_eq!(excitation, before);
    }

    #[test]
    fn test_ltp_ring_wraps() {
        let mut state = LpcState::new(10, 5);
        for i in 0..20 {
            state.push_ltp(i as f32);
        }
        // ring length is 5 + LTP_ORDER; just check no panic and a sane read.
        let _ = state.ltp_at(1);
    }
}
