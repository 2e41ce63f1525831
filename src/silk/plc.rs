//! Packet loss concealment.
//!
//! Grounded on RFC 6716 §4.4: on a missing frame, extrapolate using the
//! last voiced pitch lag and an attenuated, noise-dithered excitation
//! through the last stable LPC filter, decaying the gain each consecutive
//! lost frame.

use crate::silk::excitation::next_sign;
use crate::silk::lpc::{synthesize, LpcState};
use crate::silk::tables::PLC_GAIN_DECAY_Q15;

/// Persistent state PLC needs beyond what normal decoding already carries:
/// how many consecutive frames have been concealed (decides decay depth),
/// and the pitch lag/LPC snapshot from the last good voiced frame.
#[derive(Clone, Debug, Default)]
pub(crate) struct PlcState {
    pub(crate) consecutive_losses: u32,
    pub(crate) last_pitch_lag: usize,
    pub(crate) last_lpc: Vec<f32>,
    pub(crate) last_gain: f32,
    pub(crate) rand_seed: u32,
}

impl PlcState {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn note_good_frame(&mut self, pitch_lag: usize, lpc: &[f32], gain: f32) {
        self.consecutive_losses = 0;
        self.last_pitch_lag = pitch_lag;
        self.last_lpc = lpc.to_vec();
        self.last_gain = gain;
    }
}

/// Synthesizes `frame_len` concealment samples, decaying the carried-over
/// gain by [`PLC_GAIN_DECAY_Q15`] per consecutive lost frame and driving the
/// LPC filter with pitch-periodic noise rather than a decoded excitation.
pub(crate) fn conceal(state: &mut PlcState, lpc_state: &mut LpcState, frame_len: usize) -> Vec<f32> {
    state.consecutive_losses += 1;
    let decay = (PLC_GAIN_DECAY_Q15 as f32 / 32768.0).powi(state.consecutive_losses as i32);
    let gain = state.last_gain * decay;

    let lag = state.last_pitch_lag.max(1);
    let mut excitation = vec![0.0_f32; frame_len];
    for (n, slot) in excitation.iter_mut().enumerate() {
        let sign = next_sign(&mut state.rand_seed) as f32;
        let periodic = if n >= lag { excitation[n - lag] } else { 0.0 };
        *slot = gain * (0.25 * sign + 0.75 * periodic);
    }

    if state.last_lpc.is_empty() {
        return excitation;
    }

    let mut out = vec![0.0_f32; frame_len];
    synthesize(&excitation, &state.last_lpc, lpc_state, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conceal_decays_across_repeated_losses() {
        let mut plc = PlcState {
            last_lpc: vec![0.1; 10],
            last_gain: 1.0,
            last_pitch_lag: 50,
            ..Default::default()
        };
        let mut lpc_state = LpcState::new(10, 300);
        let first = conceal(&mut plc, &mut lpc_state, 40);
        let mut lpc_state2 = LpcState::new(10, 300);
        let second = conceal(&mut plc, &mut lpc_state2, 40);

        let energy = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>();
        assert!(energy(&second) <= energy(&first) + 1e-6);
    }

    #[test]
    fn test_conceal_without_history_is_silent() {
        let mut plc = PlcState::default();
        let mut lpc_state = LpcState::new(10, 300);
        let out = conceal(&mut plc, &mut lpc_state, 20);
        assert_eq!(out.len(), 20);
    }
}
