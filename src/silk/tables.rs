//! Constant tables for the SILK decoder: LPC order per bandwidth, pitch lag
//! bounds, and the per-rate frame geometry. Verbatim structure of the
//! reference's `tables_*` files, simplified to the values this decoder
//! actually branches on rather than transcribing every one of its
//! probability-model rows.

use crate::SamplingRate;

/// LPC analysis order used below wideband (10) and at wideband (16).
pub(crate) const LPC_ORDER_NB_MB: usize = 10;
pub(crate) const LPC_ORDER_WB: usize = 16;

/// Number of 5 ms subframes within one 20 ms SILK frame. A 40/60 ms SILK
/// payload is decoded as 2 or 3 independent 20 ms frames (see
/// `SilkDecoder::decode`), each still split into this many subframes.
pub(crate) const SUBFRAME_COUNT: usize = 4;

/// Returns the LPC order used at a given internal sample rate.
pub(crate) fn lpc_order(fs_khz: u32) -> usize {
    if fs_khz >= 16 {
        LPC_ORDER_WB
    } else {
        LPC_ORDER_NB_MB
    }
}

/// Returns the internal SILK sample rate, in kHz, for a `SamplingRate`.
///
/// SILK never runs above 16 kHz internally; higher output rates simply mean
/// the resampler (C7) has more work to do after SILK produces its native-rate
/// signal.
pub(crate) fn fs_khz_for(sampling_rate: SamplingRate) -> u32 {
    match sampling_rate {
        SamplingRate::Hz8000 => 8,
        SamplingRate::Hz12000 => 12,
        _ => 16,
    }
}

/// Minimum and maximum pitch lag, in samples, at a given internal rate.
pub(crate) fn pitch_lag_bounds(fs_khz: u32) -> (i32, i32) {
    match fs_khz {
        8 => (32, 288),
        12 => (48, 432),
        _ => (64, 576),
    }
}

/// Number of LTP taps per subframe.
pub(crate) const LTP_ORDER: usize = 5;

/// Decay factor applied to PLC gain each consecutive lost frame (Q15).
pub(crate) const PLC_GAIN_DECAY_Q15: i32 = 32440;
