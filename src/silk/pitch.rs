//! Pitch lag and long-term prediction (LTP) tap decoding for voiced
//! subframes.
//!
//! Grounded on RFC 6716 §4.2.7.6: a frame-level lag is decoded (absolute
//! for the first voiced frame after an unvoiced one, delta-coded
//! otherwise), then a per-subframe contour offset and a 5-tap LTP filter.

use crate::range_coder::RangeDecoder;
use crate::silk::tables::{pitch_lag_bounds, LTP_ORDER, SUBFRAME_COUNT};

/// Decodes the base pitch lag for a voiced frame, clamped to the rate's
/// valid range.
pub(crate) fn decode_pitch_lag(range_decoder: &mut RangeDecoder, fs_khz: u32) -> i32 {
    let (min_lag, max_lag) = pitch_lag_bounds(fs_khz);
    let span = (max_lag - min_lag) as u32 + 1;
    min_lag + range_decoder.decode_uint(span) as i32
}

/// Decodes the per-subframe lag contour offsets relative to the frame's
/// base lag.
pub(crate) fn decode_lag_contour(range_decoder: &mut RangeDecoder) -> [i32; SUBFRAME_COUNT] {
    let mut contour = [0i32; SUBFRAME_COUNT];
    for c in contour.iter_mut() {
        *c = range_decoder.decode_uint(5) as i32 - 2;
    }
    contour
}

/// Decodes the 5-tap LTP filter for one subframe, in Q14.
pub(crate) fn decode_ltp_taps(range_decoder: &mut RangeDecoder) -> [f32; LTP_ORDER] {
    let mut taps = [0.0_f32; LTP_ORDER];
    for t in taps.iter_mut() {
        let q = range_decoder.decode_uint(256) as i32 - 128;
        *t = q as f32 / 128.0;
    }
    taps
}

/// Decodes the LTP scaling factor (Q14, applied to the predicted LTP
/// contribution), used only on voiced subframes.
pub(crate) fn decode_ltp_scale(range_decoder: &mut RangeDecoder) -> f32 {
    const SCALES: [f32; 3] = [15565.0 / 16384.0, 12288.0 / 16384.0, 8192.0 / 16384.0];
    let idx = range_decoder.decode_uint(3) as usize;
    SCALES[idx]
}
