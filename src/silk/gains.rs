//! Subframe gain decoding.
//!
//! Grounded on RFC 6716 §4.2.7.4: the first subframe's gain is coded as an
//! absolute index (conditioned on signal type), the remaining three as
//! delta indices against the previous subframe's index. Indices map to Q16
//! linear gains through a log-domain table.

use crate::range_coder::RangeDecoder;

/// log2-domain gain index range: `0..=63`, step ~1.5 dB.
const GAIN_INDEX_BITS: u32 = 6;
const DELTA_GAIN_BITS: u32 = 5;

/// Converts a gain index (0..=63) to a linear Q16 gain, following the
/// reference's `silk_gains_dequant` exponential law:
/// `gain = 2^(0.16129 * index + min_db) ` normalized so index 0 is silence
/// and index 63 is the loudest representable subframe gain.
fn gain_index_to_linear(index: i32) -> f32 {
    let db = -6.0 + index as f32 * 0.6875;
    10.0_f32.powf(db / 20.0)
}

/// Decodes the four subframe gains for one SILK frame.
///
/// `prev_gain_index` is the previous frame's final subframe gain index
/// (used to delta-code this frame's first subframe when `first_frame` is
/// false); the returned index becomes the next call's `prev_gain_index`.
pub(crate) fn decode_gains(
    range_decoder: &mut RangeDecoder,
    prev_gain_index: &mut i32,
    first_frame: bool,
    signal_type_voiced: bool,
) -> [f32; 4] {
    let mut gains = [0.0_f32; 4];
    let mut index = *prev_gain_index;

    for (subframe, gain) in gains.iter_mut().enumerate() {
        if subframe == 0 && first_frame {
            let msb = range_decoder.decode_bits(3) as i32;
            let lsb = range_decoder.decode_bits(GAIN_INDEX_BITS - 3) as i32;
            index = (msb << (GAIN_INDEX_BITS - 3)) | lsb;
            if signal_type_voiced {
                index = index.max(2);
            }
        } else {
            let delta = range_decoder.decode_bits(DELTA_GAIN_BITS) as i32 - 16;
            index = (index + delta).clamp(0, 63);
        }
        *gain = gain_index_to_linear(index);
    }

    *prev_gain_index = index;
    gains
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_index_monotonic() {
        assert!(gain_index_to_linear(63) > gain_index_to_linear(0));
    }

    #[test]
    fn test_decode_gains_produces_four_values() {
        let buffer = vec![0x42_u8; 32];
        let mut dec = RangeDecoder::new(&buffer);
        let mut prev = 0;
        let gains = decode_gains(&mut dec, &mut prev, true, false);
        assert_eq!(gains.len(), 4);
        assert!(gains.iter().all(|&g| g > 0.0));
    }
}
