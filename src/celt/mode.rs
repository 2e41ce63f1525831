//! Band layout, windows and other per-mode constant tables for the CELT
//! decoder.

use std::f32::consts::PI;
use std::sync::OnceLock;

/// MDCT overlap length, in samples, at CELT's native 48 kHz rate.
pub(crate) const OVERLAP: usize = 120;

/// Band edges in 400 Hz units at `LM == 0`; `width(i) = (EBANDS[i+1] - EBANDS[i]) << LM`.
/// Verbatim from the reference mode tables (`eband5ms`).
pub(crate) const EBANDS: [i16; 22] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 34, 40, 48, 60, 78, 100,
];

/// Number of critical bands in the widest (fullband) layout.
pub(crate) const NB_BANDS: usize = 21;

/// Per-LM coarse-energy time-prediction coefficient (Q15, here as f32).
pub(crate) const PRED_COEF: [f32; 4] = [
    29440.0 / 32768.0,
    26112.0 / 32768.0,
    21248.0 / 32768.0,
    16384.0 / 32768.0,
];

/// Per-LM coarse-energy inter-frame decay coefficient (Q15, here as f32).
pub(crate) const BETA_COEF: [f32; 4] = [
    30147.0 / 32768.0,
    22282.0 / 32768.0,
    12124.0 / 32768.0,
    6554.0 / 32768.0,
];

/// The intra-frame (no time-prediction) decay coefficient.
pub(crate) const BETA_INTRA: f32 = 4915.0 / 32768.0;

/// Number of bands actually in use for a given bandwidth, expressed as an
/// index into [`EBANDS`] one past the last in-use band.
pub(crate) fn bands_for_bandwidth(bandwidth_index: usize) -> usize {
    // Narrowband .. fullband map to progressively wider band counts; the
    // reference ties this directly to the decoded bandwidth field.
    match bandwidth_index {
        0 => 13, // narrowband
        1 => 17, // mediumband
        2 => 19, // wideband
        3 => 20, // super-wideband
        _ => NB_BANDS,
    }
}

/// Width, in MDCT bins, of band `i` at the given `LM` (log2 of the frame
/// size ratio, 0..=3).
pub(crate) fn band_width(i: usize, lm: u32) -> usize {
    ((EBANDS[i + 1] - EBANDS[i]) as usize) << lm
}

/// The Vorbis-style analysis/synthesis window,
/// `sin(pi/2 * sin^2(pi/2 * (n+0.5)/OVERLAP))`, computed once and cached.
///
/// The reference declares this as a verbatim constant table; we compute it
/// lazily instead of transcribing the literal floating-point constants,
/// since the closed-form expression is exact to the precision CELT needs.
pub(crate) fn window() -> &'static [f32; OVERLAP] {
    static WINDOW: OnceLock<[f32; OVERLAP]> = OnceLock::new();
    WINDOW.get_or_init(|| {
        let mut w = [0.0_f32; OVERLAP];
        for (n, slot) in w.iter_mut().enumerate() {
            let inner = (PI / 2.0) * (n as f32 + 0.5) / OVERLAP as f32;
            let s = inner.sin();
            *slot = ((PI / 2.0) * s * s).sin();
        }
        w
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_endpoints() {
        let w = window();
        assert!(w[0] > 0.0 && w[0] < 0.05);
        assert!(w[OVERLAP - 1] > 0.95 && w[OVERLAP - 1] <= 1.0);
    }

    #[test]
    fn test_band_width_scales_with_lm() {
        assert_eq!(band_width(0, 0), 1);
        assert_eq!(band_width(0, 2), 4);
    }
}
