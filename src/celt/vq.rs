//! Pyramid Vector Quantization (PVQ) spherical decoding.
//!
//! Each band's shape is an integer pulse vector of length `n` with
//! `sum(|y_i|) == k`, whose combinatorial index is entropy-coded with
//! [`crate::range_coder::RangeDecoder::decode_uint`]. This builds its own
//! pulse-count table rather than transcribing the reference's precomputed
//! `CELT_PVQ_U` rows, but decodes by the same peel-one-coordinate-at-a-time
//! method the reference's `cwrsi` uses.

use crate::range_coder::RangeDecoder;

/// `counts[i][j]` = number of length-`i` integer vectors whose entries sum
/// to `j` in absolute value (i.e. the number of distinct pulse shapes with
/// `i` dimensions and `j` pulses).
fn pulse_counts(n: usize, k: usize) -> Vec<Vec<u64>> {
    let mut counts = vec![vec![0u64; k + 1]; n + 1];
    for row in counts.iter_mut() {
        row[0] = 1;
    }
    for i in 1..=n {
        // prefix[m] = sum_{v=0}^{m} counts[i-1][v], prefix[-1] == 0.
        let mut prefix = vec![0u64; k + 1];
        prefix[0] = counts[i - 1][0];
        for m in 1..=k {
            prefix[m] = prefix[m - 1] + counts[i - 1][m];
        }
        for j in 1..=k {
            let doubled = if j >= 1 { prefix[j - 1] } else { 0 };
            counts[i][j] = counts[i - 1][j] + 2 * doubled;
        }
    }
    counts
}

/// Total number of distinct pulse shapes for an `n`-dimensional band with
/// `k` pulses. Used by callers to size the range-coded index.
pub(crate) fn pulse_count_total(n: usize, k: usize) -> u64 {
    pulse_counts(n, k)[n][k]
}

/// Decodes a length-`n` integer pulse vector with `sum(|y_i|) == k` from the
/// range coder.
pub(crate) fn decode_pulse_vector(range_decoder: &mut RangeDecoder, n: usize, k: usize) -> Vec<i32> {
    if k == 0 || n == 0 {
        return vec![0; n];
    }

    let counts = pulse_counts(n, k);
    let total = counts[n][k];
    debug_assert!(total > 0 && total <= u32::MAX as u64 + 1);

    let mut idx = range_decoder.decode_uint(total.min(u32::MAX as u64) as u32) as u64;
    let mut remaining_k = k;
    let mut out = vec![0i32; n];

    for (i, slot) in out.iter_mut().enumerate() {
        let dims_left = n - i - 1;
        let mut v = 0usize;
        loop {
            let zero_count = counts[dims_left][remaining_k - v];
            let count_here = if v == 0 { zero_count } else { 2 * zero_count };

            if idx < count_here {
                if v == 0 {
                    *slot = 0;
                } else if idx < zero_count {
                    *slot = v as i32;
                } else {
                    *slot = -(v as i32);
                    idx -= zero_count;
                }
                remaining_k -= v;
                break;
            }

            idx -= count_here;
            v += 1;
        }
    }

    out
}

/// Normalizes an integer pulse vector to unit energy, yielding the
/// reconstructed unit-norm shape `X`.
pub(crate) fn normalize_pulse_vector(pulses: &[i32]) -> Vec<f32> {
    let energy: f32 = pulses.iter().map(|&p| (p * p) as f32).sum();
    if energy <= 0.0 {
        return vec![0.0; pulses.len()];
    }
    let scale = 1.0 / energy.sqrt();
    pulses.iter().map(|&p| p as f32 * scale).collect()
}
