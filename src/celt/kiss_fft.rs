//! Implements the FFT used for the MDCT.

use std::f32::consts::PI;

use num_complex::Complex32;

/// A complex FFT for arbitrary transform sizes, built up on the principle,
/// "Keep It Simple, Stupid."
///
/// The reference hand-factors each of its transform sizes into 4/2/3/5
/// radix stages and unrolls the butterflies for each. This port instead
/// precomputes a Bluestein chirp-z transform once per size at construction
/// time and reuses a single radix-2 Cooley-Tukey kernel for every size CELT
/// needs (none of which are powers of two), trading the reference's
/// hand-unrolled small-radix butterflies for a simpler, size-generic
/// implementation.
// TODO tests: test_unit_dft.c
pub(crate) struct KissFft {
    n: usize,
    padded_len: usize,
    /// `chirp[k] = exp(-i*pi*k^2/n)`, used for both the pre/post twiddle and,
    /// conjugated and zero-padded, as one operand of the Bluestein
    /// convolution.
    chirp: Vec<Complex32>,
    /// FFT of the conjugated, zero-padded, wrapped-around chirp sequence.
    chirp_conj_fft: Vec<Complex32>,
}

impl KissFft {
    pub(crate) fn new(n: usize) -> Self {
        assert!(n > 0);
        let padded_len = (2 * n - 1).max(1).next_power_of_two();

        let chirp: Vec<Complex32> = (0..n)
            .map(|k| {
                let phase = -PI * ((k * k) % (2 * n)) as f32 / n as f32;
                Complex32::new(phase.cos(), phase.sin())
            })
            .collect();

        let mut b = vec![Complex32::default(); padded_len];
        b[0] = chirp[0].conj();
        for k in 1..n {
            let c = chirp[k].conj();
            b[k] = c;
            b[padded_len - k] = c;
        }
        let chirp_conj_fft = radix2_fft(&b, false);

        Self {
            n,
            padded_len,
            chirp,
            chirp_conj_fft,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.n
    }

    /// Computes the forward DFT: `X[k] = sum_n x[n] * exp(-2*pi*i*k*n/n)`.
    pub(crate) fn forward(&self, input: &[Complex32]) -> Vec<Complex32> {
        self.bluestein(input, false)
    }

    /// Computes the unnormalized inverse DFT (the caller is responsible for
    /// the `1/n` scale, matching CELT's own convention of folding the scale
    /// into the surrounding MDCT math instead of the FFT itself).
    pub(crate) fn inverse(&self, input: &[Complex32]) -> Vec<Complex32> {
        self.bluestein(input, true)
    }

    fn bluestein(&self, input: &[Complex32], inverse: bool) -> Vec<Complex32> {
        debug_assert_eq!(input.len(), self.n);

        let mut a = vec![Complex32::default(); self.padded_len];
        for k in 0..self.n {
            let c = if inverse {
                self.chirp[k].conj()
            } else {
                self.chirp[k]
            };
            a[k] = input[k] * c;
        }

        let a_fft = radix2_fft(&a, false);
        let conv_fft: Vec<Complex32> = a_fft
            .iter()
            .zip(self.chirp_conj_fft.iter())
            .map(|(x, y)| x * y)
            .collect();
        let conv = radix2_fft(&conv_fft, true);
        let scale = 1.0 / self.padded_len as f32;

        (0..self.n)
            .map(|k| {
                let c = if inverse {
                    self.chirp[k].conj()
                } else {
                    self.chirp[k]
                };
                conv[k] * scale * c
            })
            .collect()
    }
}

/// Iterative radix-2 Cooley-Tukey FFT. `input.len()` must be a power of two.
fn radix2_fft(input: &[Complex32], inverse: bool) -> Vec<Complex32> {
    let n = input.len();
    debug_assert!(n.is_power_of_two());
    let mut a = input.to_vec();

    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = i.reverse_bits() >> (usize::BITS - bits);
        if j > i {
            a.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let theta = if inverse {
            2.0 * PI / len as f32
        } else {
            -2.0 * PI / len as f32
        };
        let wlen = Complex32::new(theta.cos(), theta.sin());
        let mut start = 0;
        while start < n {
            let mut w = Complex32::new(1.0, 0.0);
            for k in 0..half {
                let u = a[start + k];
                let v = a[start + k + half] * w;
                a[start + k] = u + v;
                a[start + k + half] = u - v;
                w *= wlen;
            }
            start += len;
        }
        len <<= 1;
    }

    a
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_roundtrip_power_of_two() {
        let fft = KissFft::new(16);
        let input: Vec<Complex32> = (0..16)
            .map(|i| Complex32::new(i as f32, -(i as f32) * 0.5))
            .collect();

        let freq = fft.forward(&input);
        let back: Vec<Complex32> = fft
            .inverse(&freq)
            .into_iter()
            .map(|c| c / 16.0)
            .collect();

        for (a, b) in input.iter().zip(back.iter()) {
            assert!((a.re - b.re).abs() < 1e-3, "{} vs {}", a.re, b.re);
            assert!((a.im - b.im).abs() < 1e-3, "{} vs {}", a.im, b.im);
        }
    }

    #[test]
    fn test_roundtrip_non_power_of_two() {
        let fft = KissFft::new(15);
        let input: Vec<Complex32> = (0..15)
            .map(|i| Complex32::new((i as f32).sin(), (i as f32).cos()))
            .collect();

        let freq = fft.forward(&input);
        let back: Vec<Complex32> = fft
            .inverse(&freq)
            .into_iter()
            .map(|c| c / 15.0)
            .collect();

        for (a, b) in input.iter().zip(back.iter()) {
            assert!((a.re - b.re).abs() < 1e-3);
            assert!((a.im - b.im).abs() < 1e-3);
        }
    }
}
