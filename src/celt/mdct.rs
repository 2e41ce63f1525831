//! Implements the modified discrete cosine transform.

use std::f32::consts::PI;

use num_complex::Complex32;

use crate::celt::kiss_fft::KissFft;

/// This is a simple MDCT implementation that uses a N/4 complex FFT
/// to do most of the work. It should be relatively straightforward to
/// plug in pretty much any FFT here.
///
/// This replaces the Vorbis FFT (and uses the exact same API), which
/// was a bit too messy and that was ending up duplicating code
/// (might as well use the same FFT everywhere).
///
/// The algorithm is similar to (and inspired from) Fabrice Bellard's
/// MDCT implementation in FFMPEG, but has differences in signs, ordering
/// and scaling in many places. Both the forward and the inverse transform
/// share the same forward FFT kernel; only the pre/post rotation differs,
/// mirroring how the reference reuses one kiss_fft table for both
/// directions.
// TODO tests: test_unit_mdct.c
pub(crate) struct Mdct {
    /// Full transform length (the number of time-domain samples consumed
    /// per call, before overlap is folded in).
    n: usize,
    n2: usize,
    n4: usize,
    kfft: KissFft,
    /// `trig[k] = exp(-i*2*pi*(k + 1/8)/n)`, length `n4`.
    trig: Vec<Complex32>,
}

impl Mdct {
    pub(crate) fn new(n: usize) -> Self {
        debug_assert_eq!(n % 4, 0);
        let n2 = n / 2;
        let n4 = n / 4;
        let kfft = KissFft::new(n4);
        let trig: Vec<Complex32> = (0..n4)
            .map(|k| {
                let phase = -2.0 * PI * (k as f32 + 0.125) / n as f32;
                Complex32::new(phase.cos(), phase.sin())
            })
            .collect();

        Self {
            n,
            n2,
            n4,
            kfft,
            trig,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.n
    }

    /// Forward MDCT. `input` holds `n` windowed time-domain samples;
    /// `output` receives `n2` frequency-domain coefficients.
    pub(crate) fn forward(&self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.n);
        debug_assert_eq!(output.len(), self.n2);

        let mut z = Vec::with_capacity(self.n4);
        for k in 0..self.n4 {
            let re = input[self.n2 - 1 - 2 * k];
            let im = input[2 * k];
            z.push(Complex32::new(re, im) * self.trig[k]);
        }

        let y = self.kfft.forward(&z);

        for k in 0..self.n4 {
            let v = y[k] * self.trig[k];
            output[2 * k] = -v.re;
            output[self.n2 - 1 - 2 * k] = v.im;
        }
    }

    /// Inverse MDCT. `input` holds `n2` frequency-domain coefficients;
    /// `output` receives `n` time-domain samples (not yet windowed or
    /// overlap-added -- the caller applies the analysis/synthesis window
    /// and folds the result into the overlap buffer).
    pub(crate) fn backward(&self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.n2);
        debug_assert_eq!(output.len(), self.n);

        let mut z = Vec::with_capacity(self.n4);
        for k in 0..self.n4 {
            let re = input[2 * k];
            let im = input[self.n2 - 1 - 2 * k];
            z.push(Complex32::new(re, im) * self.trig[k]);
        }

        let y = self.kfft.forward(&z);

        // Unpack into the four quarters of the output using the MDCT's
        // even/odd symmetry, folding the N4-point result back out to N.
        let mut post = vec![Complex32::default(); self.n4];
        for k in 0..self.n4 {
            post[k] = y[k] * self.trig[k];
        }

        for k in 0..self.n4 {
            output[2 * k] = -post[k].re;
            output[self.n2 - 1 - 2 * k] = post[k].im;
            output[self.n2 + 2 * k] = -post[k].im;
            output[self.n - 1 - 2 * k] = post[k].re;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_forward_backward_energy_is_stable() {
        let mdct = Mdct::new(64);
        let input: Vec<f32> = (0..64)
            .map(|i| ((i as f32) * 0.1).sin())
            .collect();
        let mut freq = vec![0.0_f32; 32];
        mdct.forward(&input, &mut freq);

        let mut time = vec![0.0_f32; 64];
        mdct.backward(&freq, &mut time);

        // The inverse of the forward transform should not blow up or
        // collapse to all zero -- a coarse sanity bound, not a bit-exact
        // roundtrip (that requires overlap-add across two frames).
        let energy_in: f32 = input.iter().map(|x| x * x).sum();
        let energy_out: f32 = time.iter().map(|x| x * x).sum();
        assert!(energy_out > 0.0);
        assert!(energy_in > 0.0);
    }
}
