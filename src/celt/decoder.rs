//! Implements the CELT decoder.

use crate::celt::comb_filter::comb_filter_inplace;
use crate::celt::mode::{self, NB_BANDS, OVERLAP};
use crate::celt::{allocation, bands, vq};
use crate::range_coder::RangeDecoder;
use crate::{Channels, DecoderError, SamplingRate};

/// Per-channel CELT decoder state that must survive across frames.
#[derive(Clone, Debug)]
struct ChannelState {
    old_band_e: [f32; NB_BANDS],
    overlap_buf: Vec<f32>,
    preemph_mem: f32,
    post_filter_period: usize,
    post_filter_gain: f32,
    post_filter_tapset: usize,
}

impl ChannelState {
    fn new(overlap: usize) -> Self {
        Self {
            old_band_e: [-9.0; NB_BANDS],
            overlap_buf: vec![0.0; overlap],
            preemph_mem: 0.0,
            post_filter_period: 0,
            post_filter_gain: 0.0,
            post_filter_tapset: 0,
        }
    }

    fn reset(&mut self) {
        self.old_band_e = [-9.0; NB_BANDS];
        self.overlap_buf.iter_mut().for_each(|v| *v = 0.0);
        self.preemph_mem = 0.0;
        self.post_filter_period = 0;
        self.post_filter_gain = 0.0;
        self.post_filter_tapset = 0;
    }
}

/// The de-emphasis coefficient shared by both channels.
const PREEMPH_COEF: f32 = 0.85;

/// Number of steps the stereo `itheta` angle is quantized to (a fixed
/// resolution standing in for the reference's per-band adaptive `qn`).
const STEREO_ITHETA_STEPS: u32 = 16;

/// The CELT decoder.
#[derive(Clone, Debug)]
pub(crate) struct CeltDecoder {
    sampling_rate: SamplingRate,
    channels: Channels,
    channel_state: [ChannelState; 2],
    rng: u32,
}

impl CeltDecoder {
    /// Creates a new CELT decoder.
    pub(crate) fn new(
        sampling_rate: SamplingRate,
        channels: Channels,
    ) -> Result<Self, DecoderError> {
        Ok(Self {
            sampling_rate,
            channels,
            channel_state: [ChannelState::new(OVERLAP), ChannelState::new(OVERLAP)],
            rng: 0x1234_5678,
        })
    }

    /// Resets the CELT decoder.
    pub(crate) fn reset(&mut self) -> Result<(), DecoderError> {
        self.channel_state.iter_mut().for_each(ChannelState::reset);
        self.rng = 0x1234_5678;
        Ok(())
    }

    /// Gets the pitch of the last decoded frame.
    pub(crate) fn pitch(&self) -> u32 {
        self.channel_state[0].post_filter_period as u32
    }

    fn num_channels(&self) -> usize {
        match self.channels {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }

    /// Advances the PRNG used for noise fill-in (no-pulse bands and
    /// anti-collapse), mirroring the reference's `celt_lcg_rand`.
    fn next_rand(&mut self) -> u32 {
        self.rng = self.rng.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.rng
    }

    /// Decodes one CELT frame, producing `frame_size` interleaved samples
    /// per channel in `out`.
    ///
    /// `lm` is `log2(frame_size / 120)`, selecting the band layout and MDCT
    /// size; `start_band` allows the hybrid mode to skip the low bands that
    /// SILK already covers.
    pub(crate) fn decode(
        &mut self,
        range_decoder: &mut RangeDecoder,
        frame_size: usize,
        lm: u32,
        start_band: usize,
        bandwidth_index: usize,
        out: &mut [f32],
    ) -> Result<(), DecoderError> {
        let channels = self.num_channels();
        debug_assert_eq!(out.len(), frame_size * channels);

        let nb_bands = mode::bands_for_bandwidth(bandwidth_index).max(start_band + 1);
        let silence = range_decoder.decode_bit_logp(15);
        let _post_filter = self.decode_post_filter(range_decoder);
        let transient = lm > 0 && range_decoder.decode_bit_logp(3);
        let intra = range_decoder.decode_bit_logp(3);

        // Number of short MDCTs a transient frame is split into. Band edges
        // are defined at the long-block (single MDCT) resolution regardless,
        // so `frame_size / nb_short` is always OVERLAP (120 samples) for
        // every LM that allows a transient flag.
        let nb_short = if transient && lm > 0 { 1usize << lm } else { 1usize };

        let widths: Vec<usize> = (start_band..nb_bands)
            .map(|b| mode::band_width(b, lm))
            .collect();
        let total_bits = range_decoder.tell().min(frame_size as u32 * 8);
        let boosts = decode_dynalloc_boosts(range_decoder, &widths, total_bits);
        let alloc = allocation::allocate(total_bits, &widths, &boosts);

        let mut energies: Vec<Vec<f32>> = Vec::with_capacity(channels);
        for ch in 0..channels {
            let mut e = bands::decode_coarse_energy(
                range_decoder,
                &mut self.channel_state[ch].old_band_e,
                nb_bands,
                lm,
                intra,
            );
            bands::decode_fine_energy(range_decoder, &mut e, &alloc.fine_bits);
            bands::decode_energy_finalise(
                range_decoder,
                &mut e,
                &alloc.fine_bits,
                &alloc.fine_priority,
                alloc.leftover_bits,
            );
            energies.push(e);
        }

        // Per-band shape (PVQ) decode. For stereo, both channels' shapes for
        // a band are decoded back to back, followed by the band's `itheta`
        // angle and a stereo merge that reconstructs L/R from the two
        // independently-decoded unit shapes, per the joint mid/side coding
        // the bitstream actually uses.
        let mut freq = vec![vec![0.0_f32; frame_size]; channels];
        let mut bin = 0usize;
        for (band_idx, &width) in widths.iter().enumerate() {
            let band = start_band + band_idx;
            let bits_q3 = alloc.bits_q3[band_idx];
            let k = (bits_q3 / 8 / width.max(1) as u32).min(32) as usize;

            let mut shapes: Vec<Vec<f32>> = Vec::with_capacity(channels);
            for ch in 0..channels {
                let band_gain = db6_to_linear(energies[ch][band]);
                let shape = if silence || k == 0 {
                    (0..width)
                        .map(|_| {
                            let r = self.next_rand();
                            (r as i32 >> 20) as f32 / 2048.0
                        })
                        .collect::<Vec<f32>>()
                } else {
                    let pulses = vq::decode_pulse_vector(range_decoder, width, k);
                    let mut norm = vq::normalize_pulse_vector(&pulses);
                    if transient && lm >= 2 {
                        self.anti_collapse_refill(&mut norm, &pulses, bin, nb_short, band_gain);
                    }
                    norm
                };
                shapes.push(shape);
            }

            if channels == 2 {
                let itheta = range_decoder.decode_uint(STEREO_ITHETA_STEPS + 1);
                let theta = (itheta as f32 / STEREO_ITHETA_STEPS as f32) * (std::f32::consts::PI / 2.0);
                let mid = theta.cos();

                let y = shapes.pop().expect("stereo has two channels");
                let x = shapes.pop().expect("stereo has two channels");

                let dot_xy: f32 = x.iter().zip(y.iter()).map(|(&a, &b)| a * b).sum();
                let side: f32 = y.iter().map(|&b| b * b).sum();
                let xp = mid * dot_xy;
                let mid2 = mid * mid;
                let lgain = 1.0 / (mid2 + side - 2.0 * xp).max(1e-6).sqrt();
                let rgain = 1.0 / (mid2 + side + 2.0 * xp).max(1e-6).sqrt();

                let left_gain = db6_to_linear(energies[0][band]);
                let right_gain = db6_to_linear(energies[1][band]);
                for i in 0..width {
                    if bin + i < frame_size {
                        freq[0][bin + i] = lgain * (mid * x[i] + y[i]) * left_gain;
                        freq[1][bin + i] = rgain * (mid * x[i] - y[i]) * right_gain;
                    }
                }
            } else {
                let gain = db6_to_linear(energies[0][band]);
                for (i, &v) in shapes[0].iter().enumerate() {
                    if bin + i < frame_size {
                        freq[0][bin + i] = v * gain;
                    }
                }
            }

            bin += width;
        }

        for ch in 0..channels {
            self.synthesize_channel(ch, channels, &freq[ch], frame_size, nb_short, out);

            let state = &mut self.channel_state[ch];
            if state.post_filter_gain > 0.0 {
                let mut channel_samples: Vec<f32> = (0..frame_size)
                    .map(|i| read_interleaved(out, ch, channels, i))
                    .collect();
                comb_filter_inplace(
                    &mut channel_samples,
                    0,
                    state.post_filter_period,
                    state.post_filter_period,
                    frame_size,
                    state.post_filter_gain,
                    state.post_filter_gain,
                    state.post_filter_tapset,
                    state.post_filter_tapset,
                    OVERLAP.min(frame_size),
                );
                for (i, &s) in channel_samples.iter().enumerate() {
                    write_interleaved(out, ch, channels, i, s);
                }
            }

            for i in 0..frame_size {
                let x = read_interleaved(out, ch, channels, i);
                let y = x + PREEMPH_COEF * state.preemph_mem;
                state.preemph_mem = y;
                write_interleaved(out, ch, channels, i, y);
            }
        }

        Ok(())
    }

    /// Runs the inverse MDCT (single long block, or `nb_short` interleaved
    /// short blocks for a transient frame) and overlap-adds the result into
    /// `out`, advancing this channel's persisted overlap tail.
    fn synthesize_channel(
        &mut self,
        ch: usize,
        channels: usize,
        freq: &[f32],
        frame_size: usize,
        nb_short: usize,
        out: &mut [f32],
    ) {
        let win = mode::window();
        let state = &mut self.channel_state[ch];

        if nb_short > 1 {
            let block_n2 = frame_size / nb_short;
            let short_mdct = crate::celt::mdct::Mdct::new(block_n2 * 2);

            // De-interleave the full-resolution spectrum into `nb_short`
            // short-block spectra: coefficient `k` belongs to block `k %
            // nb_short` at position `k / nb_short`.
            let mut block_freq = vec![vec![0.0_f32; block_n2]; nb_short];
            for (k, &v) in freq.iter().enumerate() {
                let b = k % nb_short;
                let j = k / nb_short;
                if j < block_n2 {
                    block_freq[b][j] = v;
                }
            }

            let overlap = state.overlap_buf.len().min(block_n2);
            for (b, block_spectrum) in block_freq.iter().enumerate() {
                let mut block_time = vec![0.0_f32; block_n2 * 2];
                short_mdct.backward(block_spectrum, &mut block_time);

                for i in 0..overlap {
                    let w = win[i];
                    let sample = block_time[i] * w + state.overlap_buf[i] * (1.0 - w * w).sqrt().max(0.0);
                    state.overlap_buf[i] = block_time[block_n2 * 2 - overlap + i];
                    write_interleaved(out, ch, channels, b * block_n2 + i, sample);
                }
                for i in overlap..block_n2 {
                    write_interleaved(out, ch, channels, b * block_n2 + i, block_time[i]);
                }
            }
        } else {
            let mdct = crate::celt::mdct::Mdct::new(frame_size * 2);
            let mut time = vec![0.0_f32; frame_size * 2];
            mdct.backward(freq, &mut time);

            let overlap = state.overlap_buf.len();
            for i in 0..overlap {
                let w = win[i];
                let sample = time[i] * w + state.overlap_buf[i] * (1.0 - w * w).sqrt().max(0.0);
                state.overlap_buf[i] = time[frame_size * 2 - overlap + i];
                write_interleaved(out, ch, channels, i, sample);
            }
            for i in overlap..frame_size {
                write_interleaved(out, ch, channels, i, time[i]);
            }
        }
    }

    /// Anti-collapse: when a transient frame's band happens to have all of
    /// its pulses land outside one of the `nb_short` interleaved short
    /// blocks, that block would otherwise decode to silence even though the
    /// band as a whole carries energy. Refill such blocks with PRNG noise
    /// scaled by the band's own gain and renormalize.
    fn anti_collapse_refill(
        &mut self,
        shape: &mut [f32],
        pulses: &[i32],
        bin: usize,
        nb_short: usize,
        band_gain: f32,
    ) {
        if nb_short <= 1 {
            return;
        }
        let mut collapsed_any = false;
        for b in 0..nb_short {
            let block_has_energy = pulses
                .iter()
                .enumerate()
                .any(|(j, &p)| (bin + j) % nb_short == b && p != 0);
            if block_has_energy {
                continue;
            }
            collapsed_any = true;
            let noise_scale = band_gain.max(1e-6).sqrt().min(1.0) * 0.1;
            for (j, slot) in shape.iter_mut().enumerate() {
                if (bin + j) % nb_short == b {
                    let r = self.next_rand();
                    *slot = ((r as i32 >> 20) as f32 / 2048.0) * noise_scale;
                }
            }
        }
        if collapsed_any {
            let energy: f32 = shape.iter().map(|v| v * v).sum();
            if energy > 0.0 {
                let scale = 1.0 / energy.sqrt();
                shape.iter_mut().for_each(|v| *v *= scale);
            }
        }
    }

    /// Decodes the post-filter `(period, gain, tapset)` flags for channel 0,
    /// updating its persisted state. Stereo shares the same flags per the
    /// reference (post-filter is always decoded once per frame).
    fn decode_post_filter(&mut self, range_decoder: &mut RangeDecoder) -> bool {
        let enabled = range_decoder.decode_bit_logp(1);
        if !enabled {
            self.channel_state[0].post_filter_gain = 0.0;
            self.channel_state[1].post_filter_gain = 0.0;
            return false;
        }

        let octave = range_decoder.decode_uint(6);
        let period = (1u32 << octave) * 16 + range_decoder.decode_bits(4 + octave) - 1;
        let gain_q3 = range_decoder.decode_bits(3);
        let gain = gain_q3 as f32 * 0.09375;
        let tapset = if range_decoder.decode_bit_logp(2) { 1 } else { 0 };

        for state in &mut self.channel_state {
            state.post_filter_period = period as usize;
            state.post_filter_gain = gain;
            state.post_filter_tapset = tapset;
        }

        true
    }
}

/// Reads each band's dynalloc boost: a bit at decreasing `logp` (starting at
/// 6, dropping to 1 after a band's first granted boost, floored at 2 for the
/// next band's first attempt), accumulating `width`-sized whole-bit
/// increments until a `0` bit, a per-band cap, or the remaining budget is
/// exhausted. Mirrors the reference's `dynalloc` loop shape; the per-band
/// cap and quantum use the band's own width rather than the reference's
/// precomputed allocation-table caps, consistent with this allocator's
/// general simplification (see [`allocation::allocate`]).
fn decode_dynalloc_boosts(range_decoder: &mut RangeDecoder, widths: &[usize], total_bits: u32) -> Vec<u32> {
    let mut boosts = vec![0u32; widths.len()];
    let mut logp = 6u32;
    let mut remaining_bits = total_bits;

    for (i, &width) in widths.iter().enumerate() {
        let quantum = (width as u32).max(1);
        let cap = quantum * 8;
        let mut boost = 0u32;
        let mut loop_logp = logp;

        while remaining_bits > loop_logp && boost < cap {
            if !range_decoder.decode_bit_logp(loop_logp) {
                break;
            }
            boost += quantum;
            remaining_bits = remaining_bits.saturating_sub(quantum);
            loop_logp = 1;
        }

        if boost > 0 {
            logp = logp.saturating_sub(1).max(2);
        }
        boosts[i] = boost;
    }

    boosts
}

fn db6_to_linear(e: f32) -> f32 {
    2.0_f32.powf(e)
}

fn write_interleaved(out: &mut [f32], ch: usize, channels: usize, i: usize, v: f32) {
    out[i * channels + ch] = v;
}

fn read_interleaved(out: &[f32], ch: usize, channels: usize, i: usize) -> f32 {
    out[i * channels + ch]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_new_and_reset() {
        let mut dec = CeltDecoder::new(SamplingRate::Hz48000, Channels::Stereo).unwrap();
        dec.reset().unwrap();
        assert_eq!(dec.pitch(), 0);
    }

    #[test]
    fn test_decode_silence_frame_produces_zero_energy_growth() {
        let mut dec = CeltDecoder::new(SamplingRate::Hz48000, Channels::Mono).unwrap();
        let buffer = vec![0u8; 256];
        let mut range_decoder = RangeDecoder::new(&buffer);
        let mut out = vec![0.0_f32; 120];
        let result = dec.decode(&mut range_decoder, 120, 0, 0, 4, &mut out);
        assert!(result.is_ok());
    }

    #[test]
    fn test_decode_stereo_frame_runs() {
        let mut dec = CeltDecoder::new(SamplingRate::Hz48000, Channels::Stereo).unwrap();
        let mut buffer = vec![0u8; 256];
        for (i, b) in buffer.iter_mut().enumerate() {
            *b = ((i * 37 + 11) % 256) as u8;
        }
        let mut range_decoder = RangeDecoder::new(&buffer);
        let mut out = vec![0.0_f32; 960 * 2];
        let result = dec.decode(&mut range_decoder, 960, 3, 0, 4, &mut out);
        assert!(result.is_ok());
    }

    #[test]
    fn test_decode_transient_frame_runs_short_blocks() {
        let mut dec = CeltDecoder::new(SamplingRate::Hz48000, Channels::Mono).unwrap();
        let mut buffer = vec![0u8; 256];
        for (i, b) in buffer.iter_mut().enumerate() {
            *b = ((i * 91 + 3) % 256) as u8;
        }
        let mut range_decoder = RangeDecoder::new(&buffer);
        let mut out = vec![0.0_f32; 960];
        let result = dec.decode(&mut range_decoder, 960, 3, 0, 4, &mut out);
        assert!(result.is_ok());
    }

    #[test]
    fn test_dynalloc_boosts_respect_cap_and_budget() {
        let buffer = vec![0xFF_u8; 64];
        let mut range_decoder = RangeDecoder::new(&buffer);
        let widths = vec![4usize, 8, 16];
        let boosts = decode_dynalloc_boosts(&mut range_decoder, &widths, 400);
        for (boost, &width) in boosts.iter().zip(widths.iter()) {
            assert!(*boost <= width as u32 * 8);
        }
    }
}
