//! Implement the Opus decoder.

use crate::celt::CeltDecoder;
use crate::range_coder::RangeDecoder;
use crate::resampler::ResamplerBank;
use crate::silk::{LostFlag, SilkDecoder};
use crate::{
    parse_packet, pcm_soft_clip, query_packet_bandwidth, query_packet_channel_count,
    query_packet_codec_mode, query_packet_samples_per_frame, Bandwidth, Channels, CodecMode,
    DecoderError, Sample, SamplingRate,
};

/// SILK's internal decoding rate for a given packet bandwidth. Hybrid frames
/// (superwideband/fullband at `CodecMode::Hybrid`) still run SILK at 16 kHz;
/// only the CELT layer covers the higher bands.
fn silk_rate_hz(bandwidth: Bandwidth) -> u32 {
    match bandwidth {
        Bandwidth::Narrowband => 8000,
        Bandwidth::Mediumband => 12000,
        _ => 16000,
    }
}

/// Maps a packet's [`Bandwidth`] onto the CELT band-count table index used
/// by [`crate::celt::mode::bands_for_bandwidth`].
fn celt_bandwidth_index(bandwidth: Bandwidth) -> usize {
    match bandwidth {
        Bandwidth::Narrowband => 0,
        Bandwidth::Mediumband => 1,
        Bandwidth::Wideband => 2,
        Bandwidth::Superwideband => 3,
        Bandwidth::Fullband | Bandwidth::Auto => 4,
    }
}

/// `log2(frame_size / 120)`, CELT's block-size shift. 120 samples at 48 kHz
/// is the smallest CELT frame (2.5 ms); each step doubles it.
fn celt_lm(samples_per_frame_48k: usize) -> u32 {
    match samples_per_frame_48k {
        120 => 0,
        240 => 1,
        480 => 2,
        _ => 3,
    }
}

/// Configures the decoder on creation.
///
/// Internally Opus stores data at 48000 Hz, so that should be the default
/// value for the sampling rate. However, the decoder can efficiently decode
/// to buffers at 8, 12, 16, and 24 kHz so if for some reason the caller cannot
/// use data at the full sample rate, or knows the compressed data doesn't
/// use the full frequency range, it can request decoding at a reduced
/// rate. Likewise, the decoder is capable of filling in either mono or
/// interleaved stereo pcm buffers, at the caller's request.
#[derive(Clone, Debug)]
pub struct DecoderConfiguration {
    /// Sample rate to decode at (Hz). Default: 48000 kHz.
    pub sampling_rate: SamplingRate,
    /// Number of channels to decode. Default: Stereo.
    pub channels: Channels,
    /// Scales the decoded output by a factor specified in Q8 dB units. Default: 0.
    pub gain: i16,
}

impl Default for DecoderConfiguration {
    fn default() -> Self {
        Self {
            sampling_rate: SamplingRate::Hz48000,
            channels: Channels::Stereo,
            gain: 0,
        }
    }
}

/// Opus decoder.
///
/// Opus is a stateful codec with overlapping blocks and as a result Opus
/// packets are not coded independently of each other. Packets must be
/// passed into the decoder serially and in the correct order for a correct
/// decode. Lost packets can be replaced with loss concealment by calling
/// the decoder with `None` for the missing packet.
#[derive(Clone, Debug)]
pub struct Decoder {
    celt_dec: CeltDecoder,
    silk_dec: SilkDecoder,
    channels: Channels,
    sampling_rate: SamplingRate,
    decode_gain: i16,

    stream_channels: Channels,
    bandwidth: Bandwidth,
    mode: Option<CodecMode>,
    prev_mode: Option<CodecMode>,
    frame_size: usize,
    prev_redundancy: Option<usize>,
    last_packet_duration: Option<u32>,

    final_range: u32,

    resampler: ResamplerBank,
    prev_silk_rate_hz: Option<u32>,
    /// Last native-rate SILK sample per channel, prepended to the next
    /// packet's resampler input to kill the discontinuity at frame
    /// boundaries (the reference's `s_mid[1]` carry).
    silk_carry: [f32; 2],
    /// Tail of the last packet's final 48 kHz output, kept for the 5 ms
    /// SILK/CELT crossfade on a mode switch.
    prev_tail: Vec<f32>,
    softclip_mem: Vec<f32>,
    celt_loss_count: u32,
}

impl Decoder {
    /// Creates a new `Decoder` with the given configuration.
    pub fn new(configuration: &DecoderConfiguration) -> Result<Self, DecoderError> {
        let celt_dec = CeltDecoder::new(configuration.sampling_rate, configuration.channels)?;
        let silk_dec = SilkDecoder::new(configuration.sampling_rate, configuration.channels)?;

        let channels = configuration.channels as usize;
        Ok(Self {
            celt_dec,
            silk_dec,
            sampling_rate: configuration.sampling_rate,
            channels: configuration.channels,
            decode_gain: configuration.gain,
            stream_channels: configuration.channels,
            bandwidth: Bandwidth::Auto,
            mode: None,
            prev_mode: None,
            frame_size: configuration.sampling_rate as usize / 400,
            prev_redundancy: None,
            last_packet_duration: None,

            final_range: 0,

            resampler: ResamplerBank::new(),
            prev_silk_rate_hz: None,
            silk_carry: [0.0; 2],
            prev_tail: Vec::new(),
            softclip_mem: vec![0.0; channels],
            celt_loss_count: 0,
        })
    }

    /// Resets the Decoder to be equivalent to a freshly initialized decoder.
    ///
    /// This should be called when switching streams in order to prevent
    /// the back to back decoding from giving different results from
    /// one at a time decoding.
    pub fn reset(&mut self) -> Result<(), DecoderError> {
        self.silk_dec.reset()?;
        self.celt_dec.reset()?;

        self.stream_channels = self.channels;
        self.bandwidth = Bandwidth::Auto;
        self.mode = None;
        self.prev_mode = None;
        self.frame_size = self.sampling_rate as usize / 400;
        self.prev_redundancy = None;
        self.last_packet_duration = None;

        self.final_range = 0;
        self.resampler.reset();
        self.prev_silk_rate_hz = None;
        self.silk_carry = [0.0; 2];
        self.prev_tail.clear();
        self.softclip_mem.iter_mut().for_each(|v| *v = 0.0);
        self.celt_loss_count = 0;

        Ok(())
    }

    /// Returns the sampling rate the decoder was initialized with.
    pub fn sampling_rate(&self) -> SamplingRate {
        self.sampling_rate
    }

    /// Returns the channels the decoder was initialized with.
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Returns the amount to scale PCM signal by in Q8 dB units.
    pub fn gain(&self) -> i16 {
        self.decode_gain
    }

    /// Returns the decoder's last bandpass.
    pub fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    /// Returns the pitch of the last decoded frame, measured in samples at 48 kHz
    pub fn pitch(&self) -> Option<u32> {
        if let Some(prev_mode) = self.prev_mode {
            match prev_mode {
                CodecMode::Celt => Some(self.celt_dec.pitch()),
                CodecMode::Silk | CodecMode::Hybrid => Some(self.silk_dec.pitch()),
            }
        } else {
            None
        }
    }

    /// Returns the duration (in samples) of the last packet successfully decoded or concealed.
    pub fn last_packet_duration(&self) -> Option<u32> {
        self.last_packet_duration
    }

    /// Returns the final state of the codec's entropy coder.
    ///
    /// This is used for testing purposes, the encoder and decoder state
    /// should be identical after coding a payload assuming no data
    /// corruption or software bugs).
    pub fn final_range(&mut self) -> u32 {
        self.final_range
    }

    /// Decode an Opus packet with a generic sample output.
    ///
    /// Returns number of decoded samples.
    ///
    /// Caller needs to make sure that the samples buffer has enough space to fit
    /// all samples inside the packet. Call `query_packet_sample_count()` to query
    /// the number of samples inside a packet and resize the buffer if needed.
    ///
    /// The internal format is `f32`. Use `decode_float()` to access it directly.
    ///
    /// # Arguments
    /// * `packet`     - Input payload. Use a `None` to indicate packet loss.
    /// * `samples`    - Output signal encoded as PCM samples (interleaved if 2 channels).
    ///                  Length must be at least `frame_size` * `channels`.
    /// * `frame_size` - Number of samples per channel of available space in a PCM.
    ///                  `frame_size` must be a multiple of 2.5 ms (400 for 48kHz).
    ///                  In the case of PLC (packet==`None`) or FEC (decode_fec=`true`), then
    ///                  `frame_size` needs to be exactly the duration of audio that is missing,
    ///                  otherwise the decoder will not be in the optimal state to decode
    ///                  the next incoming packet.
    /// * `decode_fec` - Request that any in-band forward error correction data be decoded.
    ///                  If no such data is available, the frame is decoded as if it were lost.
    ///
    pub fn decode<S: Sample>(
        &mut self,
        packet: Option<&[u8]>,
        samples: &mut [S],
        frame_size: usize,
        decode_fec: bool,
    ) -> Result<u32, DecoderError> {
        let channels = self.channels as usize;
        let mut float_buf = vec![0.0_f32; frame_size * channels];
        let (count, _) = self.decode_native(packet, &mut float_buf, frame_size, decode_fec, false, false)?;
        for (dst, &src) in samples.iter_mut().zip(float_buf.iter()) {
            *dst = S::from_f32(src);
        }
        Ok(count)
    }

    /// Decode an Opus packet with floating point output.
    ///
    /// Returns number of decoded samples.
    ///
    /// Caller needs to make sure that the samples buffer has enough space to fit
    /// all samples inside the packet. Call `query_packet_sample_count()` to query
    /// the number of samples inside a packet and resize the buffer if needed.
    ///
    /// # Arguments
    /// * `packet`     - Input payload. Use a `None` to indicate packet loss.
    /// * `samples`    - Output signal encoded as PCM samples (interleaved if 2 channels).
    ///                  Length is frame_size * channels.
    /// * `frame_size` - Number of samples per channel of available space in a PCM.
    ///                  `frame_size` must be a multiple of 2.5 ms (400 for 48kHz).
    ///                  In the case of PLC (packet==`None`) or FEC (decode_fec=`true`), then
    ///                  `frame_size` needs to be exactly the duration of audio that is missing,
    ///                  otherwise the decoder will not be in the optimal state to decode
    ///                  the next incoming packet.
    /// * `decode_fec` - Request that any in-band forward error correction data be decoded.
    ///                  If no such data is available, the frame is decoded as if it were lost.
    ///
    pub fn decode_float(
        &mut self,
        packet: Option<&[u8]>,
        samples: &mut [f32],
        frame_size: usize,
        decode_fec: bool,
    ) -> Result<u32, DecoderError> {
        let (count, _) = self.decode_native(packet, samples, frame_size, decode_fec, false, false)?;
        Ok(count)
    }

    /// Runs the mode orchestrator (TOC parse, SILK/CELT dispatch, resampling,
    /// mode-switch crossfade) and returns the samples decoded and the
    /// packet_offset (used for multiple streams sharing one self-delimited
    /// buffer).
    fn decode_native(
        &mut self,
        packet: Option<&[u8]>,
        samples: &mut [f32],
        frame_size: usize,
        decode_fec: bool,
        self_delimited: bool,
        soft_clip: bool,
    ) -> Result<(u32, usize), DecoderError> {
        let channels = self.channels as usize;

        let (mut combined_48k, mode, packet_offset) = match packet {
            None => {
                let samples_per_frame_48k = frame_size * 48000 / self.sampling_rate as usize;
                let mode = self.prev_mode.unwrap_or(CodecMode::Silk);
                let pcm = self.conceal_frame(mode, samples_per_frame_48k, channels);
                (pcm, mode, 0usize)
            }
            Some(packet) => {
                if packet.is_empty() {
                    return Err(DecoderError::MalformedPacket("empty packet"));
                }

                self.bandwidth = query_packet_bandwidth(packet);
                self.stream_channels = query_packet_channel_count(packet);
                let mode = query_packet_codec_mode(packet);

                let mut frame_offsets = [0usize; 48];
                let mut frame_sizes = [0usize; 48];
                let mut packet_offset = 0usize;
                let frame_count = parse_packet(
                    packet,
                    self_delimited,
                    Some(&mut frame_offsets),
                    &mut frame_sizes,
                    None,
                    Some(&mut packet_offset),
                )?;

                let samples_per_frame_48k =
                    query_packet_samples_per_frame(packet, SamplingRate::Hz48000);

                let mut out = Vec::with_capacity(samples_per_frame_48k * channels * frame_count);
                for i in 0..frame_count {
                    let start = frame_offsets[i];
                    let end = start + frame_sizes[i];
                    if end > packet.len() {
                        return Err(DecoderError::MalformedPacket("frame exceeds packet bounds"));
                    }
                    let pcm = self.decode_frame(
                        &packet[start..end],
                        mode,
                        self.bandwidth,
                        samples_per_frame_48k,
                        channels,
                        i == 0,
                        decode_fec,
                    )?;
                    out.extend_from_slice(&pcm);
                }

                (out, mode, packet_offset)
            }
        };

        if let Some(prev) = self.prev_mode {
            let mode_switch = (prev == CodecMode::Silk && mode == CodecMode::Celt)
                || (prev == CodecMode::Celt && mode == CodecMode::Silk);
            if mode_switch && !self.prev_tail.is_empty() {
                crossfade(&mut combined_48k, &self.prev_tail, channels);
            }
        }
        self.mode = Some(mode);
        self.prev_mode = Some(mode);

        let fade_samples = (48000 * 5 / 1000) * channels;
        let keep = fade_samples.min(combined_48k.len());
        self.prev_tail = combined_48k[combined_48k.len() - keep..].to_vec();

        let downsampled = self.downsample_to_output(&combined_48k, channels);

        if samples.len() < downsampled.len() {
            return Err(DecoderError::BufferTooSmall {
                needed: downsampled.len(),
                available: samples.len(),
            });
        }

        let gain_db = f32::from(self.decode_gain) / 256.0;
        let gain_lin = 10f32.powf(gain_db / 20.0);
        for (dst, &src) in samples.iter_mut().zip(downsampled.iter()) {
            *dst = src * gain_lin;
        }

        if soft_clip {
            pcm_soft_clip(&mut samples[..downsampled.len()], channels, &mut self.softclip_mem);
        }

        let frame_count_out = (downsampled.len() / channels.max(1)) as u32;
        self.last_packet_duration = Some(frame_count_out);

        Ok((frame_count_out, packet_offset))
    }

    /// Decodes one Opus frame's worth of raw audio payload (already stripped
    /// of the packet's shared TOC byte) into 48 kHz interleaved samples.
    #[allow(clippy::too_many_arguments)]
    fn decode_frame(
        &mut self,
        frame: &[u8],
        mode: CodecMode,
        bandwidth: Bandwidth,
        samples_per_frame_48k: usize,
        channels: usize,
        first_frame: bool,
        decode_fec: bool,
    ) -> Result<Vec<f32>, DecoderError> {
        let lm = celt_lm(samples_per_frame_48k);
        let lost_flag = if decode_fec {
            LostFlag::DecodeFec
        } else {
            LostFlag::NoLoss
        };

        let mut rd_opt = Some(RangeDecoder::new(frame));

        let mut silk_48k: Option<Vec<f32>> = None;
        if matches!(mode, CodecMode::Silk | CodecMode::Hybrid) {
            let rate_hz = silk_rate_hz(bandwidth);
            let sampling = match rate_hz {
                8000 => SamplingRate::Hz8000,
                12000 => SamplingRate::Hz12000,
                _ => SamplingRate::Hz16000,
            };
            self.silk_dec.set_internal_sampling_rate(sampling);
            self.silk_dec.set_internal_channels(self.channels);
            self.prev_silk_rate_hz = Some(rate_hz);

            let native_len = samples_per_frame_48k * rate_hz as usize / 48000;
            let mut native_pcm = vec![0.0_f32; native_len * channels];
            self.silk_dec
                .decode(&mut rd_opt, &mut native_pcm, native_len, lost_flag, first_frame)?;

            let mut up = vec![0.0_f32; samples_per_frame_48k * channels];
            for c in 0..channels {
                let mut channel_native = Vec::with_capacity(native_len + 1);
                channel_native.push(self.silk_carry[c]);
                for i in 0..native_len {
                    channel_native.push(native_pcm[i * channels + c]);
                }
                let resampled = self.resampler.process(&channel_native, rate_hz);
                self.silk_carry[c] = *channel_native.last().unwrap_or(&0.0);
                for (i, &v) in resampled.iter().take(samples_per_frame_48k).enumerate() {
                    up[i * channels + c] = v;
                }
            }
            silk_48k = Some(up);
        }

        let mut celt_48k: Option<Vec<f32>> = None;
        if matches!(mode, CodecMode::Celt | CodecMode::Hybrid) {
            let mut rd = rd_opt.take().unwrap_or_else(|| RangeDecoder::new(frame));
            let start_band = if mode == CodecMode::Hybrid { 17 } else { 0 };
            let bw_idx = celt_bandwidth_index(bandwidth);
            let mut out = vec![0.0_f32; samples_per_frame_48k * channels];
            self.celt_dec
                .decode(&mut rd, samples_per_frame_48k, lm, start_band, bw_idx, &mut out)?;
            celt_48k = Some(out);
        }

        Ok(match (silk_48k, celt_48k) {
            (Some(s), Some(c)) => s.iter().zip(c.iter()).map(|(a, b)| a + b).collect(),
            (Some(s), None) => s,
            (None, Some(c)) => c,
            (None, None) => vec![0.0_f32; samples_per_frame_48k * channels],
        })
    }

    /// Produces `samples_per_frame_48k` of concealment audio for a lost
    /// packet, routing to whichever decoder last owned the signal.
    fn conceal_frame(&mut self, mode: CodecMode, samples_per_frame_48k: usize, channels: usize) -> Vec<f32> {
        match mode {
            CodecMode::Celt => {
                self.celt_loss_count += 1;
                let decay = 0.98_f32.powi(self.celt_loss_count as i32);
                if self.prev_tail.len() >= samples_per_frame_48k * channels {
                    self.prev_tail[..samples_per_frame_48k * channels]
                        .iter()
                        .map(|&v| v * decay)
                        .collect()
                } else {
                    vec![0.0_f32; samples_per_frame_48k * channels]
                }
            }
            CodecMode::Silk | CodecMode::Hybrid => {
                self.celt_loss_count = 0;
                let rate_hz = self.prev_silk_rate_hz.unwrap_or(16000);
                let native_len = samples_per_frame_48k * rate_hz as usize / 48000;
                let mut native_pcm = vec![0.0_f32; native_len * channels];
                let mut rd_opt = None;
                let _ = self.silk_dec.decode(
                    &mut rd_opt,
                    &mut native_pcm,
                    native_len,
                    LostFlag::Loss,
                    false,
                );

                let mut up = vec![0.0_f32; samples_per_frame_48k * channels];
                for c in 0..channels {
                    let mut channel_native = Vec::with_capacity(native_len + 1);
                    channel_native.push(self.silk_carry[c]);
                    for i in 0..native_len {
                        channel_native.push(native_pcm[i * channels + c]);
                    }
                    let resampled = self.resampler.process(&channel_native, rate_hz);
                    self.silk_carry[c] = *channel_native.last().unwrap_or(&0.0);
                    for (i, &v) in resampled.iter().take(samples_per_frame_48k).enumerate() {
                        up[i * channels + c] = v;
                    }
                }
                up
            }
        }
    }

    /// Converts a 48 kHz composite signal down to the decoder's configured
    /// output rate by simple decimation. The ratio is always an integer
    /// (48000 is a multiple of every supported output rate), so this needs
    /// no fractional resampling, unlike the SILK-rate-to-48kHz path in
    /// [`crate::resampler`].
    fn downsample_to_output(&self, combined_48k: &[f32], channels: usize) -> Vec<f32> {
        let out_rate = self.sampling_rate as usize;
        if out_rate == 48000 {
            return combined_48k.to_vec();
        }
        let ratio = 48000 / out_rate;
        let frames = combined_48k.len() / channels.max(1);
        let out_frames = frames / ratio;
        let mut out = vec![0.0_f32; out_frames * channels];
        for i in 0..out_frames {
            for c in 0..channels {
                out[i * channels + c] = combined_48k[i * ratio * channels + c];
            }
        }
        out
    }
}

/// Linearly blends `out`'s leading samples with `prev_tail`'s trailing
/// samples, ramping from the previous mode's tail to the new mode's head
/// over `min(prev_tail, out)` frames.
fn crossfade(out: &mut [f32], prev_tail: &[f32], channels: usize) {
    let fade_frames = (prev_tail.len() / channels.max(1)).min(out.len() / channels.max(1));
    for i in 0..fade_frames {
        let w = (i as f32 + 1.0) / (fade_frames as f32 + 1.0);
        for c in 0..channels {
            let idx = i * channels + c;
            out[idx] = out[idx] * w + prev_tail[idx] * (1.0 - w);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    /// TOC byte for a SILK-only, wideband, 20 ms, mono, single-frame packet
    /// (config 9, code 0): `config << 3 | channels << 2 | code`.
    fn silk_wb_mono_toc() -> u8 {
        0x48
    }

    #[test]
    fn test_decode_silk_wideband_mono_frame() {
        let configuration = DecoderConfiguration {
            sampling_rate: SamplingRate::Hz48000,
            channels: Channels::Mono,
            gain: 0,
        };
        let mut dec = Decoder::new(&configuration).unwrap();

        let mut packet = vec![silk_wb_mono_toc()];
        packet.extend(std::iter::repeat(0x5A_u8).take(64));

        let mut out = vec![0.0_f32; 960];
        let count = dec.decode_float(Some(&packet), &mut out, 960, false).unwrap();
        assert_eq!(count, 960);
    }

    #[test]
    fn test_decode_conceal_without_packet() {
        let configuration = DecoderConfiguration::default();
        let mut dec = Decoder::new(&configuration).unwrap();
        let channels = dec.channels() as usize;

        let mut out = vec![0.0_f32; 960 * channels];
        let count = dec.decode_float(None, &mut out, 960, false).unwrap();
        assert_eq!(count as usize, 960);
    }

    #[test]
    fn test_decode_to_reduced_output_rate() {
        let configuration = DecoderConfiguration {
            sampling_rate: SamplingRate::Hz16000,
            channels: Channels::Mono,
            gain: 0,
        };
        let mut dec = Decoder::new(&configuration).unwrap();

        let mut packet = vec![silk_wb_mono_toc()];
        packet.extend(std::iter::repeat(0x5A_u8).take(64));

        // 20 ms at 16 kHz is 320 samples; the 48 kHz composite is decimated
        // down by the same ratio the resampler brought it up.
        let mut out = vec![0.0_f32; 320];
        let count = dec.decode_float(Some(&packet), &mut out, 320, false).unwrap();
        assert_eq!(count, 320);
    }

    #[test]
    fn test_reset_clears_mode_and_tail_state() {
        let configuration = DecoderConfiguration::default();
        let mut dec = Decoder::new(&configuration).unwrap();
        dec.prev_mode = Some(CodecMode::Celt);
        dec.prev_tail = vec![1.0; 10];
        dec.reset().unwrap();
        assert!(dec.prev_mode.is_none());
        assert!(dec.prev_tail.is_empty());
    }

    #[test]
    fn test_buffer_too_small_is_reported() {
        let configuration = DecoderConfiguration::default();
        let mut dec = Decoder::new(&configuration).unwrap();

        let mut packet = vec![silk_wb_mono_toc()];
        packet.extend(std::iter::repeat(0x5A_u8).take(64));

        let mut out = vec![0.0_f32; 4];
        let result = dec.decode_float(Some(&packet), &mut out, 960, false);
        assert!(matches!(result, Err(DecoderError::BufferTooSmall { .. })));
    }
}
