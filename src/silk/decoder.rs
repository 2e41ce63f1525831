//! Implements the SILK decoder.

use crate::range_coder::RangeDecoder;
use crate::silk::lpc::{apply_ltp, synthesize, LpcState};
use crate::silk::plc::PlcState;
use crate::silk::stereo::{apply_stereo_prediction, StereoState};
use crate::silk::tables::{fs_khz_for, lpc_order, pitch_lag_bounds, SUBFRAME_COUNT};
use crate::silk::{excitation, gains, nlsf, pitch};
use crate::{Channels, DecoderError, SamplingRate};

/// Whether the current frame is being decoded normally, is missing
/// (concealment), or is being recovered from in-band forward error
/// correction data carried by a later packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum LostFlag {
    /// No packet loss.
    NoLoss,
    /// Packet loss.
    Loss,
    /// Forward correction.
    DecodeFec,
}

/// Per-channel persistent SILK state.
#[derive(Clone, Debug)]
struct ChannelState {
    lpc: LpcState,
    plc: PlcState,
    prev_nlsf: Vec<i32>,
    prev_gain_index: i32,
    prev_voiced: bool,
}

impl ChannelState {
    fn new(max_lpc_order: usize, max_pitch_lag: usize) -> Self {
        Self {
            lpc: LpcState::new(max_lpc_order, max_pitch_lag),
            plc: PlcState::default(),
            prev_nlsf: vec![0; max_lpc_order],
            prev_gain_index: 0,
            prev_voiced: false,
        }
    }

    fn reset(&mut self) {
        self.lpc.reset();
        self.plc.reset();
        self.prev_nlsf.iter_mut().for_each(|v| *v = 0);
        self.prev_gain_index = 0;
        self.prev_voiced = false;
    }
}

/// The Silk decoder.
#[derive(Clone, Debug)]
pub(crate) struct SilkDecoder {
    sampling_rate: SamplingRate,
    channels: Channels,
    internal_sampling_rate: SamplingRate,
    internal_channels: Channels,
    payload_size_ms: usize,

    channel_state: [ChannelState; 2],
    stereo: StereoState,
    last_pitch_lag: u32,
}

impl SilkDecoder {
    /// Creates a new Silk decoder. Configures the output sampling rate and output channels.
    pub(crate) fn new(
        sampling_rate: SamplingRate,
        channels: Channels,
    ) -> Result<Self, DecoderError> {
        let (_, max_lag) = pitch_lag_bounds(16);
        Ok(Self {
            sampling_rate,
            channels,
            internal_sampling_rate: SamplingRate::Hz16000,
            internal_channels: channels,
            payload_size_ms: 20,
            channel_state: [
                ChannelState::new(16, max_lag as usize),
                ChannelState::new(16, max_lag as usize),
            ],
            stereo: StereoState::default(),
            last_pitch_lag: 0,
        })
    }

    /// Resets the Silk decoder.
    pub(crate) fn reset(&mut self) -> Result<(), DecoderError> {
        self.channel_state.iter_mut().for_each(ChannelState::reset);
        self.stereo.reset();
        self.internal_sampling_rate = SamplingRate::Hz16000;
        self.last_pitch_lag = 0;
        Ok(())
    }

    /// Gets the pitch of the last decoded frame.
    pub(crate) fn pitch(&self) -> u32 {
        self.last_pitch_lag
    }

    /// Sets the internal channels.
    pub(crate) fn set_internal_channels(&mut self, internal_channels: Channels) {
        self.internal_channels = internal_channels;
    }

    /// Sets the sampling rate.
    pub(crate) fn set_internal_sampling_rate(&mut self, sampling_rate: SamplingRate) {
        self.internal_sampling_rate = sampling_rate;
    }

    /// Sets the payload size in ms.
    pub(crate) fn set_payload_size_ms(&mut self, payload_size_ms: usize) {
        self.payload_size_ms = payload_size_ms;
    }

    fn num_channels(&self) -> usize {
        match self.internal_channels {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }

    /// Decodes one Opus frame's worth of SILK payload (or conceals it, per
    /// `lost_flag`), writing `frame_len` interleaved samples per channel at
    /// the internal sample rate into `out`.
    ///
    /// A SILK payload covering 40 or 60 ms is, per spec, treated as 2 or 3
    /// independent 20 ms SILK frames: per-frame VAD flags and LBRR flags are
    /// read up front (step 1), then each 20 ms frame's own signal-type,
    /// gain, NLSF, pitch and excitation fields are decoded in sequence.
    ///
    /// `range_decoder` is `None` exactly when `lost_flag != NoLoss` and no
    /// bitstream is available to decode from.
    pub(crate) fn decode(
        &mut self,
        range_decoder: &mut Option<RangeDecoder>,
        out: &mut [f32],
        frame_len: usize,
        lost_flag: LostFlag,
        first_frame: bool,
    ) -> Result<(), DecoderError> {
        let fs_khz = fs_khz_for(self.internal_sampling_rate);
        let channels = self.num_channels();
        debug_assert_eq!(out.len(), frame_len * channels);

        if lost_flag != LostFlag::NoLoss || range_decoder.is_none() {
            return self.conceal(out, frame_len, channels);
        }

        let range_decoder = range_decoder.as_mut().expect("checked above");

        let frame_20ms_len = (fs_khz as usize * 20).max(1);
        let n_frames = (frame_len / frame_20ms_len).max(1);
        let chunk_len = frame_len / n_frames;

        // Step 1: one VAD flag per 20 ms frame in this payload, followed by
        // one LBRR flag per frame, both read up front before any frame's
        // per-channel fields. LBRR flag values are discarded: this decoder
        // has no embedded-redundancy payload parser (see DESIGN.md), so a
        // requested FEC decode always falls back to concealment regardless
        // of what these flags say.
        for _ in 0..n_frames {
            let _vad = range_decoder.decode_bit_logp(1);
        }
        for _ in 0..n_frames {
            let _lbrr = range_decoder.decode_bit_logp(1);
        }

        for i in 0..n_frames {
            let start = i * chunk_len * channels;
            let end = start + chunk_len * channels;
            self.decode_one_frame(range_decoder, &mut out[start..end], chunk_len, fs_khz, first_frame && i == 0)?;
        }

        Ok(())
    }

    /// Decodes a single 20 ms SILK frame's per-channel fields (signal type,
    /// gains, NLSF, pitch, excitation) and synthesizes `frame_len` samples
    /// per channel.
    fn decode_one_frame(
        &mut self,
        range_decoder: &mut RangeDecoder,
        out: &mut [f32],
        frame_len: usize,
        fs_khz: u32,
        first_frame: bool,
    ) -> Result<(), DecoderError> {
        let channels = self.num_channels();
        let order = lpc_order(fs_khz);

        let mut channel_pcm: Vec<Vec<f32>> = Vec::with_capacity(channels);
        let mut stereo_pred_q13 = [0i32; 2];

        if channels == 2 {
            stereo_pred_q13[0] = range_decoder.decode_uint(16384) as i32 - 8192;
            stereo_pred_q13[1] = range_decoder.decode_uint(16384) as i32 - 8192;
        }
        let mid_only = channels == 2 && range_decoder.decode_bit_logp(1);

        for ch in 0..channels {
            let voiced = range_decoder.decode_bit_logp(1);
            let _quant_offset = range_decoder.decode_bits(1);

            let gains = gains::decode_gains(
                range_decoder,
                &mut self.channel_state[ch].prev_gain_index,
                first_frame,
                voiced,
            );

            let nlsf_q15 = nlsf::decode_nlsf(range_decoder, order);
            let interp_factor = range_decoder.decode_uint(5) as i32;
            let interpolated = nlsf::interpolate_nlsf(
                &self.channel_state[ch].prev_nlsf,
                &nlsf_q15,
                interp_factor,
            );
            self.channel_state[ch].prev_nlsf = nlsf_q15;

            let raw_lpc = nlsf::nlsf_to_lpc(&interpolated, order);
            let lpc = nlsf::stabilize_lpc(&raw_lpc);

            let base_lag = if voiced {
                let lag = pitch::decode_pitch_lag(range_decoder, fs_khz);
                self.last_pitch_lag = lag as u32;
                Some(lag)
            } else {
                None
            };
            let lag_contour = if voiced {
                pitch::decode_lag_contour(range_decoder)
            } else {
                [0i32; SUBFRAME_COUNT]
            };

            let mut seed = range_decoder.decode_bits(4);
            let excitation = excitation::decode_excitation(range_decoder, frame_len, &mut seed);

            let subframe_len = frame_len / SUBFRAME_COUNT;
            let mut pcm = vec![0.0_f32; frame_len];
            for sf in 0..SUBFRAME_COUNT {
                let start = sf * subframe_len;
                let end = (start + subframe_len).min(frame_len);
                let gain = gains[sf];

                let mut sub_excitation: Vec<f32> =
                    excitation[start..end].iter().map(|&e| e * gain / 8192.0).collect();

                if let Some(lag) = base_lag {
                    let taps = pitch::decode_ltp_taps(range_decoder);
                    let _scale = pitch::decode_ltp_scale(range_decoder);
                    let sf_lag = (lag + lag_contour[sf]).max(1) as usize;
                    apply_ltp(&mut sub_excitation, &self.channel_state[ch].lpc, sf_lag, &taps);
                }

                synthesize(
                    &sub_excitation,
                    &lpc,
                    &mut self.channel_state[ch].lpc,
                    &mut pcm[start..end],
                );
            }

            if let Some(lag) = base_lag {
                self.channel_state[ch].plc.note_good_frame(lag as usize, &lpc, gains[SUBFRAME_COUNT - 1]);
            }
            self.channel_state[ch].prev_voiced = voiced;

            channel_pcm.push(pcm);
        }

        if channels == 2 {
            let side = if mid_only { Vec::new() } else { channel_pcm[1].clone() };
            let (left, right) = apply_stereo_prediction(
                &channel_pcm[0],
                &side,
                stereo_pred_q13,
                &mut self.stereo,
                fs_khz,
                mid_only,
            );
            for i in 0..frame_len {
                out[i * 2] = left[i];
                out[i * 2 + 1] = right[i];
            }
        } else {
            out.copy_from_slice(&channel_pcm[0]);
        }

        Ok(())
    }

    fn conceal(&mut self, out: &mut [f32], frame_len: usize, channels: usize) -> Result<(), DecoderError> {
        for ch in 0..channels {
            let (plc, lpc) = {
                let state = &mut self.channel_state[ch];
                (&mut state.plc, &mut state.lpc)
            };
            let concealed = crate::silk::plc::conceal(plc, lpc, frame_len);
            if channels == 2 {
                for (i, &v) in concealed.iter().enumerate() {
                    out[i * 2 + ch] = v;
                }
            } else {
                out[..frame_len].copy_from_slice(&concealed);
            }
        }
        Ok(())
    }
}
