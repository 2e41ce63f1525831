//! Decoder errors.

/// Errors thrown by the decoder.
///
/// Mirrors the error taxonomy of the reference implementation: every kind
/// is fatal for the packet currently being decoded, none are retried
/// internally, and the decoder never partially emits on an error path.
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// TOC/framing inconsistency, or a declared frame size exceeds the
    /// buffer that was supposed to contain it.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),
    /// The caller-supplied output buffer cannot hold the packet's worth of
    /// samples.
    #[error("output buffer too small: need {needed} samples, got {available}")]
    BufferTooSmall {
        /// Samples required to hold the full decode.
        needed: usize,
        /// Samples actually available in the caller's buffer.
        available: usize,
    },
    /// A construction-time parameter was out of range.
    #[error("invalid decoder configuration: {0}")]
    InvalidConfig(&'static str),
    /// The entropy-coded portion of a frame violated a syntactical
    /// invariant (e.g. a PVQ pulse vector whose magnitude sum didn't match
    /// its decoded pulse count).
    #[error("corrupt stream: {0}")]
    CorruptStream(&'static str),
    /// An internal invariant was violated; indicates a decoder bug rather
    /// than a malformed bitstream.
    #[error("internal decoder error: {0}")]
    InternalError(&'static str),
}
