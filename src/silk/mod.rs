#[cfg(feature = "decoder")]
pub(crate) use decoder::{LostFlag, SilkDecoder};

#[cfg(feature = "decoder")]
mod decoder;
mod excitation;
mod gains;
mod lpc;
mod nlsf;
mod pitch;
mod plc;
mod stereo;
mod tables;
