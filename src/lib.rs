//! framemux - raw frames in, H.264 container file out
//!
//! The encoder session lifecycle (validate, acquire, submit, drain, finalize)
//! lives in [`session`]. Codec, conversion and muxing are collaborator traits
//! in [`backend`]; the FFmpeg implementation is behind the `ffmpeg` feature.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod params;
pub mod session;

#[cfg(feature = "ffmpeg")]
pub mod av;

#[cfg(test)]
mod testing;

pub use error::{BackendError, EncodeError, FrameStage, MuxStage, OpenStep};
pub use params::{CodecId, EncodeParameters, EncoderConfig, PixelFormat, Rational};
pub use session::{EncoderSession, SessionStats};

#[cfg(feature = "ffmpeg")]
pub use av::{FfmpegBackend, FfmpegSession};
