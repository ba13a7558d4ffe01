//! FFmpeg backend (`ffmpeg` feature)
//!
//! Implements the collaborator traits on top of `playa-ffmpeg`. The safe
//! wrappers are used where they exist; the muxer and a few encoder knobs go
//! through `ffmpeg::ffi` because the safe API merges steps that the session
//! keeps separate (allocating the container vs. opening the output file).

mod convert;
mod encoder;
mod mux;

pub use convert::FfmpegConverter;
pub use encoder::{FfmpegEncoder, FfmpegFrame, FfmpegPacket};
pub use mux::FfmpegContainer;

use log::{debug, info};
use playa_ffmpeg as ffmpeg;
use std::ffi::{CString, c_int};
use std::path::Path;
use std::sync::Once;

use crate::backend::Backend;
use crate::error::BackendError;
use crate::params::{CodecId, EncoderConfig, PixelFormat, Rational};
use crate::session::EncoderSession;

/// Session driven by the FFmpeg backend
pub type FfmpegSession = EncoderSession<FfmpegBackend>;

/// Set to any value to let FFmpeg print its own log at info level
pub const FFMPEG_LOG_ENV: &str = "FRAMEMUX_FFMPEG_LOG";

static FFMPEG_INIT: Once = Once::new();

fn init_ffmpeg() {
    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            log::error!("FFmpeg init failed: {}", e);
        }
        let level = if std::env::var_os(FFMPEG_LOG_ENV).is_some() {
            ffmpeg::ffi::AV_LOG_INFO
        } else {
            ffmpeg::ffi::AV_LOG_QUIET
        };
        unsafe {
            ffmpeg::ffi::av_log_set_level(level as c_int);
        }
        debug!("FFmpeg initialized (log level {})", level);
    });
}

/// Factory for FFmpeg-backed collaborators
#[derive(Debug)]
pub struct FfmpegBackend {
    /// Encoder name tried before the generic codec lookup
    preferred_encoder: Option<String>,
}

impl FfmpegBackend {
    pub fn new() -> Self {
        init_ffmpeg();
        Self {
            preferred_encoder: Some("libx264".to_string()),
        }
    }

    /// Use a specific encoder implementation (e.g. `libopenh264`) when present
    pub fn with_encoder_name(mut self, name: Option<impl Into<String>>) -> Self {
        self.preferred_encoder = name.map(Into::into);
        self
    }
}

impl Backend for FfmpegBackend {
    type Codec = ffmpeg::Codec;
    type Frame = FfmpegFrame;
    type Packet = FfmpegPacket;
    type Encoder = FfmpegEncoder;
    type Converter = FfmpegConverter;
    type Container = FfmpegContainer;

    fn create_container(&mut self, path: &Path) -> Result<FfmpegContainer, BackendError> {
        init_ffmpeg();
        FfmpegContainer::alloc(path)
    }

    fn find_encoder(&mut self, codec: CodecId) -> Option<ffmpeg::Codec> {
        if let Some(name) = self.preferred_encoder.as_deref()
            && let Some(found) = ffmpeg::encoder::find_by_name(name)
        {
            info!("Using encoder: {}", name);
            return Some(found);
        }
        let found = ffmpeg::encoder::find(codec_id(codec))?;
        info!("Using encoder: {}", found.name());
        Some(found)
    }

    fn configure_encoder(
        &mut self,
        codec: &ffmpeg::Codec,
        config: &EncoderConfig,
    ) -> Result<FfmpegEncoder, BackendError> {
        FfmpegEncoder::configure(*codec, config)
    }

    fn create_converter(
        &mut self,
        src: PixelFormat,
        dst: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<FfmpegConverter, BackendError> {
        FfmpegConverter::new(src, dst, width, height)
    }
}

fn codec_id(codec: CodecId) -> ffmpeg::codec::Id {
    match codec {
        CodecId::H264 => ffmpeg::codec::Id::H264,
    }
}

impl From<PixelFormat> for ffmpeg::format::Pixel {
    fn from(format: PixelFormat) -> Self {
        use ffmpeg::format::Pixel;
        match format {
            PixelFormat::Rgb24 => Pixel::RGB24,
            PixelFormat::Bgr24 => Pixel::BGR24,
            PixelFormat::Rgba => Pixel::RGBA,
            PixelFormat::Bgra => Pixel::BGRA,
            PixelFormat::Argb => Pixel::ARGB,
            PixelFormat::Gray8 => Pixel::GRAY8,
            PixelFormat::Yuv420p => Pixel::YUV420P,
            PixelFormat::Yuv422p => Pixel::YUV422P,
            PixelFormat::Yuv444p => Pixel::YUV444P,
            PixelFormat::Nv12 => Pixel::NV12,
        }
    }
}

impl From<Rational> for ffmpeg::Rational {
    fn from(r: Rational) -> Self {
        ffmpeg::Rational::new(r.num, r.den)
    }
}

impl From<ffmpeg::Rational> for Rational {
    fn from(r: ffmpeg::Rational) -> Self {
        Rational::new(r.numerator(), r.denominator())
    }
}

impl From<ffmpeg::ffi::AVRational> for Rational {
    fn from(r: ffmpeg::ffi::AVRational) -> Self {
        Rational::new(r.num, r.den)
    }
}

impl From<Rational> for ffmpeg::ffi::AVRational {
    fn from(r: Rational) -> Self {
        ffmpeg::ffi::AVRational { num: r.num, den: r.den }
    }
}

impl From<ffmpeg::Error> for BackendError {
    fn from(e: ffmpeg::Error) -> Self {
        BackendError::with_code(e.to_string(), c_int::from(e))
    }
}

/// Map a negative FFmpeg return code to an error naming the call
fn check(ret: c_int, call: &str) -> Result<c_int, BackendError> {
    if ret < 0 {
        return Err(BackendError::with_code(
            format!("{}: {}", call, ffmpeg::Error::from(ret)),
            ret,
        ));
    }
    Ok(ret)
}

fn c_path(path: &Path) -> Result<CString, BackendError> {
    let s = path
        .to_str()
        .ok_or_else(|| BackendError::new(format!("path is not valid UTF-8: {}", path.display())))?;
    CString::new(s).map_err(|_| BackendError::new(format!("path contains NUL byte: {}", s)))
}
