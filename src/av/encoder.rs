//! H.264 encoder context, reusable frame and packets

use log::debug;
use playa_ffmpeg as ffmpeg;
use std::ffi::{CString, c_int};

use ffmpeg::codec::encoder;
use ffmpeg::ffi;
use ffmpeg::util::error::EAGAIN;

use super::check;
use crate::backend::{CompressedPacket, FrameBuffer, Pull, VideoEncoder};
use crate::error::BackendError;
use crate::params::{EncoderConfig, Rational};

/// Frame allocated once per session and refilled for every `write`
pub struct FfmpegFrame(ffmpeg::frame::Video);

impl FfmpegFrame {
    pub(super) fn as_mut_ptr(&mut self) -> *mut ffi::AVFrame {
        unsafe { self.0.as_mut_ptr() }
    }
}

impl FrameBuffer for FfmpegFrame {
    fn make_writable(&mut self) -> Result<(), BackendError> {
        let ret = unsafe { ffi::av_frame_make_writable(self.0.as_mut_ptr()) };
        check(ret, "av_frame_make_writable")?;
        Ok(())
    }

    fn set_pts(&mut self, pts: Option<i64>) {
        self.0.set_pts(pts);
    }

    fn pts(&self) -> Option<i64> {
        self.0.pts()
    }
}

pub struct FfmpegPacket(ffmpeg::Packet);

impl FfmpegPacket {
    pub(super) fn as_mut_ptr(&mut self) -> *mut ffi::AVPacket {
        unsafe { self.0.as_mut_ptr() }
    }
}

impl CompressedPacket for FfmpegPacket {
    fn pts(&self) -> Option<i64> {
        self.0.pts()
    }

    fn dts(&self) -> Option<i64> {
        self.0.dts()
    }

    fn size(&self) -> usize {
        self.0.size()
    }

    fn is_key(&self) -> bool {
        self.0.is_key()
    }

    fn set_stream(&mut self, index: usize) {
        self.0.set_stream(index);
    }

    fn rescale_ts(&mut self, from: Rational, to: Rational) {
        self.0.rescale_ts(from, to);
    }
}

enum State {
    Configured(encoder::video::Video),
    Opened(encoder::video::Encoder),
    /// Transient, only seen if `open` failed
    Empty,
}

/// Encoder context: configured by the backend, opened by the session
pub struct FfmpegEncoder {
    state: State,
}

impl FfmpegEncoder {
    pub(super) fn configure(codec: ffmpeg::Codec, config: &EncoderConfig) -> Result<Self, BackendError> {
        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;

        encoder.set_bit_rate(config.bitrate as usize);
        encoder.set_width(config.width);
        encoder.set_height(config.height);
        encoder.set_time_base(config.time_base);
        encoder.set_frame_rate(Some(config.time_base.invert()));
        encoder.set_format(config.pixel_format.into());
        encoder.set_gop(config.gop_size);
        encoder.set_max_b_frames(config.max_b_frames as usize);
        if config.global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }

        // preset/crf live in the codec's private options
        unsafe {
            let priv_data = (*encoder.as_mut_ptr()).priv_data;
            if priv_data.is_null() {
                return Err(BackendError::new(format!(
                    "encoder {} has no private options",
                    codec.name()
                )));
            }
            if let Some(ref preset) = config.preset {
                let value = CString::new(preset.as_str())
                    .map_err(|_| BackendError::new("preset contains NUL byte"))?;
                check(
                    ffi::av_opt_set(priv_data, c"preset".as_ptr(), value.as_ptr(), 0),
                    "set preset",
                )?;
            }
            check(
                ffi::av_opt_set_int(priv_data, c"crf".as_ptr(), config.crf as i64, 0),
                "set crf",
            )?;
        }

        debug!(
            "{} configured: {}x{} {} tb={}",
            codec.name(),
            config.width,
            config.height,
            config.pixel_format,
            config.time_base
        );
        Ok(Self {
            state: State::Configured(encoder),
        })
    }

    fn opened(&mut self) -> Result<&mut encoder::video::Encoder, BackendError> {
        match self.state {
            State::Opened(ref mut encoder) => Ok(encoder),
            _ => Err(BackendError::new("encoder is not open")),
        }
    }

    fn context_ptr(&self) -> Option<*const ffi::AVCodecContext> {
        unsafe {
            match self.state {
                State::Configured(ref encoder) => Some(encoder.as_ptr()),
                State::Opened(ref encoder) => Some(encoder.as_ptr()),
                State::Empty => None,
            }
        }
    }

    /// Raw context of the opened encoder, for copying stream parameters
    pub(super) fn opened_ptr(&self) -> Result<*const ffi::AVCodecContext, BackendError> {
        match self.state {
            State::Opened(ref encoder) => Ok(unsafe { encoder.as_ptr() }),
            _ => Err(BackendError::new("encoder is not open")),
        }
    }
}

impl VideoEncoder for FfmpegEncoder {
    type Frame = FfmpegFrame;
    type Packet = FfmpegPacket;

    fn open(&mut self) -> Result<(), BackendError> {
        match std::mem::replace(&mut self.state, State::Empty) {
            State::Configured(encoder) => {
                self.state = State::Opened(encoder.open()?);
                Ok(())
            }
            other => {
                self.state = other;
                Err(BackendError::new("encoder already opened"))
            }
        }
    }

    fn time_base(&self) -> Rational {
        match self.context_ptr() {
            Some(ctx) => unsafe { (*ctx).time_base.into() },
            None => Rational::new(0, 1),
        }
    }

    fn alloc_frame(&self, align: usize) -> Result<FfmpegFrame, BackendError> {
        let ctx = self.opened_ptr()?;
        let mut frame = ffmpeg::frame::Video::empty();
        unsafe {
            let ptr = frame.as_mut_ptr();
            (*ptr).format = (*ctx).pix_fmt as c_int;
            (*ptr).width = (*ctx).width;
            (*ptr).height = (*ctx).height;
            check(ffi::av_frame_get_buffer(ptr, align as c_int), "av_frame_get_buffer")?;
        }
        Ok(FfmpegFrame(frame))
    }

    fn submit_frame(&mut self, frame: Option<&FfmpegFrame>) -> Result<(), BackendError> {
        let encoder = self.opened()?;
        match frame {
            Some(frame) => encoder.send_frame(&frame.0)?,
            None => encoder.send_eof()?,
        }
        Ok(())
    }

    fn pull_packet(&mut self) -> Result<Pull<FfmpegPacket>, BackendError> {
        let encoder = self.opened()?;
        let mut packet = ffmpeg::Packet::empty();
        match encoder.receive_packet(&mut packet) {
            Ok(()) => Ok(Pull::Packet(FfmpegPacket(packet))),
            Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => Ok(Pull::WouldBlock),
            Err(ffmpeg::Error::Eof) => Ok(Pull::EndOfStream),
            Err(e) => Err(e.into()),
        }
    }
}
