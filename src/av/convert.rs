//! Packed input -> encoder pixel format (swscale)

use playa_ffmpeg as ffmpeg;
use std::ffi::c_int;
use std::ptr;

use ffmpeg::ffi;
use ffmpeg::software::scaling;

use super::check;
use super::encoder::FfmpegFrame;
use crate::backend::FormatConverter;
use crate::error::BackendError;
use crate::params::PixelFormat;

/// Same-size conversion context, created once per session
pub struct FfmpegConverter {
    ctx: scaling::Context,
    width: u32,
    height: u32,
}

impl FfmpegConverter {
    pub(super) fn new(src: PixelFormat, dst: PixelFormat, width: u32, height: u32) -> Result<Self, BackendError> {
        let ctx = scaling::Context::get(
            src.into(),
            width,
            height,
            dst.into(),
            width,
            height,
            scaling::Flags::BICUBIC,
        )
        .map_err(|e| BackendError::new(format!("Failed to create swscale context: {}", e)))?;

        Ok(Self { ctx, width, height })
    }
}

impl FormatConverter for FfmpegConverter {
    type Frame = FfmpegFrame;

    /// Scale straight from the caller's buffer into the frame's planes
    fn convert(&mut self, src: &[u8], src_stride: usize, dst: &mut FfmpegFrame) -> Result<(), BackendError> {
        let needed = src_stride * self.height as usize;
        if src.len() < needed {
            return Err(BackendError::new(format!(
                "Invalid input size: expected {} bytes, got {}",
                needed,
                src.len()
            )));
        }

        unsafe {
            let frame = dst.as_mut_ptr();
            if (*frame).width != self.width as c_int || (*frame).height != self.height as c_int {
                return Err(BackendError::new(format!(
                    "frame is {}x{}, converter expects {}x{}",
                    (*frame).width,
                    (*frame).height,
                    self.width,
                    self.height
                )));
            }

            let src_planes: [*const u8; 4] = [src.as_ptr(), ptr::null(), ptr::null(), ptr::null()];
            let src_strides: [c_int; 4] = [src_stride as c_int, 0, 0, 0];

            let ret = ffi::sws_scale(
                self.ctx.as_mut_ptr(),
                src_planes.as_ptr(),
                src_strides.as_ptr(),
                0,
                self.height as c_int,
                (*frame).data.as_ptr(),
                (*frame).linesize.as_ptr(),
            );
            check(ret, "sws_scale")?;
        }
        Ok(())
    }
}
