//! Output container over raw `AVFormatContext`
//!
//! Allocation, output file and header are separate calls here so the session
//! can release each one on failure. `ffmpeg::format::output` does all three at once.

use log::{debug, log_enabled, warn};
use playa_ffmpeg as ffmpeg;
use std::ffi::c_int;
use std::path::Path;
use std::ptr;

use ffmpeg::ffi;

use super::encoder::{FfmpegEncoder, FfmpegPacket};
use super::{c_path, check};
use crate::backend::Container;
use crate::error::BackendError;
use crate::params::Rational;

pub struct FfmpegContainer {
    ptr: *mut ffi::AVFormatContext,
    output_open: bool,
}

// Owned exclusively; FFmpeg contexts may move between threads
unsafe impl Send for FfmpegContainer {}

impl FfmpegContainer {
    /// Allocate a muxing context, format guessed from the file extension
    pub(super) fn alloc(path: &Path) -> Result<Self, BackendError> {
        let path = c_path(path)?;
        let mut ctx = ptr::null_mut();
        let ret = unsafe {
            ffi::avformat_alloc_output_context2(&mut ctx, ptr::null(), ptr::null(), path.as_ptr())
        };
        check(ret, "avformat_alloc_output_context2")?;
        if ctx.is_null() {
            return Err(BackendError::new("could not deduce output format from file extension"));
        }
        Ok(Self {
            ptr: ctx,
            output_open: false,
        })
    }

    fn format_flags(&self) -> c_int {
        unsafe {
            let oformat = (*self.ptr).oformat;
            if oformat.is_null() { 0 } else { (*oformat).flags }
        }
    }

    fn needs_file(&self) -> bool {
        (self.format_flags() & ffi::AVFMT_NOFILE as c_int) == 0
    }

    fn stream(&self, index: usize) -> Option<*mut ffi::AVStream> {
        unsafe {
            if index >= (*self.ptr).nb_streams as usize {
                return None;
            }
            let stream = *(*self.ptr).streams.add(index);
            (!stream.is_null()).then_some(stream)
        }
    }

    fn stream_or_err(&self, index: usize) -> Result<*mut ffi::AVStream, BackendError> {
        self.stream(index)
            .ok_or_else(|| BackendError::new(format!("no stream #{}", index)))
    }
}

impl Container for FfmpegContainer {
    type Encoder = FfmpegEncoder;
    type Packet = FfmpegPacket;

    fn requires_global_header(&self) -> bool {
        (self.format_flags() & ffi::AVFMT_GLOBALHEADER as c_int) != 0
    }

    fn new_stream(&mut self) -> Result<usize, BackendError> {
        unsafe {
            let stream = ffi::avformat_new_stream(self.ptr, ptr::null());
            if stream.is_null() {
                return Err(BackendError::new("avformat_new_stream failed"));
            }
            (*stream).id = (*self.ptr).nb_streams as c_int - 1;
            Ok((*stream).index as usize)
        }
    }

    fn set_stream_time_base(&mut self, stream: usize, time_base: Rational) {
        if let Some(stream) = self.stream(stream) {
            unsafe { (*stream).time_base = time_base.into() };
        }
    }

    fn stream_time_base(&self, stream: usize) -> Rational {
        match self.stream(stream) {
            Some(stream) => unsafe { (*stream).time_base.into() },
            None => Rational::new(0, 1),
        }
    }

    fn copy_parameters(&mut self, stream: usize, encoder: &FfmpegEncoder) -> Result<(), BackendError> {
        let stream = self.stream_or_err(stream)?;
        let ctx = encoder.opened_ptr()?;
        let ret = unsafe { ffi::avcodec_parameters_from_context((*stream).codecpar, ctx) };
        check(ret, "avcodec_parameters_from_context")?;
        Ok(())
    }

    fn open_output(&mut self, path: &Path) -> Result<(), BackendError> {
        let path = c_path(path)?;
        if log_enabled!(log::Level::Debug) {
            unsafe { ffi::av_dump_format(self.ptr, 0, path.as_ptr(), 1) };
        }
        if self.needs_file() {
            let ret = unsafe {
                ffi::avio_open(
                    &mut (*self.ptr).pb,
                    path.as_ptr(),
                    ffi::AVIO_FLAG_WRITE as c_int,
                )
            };
            check(ret, "avio_open")?;
        }
        self.output_open = true;
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), BackendError> {
        let ret = unsafe { ffi::avformat_write_header(self.ptr, ptr::null_mut()) };
        check(ret, "avformat_write_header")?;
        Ok(())
    }

    fn write_packet(&mut self, packet: &mut FfmpegPacket) -> Result<(), BackendError> {
        let ret = unsafe { ffi::av_interleaved_write_frame(self.ptr, packet.as_mut_ptr()) };
        check(ret, "av_interleaved_write_frame")?;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), BackendError> {
        let ret = unsafe { ffi::av_write_trailer(self.ptr) };
        check(ret, "av_write_trailer")?;
        Ok(())
    }

    fn close_output(&mut self) -> Result<(), BackendError> {
        if !self.output_open {
            return Ok(());
        }
        self.output_open = false;
        if self.needs_file() {
            let ret = unsafe { ffi::avio_closep(&mut (*self.ptr).pb) };
            check(ret, "avio_closep")?;
        }
        Ok(())
    }
}

impl Drop for FfmpegContainer {
    fn drop(&mut self) {
        if let Err(e) = self.close_output() {
            warn!("Failed to close output: {}", e);
        }
        debug!("Releasing output context");
        unsafe { ffi::avformat_free_context(self.ptr) };
    }
}
