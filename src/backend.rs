//! Collaborator interfaces used by the encoder session
//!
//! The session never talks to a codec library directly. It drives three
//! collaborators through these traits:
//!
//! - encoding engine: [`VideoEncoder`] (+ its [`FrameBuffer`] and [`CompressedPacket`])
//! - format conversion: [`FormatConverter`]
//! - muxing: [`Container`]
//!
//! A [`Backend`] is the factory that hands out all of them, so one session
//! type works with FFmpeg (`ffmpeg` feature) or with an in-memory double.
//!
//! Every handle releases its native resource on `Drop`. The session relies
//! on that to release in reverse order of acquisition.

use std::path::Path;

use crate::error::BackendError;
use crate::params::{CodecId, EncoderConfig, PixelFormat, Rational};

/// Result of asking the engine for one packet
#[derive(Debug)]
pub enum Pull<P> {
    /// A finished packet
    Packet(P),
    /// Engine needs more input before it can emit anything
    WouldBlock,
    /// Engine is flushed, nothing more will come
    EndOfStream,
}

/// Compressed packet produced by the engine, consumed by the muxer
pub trait CompressedPacket {
    fn pts(&self) -> Option<i64>;
    fn dts(&self) -> Option<i64>;
    /// Payload size in bytes
    fn size(&self) -> usize;
    fn is_key(&self) -> bool;
    fn set_stream(&mut self, index: usize);
    /// Rescale pts/dts/duration between time bases
    fn rescale_ts(&mut self, from: Rational, to: Rational);
}

/// Reusable frame the converter writes into and the engine reads from
pub trait FrameBuffer {
    /// Make sure the buffer is not shared with an in-flight encode
    fn make_writable(&mut self) -> Result<(), BackendError>;
    fn set_pts(&mut self, pts: Option<i64>);
    fn pts(&self) -> Option<i64>;
}

/// Encoding engine context (configured, then opened)
pub trait VideoEncoder {
    type Frame: FrameBuffer;
    type Packet: CompressedPacket;

    fn open(&mut self) -> Result<(), BackendError>;

    /// Time base the engine stamps its packets in
    fn time_base(&self) -> Rational;

    /// Allocate a frame matching the encoder's size and pixel format
    fn alloc_frame(&self, align: usize) -> Result<Self::Frame, BackendError>;

    /// Submit one frame, or `None` to signal end of stream
    fn submit_frame(&mut self, frame: Option<&Self::Frame>) -> Result<(), BackendError>;

    fn pull_packet(&mut self) -> Result<Pull<Self::Packet>, BackendError>;
}

/// Pixel-format conversion context
pub trait FormatConverter {
    type Frame;

    /// Convert one packed input plane with row stride `src_stride` into `dst`
    fn convert(
        &mut self,
        src: &[u8],
        src_stride: usize,
        dst: &mut Self::Frame,
    ) -> Result<(), BackendError>;
}

/// Output container (muxing context + destination file)
pub trait Container {
    type Encoder;
    type Packet;

    /// Whether the container format wants codec headers out of band
    fn requires_global_header(&self) -> bool;

    /// Attach a new stream; returns its index
    fn new_stream(&mut self) -> Result<usize, BackendError>;

    fn set_stream_time_base(&mut self, stream: usize, time_base: Rational);

    /// Current stream time base. The muxer may change it while writing the header.
    fn stream_time_base(&self, stream: usize) -> Rational;

    /// Copy negotiated codec parameters from an opened encoder into the stream
    fn copy_parameters(&mut self, stream: usize, encoder: &Self::Encoder)
    -> Result<(), BackendError>;

    fn open_output(&mut self, path: &Path) -> Result<(), BackendError>;
    fn write_header(&mut self) -> Result<(), BackendError>;

    /// Interleaved write of one packet
    fn write_packet(&mut self, packet: &mut Self::Packet) -> Result<(), BackendError>;

    fn write_trailer(&mut self) -> Result<(), BackendError>;
    fn close_output(&mut self) -> Result<(), BackendError>;
}

/// Factory for every collaborator of one session
pub trait Backend {
    /// Encoder descriptor returned by lookup
    type Codec;
    type Frame: FrameBuffer;
    type Packet: CompressedPacket;
    type Encoder: VideoEncoder<Frame = Self::Frame, Packet = Self::Packet>;
    type Converter: FormatConverter<Frame = Self::Frame>;
    type Container: Container<Encoder = Self::Encoder, Packet = Self::Packet>;

    /// Allocate a container whose format is inferred from the path
    fn create_container(&mut self, path: &Path) -> Result<Self::Container, BackendError>;

    fn find_encoder(&mut self, codec: CodecId) -> Option<Self::Codec>;

    /// Allocate an encoder context and apply `config`. A rejected option is an error.
    fn configure_encoder(
        &mut self,
        codec: &Self::Codec,
        config: &EncoderConfig,
    ) -> Result<Self::Encoder, BackendError>;

    fn create_converter(
        &mut self,
        src: PixelFormat,
        dst: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Self::Converter, BackendError>;
}
