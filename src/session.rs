//! Encoder session lifecycle
//!
//! `EncoderSession` owns every resource of one output file:
//!
//! ```text
//! open:   container -> encoder lookup -> stream -> encoder ctx -> open encoder
//!         -> frame -> stream params -> converter -> output file -> header
//! write:  make writable -> convert -> pts = counter -> submit -> drain/mux
//! close:  EOF -> drain/mux -> trailer -> close file -> release (reverse order)
//! ```
//!
//! Acquisition is scoped: each resource is a local owned value while `open`
//! runs, so an early return drops what was acquired so far in reverse order.
//! Once open, [`EncodingContext`] keeps the same guarantee through its field
//! declaration order.
//!
//! A session is driven from one thread at a time; every mutating call takes
//! `&mut self`.

use log::{debug, error, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::backend::{Backend, CompressedPacket, Container, FormatConverter, FrameBuffer, Pull, VideoEncoder};
use crate::error::{BackendError, EncodeError, FrameStage, MuxStage, OpenStep};
use crate::params::{CodecId, EncodeParameters, EncoderConfig, FRAME_ALIGN, Rational};

/// Codec family this session produces
pub const CODEC: CodecId = CodecId::H264;

/// Counters for the current (or last closed) session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames accepted by the encoder
    pub frames_submitted: u64,
    /// Packets handed to the muxer
    pub packets_written: u64,
    /// Compressed payload bytes handed to the muxer
    pub bytes_written: u64,
    pub keyframes: u64,
    pub output_path: Option<PathBuf>,
}

/// Live handles of an open session.
///
/// Fields drop in declaration order, which is the reverse of acquisition:
/// converter, frame, encoder, container.
struct EncodingContext<B: Backend> {
    converter: B::Converter,
    frame: B::Frame,
    encoder: B::Encoder,
    container: B::Container,
    stream: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    src_stride: usize,
    frame_size: usize,
    path: PathBuf,
}

impl<B: Backend> EncodingContext<B> {
    /// Pull every packet the engine has ready and mux it
    fn drain(&mut self, stats: &mut SessionStats) -> Result<(), EncodeError> {
        loop {
            let pulled = self.encoder.pull_packet().map_err(|source| EncodeError::Mux {
                stage: MuxStage::PullPacket,
                source,
            })?;

            let mut packet = match pulled {
                Pull::Packet(packet) => packet,
                Pull::WouldBlock | Pull::EndOfStream => return Ok(()),
            };

            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet.set_stream(self.stream);

            let size = packet.size();
            let is_key = packet.is_key();

            self.container
                .write_packet(&mut packet)
                .map_err(|source| EncodeError::Mux {
                    stage: MuxStage::WritePacket,
                    source,
                })?;

            stats.packets_written += 1;
            stats.bytes_written += size as u64;
            if is_key {
                stats.keyframes += 1;
            }
        }
    }

    /// Flush the engine and finalize the file. Failures are logged, never returned.
    fn finish(&mut self, stats: &mut SessionStats) {
        if let Err(e) = self.encoder.submit_frame(None) {
            error!("{}: {}", MuxStage::SubmitEof, e);
        }

        if let Err(e) = self.drain(stats) {
            error!("Flushing encoder for {} failed: {}", self.path.display(), e);
        }

        if let Err(e) = self.container.write_trailer() {
            error!("{}: {}", MuxStage::WriteTrailer, e);
        }

        if let Err(e) = self.container.close_output() {
            warn!("{} {}: {}", MuxStage::CloseOutput, self.path.display(), e);
        }
    }
}

/// Raw frames in, encoded container file out
pub struct EncoderSession<B: Backend> {
    backend: B,
    context: Option<EncodingContext<B>>,
    /// Pts of the next frame, in the encoder time base
    frame_index: i64,
    stats: SessionStats,
}

impl<B: Backend> fmt::Debug for EncoderSession<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderSession")
            .field("open", &self.is_open())
            .field("frame_index", &self.frame_index)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<B: Backend> EncoderSession<B> {
    /// Create a closed session around `backend`
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            context: None,
            frame_index: 0,
            stats: SessionStats::default(),
        }
    }

    /// Create a session and open it right away
    pub fn create(
        backend: B,
        path: impl AsRef<Path>,
        params: &EncodeParameters,
    ) -> Result<Self, EncodeError> {
        let mut session = Self::new(backend);
        session.open(path, params)?;
        Ok(session)
    }

    pub fn is_open(&self) -> bool {
        self.context.is_some()
    }

    /// Pts the next accepted frame will get
    pub fn frame_index(&self) -> i64 {
        self.frame_index
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Open `path` for encoding with `params`.
    ///
    /// An already open session is closed first. On failure everything
    /// acquired so far is released and the session stays closed.
    pub fn open(&mut self, path: impl AsRef<Path>, params: &EncodeParameters) -> Result<(), EncodeError> {
        self.close();

        let path = path.as_ref();
        params.validate()?;

        match self.acquire(path, params) {
            Ok(context) => {
                info!(
                    "Encoder initialized: {} {}x{} @ {} fps -> {} (time_base: encoder={} stream={})",
                    CODEC,
                    params.width,
                    params.height,
                    params.fps,
                    path.display(),
                    context.encoder_time_base,
                    context.stream_time_base
                );
                self.context = Some(context);
                self.frame_index = 0;
                self.stats = SessionStats {
                    output_path: Some(path.to_path_buf()),
                    ..Default::default()
                };
                Ok(())
            }
            Err(e) => {
                error!("Failed to open {}: {}", path.display(), e);
                self.close();
                Err(e)
            }
        }
    }

    /// Acquire every resource in order. An early return drops the locals
    /// acquired so far in reverse order.
    fn acquire(&mut self, path: &Path, params: &EncodeParameters) -> Result<EncodingContext<B>, EncodeError> {
        let fail = |step: OpenStep| {
            move |source: BackendError| EncodeError::Open {
                step,
                path: path.to_path_buf(),
                source,
            }
        };

        debug!("Creating output container for {}", path.display());
        let mut container = self
            .backend
            .create_container(path)
            .map_err(fail(OpenStep::CreateContainer))?;

        debug!("Looking for {} encoder", CODEC);
        let codec = self
            .backend
            .find_encoder(CODEC)
            .ok_or(EncodeError::EncoderNotFound(CODEC))?;

        let stream = container.new_stream().map_err(fail(OpenStep::NewStream))?;
        debug!("Created stream {}", stream);

        let config = EncoderConfig::from_params(CODEC, params, container.requires_global_header());
        container.set_stream_time_base(stream, config.time_base);
        debug!(
            "Configuring encoder: bitrate={} gop={} max_b_frames={} global_header={} preset={:?} crf={}",
            config.bitrate, config.gop_size, config.max_b_frames, config.global_header, config.preset, config.crf
        );
        let mut encoder = self
            .backend
            .configure_encoder(&codec, &config)
            .map_err(fail(OpenStep::ConfigureEncoder))?;

        encoder.open().map_err(fail(OpenStep::OpenEncoder))?;

        let frame = encoder
            .alloc_frame(FRAME_ALIGN)
            .map_err(fail(OpenStep::AllocFrame))?;

        container
            .copy_parameters(stream, &encoder)
            .map_err(fail(OpenStep::CopyParameters))?;

        let converter = self
            .backend
            .create_converter(params.src_format, params.dst_format, params.width, params.height)
            .map_err(fail(OpenStep::CreateConverter))?;
        debug!("Conversion context {} -> {}", params.src_format, params.dst_format);

        container
            .open_output(path)
            .map_err(fail(OpenStep::OpenOutput))?;

        if let Err(source) = container.write_header() {
            if let Err(e) = container.close_output() {
                warn!("{} {}: {}", MuxStage::CloseOutput, path.display(), e);
            }
            return Err(fail(OpenStep::WriteHeader)(source));
        }

        // Read after the header: the muxer may have picked its own time base
        let stream_time_base = container.stream_time_base(stream);
        let encoder_time_base = encoder.time_base();
        if stream_time_base.num == 0 || stream_time_base.den == 0 {
            if let Err(e) = container.close_output() {
                warn!("{} {}: {}", MuxStage::CloseOutput, path.display(), e);
            }
            return Err(fail(OpenStep::WriteHeader)(BackendError::new(format!(
                "muxer left stream {} with invalid time base {}",
                stream, stream_time_base
            ))));
        }

        Ok(EncodingContext {
            converter,
            frame,
            encoder,
            container,
            stream,
            encoder_time_base,
            stream_time_base,
            src_stride: params.src_stride(),
            frame_size: params.frame_size(),
            path: path.to_path_buf(),
        })
    }

    /// Encode one tightly packed frame in the source pixel format.
    ///
    /// `data` must hold exactly `width * height * bytes_per_pixel` bytes.
    /// A failure leaves the session open; packets already muxed stay written.
    pub fn write(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        let Some(context) = self.context.as_mut() else {
            return Err(EncodeError::NotOpen);
        };

        if data.len() != context.frame_size {
            return Err(EncodeError::FrameSize {
                expected: context.frame_size,
                actual: data.len(),
            });
        }

        let index = self.frame_index;
        let fail = |stage: FrameStage| move |source: BackendError| EncodeError::Frame { index, stage, source };

        let submitted = context
            .frame
            .make_writable()
            .map_err(fail(FrameStage::MakeWritable))
            .and_then(|_| {
                context
                    .converter
                    .convert(data, context.src_stride, &mut context.frame)
                    .map_err(fail(FrameStage::Convert))
            })
            .and_then(|_| {
                context.frame.set_pts(Some(index));
                context
                    .encoder
                    .submit_frame(Some(&context.frame))
                    .map_err(fail(FrameStage::Submit))
            });

        if let Err(e) = submitted {
            error!("{}", e);
            return Err(e);
        }

        self.frame_index += 1;
        self.stats.frames_submitted += 1;

        if self.frame_index % 30 == 0 {
            debug!(
                "Encoded frame {} ({} packets, {} bytes)",
                self.frame_index, self.stats.packets_written, self.stats.bytes_written
            );
        }

        context.drain(&mut self.stats).inspect_err(|e| error!("{}", e))
    }

    /// Flush, finalize and release everything. Safe to call any number of
    /// times, on a session that never opened or failed halfway through.
    pub fn close(&mut self) {
        if let Some(mut context) = self.context.take() {
            info!("Flushing encoder for {}", context.path.display());
            context.finish(&mut self.stats);
            info!(
                "Closed {}: {} frames, {} packets, {} bytes",
                context.path.display(),
                self.stats.frames_submitted,
                self.stats.packets_written,
                self.stats.bytes_written
            );
            // Releases converter, frame, encoder, container
            drop(context);
        }
    }
}

impl<B: Backend> Drop for EncoderSession<B> {
    fn drop(&mut self) {
        self.close();
    }
}
