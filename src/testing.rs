//! In-memory backend for session tests.
//!
//! Every handle records what happens to it in a shared [`Journal`], so tests
//! can check acquisition/release order, timestamps and flush behaviour
//! without touching a codec library.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;

use crate::backend::{Backend, CompressedPacket, Container, FormatConverter, FrameBuffer, Pull, VideoEncoder};
use crate::error::{BackendError, OpenStep};
use crate::params::{CodecId, EncoderConfig, PixelFormat, Rational};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Container,
    Encoder,
    Frame,
    Converter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create(Resource),
    Release(Resource),
    OpenOutput,
    WriteHeader,
    MakeWritable,
    Convert { stride: usize, len: usize },
    Submit { pts: i64 },
    SubmitEof,
    WritePacket { pts: Option<i64>, dts: Option<i64>, stream: usize },
    WriteTrailer,
    CloseOutput,
}

#[derive(Debug, Default)]
pub struct Journal {
    events: Vec<Event>,
    configs: Vec<EncoderConfig>,
}

impl Journal {
    fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.iter().filter(|e| *e == event).count()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.nth_position(event, 0)
    }

    pub fn nth_position(&self, event: &Event, n: usize) -> Option<usize> {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| *e == event)
            .nth(n)
            .map(|(i, _)| i)
    }

    pub fn created(&self) -> Vec<Resource> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Create(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    pub fn released(&self) -> Vec<Resource> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Release(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    /// Every created resource was released exactly once
    pub fn all_released(&self) -> bool {
        [Resource::Container, Resource::Encoder, Resource::Frame, Resource::Converter]
            .iter()
            .all(|r| self.count(&Event::Create(*r)) == self.count(&Event::Release(*r)))
    }

    pub fn submitted_pts(&self) -> Vec<i64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Submit { pts } => Some(*pts),
                _ => None,
            })
            .collect()
    }

    pub fn written_pts(&self) -> Vec<Option<i64>> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::WritePacket { pts, .. } => Some(*pts),
                _ => None,
            })
            .collect()
    }

    pub fn written_dts(&self) -> Vec<Option<i64>> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::WritePacket { dts, .. } => Some(*dts),
                _ => None,
            })
            .collect()
    }

    pub fn written_streams(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::WritePacket { stream, .. } => Some(*stream),
                _ => None,
            })
            .collect()
    }

    pub fn last_config(&self) -> Option<EncoderConfig> {
        self.configs.last().cloned()
    }
}

type SharedJournal = Rc<RefCell<Journal>>;

/// Injected failures. Per-frame faults fire once.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Fail this acquisition step of `open`
    pub open_step: Option<OpenStep>,
    /// Fail the n-th make-writable call (0-based)
    pub make_writable_at: Option<usize>,
    /// Reject the frame with this pts
    pub submit_at: Option<i64>,
    /// Fail the n-th conversion (0-based)
    pub convert_at: Option<usize>,
    /// Fail the pull that would emit the n-th packet (0-based)
    pub pull_packet_at: Option<usize>,
    /// Fail the n-th packet write (0-based)
    pub write_packet_at: Option<usize>,
    /// Fail writing the container trailer
    pub write_trailer: bool,
    /// Report an error when the output file is closed
    pub close_output: bool,
}

impl Faults {
    fn fails(&self, step: OpenStep) -> Result<(), BackendError> {
        if self.open_step == Some(step) {
            return Err(BackendError::with_code(format!("injected: {step}"), -22));
        }
        Ok(())
    }
}

pub struct MockBackend {
    journal: SharedJournal,
    faults: Faults,
    delay: usize,
    global_header: bool,
    muxer_time_base: Option<Rational>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            journal: Rc::new(RefCell::new(Journal::default())),
            faults: Faults::default(),
            delay: 0,
            global_header: true,
            muxer_time_base: None,
        }
    }

    /// Engine holds `frames` frames back until end of stream
    pub fn with_delay(mut self, frames: usize) -> Self {
        self.delay = frames;
        self
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_global_header(mut self, global_header: bool) -> Self {
        self.global_header = global_header;
        self
    }

    /// Muxer replaces the stream time base when writing the header
    pub fn with_muxer_time_base(mut self, time_base: Rational) -> Self {
        self.muxer_time_base = Some(time_base);
        self
    }

    pub fn journal(&self) -> SharedJournal {
        Rc::clone(&self.journal)
    }

    fn record(&self, event: Event) {
        self.journal.borrow_mut().push(event);
    }
}

impl Backend for MockBackend {
    type Codec = CodecId;
    type Frame = MockFrame;
    type Packet = MockPacket;
    type Encoder = MockEncoder;
    type Converter = MockConverter;
    type Container = MockContainer;

    fn create_container(&mut self, _path: &Path) -> Result<MockContainer, BackendError> {
        self.faults.fails(OpenStep::CreateContainer)?;
        self.record(Event::Create(Resource::Container));
        Ok(MockContainer {
            journal: self.journal(),
            faults: self.faults.clone(),
            global_header: self.global_header,
            muxer_time_base: self.muxer_time_base,
            streams: Vec::new(),
            output_open: false,
            header_written: false,
            packets: 0,
        })
    }

    fn find_encoder(&mut self, codec: CodecId) -> Option<CodecId> {
        self.faults.fails(OpenStep::FindEncoder).ok()?;
        Some(codec)
    }

    fn configure_encoder(&mut self, _codec: &CodecId, config: &EncoderConfig) -> Result<MockEncoder, BackendError> {
        self.faults.fails(OpenStep::ConfigureEncoder)?;
        self.record(Event::Create(Resource::Encoder));
        self.journal.borrow_mut().configs.push(config.clone());
        Ok(MockEncoder {
            journal: self.journal(),
            faults: self.faults.clone(),
            time_base: config.time_base,
            gop_size: config.gop_size as i64,
            delay: self.delay,
            opened: false,
            eof: false,
            pending: VecDeque::new(),
            emitted: 0,
        })
    }

    fn create_converter(
        &mut self,
        _src: PixelFormat,
        _dst: PixelFormat,
        _width: u32,
        _height: u32,
    ) -> Result<MockConverter, BackendError> {
        self.faults.fails(OpenStep::CreateConverter)?;
        self.record(Event::Create(Resource::Converter));
        Ok(MockConverter {
            journal: self.journal(),
            fail_at: self.faults.convert_at,
            calls: 0,
        })
    }
}

#[derive(Debug)]
pub struct MockFrame {
    journal: SharedJournal,
    pts: Option<i64>,
    fail_writable_at: Option<usize>,
    writable_calls: usize,
}

impl FrameBuffer for MockFrame {
    fn make_writable(&mut self) -> Result<(), BackendError> {
        let call = self.writable_calls;
        self.writable_calls += 1;
        if self.fail_writable_at == Some(call) {
            self.fail_writable_at = None;
            return Err(BackendError::with_code("injected make-writable failure", -12));
        }
        self.journal.borrow_mut().push(Event::MakeWritable);
        Ok(())
    }

    fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }

    fn pts(&self) -> Option<i64> {
        self.pts
    }
}

impl Drop for MockFrame {
    fn drop(&mut self) {
        self.journal.borrow_mut().push(Event::Release(Resource::Frame));
    }
}

#[derive(Debug)]
pub struct MockPacket {
    pts: Option<i64>,
    dts: Option<i64>,
    size: usize,
    key: bool,
    stream: usize,
}

impl CompressedPacket for MockPacket {
    fn pts(&self) -> Option<i64> {
        self.pts
    }

    fn dts(&self) -> Option<i64> {
        self.dts
    }

    fn size(&self) -> usize {
        self.size
    }

    fn is_key(&self) -> bool {
        self.key
    }

    fn set_stream(&mut self, index: usize) {
        self.stream = index;
    }

    fn rescale_ts(&mut self, from: Rational, to: Rational) {
        self.pts = self.pts.map(|ts| Rational::rescale(ts, from, to));
        self.dts = self.dts.map(|ts| Rational::rescale(ts, from, to));
    }
}

pub struct MockEncoder {
    journal: SharedJournal,
    faults: Faults,
    time_base: Rational,
    gop_size: i64,
    delay: usize,
    opened: bool,
    eof: bool,
    pending: VecDeque<i64>,
    /// Packets handed out so far
    emitted: usize,
}

impl VideoEncoder for MockEncoder {
    type Frame = MockFrame;
    type Packet = MockPacket;

    fn open(&mut self) -> Result<(), BackendError> {
        self.faults.fails(OpenStep::OpenEncoder)?;
        self.opened = true;
        Ok(())
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn alloc_frame(&self, _align: usize) -> Result<MockFrame, BackendError> {
        self.faults.fails(OpenStep::AllocFrame)?;
        self.journal.borrow_mut().push(Event::Create(Resource::Frame));
        Ok(MockFrame {
            journal: Rc::clone(&self.journal),
            pts: None,
            fail_writable_at: self.faults.make_writable_at,
            writable_calls: 0,
        })
    }

    fn submit_frame(&mut self, frame: Option<&MockFrame>) -> Result<(), BackendError> {
        if !self.opened {
            return Err(BackendError::new("encoder not opened"));
        }
        if self.eof {
            return Err(BackendError::with_code("end of stream already signalled", -541478725));
        }
        match frame {
            Some(frame) => {
                let pts = frame.pts().ok_or_else(|| BackendError::new("frame without pts"))?;
                if self.faults.submit_at == Some(pts) {
                    self.faults.submit_at = None;
                    return Err(BackendError::with_code("injected submit failure", -22));
                }
                self.journal.borrow_mut().push(Event::Submit { pts });
                self.pending.push_back(pts);
            }
            None => {
                self.journal.borrow_mut().push(Event::SubmitEof);
                self.eof = true;
            }
        }
        Ok(())
    }

    fn pull_packet(&mut self) -> Result<Pull<MockPacket>, BackendError> {
        if !self.eof && self.pending.len() <= self.delay {
            return Ok(Pull::WouldBlock);
        }
        if self.pending.is_empty() {
            return Ok(Pull::EndOfStream);
        }
        if self.faults.pull_packet_at == Some(self.emitted) {
            self.faults.pull_packet_at = None;
            return Err(BackendError::with_code("injected encode failure", -22));
        }
        let Some(pts) = self.pending.pop_front() else {
            return Ok(Pull::EndOfStream);
        };
        self.emitted += 1;
        let key = pts % self.gop_size == 0;
        Ok(Pull::Packet(MockPacket {
            pts: Some(pts),
            dts: Some(pts),
            size: if key { 4096 } else { 512 },
            key,
            stream: usize::MAX,
        }))
    }
}

impl Drop for MockEncoder {
    fn drop(&mut self) {
        self.journal.borrow_mut().push(Event::Release(Resource::Encoder));
    }
}

pub struct MockConverter {
    journal: SharedJournal,
    fail_at: Option<usize>,
    calls: usize,
}

impl FormatConverter for MockConverter {
    type Frame = MockFrame;

    fn convert(&mut self, src: &[u8], src_stride: usize, _dst: &mut MockFrame) -> Result<(), BackendError> {
        let call = self.calls;
        self.calls += 1;
        if self.fail_at == Some(call) {
            self.fail_at = None;
            return Err(BackendError::new("injected conversion failure"));
        }
        self.journal.borrow_mut().push(Event::Convert {
            stride: src_stride,
            len: src.len(),
        });
        Ok(())
    }
}

impl Drop for MockConverter {
    fn drop(&mut self) {
        self.journal.borrow_mut().push(Event::Release(Resource::Converter));
    }
}

pub struct MockContainer {
    journal: SharedJournal,
    faults: Faults,
    global_header: bool,
    muxer_time_base: Option<Rational>,
    streams: Vec<Rational>,
    output_open: bool,
    header_written: bool,
    packets: usize,
}

impl Container for MockContainer {
    type Encoder = MockEncoder;
    type Packet = MockPacket;

    fn requires_global_header(&self) -> bool {
        self.global_header
    }

    fn new_stream(&mut self) -> Result<usize, BackendError> {
        self.faults.fails(OpenStep::NewStream)?;
        self.streams.push(Rational::new(0, 1));
        Ok(self.streams.len() - 1)
    }

    fn set_stream_time_base(&mut self, stream: usize, time_base: Rational) {
        if let Some(tb) = self.streams.get_mut(stream) {
            *tb = time_base;
        }
    }

    fn stream_time_base(&self, stream: usize) -> Rational {
        self.streams.get(stream).copied().unwrap_or(Rational::new(0, 1))
    }

    fn copy_parameters(&mut self, stream: usize, encoder: &MockEncoder) -> Result<(), BackendError> {
        self.faults.fails(OpenStep::CopyParameters)?;
        if stream >= self.streams.len() || !encoder.opened {
            return Err(BackendError::new("no opened encoder for stream"));
        }
        Ok(())
    }

    fn open_output(&mut self, _path: &Path) -> Result<(), BackendError> {
        self.faults.fails(OpenStep::OpenOutput)?;
        self.journal.borrow_mut().push(Event::OpenOutput);
        self.output_open = true;
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), BackendError> {
        if !self.output_open {
            return Err(BackendError::new("output not open"));
        }
        self.faults.fails(OpenStep::WriteHeader)?;
        self.journal.borrow_mut().push(Event::WriteHeader);
        if let Some(tb) = self.muxer_time_base {
            self.streams.iter_mut().for_each(|s| *s = tb);
        }
        self.header_written = true;
        Ok(())
    }

    fn write_packet(&mut self, packet: &mut MockPacket) -> Result<(), BackendError> {
        if !self.header_written {
            return Err(BackendError::new("header not written"));
        }
        let n = self.packets;
        self.packets += 1;
        if self.faults.write_packet_at == Some(n) {
            self.faults.write_packet_at = None;
            return Err(BackendError::with_code("injected write failure", -5));
        }
        self.journal.borrow_mut().push(Event::WritePacket {
            pts: packet.pts(),
            dts: packet.dts(),
            stream: packet.stream,
        });
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), BackendError> {
        if !self.header_written {
            return Err(BackendError::new("header not written"));
        }
        if self.faults.write_trailer {
            return Err(BackendError::with_code("injected trailer failure", -5));
        }
        self.journal.borrow_mut().push(Event::WriteTrailer);
        Ok(())
    }

    fn close_output(&mut self) -> Result<(), BackendError> {
        self.journal.borrow_mut().push(Event::CloseOutput);
        self.output_open = false;
        if self.faults.close_output {
            return Err(BackendError::with_code("injected close failure", -5));
        }
        Ok(())
    }
}

impl Drop for MockContainer {
    fn drop(&mut self) {
        self.journal.borrow_mut().push(Event::Release(Resource::Container));
    }
}
