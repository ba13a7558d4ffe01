//! Error types for the encoder session and its collaborators

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::params::CodecId;

/// Failure reported by a collaborator (engine, converter or muxer)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}{}", fmt_code(.code))]
pub struct BackendError {
    pub message: String,
    /// Native error code, when the backend has one
    pub code: Option<i32>,
}

fn fmt_code(code: &Option<i32>) -> String {
    code.map(|c| format!(" (code {c})")).unwrap_or_default()
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

/// Resource acquisition steps of `open`, in acquisition order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStep {
    CreateContainer,
    FindEncoder,
    NewStream,
    ConfigureEncoder,
    OpenEncoder,
    AllocFrame,
    CopyParameters,
    CreateConverter,
    OpenOutput,
    WriteHeader,
}

impl OpenStep {
    pub fn all() -> &'static [OpenStep] {
        &[
            OpenStep::CreateContainer,
            OpenStep::FindEncoder,
            OpenStep::NewStream,
            OpenStep::ConfigureEncoder,
            OpenStep::OpenEncoder,
            OpenStep::AllocFrame,
            OpenStep::CopyParameters,
            OpenStep::CreateConverter,
            OpenStep::OpenOutput,
            OpenStep::WriteHeader,
        ]
    }
}

impl fmt::Display for OpenStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpenStep::CreateContainer => "could not allocate output container",
            OpenStep::FindEncoder => "could not find encoder",
            OpenStep::NewStream => "could not create stream",
            OpenStep::ConfigureEncoder => "could not configure encoder",
            OpenStep::OpenEncoder => "could not open encoder",
            OpenStep::AllocFrame => "could not allocate frame buffer",
            OpenStep::CopyParameters => "could not copy stream parameters",
            OpenStep::CreateConverter => "could not create conversion context",
            OpenStep::OpenOutput => "could not open output file",
            OpenStep::WriteHeader => "could not write container header",
        };
        f.write_str(s)
    }
}

/// Per-frame pipeline stage that failed during `write`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    MakeWritable,
    Convert,
    Submit,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameStage::MakeWritable => write!(f, "frame not writable"),
            FrameStage::Convert => write!(f, "pixel format conversion failed"),
            FrameStage::Submit => write!(f, "error sending a frame for encoding"),
        }
    }
}

/// Drain/mux or finalization step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxStage {
    PullPacket,
    WritePacket,
    SubmitEof,
    WriteTrailer,
    CloseOutput,
}

impl fmt::Display for MuxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuxStage::PullPacket => write!(f, "error encoding a frame"),
            MuxStage::WritePacket => write!(f, "error while writing output packet"),
            MuxStage::SubmitEof => write!(f, "error signalling end of stream"),
            MuxStage::WriteTrailer => write!(f, "error writing container trailer"),
            MuxStage::CloseOutput => write!(f, "failed to close file"),
        }
    }
}

/// Errors surfaced by `EncoderSession`
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("invalid {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("no encoder available for {0}")]
    EncoderNotFound(CodecId),

    #[error("{step} for {}: {source}", .path.display())]
    Open {
        step: OpenStep,
        path: PathBuf,
        #[source]
        source: BackendError,
    },

    #[error("session is not open")]
    NotOpen,

    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("frame {index}: {stage}: {source}")]
    Frame {
        index: i64,
        stage: FrameStage,
        #[source]
        source: BackendError,
    },

    #[error("{stage}: {source}")]
    Mux {
        stage: MuxStage,
        #[source]
        source: BackendError,
    },
}

impl EncodeError {
    /// Acquisition step that failed, for `Open` and `EncoderNotFound`
    pub fn open_step(&self) -> Option<OpenStep> {
        match self {
            EncodeError::Open { step, .. } => Some(*step),
            EncodeError::EncoderNotFound(_) => Some(OpenStep::FindEncoder),
            _ => None,
        }
    }
}
