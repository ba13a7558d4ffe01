use clap::Parser;
use std::path::PathBuf;

use crate::params::{EncodeParameters, PixelFormat};

// Build version with backend info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Video:  playa-ffmpeg 8.0 (libx264 preferred)\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Encode a synthetic test pattern to an H.264 container file
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Output file; container format follows the extension (mp4, mov, mkv, ...)
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Number of frames to encode
    #[arg(short = 'n', long = "frames", value_name = "N", default_value = "90")]
    pub frames: u32,

    #[arg(long = "width", value_name = "PX")]
    pub width: Option<u32>,

    #[arg(long = "height", value_name = "PX")]
    pub height: Option<u32>,

    /// Frames per second (fractional allowed, e.g. 29.97)
    #[arg(long = "fps", value_name = "FPS")]
    pub fps: Option<f64>,

    /// Target bitrate in bits per second
    #[arg(short = 'b', long = "bitrate", value_name = "BPS")]
    pub bitrate: Option<u32>,

    /// Quality factor 0-51 (lower is better)
    #[arg(long = "crf", value_name = "0-51")]
    pub crf: Option<u32>,

    /// Encoder speed preset (ultrafast..veryslow)
    #[arg(short = 'p', long = "preset", value_name = "NAME")]
    pub preset: Option<String>,

    /// Pixel format the encoder consumes
    #[arg(long = "pix-fmt", value_name = "FMT")]
    pub dst_format: Option<PixelFormat>,

    /// Load encode parameters from JSON (default: $FRAMEMUX_CONFIG)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the effective parameters to JSON and continue
    #[arg(long = "save-config", value_name = "FILE")]
    pub save_config: Option<PathBuf>,

    /// Enable logging to file (default: framemux.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl Args {
    /// Apply command-line overrides on top of file or default parameters
    pub fn apply(&self, mut params: EncodeParameters) -> EncodeParameters {
        if let Some(w) = self.width {
            params.width = w;
        }
        if let Some(h) = self.height {
            params.height = h;
        }
        if let Some(fps) = self.fps {
            params.fps = fps;
        }
        if let Some(b) = self.bitrate {
            params.bitrate = b;
        }
        if let Some(crf) = self.crf {
            params.crf = crf;
        }
        if let Some(ref preset) = self.preset {
            params.preset = Some(preset.clone());
        }
        if let Some(fmt) = self.dst_format {
            params.dst_format = fmt;
        }
        params
    }
}
