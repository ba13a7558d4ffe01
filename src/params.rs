//! Encode parameters, pixel formats and time base arithmetic
//!
//! Everything here is plain data: validated before a session acquires
//! any resource, and serializable so a parameter set can live in a JSON file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EncodeError;

/// Keyframe interval handed to the encoder
pub const GOP_SIZE: u32 = 12;
/// Maximum number of consecutive B-frames
pub const MAX_B_FRAMES: u32 = 2;
/// Byte alignment of the reusable frame's planes
pub const FRAME_ALIGN: usize = 32;
/// Bound on numerator and denominator when turning fps into a time base
pub const TIME_BASE_MAX: i32 = 120;
/// Largest width, height or row stride the backend's `int` fields can hold
pub const MAX_DIMENSION: u32 = i32::MAX as u32;
/// Valid quality factor range (CRF), lower is better
pub const CRF_RANGE: std::ops::RangeInclusive<u32> = 0..=51;

/// Speed presets understood by x264-style encoders, fastest first
pub const PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

/// Codec family targeted by the session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecId {
    H264,
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecId::H264 => write!(f, "H.264"),
        }
    }
}

/// Pixel layouts accepted at the input or produced for the encoder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Rgba,
    Bgra,
    Argb,
    Gray8,
    Yuv420p,
    Yuv422p,
    Yuv444p,
    Nv12,
}

impl PixelFormat {
    pub fn all() -> &'static [PixelFormat] {
        &[
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Rgba,
            PixelFormat::Bgra,
            PixelFormat::Argb,
            PixelFormat::Gray8,
            PixelFormat::Yuv420p,
            PixelFormat::Yuv422p,
            PixelFormat::Yuv444p,
            PixelFormat::Nv12,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Argb => "argb",
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuv422p => "yuv422p",
            PixelFormat::Yuv444p => "yuv444p",
            PixelFormat::Nv12 => "nv12",
        }
    }

    /// Bytes per pixel for packed single-plane formats, `None` for planar ones
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Argb => Some(4),
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Yuv420p
            | PixelFormat::Yuv422p
            | PixelFormat::Yuv444p
            | PixelFormat::Nv12 => None,
        }
    }

    pub fn is_packed(&self) -> bool {
        self.bytes_per_pixel().is_some()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        PixelFormat::all()
            .iter()
            .copied()
            .find(|fmt| fmt.name() == lower)
            .ok_or_else(|| {
                let names: Vec<_> = PixelFormat::all().iter().map(|f| f.name()).collect();
                format!("unknown pixel format '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// Exact rational number, used for time bases
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    pub fn invert(&self) -> Self {
        Self::new(self.den, self.num)
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    /// Best rational approximation of `value` with numerator and
    /// denominator both bounded by `max`.
    ///
    /// Walks the continued fraction expansion and, once the next
    /// convergent would exceed the bound, tries the largest admissible
    /// semiconvergent. Non-positive or non-finite input yields 0/1.
    pub fn approximate(value: f64, max: i32) -> Self {
        if !value.is_finite() || value <= 0.0 || max <= 0 {
            return Self::new(0, 1);
        }
        let max = max as i64;

        // (h_{n-2}, h_{n-1}) and (k_{n-2}, k_{n-1})
        let (mut h0, mut h1) = (0i64, 1i64);
        let (mut k0, mut k1) = (1i64, 0i64);
        let mut x = value;

        loop {
            let a = x.floor().min((max + 1) as f64) as i64;
            let h2 = a * h1 + h0;
            let k2 = a * k1 + k0;

            if h2 > max || k2 > max {
                let t_h = if h1 > 0 { (max - h0) / h1 } else { i64::MAX };
                let t_k = if k1 > 0 { (max - k0) / k1 } else { i64::MAX };
                let t = t_h.min(t_k);
                if t > 0 {
                    let (hs, ks) = (t * h1 + h0, t * k1 + k0);
                    let semi_err = (hs as f64 / ks as f64 - value).abs();
                    if k1 == 0 || semi_err < (h1 as f64 / k1 as f64 - value).abs() {
                        return Self::new(hs as i32, ks as i32);
                    }
                }
                break;
            }

            (h0, h1) = (h1, h2);
            (k0, k1) = (k1, k2);

            let frac = x - x.floor();
            if frac < 1e-12 {
                break;
            }
            x = 1.0 / frac;
        }

        if k1 == 0 {
            return Self::new(max as i32, 1);
        }
        Self::new(h1 as i32, k1 as i32)
    }

    /// Convert `ts` from time base `from` to time base `to`,
    /// rounding to nearest with ties away from zero.
    pub fn rescale(ts: i64, from: Rational, to: Rational) -> i64 {
        let mut num = ts as i128 * from.num as i128 * to.den as i128;
        let mut den = from.den as i128 * to.num as i128;
        if den == 0 {
            log::warn!("Cannot rescale {} from {} to {}, passing it through", ts, from, to);
            return ts;
        }
        if den < 0 {
            num = -num;
            den = -den;
        }
        let half = den / 2;
        let r = if num >= 0 {
            (num + half) / den
        } else {
            -((-num + half) / den)
        };
        r.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Caller-supplied encode parameters (read-only during a session)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeParameters {
    pub width: u32,
    pub height: u32,
    /// Frames per second
    pub fps: f64,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Speed preset name (ultrafast..veryslow); encoder default when `None`
    pub preset: Option<String>,
    /// Quality factor 0-51, lower is better
    pub crf: u32,
    /// Layout of the buffers handed to `write`
    pub src_format: PixelFormat,
    /// Layout the encoder consumes
    pub dst_format: PixelFormat,
}

impl Default for EncodeParameters {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30.0,
            bitrate: 1_000_000,
            preset: Some("medium".to_string()),
            crf: 23,
            src_format: PixelFormat::Rgb24,
            dst_format: PixelFormat::Yuv420p,
        }
    }
}

impl EncodeParameters {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            ..Default::default()
        }
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_crf(mut self, crf: u32) -> Self {
        self.crf = crf;
        self
    }

    pub fn with_preset(mut self, preset: Option<impl Into<String>>) -> Self {
        self.preset = preset.map(Into::into);
        self
    }

    pub fn with_formats(mut self, src: PixelFormat, dst: PixelFormat) -> Self {
        self.src_format = src;
        self.dst_format = dst;
        self
    }

    /// Encoder time base derived from fps: 1/fps as a bounded rational
    pub fn time_base(&self) -> Rational {
        Rational::approximate(1.0 / self.fps, TIME_BASE_MAX)
    }

    /// Row stride of one input buffer in bytes. Saturates; `validate` rejects overflow.
    pub fn src_stride(&self) -> usize {
        (self.width as usize).saturating_mul(self.src_format.bytes_per_pixel().unwrap_or(0))
    }

    /// Exact size in bytes of one input frame. Saturates; `validate` rejects overflow.
    pub fn frame_size(&self) -> usize {
        self.src_stride().saturating_mul(self.height as usize)
    }

    fn check_frame_size(&self) -> Result<usize, EncodeError> {
        let bpp = self.src_format.bytes_per_pixel().unwrap_or(0);
        let stride = (self.width as usize)
            .checked_mul(bpp)
            .filter(|&s| s <= MAX_DIMENSION as usize)
            .ok_or_else(|| invalid("width", format!("{} px rows of {} overflow the row stride", self.width, self.src_format)))?;
        stride.checked_mul(self.height as usize).ok_or_else(|| {
            invalid(
                "height",
                format!("{}x{} {} frame does not fit in memory", self.width, self.height, self.src_format),
            )
        })
    }

    /// Check every field before anything gets allocated
    pub fn validate(&self) -> Result<(), EncodeError> {
        if self.width == 0 {
            return Err(invalid("width", "must be greater than zero"));
        }
        if self.height == 0 {
            return Err(invalid("height", "must be greater than zero"));
        }
        if self.width > MAX_DIMENSION {
            return Err(invalid("width", format!("{} exceeds the maximum of {}", self.width, MAX_DIMENSION)));
        }
        if self.height > MAX_DIMENSION {
            return Err(invalid("height", format!("{} exceeds the maximum of {}", self.height, MAX_DIMENSION)));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(invalid("fps", format!("must be a positive number, got {}", self.fps)));
        }
        if self.fps > TIME_BASE_MAX as f64 {
            return Err(invalid(
                "fps",
                format!("{} exceeds the maximum of {}", self.fps, TIME_BASE_MAX),
            ));
        }
        if self.time_base().is_zero() {
            return Err(invalid("fps", format!("{} has no usable time base", self.fps)));
        }
        if !CRF_RANGE.contains(&self.crf) {
            return Err(invalid(
                "crf",
                format!(
                    "{} outside {}..={}",
                    self.crf,
                    CRF_RANGE.start(),
                    CRF_RANGE.end()
                ),
            ));
        }
        if let Some(ref preset) = self.preset {
            if preset.trim().is_empty() {
                return Err(invalid("preset", "must not be empty"));
            }
            if preset.contains('\0') {
                return Err(invalid("preset", "must not contain NUL bytes"));
            }
        }
        if !self.src_format.is_packed() {
            return Err(invalid(
                "src_format",
                format!("{} is planar; input must be a packed single-plane format", self.src_format),
            ));
        }
        self.check_frame_size()?;
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> EncodeError {
    EncodeError::InvalidParameter {
        field,
        reason: reason.into(),
    }
}

/// Fully resolved encoder configuration handed to the engine
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderConfig {
    pub codec: CodecId,
    pub bitrate: u32,
    pub width: u32,
    pub height: u32,
    pub time_base: Rational,
    pub pixel_format: PixelFormat,
    pub gop_size: u32,
    pub max_b_frames: u32,
    /// Mirror of the container's global header requirement
    pub global_header: bool,
    pub preset: Option<String>,
    pub crf: u32,
}

impl EncoderConfig {
    pub fn from_params(codec: CodecId, params: &EncodeParameters, global_header: bool) -> Self {
        Self {
            codec,
            bitrate: params.bitrate,
            width: params.width,
            height: params.height,
            time_base: params.time_base(),
            pixel_format: params.dst_format,
            gop_size: GOP_SIZE,
            max_b_frames: MAX_B_FRAMES,
            global_header,
            preset: params.preset.clone(),
            crf: params.crf,
        }
    }
}
