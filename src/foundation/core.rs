use std::time::Duration;

use crate::foundation::error::{RecorderError, RecorderResult};

pub use kurbo::{Affine, Vec2};

/// Canvas (or content) dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Return `true` when either side is zero.
    pub fn is_degenerate(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of bytes in a tightly packed RGBA8 buffer of this size.
    pub fn rgba_len(self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4)
    }

    /// Convert to the `u16` dimensions used by `vello_cpu` pixmaps.
    pub(crate) fn as_u16(self) -> RecorderResult<(u16, u16)> {
        let w: u16 = self
            .width
            .try_into()
            .map_err(|_| RecorderError::validation("canvas width exceeds u16"))?;
        let h: u16 = self
            .height
            .try_into()
            .map_err(|_| RecorderError::validation("canvas height exceeds u16"))?;
        Ok((w, h))
    }
}

impl std::fmt::Display for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for Canvas {
    type Err = RecorderError;

    /// Parse `WIDTHxHEIGHT`, e.g. `720x1280`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| RecorderError::validation(format!("expected WxH, got '{s}'")))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|e| RecorderError::validation(format!("bad width '{w}': {e}")))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|e| RecorderError::validation(format!("bad height '{h}': {e}")))?;
        Ok(Self { width, height })
    }
}

/// Nominal time budget per frame, derived from the frame rate.
///
/// Always strictly positive. `ceil(1000 / rate)` milliseconds, 1000 ms when no rate was set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacingInterval(Duration);

impl PacingInterval {
    pub const DEFAULT_MS: u64 = 1000;

    /// Derive the interval for `rate` frames per second.
    pub fn from_frame_rate(rate: u32) -> RecorderResult<Self> {
        if rate == 0 {
            return Err(RecorderError::validation("frame rate must be > 0"));
        }
        let rate = u64::from(rate);
        Ok(Self::from_millis(Self::DEFAULT_MS.div_ceil(rate)))
    }

    pub(crate) fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms.max(1)))
    }

    pub fn as_duration(self) -> Duration {
        self.0
    }

    pub fn as_millis(self) -> u64 {
        self.0.as_millis() as u64
    }
}

impl Default for PacingInterval {
    fn default() -> Self {
        Self::from_millis(Self::DEFAULT_MS)
    }
}
