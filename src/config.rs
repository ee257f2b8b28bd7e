use std::path::Path;

use crate::engine::VideoSource;
use crate::foundation::core::Canvas;
use crate::foundation::error::{RecorderError, RecorderResult};
use crate::session::Session;

/// Recording settings loadable from JSON.
///
/// ```json
/// { "video_source": "surface", "frame_rate": 30, "video_size": { "width": 720, "height": 1280 } }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecorderConfig {
    #[serde(default)]
    pub video_source: VideoSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_size: Option<Canvas>,
    /// Bits per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate: Option<u32>,
}

impl RecorderConfig {
    pub fn from_json_str(s: &str) -> RecorderResult<Self> {
        let cfg: Self = serde_json::from_str(s)
            .map_err(|e| RecorderError::serde(format!("parse recorder config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> RecorderResult<Self> {
        use anyhow::Context as _;
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read recorder config '{}'", path.display()))?;
        Self::from_json_str(&s)
    }

    pub fn validate(&self) -> RecorderResult<()> {
        if self.frame_rate == Some(0) {
            return Err(RecorderError::validation("frame_rate must be > 0"));
        }
        if let Some(size) = self.video_size
            && size.is_degenerate()
        {
            return Err(RecorderError::validation(format!(
                "video_size must be non-zero, got {size}"
            )));
        }
        if self.video_bitrate == Some(0) {
            return Err(RecorderError::validation("video_bitrate must be > 0"));
        }
        Ok(())
    }

    /// Push the settings into `session`, source first.
    pub fn apply(&self, session: &Session) -> RecorderResult<()> {
        self.validate()?;
        session.set_video_source(self.video_source)?;
        if let Some(size) = self.video_size {
            session.set_video_size(size)?;
        }
        if let Some(rate) = self.frame_rate {
            session.set_frame_rate(rate)?;
        }
        if let Some(bitrate) = self.video_bitrate {
            session.set_video_bitrate(bitrate)?;
        }
        tracing::debug!(config = ?self, "recorder config applied");
        Ok(())
    }
}
