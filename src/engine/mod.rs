//! The recording engine interface the session drives, plus a sink-backed implementation.

use std::sync::Arc;

use crate::escalation::{ErrorHandler, ErrorSignal};
use crate::foundation::core::Canvas;
use crate::foundation::error::RecorderResult;
use crate::surface::DrawableSurface;

mod sink_engine;

pub use sink_engine::{EngineState, SinkEngine};

/// Where the engine takes its video frames from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSource {
    /// Engine-chosen default input.
    #[default]
    Default,
    /// A capture device owned by the engine.
    Camera,
    /// Frames are drawn into a surface handed out by the engine.
    Surface,
}

/// Who produces the frames of a recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingMode {
    /// The session's frame pacer draws into the engine's surface.
    SurfaceDriven,
    /// Frames come from the engine itself or from a host-supplied input surface.
    ExternallyDriven,
}

impl RecordingMode {
    pub fn resolve(source: Option<VideoSource>, has_input_surface: bool) -> Self {
        match source {
            Some(VideoSource::Surface) if !has_input_surface => Self::SurfaceDriven,
            _ => Self::ExternallyDriven,
        }
    }
}

/// Media-recorder style engine driven by a [`crate::Session`].
///
/// Each method enforces the engine's own state preconditions and reports violations as
/// [`crate::RecorderError::InvalidState`]. Errors are passed through the session unmodified.
pub trait RecordingEngine: Send {
    fn set_video_source(&mut self, source: VideoSource) -> RecorderResult<()>;
    /// Supply a host-owned surface; the engine stops handing out its own.
    fn set_input_surface(&mut self, surface: Arc<dyn DrawableSurface>) -> RecorderResult<()>;
    fn set_video_frame_rate(&mut self, rate: u32) -> RecorderResult<()>;
    fn set_video_size(&mut self, size: Canvas) -> RecorderResult<()>;
    fn set_video_bitrate(&mut self, bits_per_second: u32) -> RecorderResult<()>;
    fn set_error_handler(&mut self, handler: Option<ErrorHandler>);

    /// Error signals raised while the engine was being driven, oldest first.
    ///
    /// Engines must not call the handler from inside a control call; they queue the signal and
    /// the caller delivers it once it holds no locks.
    fn take_error_signals(&mut self) -> Vec<ErrorSignal> {
        Vec::new()
    }

    fn prepare(&mut self) -> RecorderResult<()>;
    fn start(&mut self) -> RecorderResult<()>;
    fn pause(&mut self) -> RecorderResult<()>;
    fn resume(&mut self) -> RecorderResult<()>;
    fn stop(&mut self) -> RecorderResult<()>;
    fn reset(&mut self) -> RecorderResult<()>;
    fn release(&mut self);

    /// The surface frames are drawn into while recording from [`VideoSource::Surface`].
    fn surface(&self) -> RecorderResult<Arc<dyn DrawableSurface>>;
}
