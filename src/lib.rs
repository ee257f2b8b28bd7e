//! Frame-paced canvas recording.
//!
//! A [`Session`] drives a [`RecordingEngine`]: when the engine records from its own drawable
//! surface, the session paces frames at the configured rate, running acquire/draw/publish once
//! per interval on a [`Worker`] thread. Unrecoverable surface failures stop the session and are
//! reported to the host's [`ErrorHandler`] as an [`ErrorSignal`].
//!
//! - Configure a [`Session`] (or a [`ViewRecorder`] for fitted content)
//! - Plug a [`SinkEngine`] with a [`FrameSink`] (in-memory, PNG sequence or `ffmpeg`)
//! - Start, pause, resume and stop from any thread
#![forbid(unsafe_code)]

mod foundation;

/// Recorder configuration file.
pub mod config;
/// Draw callbacks and content sources.
pub mod drawer;
/// Frame sinks.
pub mod encode;
/// Recording engine interface and the sink-backed engine.
pub mod engine;
/// Surface failure escalation.
pub mod escalation;
/// Content-fit transform.
pub mod fit;
/// Acquire/draw/publish protocol.
pub mod publish;
/// Frame pacing.
pub mod scheduler;
/// Lifecycle state machine.
pub mod session;
/// Drawable surfaces.
pub mod surface;
/// Content recorder front-end.
pub mod view;
/// Single-threaded delayed task execution.
pub mod worker;

pub use crate::foundation::core::{Affine, Canvas, PacingInterval, Vec2};
pub use crate::foundation::error::{RecorderError, RecorderResult};

pub use crate::config::RecorderConfig;
pub use crate::drawer::{
    ContentSlot, ContentSource, FitCompositor, FitContentDrawer, FrameDrawer, ImageContent,
    compose_fitted,
};
pub use crate::encode::ffmpeg::{FfmpegSink, FfmpegSinkOpts, is_ffmpeg_on_path};
pub use crate::encode::sink::{FrameLog, FrameSink, InMemorySink, PngSequenceSink, SinkConfig};
pub use crate::engine::{EngineState, RecordingEngine, RecordingMode, SinkEngine, VideoSource};
pub use crate::escalation::{
    ENGINE_ERROR_UNKNOWN, ErrorHandler, ErrorSignal, SURFACE_ERROR_CATEGORY, SurfaceErrorCode,
};
pub use crate::fit::{FitTransform, fit_transform};
pub use crate::publish::{PublicationOutcome, PublishPhase, run_once};
pub use crate::scheduler::{FramePacer, PacerState, PacerStats};
pub use crate::session::{LifecycleState, Session};
pub use crate::surface::{
    DrawBuffer, DrawableSurface, FrameConsumer, FrameRGBA, PixmapSurface, SurfaceError,
};
pub use crate::view::ViewRecorder;
pub use crate::worker::{TaskToken, Worker, WorkerHandle};
