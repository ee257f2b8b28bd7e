use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::encode::sink::{FrameSink, SinkConfig};
use crate::engine::{RecordingEngine, VideoSource};
use crate::escalation::{ENGINE_ERROR_UNKNOWN, ErrorHandler, ErrorSignal};
use crate::foundation::core::Canvas;
use crate::foundation::error::{RecorderError, RecorderResult};
use crate::foundation::lock;
use crate::surface::{DrawableSurface, FrameConsumer, FrameRGBA, PixmapSurface, SurfaceError};

/// Frame rate handed to the sink when none was configured.
const DEFAULT_SINK_FPS: u32 = 1;

/// States of a [`SinkEngine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Initial,
    Initialized,
    Prepared,
    Recording,
    Paused,
    Released,
}

/// Published frames flow through here into the sink.
struct SinkFeed {
    sink: Mutex<Box<dyn FrameSink>>,
    accepting: AtomicBool,
    frames: AtomicU64,
}

impl FrameConsumer for SinkFeed {
    fn consume(&self, frame: &FrameRGBA) -> Result<(), SurfaceError> {
        // Paused: the surface keeps working, frames are dropped.
        if !self.accepting.load(Ordering::Acquire) {
            return Ok(());
        }
        lock(&self.sink)
            .push_frame(frame)
            .map_err(|e| SurfaceError::Rejected(e.to_string()))?;
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// [`RecordingEngine`] that records surface frames into a [`FrameSink`].
///
/// Follows the usual media-recorder state machine:
/// `Initial -> Initialized -> Prepared -> Recording <-> Paused -> Initial`.
/// Configuration setters are only accepted in `Initialized`.
pub struct SinkEngine {
    state: EngineState,
    source: Option<VideoSource>,
    input_surface: Option<Arc<dyn DrawableSurface>>,
    frame_rate: Option<u32>,
    size: Option<Canvas>,
    bitrate: Option<u32>,
    handler: Option<ErrorHandler>,
    pending_signals: Vec<ErrorSignal>,

    feed: Arc<SinkFeed>,
    surface: Option<Arc<PixmapSurface>>,
}

impl SinkEngine {
    pub fn new(sink: Box<dyn FrameSink>) -> Self {
        Self {
            state: EngineState::Initial,
            source: None,
            input_surface: None,
            frame_rate: None,
            size: None,
            bitrate: None,
            handler: None,
            pending_signals: Vec::new(),
            feed: Arc::new(SinkFeed {
                sink: Mutex::new(sink),
                accepting: AtomicBool::new(false),
                frames: AtomicU64::new(0),
            }),
            surface: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Frames handed to the sink since the last start.
    pub fn frames_recorded(&self) -> u64 {
        self.feed.frames.load(Ordering::Relaxed)
    }

    fn expect_state(&self, allowed: &[EngineState], op: &str) -> RecorderResult<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(RecorderError::invalid_state(format!(
            "{op} called in engine state {:?}",
            self.state
        )))
    }

    fn sink_config(&self) -> RecorderResult<SinkConfig> {
        let size = self
            .size
            .ok_or_else(|| RecorderError::invalid_state("video size is not set"))?;
        Ok(SinkConfig {
            width: size.width,
            height: size.height,
            fps: self.frame_rate.unwrap_or(DEFAULT_SINK_FPS),
            bitrate: self.bitrate,
        })
    }

    fn owns_surface(&self) -> bool {
        self.source == Some(VideoSource::Surface) && self.input_surface.is_none()
    }

    /// Stop feeding the sink, release our surface and finalize the sink.
    fn finish_recording(&mut self) -> RecorderResult<()> {
        self.feed.accepting.store(false, Ordering::Release);
        if let Some(surface) = self.surface.take() {
            surface.release();
        }
        lock(&self.feed.sink).end()
    }

    fn clear_config(&mut self) {
        self.source = None;
        self.input_surface = None;
        self.frame_rate = None;
        self.size = None;
        self.bitrate = None;
        if let Some(surface) = self.surface.take() {
            surface.release();
        }
    }
}

impl RecordingEngine for SinkEngine {
    fn set_video_source(&mut self, source: VideoSource) -> RecorderResult<()> {
        self.expect_state(
            &[EngineState::Initial, EngineState::Initialized],
            "set_video_source",
        )?;
        self.source = Some(source);
        self.state = EngineState::Initialized;
        Ok(())
    }

    fn set_input_surface(&mut self, surface: Arc<dyn DrawableSurface>) -> RecorderResult<()> {
        self.expect_state(&[EngineState::Initialized], "set_input_surface")?;
        self.input_surface = Some(surface);
        Ok(())
    }

    fn set_video_frame_rate(&mut self, rate: u32) -> RecorderResult<()> {
        self.expect_state(&[EngineState::Initialized], "set_video_frame_rate")?;
        if rate == 0 {
            return Err(RecorderError::validation("frame rate must be non-zero"));
        }
        self.frame_rate = Some(rate);
        Ok(())
    }

    fn set_video_size(&mut self, size: Canvas) -> RecorderResult<()> {
        self.expect_state(&[EngineState::Initialized], "set_video_size")?;
        if size.is_degenerate() {
            return Err(RecorderError::validation(format!(
                "video size must be non-zero, got {size}"
            )));
        }
        self.size = Some(size);
        Ok(())
    }

    fn set_video_bitrate(&mut self, bits_per_second: u32) -> RecorderResult<()> {
        self.expect_state(&[EngineState::Initialized], "set_video_bitrate")?;
        if bits_per_second == 0 {
            return Err(RecorderError::validation("bitrate must be non-zero"));
        }
        self.bitrate = Some(bits_per_second);
        Ok(())
    }

    fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.handler = handler;
    }

    fn take_error_signals(&mut self) -> Vec<ErrorSignal> {
        std::mem::take(&mut self.pending_signals)
    }

    fn prepare(&mut self) -> RecorderResult<()> {
        self.expect_state(&[EngineState::Initialized], "prepare")?;
        match self.source {
            Some(VideoSource::Surface) => {}
            Some(other) => {
                return Err(RecorderError::engine(format!(
                    "video source {other:?} has no capture device in this engine"
                )));
            }
            None => return Err(RecorderError::invalid_state("video source is not set")),
        }

        let size = self
            .size
            .ok_or_else(|| RecorderError::invalid_state("video size is required for surface recording"))?;
        if self.owns_surface() {
            let consumer: Arc<dyn FrameConsumer> = self.feed.clone();
            self.surface = Some(Arc::new(PixmapSurface::new(size, consumer)?));
        }
        self.state = EngineState::Prepared;
        tracing::debug!(size = %size, fps = ?self.frame_rate, "engine prepared");
        Ok(())
    }

    fn start(&mut self) -> RecorderResult<()> {
        self.expect_state(&[EngineState::Prepared], "start")?;
        let cfg = self.sink_config()?;
        lock(&self.feed.sink).begin(cfg)?;
        self.feed.frames.store(0, Ordering::Relaxed);
        self.feed.accepting.store(true, Ordering::Release);
        self.state = EngineState::Recording;
        tracing::info!(
            size = %format!("{}x{}", cfg.width, cfg.height),
            fps = cfg.fps,
            "engine recording"
        );
        Ok(())
    }

    fn pause(&mut self) -> RecorderResult<()> {
        self.expect_state(&[EngineState::Recording], "pause")?;
        self.feed.accepting.store(false, Ordering::Release);
        self.state = EngineState::Paused;
        Ok(())
    }

    fn resume(&mut self) -> RecorderResult<()> {
        self.expect_state(&[EngineState::Paused], "resume")?;
        self.feed.accepting.store(true, Ordering::Release);
        self.state = EngineState::Recording;
        Ok(())
    }

    fn stop(&mut self) -> RecorderResult<()> {
        self.expect_state(&[EngineState::Recording, EngineState::Paused], "stop")?;
        // The engine returns to Initial even when finalizing fails.
        self.state = EngineState::Initial;
        let finished = self.finish_recording();
        self.clear_config();
        tracing::info!(frames = self.frames_recorded(), "engine stopped");
        finished
    }

    fn reset(&mut self) -> RecorderResult<()> {
        if self.state == EngineState::Released {
            return Err(RecorderError::invalid_state("reset called on a released engine"));
        }
        let was_recording = matches!(self.state, EngineState::Recording | EngineState::Paused);
        self.state = EngineState::Initial;
        if was_recording && let Err(err) = self.finish_recording() {
            tracing::warn!(error = %err, "failed to finalize sink during reset");
            if self.handler.is_some() {
                self.pending_signals
                    .push(ErrorSignal::engine(ENGINE_ERROR_UNKNOWN));
            }
        }
        self.clear_config();
        Ok(())
    }

    fn release(&mut self) {
        if self.state == EngineState::Released {
            return;
        }
        if matches!(self.state, EngineState::Recording | EngineState::Paused)
            && let Err(err) = self.finish_recording()
        {
            tracing::warn!(error = %err, "failed to finalize sink during release");
        }
        self.clear_config();
        self.handler = None;
        self.pending_signals.clear();
        self.state = EngineState::Released;
    }

    fn surface(&self) -> RecorderResult<Arc<dyn DrawableSurface>> {
        if self.input_surface.is_some() {
            return Err(RecorderError::invalid_state(
                "engine records from a host-supplied input surface",
            ));
        }
        self.expect_state(
            &[EngineState::Prepared, EngineState::Recording, EngineState::Paused],
            "surface",
        )?;
        match &self.surface {
            Some(surface) => Ok(surface.clone()),
            None => Err(RecorderError::invalid_state("engine has no surface")),
        }
    }
}
