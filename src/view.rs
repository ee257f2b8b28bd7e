//! Records a capturable content source, fitted into the video frame.

use std::sync::{Arc, Mutex};

use crate::drawer::{ContentSlot, ContentSource, FitContentDrawer};
use crate::engine::{RecordingEngine, VideoSource};
use crate::escalation::ErrorHandler;
use crate::foundation::core::Canvas;
use crate::foundation::error::{RecorderError, RecorderResult};
use crate::foundation::lock;
use crate::session::{LifecycleState, Session};
use crate::worker::WorkerHandle;

/// Session front-end that draws a [`ContentSource`] into every frame.
///
/// The content is centered and shrunk to fit the video size; it can be swapped at any time,
/// including mid-recording. Drawing happens on the worker given at construction.
pub struct ViewRecorder {
    session: Session,
    worker: WorkerHandle,
    video_size: Mutex<Option<Canvas>>,
    content: ContentSlot,
}

impl ViewRecorder {
    pub fn new(engine: Box<dyn RecordingEngine>, worker: WorkerHandle) -> Self {
        Self {
            session: Session::new(engine),
            worker,
            video_size: Mutex::new(None),
            content: ContentSlot::new(),
        }
    }

    /// The underlying session, for queries and direct configuration.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> LifecycleState {
        self.session.state()
    }

    pub fn video_size(&self) -> Option<Canvas> {
        *lock(&self.video_size)
    }

    /// Replace the recorded content. Takes effect from the next frame.
    pub fn set_recorded_content(&self, content: Arc<dyn ContentSource>) {
        self.content.set(content);
    }

    pub fn set_video_source(&self, source: VideoSource) -> RecorderResult<()> {
        self.session.set_video_source(source)
    }

    pub fn set_video_size(&self, size: Canvas) -> RecorderResult<()> {
        self.session.set_video_size(size)?;
        *lock(&self.video_size) = Some(size);
        Ok(())
    }

    pub fn set_frame_rate(&self, rate: u32) -> RecorderResult<()> {
        self.session.set_frame_rate(rate)
    }

    pub fn set_video_bitrate(&self, bits_per_second: u32) -> RecorderResult<()> {
        self.session.set_video_bitrate(bits_per_second)
    }

    pub fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        self.session.set_error_handler(handler);
    }

    pub fn prepare(&self) -> RecorderResult<()> {
        self.session.prepare()
    }

    /// Start recording. In surface-driven mode this needs a video size and a content source.
    pub fn start(&self) -> RecorderResult<()> {
        if self.session.is_surface_driven() {
            let size = self
                .video_size()
                .ok_or_else(|| RecorderError::invalid_state("video size is not set"))?;
            if !self.content.is_set() {
                return Err(RecorderError::invalid_state("recorded content is not set"));
            }
            self.session.set_worker(self.worker.clone())?;
            self.session
                .set_frame_drawer(Box::new(FitContentDrawer::new(self.content.clone(), size)))?;
        }
        self.session.start()
    }

    pub fn pause(&self) -> RecorderResult<()> {
        self.session.pause()
    }

    pub fn resume(&self) -> RecorderResult<()> {
        self.session.resume()
    }

    pub fn stop(&self) -> RecorderResult<()> {
        *lock(&self.video_size) = None;
        self.session.stop()
    }

    pub fn reset(&self) -> RecorderResult<()> {
        *lock(&self.video_size) = None;
        self.session.reset()
    }

    pub fn release(&self) {
        self.content.clear();
        self.session.release();
    }
}

impl std::fmt::Debug for ViewRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewRecorder")
            .field("session", &self.session)
            .field("video_size", &self.video_size())
            .field("content", &self.content)
            .finish()
    }
}
