#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use canvas_recorder::{
    Canvas, DrawBuffer, DrawableSurface, ErrorHandler, RecorderError, RecorderResult,
    RecordingEngine, SurfaceError, VideoSource,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Shared log of engine calls, in order.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|c| *c == call).count()
    }
}

/// Surface that succeeds a fixed number of cycles, then fails in the scripted phase.
pub struct ScriptedSurface {
    size: Canvas,
    fail_acquire_after: Option<u64>,
    fail_publish_after: Option<u64>,
    acquired: AtomicU64,
    published: AtomicU64,
}

impl ScriptedSurface {
    pub fn healthy(size: Canvas) -> Arc<Self> {
        Arc::new(Self::new(size, None, None))
    }

    pub fn failing_acquire_after(size: Canvas, n: u64) -> Arc<Self> {
        Arc::new(Self::new(size, Some(n), None))
    }

    pub fn failing_publish_after(size: Canvas, n: u64) -> Arc<Self> {
        Arc::new(Self::new(size, None, Some(n)))
    }

    fn new(size: Canvas, acquire: Option<u64>, publish: Option<u64>) -> Self {
        Self {
            size,
            fail_acquire_after: acquire,
            fail_publish_after: publish,
            acquired: AtomicU64::new(0),
            published: AtomicU64::new(0),
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }
}

impl DrawableSurface for ScriptedSurface {
    fn acquire(&self) -> Result<DrawBuffer, SurfaceError> {
        let n = self.acquired.fetch_add(1, Ordering::SeqCst);
        if self.fail_acquire_after.is_some_and(|limit| n >= limit) {
            return Err(SurfaceError::Released);
        }
        DrawBuffer::new(self.size).map_err(|e| SurfaceError::InvalidBuffer(e.to_string()))
    }

    fn publish(&self, _buffer: DrawBuffer) -> Result<(), SurfaceError> {
        let n = self.published.load(Ordering::SeqCst);
        if self.fail_publish_after.is_some_and(|limit| n >= limit) {
            return Err(SurfaceError::Rejected("encoder gone".to_string()));
        }
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine double that logs every call and hands out a scripted surface.
pub struct FakeEngine {
    log: CallLog,
    surface: Arc<dyn DrawableSurface>,
    recording: bool,
    fail_stop: bool,
}

impl FakeEngine {
    pub fn new(log: CallLog, surface: Arc<dyn DrawableSurface>) -> Self {
        Self {
            log,
            surface,
            recording: false,
            fail_stop: false,
        }
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }
}

impl RecordingEngine for FakeEngine {
    fn set_video_source(&mut self, source: VideoSource) -> RecorderResult<()> {
        self.log.push(format!("set_video_source {source:?}"));
        Ok(())
    }

    fn set_input_surface(&mut self, _surface: Arc<dyn DrawableSurface>) -> RecorderResult<()> {
        self.log.push("set_input_surface");
        Ok(())
    }

    fn set_video_frame_rate(&mut self, rate: u32) -> RecorderResult<()> {
        if self.recording {
            return Err(RecorderError::invalid_state("frame rate is fixed while recording"));
        }
        self.log.push(format!("set_video_frame_rate {rate}"));
        Ok(())
    }

    fn set_video_size(&mut self, size: Canvas) -> RecorderResult<()> {
        self.log.push(format!("set_video_size {size}"));
        Ok(())
    }

    fn set_video_bitrate(&mut self, bits_per_second: u32) -> RecorderResult<()> {
        self.log.push(format!("set_video_bitrate {bits_per_second}"));
        Ok(())
    }

    fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.log
            .push(format!("set_error_handler {}", handler.is_some()));
    }

    fn prepare(&mut self) -> RecorderResult<()> {
        self.log.push("prepare");
        Ok(())
    }

    fn start(&mut self) -> RecorderResult<()> {
        self.log.push("start");
        self.recording = true;
        Ok(())
    }

    fn pause(&mut self) -> RecorderResult<()> {
        self.log.push("pause");
        Ok(())
    }

    fn resume(&mut self) -> RecorderResult<()> {
        self.log.push("resume");
        Ok(())
    }

    fn stop(&mut self) -> RecorderResult<()> {
        self.log.push("stop");
        self.recording = false;
        if self.fail_stop {
            return Err(RecorderError::engine("stop failed"));
        }
        Ok(())
    }

    fn reset(&mut self) -> RecorderResult<()> {
        self.log.push("reset");
        self.recording = false;
        Ok(())
    }

    fn release(&mut self) {
        self.log.push("release");
        self.recording = false;
    }

    fn surface(&self) -> RecorderResult<Arc<dyn DrawableSurface>> {
        Ok(self.surface.clone())
    }
}
