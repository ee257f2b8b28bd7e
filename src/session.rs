//! Recording session: lifecycle state machine over a [`RecordingEngine`] and a [`FramePacer`].
//!
//! In surface-driven mode the session owns frame production: it launches the pacer against the
//! engine's surface on start, suspends it on pause and tears it down on stop/reset. Otherwise
//! every call is delegated to the engine and the pacer stays idle.
//!
//! Lifecycle calls are serialized by one control lock. A surface failure reported by the pacer
//! takes the same lock, forces a stop and then notifies the error handler with no lock held.
//! Signals the engine raises during stop or reset are delivered the same way, after the control
//! lock is dropped.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::drawer::FrameDrawer;
use crate::engine::{RecordingEngine, RecordingMode, VideoSource};
use crate::escalation::{self, ErrorHandler, ErrorSignal, SurfaceErrorCode};
use crate::foundation::core::{Canvas, PacingInterval};
use crate::foundation::error::{RecorderError, RecorderResult};
use crate::foundation::lock;
use crate::scheduler::{FramePacer, PacerStats};
use crate::surface::DrawableSurface;
use crate::worker::WorkerHandle;

/// Session lifecycle as seen by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Armed,
    Recording,
    Paused,
    Stopped,
}

struct Control {
    engine: Box<dyn RecordingEngine>,
    state: LifecycleState,
    source: Option<VideoSource>,
    has_input_surface: bool,
}

impl Control {
    fn mode(&self) -> RecordingMode {
        RecordingMode::resolve(self.source, self.has_input_surface)
    }

    fn ensure_configurable(&self, op: &str) -> RecorderResult<()> {
        match self.state {
            LifecycleState::Recording | LifecycleState::Paused => Err(
                RecorderError::invalid_state(format!("{op} is not allowed while {:?}", self.state)),
            ),
            _ => Ok(()),
        }
    }
}

struct SessionInner {
    control: Mutex<Control>,
    error_handler: Mutex<Option<ErrorHandler>>,
    pacer: FramePacer,
}

/// Handle to one recording session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(engine: Box<dyn RecordingEngine>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner>| {
            let weak = weak.clone();
            SessionInner {
                control: Mutex::new(Control {
                    engine,
                    state: LifecycleState::Idle,
                    source: None,
                    has_input_surface: false,
                }),
                error_handler: Mutex::new(None),
                pacer: FramePacer::new(Box::new(move |generation, code| {
                    if let Some(inner) = weak.upgrade() {
                        inner.escalate_failure(generation, code);
                    }
                })),
            }
        });
        Self { inner }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        lock(&self.inner.control)
    }

    pub fn state(&self) -> LifecycleState {
        self.control().state
    }

    pub fn mode(&self) -> RecordingMode {
        self.control().mode()
    }

    pub fn is_surface_driven(&self) -> bool {
        self.mode() == RecordingMode::SurfaceDriven
    }

    pub fn pacing_interval(&self) -> PacingInterval {
        self.inner.pacer.interval()
    }

    /// Frame pacer counters, mostly useful for diagnostics.
    pub fn stats(&self) -> PacerStats {
        self.inner.pacer.stats()
    }

    /// Set frame rate, draw callback and worker in one go, then arm the session.
    #[tracing::instrument(skip(self, drawer, worker))]
    pub fn configure(
        &self,
        frame_rate: u32,
        drawer: Box<dyn FrameDrawer>,
        worker: WorkerHandle,
    ) -> RecorderResult<()> {
        let mut control = self.control();
        control.ensure_configurable("configure")?;
        self.apply_frame_rate(&mut control, frame_rate)?;
        self.inner.pacer.set_drawer(Some(drawer));
        self.inner.pacer.set_worker(Some(worker));
        control.state = LifecycleState::Armed;
        Ok(())
    }

    pub fn set_frame_drawer(&self, drawer: Box<dyn FrameDrawer>) -> RecorderResult<()> {
        let control = self.control();
        control.ensure_configurable("set_frame_drawer")?;
        self.inner.pacer.set_drawer(Some(drawer));
        Ok(())
    }

    pub fn set_worker(&self, worker: WorkerHandle) -> RecorderResult<()> {
        let control = self.control();
        control.ensure_configurable("set_worker")?;
        self.inner.pacer.set_worker(Some(worker));
        Ok(())
    }

    /// Forward the rate to the engine, then derive the pacing interval from it.
    pub fn set_frame_rate(&self, rate: u32) -> RecorderResult<()> {
        let mut control = self.control();
        self.apply_frame_rate(&mut control, rate)
    }

    fn apply_frame_rate(&self, control: &mut Control, rate: u32) -> RecorderResult<()> {
        let interval = PacingInterval::from_frame_rate(rate)?;
        control.engine.set_video_frame_rate(rate)?;
        self.inner.pacer.set_interval(interval);
        Ok(())
    }

    pub fn set_video_source(&self, source: VideoSource) -> RecorderResult<()> {
        let mut control = self.control();
        control.engine.set_video_source(source)?;
        control.source = Some(source);
        Ok(())
    }

    /// Record from a host-owned surface. The session then never drives frames itself.
    pub fn set_input_surface(&self, surface: Arc<dyn DrawableSurface>) -> RecorderResult<()> {
        let mut control = self.control();
        control.ensure_configurable("set_input_surface")?;
        control.engine.set_input_surface(surface)?;
        control.has_input_surface = true;
        Ok(())
    }

    pub fn set_video_size(&self, size: Canvas) -> RecorderResult<()> {
        self.control().engine.set_video_size(size)
    }

    pub fn set_video_bitrate(&self, bits_per_second: u32) -> RecorderResult<()> {
        self.control().engine.set_video_bitrate(bits_per_second)
    }

    /// Register the callback for asynchronous errors. It outlives stop and reset.
    pub fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        let mut control = self.control();
        control.engine.set_error_handler(handler.clone());
        *lock(&self.inner.error_handler) = handler;
    }

    #[tracing::instrument(skip(self))]
    pub fn prepare(&self) -> RecorderResult<()> {
        let mut control = self.control();
        control.engine.prepare()?;
        if !matches!(
            control.state,
            LifecycleState::Recording | LifecycleState::Paused
        ) {
            control.state = LifecycleState::Armed;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> RecorderResult<()> {
        let mut control = self.control();
        if matches!(
            control.state,
            LifecycleState::Recording | LifecycleState::Paused
        ) {
            return Err(RecorderError::invalid_state("session is already recording"));
        }

        if control.mode() == RecordingMode::SurfaceDriven {
            let pacer = &self.inner.pacer;
            let worker = pacer
                .worker()
                .ok_or_else(|| RecorderError::invalid_state("worker is not set"))?;
            if !worker.is_alive() {
                return Err(RecorderError::invalid_state("worker has quit"));
            }
            if !pacer.has_drawer() {
                return Err(RecorderError::invalid_state("frame drawer is not set"));
            }

            control.engine.start()?;
            let launched = control
                .engine
                .surface()
                .and_then(|surface| pacer.launch(surface));
            if let Err(err) = launched {
                if let Err(stop_err) = control.engine.stop() {
                    tracing::warn!(error = %stop_err, "failed to stop engine after aborted start");
                }
                return Err(err);
            }
        } else {
            control.engine.start()?;
        }

        control.state = LifecycleState::Recording;
        tracing::info!(
            mode = ?control.mode(),
            interval_ms = self.inner.pacer.interval().as_millis(),
            "recording started"
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn pause(&self) -> RecorderResult<()> {
        let mut control = self.control();
        let pacing =
            control.state == LifecycleState::Recording && control.mode() == RecordingMode::SurfaceDriven;
        if pacing {
            self.inner.pacer.pause();
        }
        if let Err(err) = control.engine.pause() {
            if pacing {
                self.inner.pacer.resume();
            }
            return Err(err);
        }
        if control.state == LifecycleState::Recording {
            control.state = LifecycleState::Paused;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn resume(&self) -> RecorderResult<()> {
        let mut control = self.control();
        control.engine.resume()?;
        if control.state == LifecycleState::Paused {
            if control.mode() == RecordingMode::SurfaceDriven {
                self.inner.pacer.resume();
            }
            control.state = LifecycleState::Recording;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn stop(&self) -> RecorderResult<()> {
        let mut control = self.control();
        let result = self.inner.stop_locked(&mut control);
        let signals = control.engine.take_error_signals();
        drop(control);
        self.inner.deliver(signals);
        result
    }

    #[tracing::instrument(skip(self))]
    pub fn reset(&self) -> RecorderResult<()> {
        let mut control = self.control();
        self.inner.local_reset(&mut control);
        let result = control.engine.reset();
        let signals = control.engine.take_error_signals();
        drop(control);
        self.inner.deliver(signals);
        result
    }

    /// Release the engine and drop the error handler. The session cannot be reused.
    #[tracing::instrument(skip(self))]
    pub fn release(&self) {
        let mut control = self.control();
        self.inner.local_reset(&mut control);
        *lock(&self.inner.error_handler) = None;
        control.engine.set_error_handler(None);
        control.engine.release();
        let dropped = control.engine.take_error_signals();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "engine signals dropped on release");
        }
    }
}

impl SessionInner {
    /// Stop pacing and forget volatile configuration.
    fn local_reset(&self, control: &mut Control) {
        self.pacer.reset();
        control.source = None;
        control.has_input_surface = false;
        if control.state != LifecycleState::Idle {
            control.state = LifecycleState::Stopped;
        }
    }

    fn stop_locked(&self, control: &mut Control) -> RecorderResult<()> {
        self.local_reset(control);
        control.engine.stop()
    }

    /// Pacer failure hook, runs on the worker thread.
    fn escalate_failure(&self, generation: u64, code: SurfaceErrorCode) {
        let control = lock(&self.control);
        if !self.pacer.is_current(generation) {
            tracing::debug!(generation, ?code, "surface failure superseded by a newer lifecycle call");
            return;
        }
        let handler = lock(&self.error_handler).clone();
        let mut engine_signals = Vec::new();
        escalation::escalate(
            code,
            || {
                let mut control = control;
                let result = self.stop_locked(&mut control);
                engine_signals = control.engine.take_error_signals();
                result
            },
            handler,
        );
        self.deliver(engine_signals);
    }

    /// Hand engine-raised signals to the host. Must be called with no lock held.
    fn deliver(&self, signals: Vec<ErrorSignal>) {
        if signals.is_empty() {
            return;
        }
        let Some(handler) = lock(&self.error_handler).clone() else {
            return;
        };
        for signal in signals {
            tracing::debug!(category = signal.category, code = signal.code, "delivering engine signal");
            handler(signal);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("interval", &self.pacing_interval())
            .finish()
    }
}
