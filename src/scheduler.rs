//! Frame pacing scheduler.
//!
//! A self-rescheduling task on one [`WorkerHandle`] that runs the publication protocol once per
//! pacing interval. Each iteration re-anchors on its own start time: the delay to the next
//! iteration is `max(0, t0 + interval - now)`, which absorbs the time spent drawing but does not
//! correct wake-up jitter across iterations.
//!
//! `started`/`paused` are atomics because iterations read them on the worker thread while control
//! calls flip them from other threads. Every launch, pause, resume and reset bumps a generation
//! counter; an iteration from an older generation never reschedules, so at most one iteration
//! chain exists at any time.
//!
//! The drawer is taken out of its slot for the duration of a cycle. `reset` waits for an in-flight
//! cycle, except when it is called from that very cycle (a draw callback stopping the session).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crate::drawer::FrameDrawer;
use crate::escalation::SurfaceErrorCode;
use crate::foundation::core::PacingInterval;
use crate::foundation::error::{RecorderError, RecorderResult};
use crate::foundation::lock;
use crate::publish::{PublicationOutcome, run_once};
use crate::surface::DrawableSurface;
use crate::worker::{TaskToken, WorkerHandle};

/// Called on the worker thread when an iteration fails: `(generation, code)`.
pub type FailureHook = Box<dyn Fn(u64, SurfaceErrorCode) + Send + Sync>;

/// Observable scheduler state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacerState {
    Stopped,
    Running,
    Paused,
}

/// Counters for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacerStats {
    /// Iterations that ran the publication protocol.
    pub iterations: u64,
    /// Iterations that published successfully.
    pub published: u64,
    /// Dispatched iterations that found the pacer no longer recording.
    pub skipped: u64,
}

pub struct FramePacer {
    core: Arc<PacerCore>,
}

struct PacerCore {
    started: AtomicBool,
    paused: AtomicBool,
    generation: AtomicU64,
    interval_ms: AtomicU64,
    token: TaskToken,

    // Serializes "enqueue the next iteration" against pause/reset cancellation.
    schedule: Mutex<()>,
    worker: Mutex<Option<WorkerHandle>>,
    // Held for a whole acquire/draw/publish cycle.
    cycle: Mutex<()>,
    cycle_thread: Mutex<Option<ThreadId>>,
    drawer: Mutex<Option<Box<dyn FrameDrawer>>>,
    // Bumped whenever the drawer slot is replaced or cleared.
    drawer_epoch: AtomicU64,
    surface: Mutex<Option<Arc<dyn DrawableSurface>>>,

    on_failure: FailureHook,

    iterations: AtomicU64,
    published: AtomicU64,
    skipped: AtomicU64,
}

impl FramePacer {
    pub fn new(on_failure: FailureHook) -> Self {
        Self {
            core: Arc::new(PacerCore {
                started: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                interval_ms: AtomicU64::new(PacingInterval::DEFAULT_MS),
                token: TaskToken::next(),
                schedule: Mutex::new(()),
                worker: Mutex::new(None),
                cycle: Mutex::new(()),
                cycle_thread: Mutex::new(None),
                drawer: Mutex::new(None),
                drawer_epoch: AtomicU64::new(0),
                surface: Mutex::new(None),
                on_failure,
                iterations: AtomicU64::new(0),
                published: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> PacerState {
        match (
            self.core.started.load(Ordering::Acquire),
            self.core.paused.load(Ordering::Acquire),
        ) {
            (false, _) => PacerState::Stopped,
            (true, false) => PacerState::Running,
            (true, true) => PacerState::Paused,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.core.is_recording()
    }

    /// Current launch generation. Failure hooks compare against it to detect stale failures.
    pub fn generation(&self) -> u64 {
        self.core.generation.load(Ordering::Acquire)
    }

    /// Return `true` if `generation` is the live, recording generation.
    pub fn is_current(&self, generation: u64) -> bool {
        self.core.is_current(generation)
    }

    pub fn interval(&self) -> PacingInterval {
        self.core.interval()
    }

    pub fn set_interval(&self, interval: PacingInterval) {
        self.core
            .interval_ms
            .store(interval.as_millis(), Ordering::Release);
    }

    pub fn set_drawer(&self, drawer: Option<Box<dyn FrameDrawer>>) {
        let previous = {
            let mut slot = lock(&self.core.drawer);
            self.core.drawer_epoch.fetch_add(1, Ordering::AcqRel);
            std::mem::replace(&mut *slot, drawer)
        };
        drop(previous);
    }

    pub fn has_drawer(&self) -> bool {
        lock(&self.core.drawer).is_some()
    }

    pub fn set_worker(&self, worker: Option<WorkerHandle>) {
        *lock(&self.core.worker) = worker;
    }

    pub fn worker(&self) -> Option<WorkerHandle> {
        lock(&self.core.worker).clone()
    }

    pub fn stats(&self) -> PacerStats {
        PacerStats {
            iterations: self.core.iterations.load(Ordering::Relaxed),
            published: self.core.published.load(Ordering::Relaxed),
            skipped: self.core.skipped.load(Ordering::Relaxed),
        }
    }

    /// Start pacing frames into `surface`; the first iteration is enqueued immediately.
    pub fn launch(&self, surface: Arc<dyn DrawableSurface>) -> RecorderResult<()> {
        let core = &self.core;
        let _guard = lock(&core.schedule);

        let worker = lock(&core.worker)
            .clone()
            .ok_or_else(|| RecorderError::invalid_state("worker is not set"))?;
        if !worker.is_alive() {
            return Err(RecorderError::invalid_state("worker has quit"));
        }
        if !self.has_drawer() {
            return Err(RecorderError::invalid_state("frame drawer is not set"));
        }
        if core
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RecorderError::invalid_state("frame pacer is already running"));
        }

        *lock(&core.surface) = Some(surface);
        core.paused.store(false, Ordering::Release);
        let generation = core.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(
            generation,
            interval_ms = core.interval().as_millis(),
            worker = worker.name(),
            "frame pacer launched"
        );
        core.enqueue(&worker, generation, Duration::ZERO);
        Ok(())
    }

    /// Cancel the pending iteration and hold off until [`FramePacer::resume`].
    ///
    /// An iteration already running on the worker finishes but does not reschedule.
    pub fn pause(&self) {
        let core = &self.core;
        let _guard = lock(&core.schedule);
        if !core.started.load(Ordering::Acquire) {
            return;
        }
        if core
            .paused
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        core.generation.fetch_add(1, Ordering::AcqRel);
        core.cancel_pending();
        tracing::debug!("frame pacer paused");
    }

    /// Enqueue a fresh iteration immediately. No-op unless paused.
    pub fn resume(&self) {
        let core = &self.core;
        let _guard = lock(&core.schedule);
        if !core.started.load(Ordering::Acquire) {
            return;
        }
        if core
            .paused
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let generation = core.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(worker) = lock(&core.worker).clone() {
            core.enqueue(&worker, generation, Duration::ZERO);
        }
        tracing::debug!(generation, "frame pacer resumed");
    }

    /// Stop pacing and clear all volatile configuration.
    ///
    /// Waits for an in-flight draw to finish before dropping the drawer, unless called from inside
    /// that draw.
    pub fn reset(&self) {
        let core = &self.core;
        {
            let _guard = lock(&core.schedule);
            let _ = core
                .started
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire);
            let _ = core
                .paused
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire);
            core.generation.fetch_add(1, Ordering::AcqRel);
            core.cancel_pending();
            *lock(&core.worker) = None;
        }
        core.interval_ms
            .store(PacingInterval::DEFAULT_MS, Ordering::Release);

        let in_cycle = *lock(&core.cycle_thread) == Some(std::thread::current().id());
        let _cycle = (!in_cycle).then(|| lock(&core.cycle));
        *lock(&core.surface) = None;
        let drawer = {
            let mut slot = lock(&core.drawer);
            core.drawer_epoch.fetch_add(1, Ordering::AcqRel);
            slot.take()
        };
        drop(drawer);
    }
}

impl Drop for FramePacer {
    fn drop(&mut self) {
        let _guard = lock(&self.core.schedule);
        self.core.started.store(false, Ordering::Release);
        self.core.cancel_pending();
    }
}

impl PacerCore {
    fn is_recording(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.paused.load(Ordering::Acquire)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_recording() && self.generation.load(Ordering::Acquire) == generation
    }

    fn interval(&self) -> PacingInterval {
        PacingInterval::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    fn cancel_pending(&self) {
        if let Some(worker) = lock(&self.worker).as_ref() {
            worker.remove(self.token);
        }
    }

    /// Post the iteration for `generation`. Callers hold the schedule lock.
    fn enqueue(self: &Arc<Self>, worker: &WorkerHandle, generation: u64, delay: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let posted = worker.post_delayed(self.token, delay, move || {
            if let Some(core) = weak.upgrade() {
                core.iterate(generation);
            }
        });
        if !posted {
            tracing::warn!(generation, "worker has quit, frame pacing ends");
        }
    }

    fn reschedule(self: &Arc<Self>, generation: u64, delay: Duration) {
        let _guard = lock(&self.schedule);
        if !self.is_current(generation) {
            return;
        }
        let Some(worker) = lock(&self.worker).clone() else {
            return;
        };
        self.enqueue(&worker, generation, delay);
    }

    fn iterate(self: &Arc<Self>, generation: u64) {
        if !self.is_current(generation) {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let t0 = Instant::now();
        let Some(outcome) = self.publish_once() else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        // Stopped or paused while drawing: the result is stale.
        if !self.is_current(generation) {
            return;
        }

        match outcome {
            PublicationOutcome::Success => {
                self.published.fetch_add(1, Ordering::Relaxed);
                let next = t0 + self.interval().as_duration();
                let delay = next.saturating_duration_since(Instant::now());
                tracing::trace!(generation, delay_us = delay.as_micros() as u64, "frame published");
                self.reschedule(generation, delay);
            }
            PublicationOutcome::Failure(phase) => {
                (self.on_failure)(generation, SurfaceErrorCode::from(phase));
            }
        }
    }

    fn publish_once(&self) -> Option<PublicationOutcome> {
        let _cycle = lock(&self.cycle);
        let surface = lock(&self.surface).clone()?;
        let (mut drawer, epoch) = {
            let mut slot = lock(&self.drawer);
            (slot.take()?, self.drawer_epoch.load(Ordering::Acquire))
        };

        *lock(&self.cycle_thread) = Some(std::thread::current().id());
        self.iterations.fetch_add(1, Ordering::Relaxed);
        let outcome = run_once(surface.as_ref(), drawer.as_mut());
        *lock(&self.cycle_thread) = None;

        // Hand the drawer back unless it was replaced or cleared during the cycle.
        let stale = {
            let mut slot = lock(&self.drawer);
            if slot.is_none() && self.drawer_epoch.load(Ordering::Acquire) == epoch {
                *slot = Some(drawer);
                None
            } else {
                Some(drawer)
            }
        };
        drop(stale);
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::Canvas;
    use crate::surface::{DrawBuffer, SurfaceError};
    use crate::worker::Worker;
    use std::sync::mpsc;

    struct Surface {
        fail_acquire: bool,
    }

    impl DrawableSurface for Surface {
        fn acquire(&self) -> Result<DrawBuffer, SurfaceError> {
            if self.fail_acquire {
                return Err(SurfaceError::Released);
            }
            Ok(DrawBuffer::new(Canvas::new(1, 1)).unwrap())
        }

        fn publish(&self, _buffer: DrawBuffer) -> Result<(), SurfaceError> {
            Ok(())
        }
    }

    fn ticking_drawer(tx: mpsc::Sender<Instant>) -> Box<dyn FrameDrawer> {
        Box::new(move |_: &mut DrawBuffer| {
            let _ = tx.send(Instant::now());
        })
    }

    fn no_failure() -> FailureHook {
        Box::new(|_, _| panic!("unexpected surface failure"))
    }

    #[test]
    fn launch_requires_worker_and_drawer() {
        let pacer = FramePacer::new(no_failure());
        let surface: Arc<dyn DrawableSurface> = Arc::new(Surface { fail_acquire: false });

        let err = pacer.launch(surface.clone()).unwrap_err();
        assert!(err.is_invalid_state());

        let worker = Worker::spawn("pacer-preconditions").unwrap();
        pacer.set_worker(Some(worker.handle()));
        assert!(pacer.launch(surface.clone()).unwrap_err().is_invalid_state());

        let (tx, _rx) = mpsc::channel();
        pacer.set_drawer(Some(ticking_drawer(tx)));
        pacer.launch(surface.clone()).unwrap();
        assert_eq!(pacer.state(), PacerState::Running);
        assert!(pacer.launch(surface).unwrap_err().is_invalid_state());
        pacer.reset();
    }

    #[test]
    fn iterations_follow_the_pacing_interval() {
        let worker = Worker::spawn("pacer-interval").unwrap();
        let pacer = FramePacer::new(no_failure());
        let (tx, rx) = mpsc::channel();
        pacer.set_worker(Some(worker.handle()));
        pacer.set_drawer(Some(ticking_drawer(tx)));
        pacer.set_interval(PacingInterval::from_frame_rate(20).unwrap());

        let launched = Instant::now();
        pacer.launch(Arc::new(Surface { fail_acquire: false })).unwrap();
        let ticks: Vec<Instant> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        pacer.reset();

        assert!(ticks[0].duration_since(launched) < Duration::from_millis(50));
        for pair in ticks.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(45));
        }
        assert!(pacer.stats().published >= 3);
    }

    #[test]
    fn pause_cancels_and_resume_restarts_immediately() {
        let worker = Worker::spawn("pacer-pause").unwrap();
        let pacer = FramePacer::new(no_failure());
        let (tx, rx) = mpsc::channel();
        pacer.set_worker(Some(worker.handle()));
        pacer.set_drawer(Some(ticking_drawer(tx)));
        // 1 fps: the next regular tick is a full second away.
        pacer.set_interval(PacingInterval::from_frame_rate(1).unwrap());

        pacer.launch(Arc::new(Surface { fail_acquire: false })).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        pacer.pause();
        assert_eq!(pacer.state(), PacerState::Paused);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        let resumed = Instant::now();
        pacer.resume();
        let tick = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(tick.duration_since(resumed) < Duration::from_millis(500));
        pacer.reset();
        assert_eq!(pacer.state(), PacerState::Stopped);
    }

    #[test]
    fn failure_is_reported_once_and_stops_the_chain() {
        let worker = Worker::spawn("pacer-failure").unwrap();
        let (tx, rx) = mpsc::channel();
        let pacer = FramePacer::new(Box::new(move |generation, code| {
            tx.send((generation, code)).unwrap();
        }));
        let (draw_tx, draw_rx) = mpsc::channel();
        pacer.set_worker(Some(worker.handle()));
        pacer.set_drawer(Some(ticking_drawer(draw_tx)));
        pacer.set_interval(PacingInterval::from_frame_rate(100).unwrap());

        pacer.launch(Arc::new(Surface { fail_acquire: true })).unwrap();
        let (generation, code) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(generation, pacer.generation());
        assert_eq!(code, SurfaceErrorCode::AcquireFailed);

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(draw_rx.try_recv().is_err());
        assert_eq!(pacer.stats().published, 0);
    }

    #[test]
    fn reset_from_inside_the_draw_callback_returns() {
        let worker = Worker::spawn("pacer-self-reset").unwrap();
        let pacer = Arc::new(FramePacer::new(no_failure()));
        let (tx, rx) = mpsc::channel();
        let weak = Arc::downgrade(&pacer);
        pacer.set_worker(Some(worker.handle()));
        pacer.set_drawer(Some(Box::new(move |_: &mut DrawBuffer| {
            if let Some(pacer) = weak.upgrade() {
                pacer.reset();
            }
            let _ = tx.send(());
        })));
        pacer.set_interval(PacingInterval::from_frame_rate(100).unwrap());

        pacer.launch(Arc::new(Surface { fail_acquire: false })).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // The drawer (and its sender) is dropped once the cycle ends; nothing else is drawn.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(pacer.state(), PacerState::Stopped);
        assert!(!pacer.has_drawer());
        assert_eq!(pacer.stats().iterations, 1);
    }

    #[test]
    fn reset_restores_default_interval_and_clears_bindings() {
        let worker = Worker::spawn("pacer-reset").unwrap();
        let pacer = FramePacer::new(no_failure());
        let (tx, _rx) = mpsc::channel();
        pacer.set_worker(Some(worker.handle()));
        pacer.set_drawer(Some(ticking_drawer(tx)));
        pacer.set_interval(PacingInterval::from_frame_rate(60).unwrap());

        pacer.reset();
        assert_eq!(pacer.interval(), PacingInterval::default());
        assert!(pacer.worker().is_none());
        assert!(!pacer.has_drawer());
        assert_eq!(pacer.state(), PacerState::Stopped);
    }
}
