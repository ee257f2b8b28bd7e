mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use canvas_recorder::{
    Canvas, DrawBuffer, LifecycleState, PacingInterval, RecordingMode, Session, VideoSource,
    Worker,
};
use support::{CallLog, FakeEngine, ScriptedSurface, WAIT};

fn fake_session(log: &CallLog) -> (Session, Arc<ScriptedSurface>) {
    let surface = ScriptedSurface::healthy(Canvas::new(4, 4));
    let session = Session::new(Box::new(FakeEngine::new(log.clone(), surface.clone())));
    (session, surface)
}

fn ticking(tx: mpsc::Sender<Instant>) -> Box<dyn canvas_recorder::FrameDrawer> {
    Box::new(move |_: &mut DrawBuffer| {
        let _ = tx.send(Instant::now());
    })
}

#[test]
fn externally_driven_session_only_delegates() {
    let log = CallLog::default();
    let (session, surface) = fake_session(&log);
    let worker = Worker::spawn("external").unwrap();
    let (tx, rx) = mpsc::channel();

    session.set_video_source(VideoSource::Camera).unwrap();
    assert_eq!(session.mode(), RecordingMode::ExternallyDriven);
    session.configure(30, ticking(tx), worker.handle()).unwrap();
    session.prepare().unwrap();
    session.start().unwrap();
    assert_eq!(session.state(), LifecycleState::Recording);

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    session.pause().unwrap();
    assert_eq!(session.state(), LifecycleState::Paused);
    session.resume().unwrap();
    session.stop().unwrap();

    assert_eq!(surface.published(), 0);
    assert_eq!(
        log.calls(),
        vec![
            "set_video_source Camera",
            "set_video_frame_rate 30",
            "prepare",
            "start",
            "pause",
            "resume",
            "stop",
        ]
    );
}

#[test]
fn input_surface_switches_to_externally_driven() {
    let log = CallLog::default();
    let (session, surface) = fake_session(&log);
    session.set_video_source(VideoSource::Surface).unwrap();
    assert!(session.is_surface_driven());

    session.set_input_surface(surface).unwrap();
    assert_eq!(session.mode(), RecordingMode::ExternallyDriven);

    // No worker or drawer needed when the host produces frames.
    session.start().unwrap();
    session.stop().unwrap();
    assert_eq!(log.count("start"), 1);
}

#[test]
fn surface_driven_start_checks_worker_and_drawer_before_engine() {
    let log = CallLog::default();
    let (session, _surface) = fake_session(&log);
    session.set_video_source(VideoSource::Surface).unwrap();

    assert!(session.start().unwrap_err().is_invalid_state());

    let worker = Worker::spawn("quit-early").unwrap();
    let handle = worker.handle();
    worker.quit();
    session.set_worker(handle).unwrap();
    session
        .set_frame_drawer(Box::new(|_: &mut DrawBuffer| {}))
        .unwrap();
    assert!(session.start().unwrap_err().is_invalid_state());

    assert_eq!(log.count("start"), 0);
}

#[test]
fn pause_stops_frames_and_resume_restarts_immediately() {
    let log = CallLog::default();
    let (session, _surface) = fake_session(&log);
    let worker = Worker::spawn("pause-resume").unwrap();
    let (tx, rx) = mpsc::channel();

    session.set_video_source(VideoSource::Surface).unwrap();
    // 2 fps: the next regular frame is 500 ms away.
    session.configure(2, ticking(tx), worker.handle()).unwrap();
    session.start().unwrap();
    rx.recv_timeout(WAIT).unwrap();

    session.pause().unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(700)).is_err());

    let resumed = Instant::now();
    session.resume().unwrap();
    let tick = rx.recv_timeout(WAIT).unwrap();
    assert!(tick.duration_since(resumed) < Duration::from_millis(400));

    session.stop().unwrap();
    let calls = log.calls();
    let pause = calls.iter().position(|c| c == "pause").unwrap();
    let resume = calls.iter().position(|c| c == "resume").unwrap();
    assert!(pause < resume);
}

#[test]
fn stop_clears_volatile_configuration() {
    let log = CallLog::default();
    let (session, surface) = fake_session(&log);
    let worker = Worker::spawn("stop-clears").unwrap();
    let (tx, rx) = mpsc::channel();

    session.set_video_source(VideoSource::Surface).unwrap();
    session.configure(60, ticking(tx), worker.handle()).unwrap();
    assert_eq!(session.pacing_interval().as_millis(), 17);
    session.start().unwrap();
    rx.recv_timeout(WAIT).unwrap();

    session.stop().unwrap();
    assert_eq!(session.state(), LifecycleState::Stopped);
    assert_eq!(session.pacing_interval(), PacingInterval::default());

    // Nothing is drawn once stop has returned.
    let published = surface.published();
    while rx.try_recv().is_ok() {}
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(surface.published(), published);

    // Drawer and worker are gone: a new start needs a fresh configure.
    session.set_video_source(VideoSource::Surface).unwrap();
    assert!(session.start().unwrap_err().is_invalid_state());
}

#[test]
fn reset_from_idle_stays_idle() {
    let log = CallLog::default();
    let (session, _surface) = fake_session(&log);
    session.reset().unwrap();
    assert_eq!(session.state(), LifecycleState::Idle);
    assert_eq!(log.calls(), vec!["reset"]);
}

#[test]
fn configure_is_allowed_again_after_stop() {
    let log = CallLog::default();
    let (session, _surface) = fake_session(&log);
    let worker = Worker::spawn("reuse").unwrap();
    let (tx, rx) = mpsc::channel();

    session.set_video_source(VideoSource::Surface).unwrap();
    session
        .configure(20, ticking(tx.clone()), worker.handle())
        .unwrap();
    session.start().unwrap();
    rx.recv_timeout(WAIT).unwrap();
    session.stop().unwrap();

    session.set_video_source(VideoSource::Surface).unwrap();
    session.configure(20, ticking(tx), worker.handle()).unwrap();
    assert_eq!(session.state(), LifecycleState::Armed);
    session.start().unwrap();
    rx.recv_timeout(WAIT).unwrap();
    session.stop().unwrap();
    assert_eq!(log.count("start"), 2);
}

#[test]
fn session_clones_share_state_across_threads() {
    let log = CallLog::default();
    let (session, _surface) = fake_session(&log);
    let worker = Worker::spawn("clones").unwrap();
    let (tx, rx) = mpsc::channel();

    session.set_video_source(VideoSource::Surface).unwrap();
    session.configure(50, ticking(tx), worker.handle()).unwrap();
    session.start().unwrap();
    rx.recv_timeout(WAIT).unwrap();

    let other = session.clone();
    std::thread::spawn(move || other.stop().unwrap())
        .join()
        .unwrap();
    assert_eq!(session.state(), LifecycleState::Stopped);
}

#[test]
fn draw_callback_may_stop_its_own_session() {
    let log = CallLog::default();
    let (session, surface) = fake_session(&log);
    let worker = Worker::spawn("stop-from-draw").unwrap();
    let (tx, rx) = mpsc::channel();

    let inner = session.clone();
    session.set_video_source(VideoSource::Surface).unwrap();
    session
        .configure(
            50,
            Box::new(move |_: &mut DrawBuffer| {
                let _ = tx.send(inner.stop().is_ok());
            }),
            worker.handle(),
        )
        .unwrap();
    session.start().unwrap();

    assert!(rx.recv_timeout(WAIT).unwrap());
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(session.state(), LifecycleState::Stopped);
    assert_eq!(log.count("stop"), 1);
    assert_eq!(surface.published(), 1);
    assert_eq!(session.stats().iterations, 1);
}

#[test]
fn pause_during_a_draw_lets_that_frame_finish_and_schedules_no_more() {
    let log = CallLog::default();
    let (session, surface) = fake_session(&log);
    let worker = Worker::spawn("pause-mid-draw").unwrap();
    let draws = Arc::new(AtomicU32::new(0));
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let d = draws.clone();
    session.set_video_source(VideoSource::Surface).unwrap();
    session
        .configure(
            50,
            Box::new(move |_: &mut DrawBuffer| {
                d.fetch_add(1, Ordering::SeqCst);
                let _ = entered_tx.send(());
                let _ = release_rx.recv_timeout(WAIT);
            }),
            worker.handle(),
        )
        .unwrap();
    session.start().unwrap();

    entered_rx.recv_timeout(WAIT).unwrap();
    session.pause().unwrap();
    release_tx.send(()).unwrap();

    assert!(entered_rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(draws.load(Ordering::SeqCst), 1);
    assert_eq!(surface.published(), 1);
    assert_eq!(session.state(), LifecycleState::Paused);
    assert_eq!(session.stats().published, 0);

    session.stop().unwrap();
}
