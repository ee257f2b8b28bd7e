use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use canvas_recorder::{
    Canvas, ErrorHandler, ErrorSignal, FfmpegSink, FfmpegSinkOpts, FrameSink, ImageContent,
    PngSequenceSink, RecorderConfig, SinkEngine, VideoSource, ViewRecorder, Worker,
};

#[derive(Parser, Debug)]
#[command(name = "canvas-recorder", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the transform that fits a source size into a destination size.
    Fit(FitArgs),
    /// Record an image, fitted into the video frame, for a number of seconds.
    Record(RecordArgs),
}

#[derive(Parser, Debug)]
struct FitArgs {
    /// Source size, `WxH`.
    #[arg(long)]
    src: Canvas,

    /// Destination size, `WxH`.
    #[arg(long)]
    dst: Canvas,
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Image to record (any format the `image` crate decodes).
    #[arg(long)]
    image: PathBuf,

    /// Output MP4 path (requires `ffmpeg` on PATH).
    #[arg(long, conflicts_with = "png_dir", required_unless_present = "png_dir")]
    out: Option<PathBuf>,

    /// Write one PNG per frame into this directory instead of an MP4.
    #[arg(long)]
    png_dir: Option<PathBuf>,

    /// Recorder config JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frame rate, overrides the config.
    #[arg(long)]
    fps: Option<u32>,

    /// Video width, overrides the config (defaults to the image width).
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Video height, overrides the config (defaults to the image height).
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Recording duration.
    #[arg(long, default_value_t = 3.0)]
    seconds: f64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Fit(args) => cmd_fit(args),
        Command::Record(args) => cmd_record(args),
    }
}

fn cmd_fit(args: FitArgs) -> anyhow::Result<()> {
    let Some(fit) = canvas_recorder::fit_transform(args.src, args.dst) else {
        anyhow::bail!("source size {} is degenerate, nothing to draw", args.src);
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&fit).context("serialize fit transform")?
    );
    Ok(())
}

fn cmd_record(args: RecordArgs) -> anyhow::Result<()> {
    if args.seconds <= 0.0 {
        anyhow::bail!("--seconds must be a positive number");
    }
    let duration = Duration::try_from_secs_f64(args.seconds)
        .with_context(|| format!("--seconds {} is out of range", args.seconds))?;
    if args.out.is_some() && !canvas_recorder::is_ffmpeg_on_path() {
        anyhow::bail!("ffmpeg was not found on PATH, use --png-dir instead");
    }

    let mut cfg = match &args.config {
        Some(path) => RecorderConfig::from_json_file(path)?,
        None => RecorderConfig {
            video_source: VideoSource::Surface,
            frame_rate: Some(30),
            ..RecorderConfig::default()
        },
    };
    if let Some(fps) = args.fps {
        cfg.frame_rate = Some(fps);
    }

    let content = Arc::new(ImageContent::open(&args.image)?);
    let size = match (args.width, args.height) {
        (Some(w), Some(h)) => Canvas::new(w, h),
        _ => cfg.video_size.unwrap_or_else(|| even_size(content.size())),
    };
    // The recorder tracks the size itself.
    cfg.video_size = None;
    cfg.validate()?;

    let sink: Box<dyn FrameSink> = match (&args.out, &args.png_dir) {
        (Some(out), _) => Box::new(FfmpegSink::new(FfmpegSinkOpts::new(out))),
        (None, Some(dir)) => Box::new(PngSequenceSink::new(dir)),
        (None, None) => anyhow::bail!("either --out or --png-dir is required"),
    };

    let worker = Worker::spawn("canvas-recorder-draw")?;
    let recorder = ViewRecorder::new(Box::new(SinkEngine::new(sink)), worker.handle());

    let (err_tx, err_rx) = mpsc::channel::<ErrorSignal>();
    let handler: ErrorHandler = Arc::new(move |signal: ErrorSignal| {
        let _ = err_tx.send(signal);
    });
    recorder.set_error_handler(Some(handler));

    cfg.apply(recorder.session())?;
    recorder.set_video_size(size)?;
    recorder.set_recorded_content(content);
    recorder.prepare()?;
    recorder.start()?;
    tracing::info!(size = %size, seconds = args.seconds, "recording");

    if let Ok(signal) = err_rx.recv_timeout(duration) {
        recorder.release();
        anyhow::bail!(
            "recording failed (category {}, code {})",
            signal.category,
            signal.code
        );
    }

    let frames = recorder.session().stats().published;
    recorder.stop()?;
    recorder.release();
    worker.quit();

    match (&args.out, &args.png_dir) {
        (Some(out), _) => eprintln!("wrote {} ({frames} frames)", out.display()),
        (None, Some(dir)) => eprintln!("wrote {frames} frames to {}", dir.display()),
        (None, None) => {}
    }
    Ok(())
}

/// Round down to even dimensions, as yuv420p output requires.
fn even_size(size: Canvas) -> Canvas {
    Canvas::new((size.width & !1).max(2), (size.height & !1).max(2))
}
