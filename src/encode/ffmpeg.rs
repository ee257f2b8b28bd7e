use std::ffi::OsString;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::error::{RecorderError, RecorderResult};
use crate::surface::FrameRGBA;

/// Options for [`FfmpegSink`] MP4 output.
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    pub out_path: PathBuf,
    /// Replace an existing output file instead of failing in `begin`.
    pub overwrite: bool,
    /// Opaque color translucent pixels are flattened onto.
    pub background: [u8; 3],
}

impl FfmpegSinkOpts {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            overwrite: true,
            background: [0, 0, 0],
        }
    }
}

/// Sink that pipes raw RGBA frames into a system `ffmpeg` producing H.264 MP4.
///
/// Each pushed frame becomes one video frame at [`SinkConfig::fps`], regardless of when it was
/// pushed.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,
    encoder: Option<Encoder>,
    frames: u64,
}

/// One running ffmpeg process plus its per-recording state.
struct Encoder {
    cfg: SinkConfig,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    opaque: Vec<u8>,
}

impl FfmpegSink {
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            encoder: None,
            frames: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

/// yuv420p needs non-zero even dimensions.
fn check_encodable(cfg: &SinkConfig) -> RecorderResult<()> {
    if cfg.fps == 0 {
        return Err(RecorderError::validation("fps must be non-zero"));
    }
    if cfg.width == 0 || cfg.height == 0 {
        return Err(RecorderError::validation(format!(
            "cannot encode a {}x{} video",
            cfg.width, cfg.height
        )));
    }
    if !cfg.width.is_multiple_of(2) || !cfg.height.is_multiple_of(2) {
        return Err(RecorderError::validation(format!(
            "video size {}x{} must be even for yuv420p output",
            cfg.width, cfg.height
        )));
    }
    Ok(())
}

/// Command-line arguments for one recording, output path last.
fn encoder_args(opts: &FfmpegSinkOpts, cfg: &SinkConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |a: &str| args.push(a.into());

    push(if opts.overwrite { "-y" } else { "-n" });
    push("-hide_banner");
    for a in ["-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgba"] {
        push(a);
    }
    push("-video_size");
    push(format!("{}x{}", cfg.width, cfg.height).as_str());
    // Input options go before `-i`.
    push("-framerate");
    push(cfg.fps.to_string().as_str());
    for a in ["-i", "-", "-an", "-c:v", "libx264", "-pix_fmt", "yuv420p"] {
        push(a);
    }
    if let Some(bitrate) = cfg.bitrate {
        push("-b:v");
        push(bitrate.to_string().as_str());
    }
    push("-movflags");
    push("+faststart");
    args.push(opts.out_path.as_os_str().to_owned());
    args
}

impl Encoder {
    fn spawn(opts: &FfmpegSinkOpts, cfg: SinkConfig) -> RecorderResult<Self> {
        let mut child = Command::new("ffmpeg")
            .args(encoder_args(opts, &cfg))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RecorderError::engine(format!("could not start ffmpeg: {e}")))?;

        let (Some(stdin), Some(mut stderr)) = (child.stdin.take(), child.stderr.take()) else {
            let _ = child.kill();
            return Err(RecorderError::engine("ffmpeg started without piped stdio"));
        };
        // ffmpeg blocks once its stderr pipe fills up, so keep it drained.
        let stderr = std::thread::spawn(move || -> std::io::Result<Vec<u8>> {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf)?;
            Ok(buf)
        });

        let opaque = vec![0u8; cfg.width as usize * cfg.height as usize * 4];
        Ok(Self {
            cfg,
            child,
            stdin: Some(stdin),
            stderr: Some(stderr),
            opaque,
        })
    }

    fn write(&mut self, frame: &FrameRGBA, background: [u8; 3]) -> RecorderResult<()> {
        if (frame.width, frame.height) != (self.cfg.width, self.cfg.height) {
            return Err(RecorderError::validation(format!(
                "frame is {}x{} but the recording is {}x{}",
                frame.width, frame.height, self.cfg.width, self.cfg.height
            )));
        }
        flatten_to_opaque_rgba8(&mut self.opaque, &frame.data, frame.premultiplied, background)?;

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RecorderError::invalid_state("ffmpeg input is already closed"))?;
        stdin
            .write_all(&self.opaque)
            .map_err(|e| RecorderError::engine(format!("ffmpeg stopped accepting frames: {e}")))
    }

    /// Close the input and wait for ffmpeg to write the file.
    fn finish(mut self) -> RecorderResult<()> {
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .map_err(|e| RecorderError::engine(format!("waiting for ffmpeg failed: {e}")))?;
        let stderr = match self.stderr.take().map(JoinHandle::join) {
            Some(Ok(Ok(bytes))) => String::from_utf8_lossy(&bytes).trim().to_string(),
            Some(Ok(Err(e))) => format!("<stderr unreadable: {e}>"),
            Some(Err(_)) => "<stderr reader panicked>".to_string(),
            None => String::new(),
        };
        if !status.success() {
            return Err(RecorderError::engine(format!("ffmpeg failed ({status}): {stderr}")));
        }
        if !stderr.is_empty() {
            tracing::warn!(stderr = %stderr, "ffmpeg reported errors but exited cleanly");
        }
        Ok(())
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> RecorderResult<()> {
        if self.encoder.is_some() {
            return Err(RecorderError::invalid_state("ffmpeg sink already started"));
        }
        check_encodable(&cfg)?;

        let out = &self.opts.out_path;
        ensure_parent_dir(out)?;
        if !self.opts.overwrite && out.exists() {
            return Err(RecorderError::validation(format!(
                "refusing to overwrite '{}'",
                out.display()
            )));
        }
        if !is_ffmpeg_on_path() {
            return Err(RecorderError::engine("ffmpeg was not found on PATH"));
        }

        self.encoder = Some(Encoder::spawn(&self.opts, cfg)?);
        self.frames = 0;
        tracing::info!(
            out = %out.display(),
            width = cfg.width,
            height = cfg.height,
            fps = cfg.fps,
            bitrate = ?cfg.bitrate,
            "ffmpeg sink started"
        );
        Ok(())
    }

    fn push_frame(&mut self, frame: &FrameRGBA) -> RecorderResult<()> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| RecorderError::invalid_state("ffmpeg sink not started"))?;
        encoder.write(frame, self.opts.background)?;
        self.frames += 1;
        Ok(())
    }

    fn end(&mut self) -> RecorderResult<()> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        encoder.finish()?;
        tracing::info!(frames = self.frames, out = %self.opts.out_path.display(), "ffmpeg sink finished");
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if let Err(err) = self.end() {
            tracing::warn!(error = %err, "ffmpeg sink dropped with a failing encoder");
        }
    }
}

/// Composite RGBA8 pixels over an opaque `background`, writing opaque RGBA8 into `dst`.
pub(crate) fn flatten_to_opaque_rgba8(
    dst: &mut [u8],
    src: &[u8],
    premultiplied: bool,
    background: [u8; 3],
) -> RecorderResult<()> {
    if dst.len() != src.len() || !src.len().is_multiple_of(4) {
        return Err(RecorderError::validation(format!(
            "cannot flatten {} bytes of rgba8 into {} bytes",
            src.len(),
            dst.len()
        )));
    }

    for (out, px) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let alpha = px[3];
        if alpha == u8::MAX {
            out.copy_from_slice(px);
            continue;
        }
        let cover = u8::MAX - alpha;
        for c in 0..3 {
            let fg = if premultiplied {
                u16::from(px[c])
            } else {
                scale(px[c], alpha)
            };
            out[c] = (fg + scale(background[c], cover)).min(255) as u8;
        }
        out[3] = u8::MAX;
    }
    Ok(())
}

/// `v * a / 255`, rounded.
fn scale(v: u8, a: u8) -> u16 {
    ((u32::from(v) * u32::from(a) + 127) / 255) as u16
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> RecorderResult<()> {
    use anyhow::Context as _;

    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    Ok(())
}

/// Return `true` when `ffmpeg -version` runs successfully from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}
