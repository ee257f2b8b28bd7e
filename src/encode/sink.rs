use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::foundation::error::{RecorderError, RecorderResult};
use crate::foundation::lock;
use crate::surface::FrameRGBA;

/// Configuration provided to a [`FrameSink`] when a recording is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkConfig {
    pub width: u32,
    pub height: u32,
    /// Nominal frames per second.
    pub fps: u32,
    /// Target video bitrate in bits per second, if configured.
    pub bitrate: Option<u32>,
}

/// Consumer of published frames, in publication order.
pub trait FrameSink: Send {
    fn begin(&mut self, cfg: SinkConfig) -> RecorderResult<()>;
    fn push_frame(&mut self, frame: &FrameRGBA) -> RecorderResult<()>;
    fn end(&mut self) -> RecorderResult<()>;
}

/// Shared view of the frames collected by an [`InMemorySink`].
#[derive(Clone, Debug, Default)]
pub struct FrameLog {
    frames: Arc<Mutex<Vec<FrameRGBA>>>,
    config: Arc<Mutex<Option<SinkConfig>>>,
    ended: Arc<Mutex<u32>>,
}

impl FrameLog {
    pub fn len(&self) -> usize {
        lock(&self.frames).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frames(&self) -> Vec<FrameRGBA> {
        lock(&self.frames).clone()
    }

    pub fn last(&self) -> Option<FrameRGBA> {
        lock(&self.frames).last().cloned()
    }

    pub fn config(&self) -> Option<SinkConfig> {
        *lock(&self.config)
    }

    /// How many times the sink was finalized.
    pub fn ended(&self) -> u32 {
        *lock(&self.ended)
    }
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    log: FrameLog,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that keeps observing frames after the sink moves into an engine.
    pub fn log(&self) -> FrameLog {
        self.log.clone()
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> RecorderResult<()> {
        *lock(&self.log.config) = Some(cfg);
        lock(&self.log.frames).clear();
        Ok(())
    }

    fn push_frame(&mut self, frame: &FrameRGBA) -> RecorderResult<()> {
        lock(&self.log.frames).push(frame.clone());
        Ok(())
    }

    fn end(&mut self) -> RecorderResult<()> {
        *lock(&self.log.ended) += 1;
        Ok(())
    }
}

/// Writes every frame as `frame_NNNNNN.png` into a directory.
#[derive(Debug)]
pub struct PngSequenceSink {
    dir: PathBuf,
    background: [u8; 3],
    next_index: u64,
    cfg: Option<SinkConfig>,
    scratch: Vec<u8>,
}

impl PngSequenceSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            background: [0, 0, 0],
            next_index: 0,
            cfg: None,
            scratch: Vec::new(),
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.next_index
    }
}

impl FrameSink for PngSequenceSink {
    fn begin(&mut self, cfg: SinkConfig) -> RecorderResult<()> {
        use anyhow::Context as _;
        if cfg.width == 0 || cfg.height == 0 {
            return Err(RecorderError::validation(
                "png sink width/height must be non-zero",
            ));
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create frame directory '{}'", self.dir.display()))?;
        self.scratch = vec![0u8; (cfg.width as usize) * (cfg.height as usize) * 4];
        self.cfg = Some(cfg);
        self.next_index = 0;
        Ok(())
    }

    fn push_frame(&mut self, frame: &FrameRGBA) -> RecorderResult<()> {
        use anyhow::Context as _;
        let Some(cfg) = self.cfg else {
            return Err(RecorderError::invalid_state("png sink is not started"));
        };
        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(RecorderError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }

        crate::encode::ffmpeg::flatten_to_opaque_rgba8(
            &mut self.scratch,
            &frame.data,
            frame.premultiplied,
            self.background,
        )?;
        let img = image::RgbaImage::from_raw(frame.width, frame.height, self.scratch.clone())
            .ok_or_else(|| RecorderError::validation("frame buffer too small for its size"))?;

        let path = self.dir.join(format!("frame_{:06}.png", self.next_index));
        img.save(&path)
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        self.next_index += 1;
        Ok(())
    }

    fn end(&mut self) -> RecorderResult<()> {
        self.cfg = None;
        Ok(())
    }
}
