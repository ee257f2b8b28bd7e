//! Drawable surfaces: the buffers the publication protocol acquires, draws into and publishes.

use std::sync::{Arc, Mutex};

use crate::foundation::core::Canvas;
use crate::foundation::error::RecorderResult;
use crate::foundation::lock;

/// Failure reported by a drawable surface.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// The surface was released by its owner (e.g. the engine stopped).
    #[error("surface has been released")]
    Released,
    /// A buffer is already acquired and not yet published.
    #[error("surface is busy: a buffer is already acquired")]
    Busy,
    /// The buffer handed back does not belong to this surface.
    #[error("invalid buffer: {0}")]
    InvalidBuffer(String),
    /// The consumer behind the surface refused the frame.
    #[error("frame rejected: {0}")]
    Rejected(String),
}

/// A published frame as RGBA8 pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRGBA {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGBA8 bytes, tightly packed, row-major.
    pub data: Vec<u8>,
    /// Whether the `data` is premultiplied alpha.
    pub premultiplied: bool,
}

impl FrameRGBA {
    /// RGBA bytes of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.data.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// A mutable pixel buffer lent out for one draw-and-publish cycle.
///
/// Pixels are premultiplied RGBA8 (the `vello_cpu` pixmap layout).
pub struct DrawBuffer {
    pixmap: vello_cpu::Pixmap,
    owner: u64,
}

impl DrawBuffer {
    /// Create a standalone buffer, not owned by any surface.
    pub fn new(size: Canvas) -> RecorderResult<Self> {
        let (w, h) = size.as_u16()?;
        Ok(Self {
            pixmap: vello_cpu::Pixmap::new(w, h),
            owner: 0,
        })
    }

    pub fn width(&self) -> u32 {
        u32::from(self.pixmap.width())
    }

    pub fn height(&self) -> u32 {
        u32::from(self.pixmap.height())
    }

    pub fn size(&self) -> Canvas {
        Canvas::new(self.width(), self.height())
    }

    /// Fill every pixel with a premultiplied RGBA8 value.
    pub fn clear(&mut self, rgba: [u8; 4]) {
        for px in self.pixmap.data_as_u8_slice_mut().chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    pub fn data(&self) -> &[u8] {
        self.pixmap.data_as_u8_slice()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.pixmap.data_as_u8_slice_mut()
    }

    pub fn pixmap(&self) -> &vello_cpu::Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut vello_cpu::Pixmap {
        &mut self.pixmap
    }

    pub fn to_frame(&self) -> FrameRGBA {
        FrameRGBA {
            width: self.width(),
            height: self.height(),
            data: self.data().to_vec(),
            premultiplied: true,
        }
    }
}

impl std::fmt::Debug for DrawBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("owner", &self.owner)
            .finish()
    }
}

/// A platform surface that lends out drawable buffers.
///
/// `acquire` and `publish` are expected to be fast; they are never interrupted mid-call.
pub trait DrawableSurface: Send + Sync {
    fn acquire(&self) -> Result<DrawBuffer, SurfaceError>;
    fn publish(&self, buffer: DrawBuffer) -> Result<(), SurfaceError>;
}

/// Receiver of frames published to a [`PixmapSurface`].
pub trait FrameConsumer: Send + Sync {
    fn consume(&self, frame: &FrameRGBA) -> Result<(), SurfaceError>;
}

struct SurfaceSlot {
    spare: Option<vello_cpu::Pixmap>,
    locked: bool,
    released: bool,
    published: u64,
}

/// Pixmap-backed surface that forwards each published buffer to a [`FrameConsumer`].
///
/// At most one buffer is lent out at a time. The pixmap is recycled across cycles.
pub struct PixmapSurface {
    id: u64,
    size: Canvas,
    consumer: Arc<dyn FrameConsumer>,
    slot: Mutex<SurfaceSlot>,
}

impl PixmapSurface {
    pub fn new(size: Canvas, consumer: Arc<dyn FrameConsumer>) -> RecorderResult<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        size.as_u16()?;
        Ok(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            size,
            consumer,
            slot: Mutex::new(SurfaceSlot {
                spare: None,
                locked: false,
                released: false,
                published: 0,
            }),
        })
    }

    pub fn size(&self) -> Canvas {
        self.size
    }

    /// Mark the surface released; later acquires fail with [`SurfaceError::Released`].
    pub fn release(&self) {
        let mut slot = lock(&self.slot);
        slot.released = true;
        slot.spare = None;
    }

    pub fn is_released(&self) -> bool {
        lock(&self.slot).released
    }

    /// Number of buffers successfully published so far.
    pub fn published(&self) -> u64 {
        lock(&self.slot).published
    }
}

impl DrawableSurface for PixmapSurface {
    fn acquire(&self) -> Result<DrawBuffer, SurfaceError> {
        let mut slot = lock(&self.slot);
        if slot.released {
            return Err(SurfaceError::Released);
        }
        if slot.locked {
            return Err(SurfaceError::Busy);
        }
        let pixmap = match slot.spare.take() {
            Some(p) => p,
            None => {
                let (w, h) = self
                    .size
                    .as_u16()
                    .map_err(|e| SurfaceError::InvalidBuffer(e.to_string()))?;
                vello_cpu::Pixmap::new(w, h)
            }
        };
        slot.locked = true;
        Ok(DrawBuffer {
            pixmap,
            owner: self.id,
        })
    }

    fn publish(&self, buffer: DrawBuffer) -> Result<(), SurfaceError> {
        if buffer.owner != self.id {
            return Err(SurfaceError::InvalidBuffer(
                "buffer was not acquired from this surface".to_string(),
            ));
        }

        let frame = {
            let mut slot = lock(&self.slot);
            if !slot.locked {
                return Err(SurfaceError::InvalidBuffer(
                    "publish without a matching acquire".to_string(),
                ));
            }
            slot.locked = false;
            if slot.released {
                return Err(SurfaceError::Released);
            }
            let frame = buffer.to_frame();
            slot.spare = Some(buffer.pixmap);
            frame
        };

        // Consumers may block (e.g. writing into a pipe); do not hold the slot meanwhile.
        self.consumer.consume(&frame)?;
        lock(&self.slot).published += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect {
        frames: Mutex<Vec<FrameRGBA>>,
        reject: bool,
    }

    impl FrameConsumer for Collect {
        fn consume(&self, frame: &FrameRGBA) -> Result<(), SurfaceError> {
            if self.reject {
                return Err(SurfaceError::Rejected("sink closed".to_string()));
            }
            lock(&self.frames).push(frame.clone());
            Ok(())
        }
    }

    #[test]
    fn acquire_publish_forwards_frame_and_recycles() {
        let sink = Arc::new(Collect::default());
        let surface = PixmapSurface::new(Canvas::new(4, 2), sink.clone()).unwrap();

        let mut buf = surface.acquire().unwrap();
        assert_eq!(buf.size(), Canvas::new(4, 2));
        buf.clear([10, 20, 30, 255]);
        surface.publish(buf).unwrap();

        let buf = surface.acquire().unwrap();
        surface.publish(buf).unwrap();

        let frames = lock(&sink.frames);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].pixel(3, 1), Some([10, 20, 30, 255]));
        assert!(frames[0].premultiplied);
        assert_eq!(surface.published(), 2);
    }

    #[test]
    fn second_acquire_is_busy() {
        let surface = PixmapSurface::new(Canvas::new(2, 2), Arc::new(Collect::default())).unwrap();
        let _held = surface.acquire().unwrap();
        assert_eq!(surface.acquire().unwrap_err(), SurfaceError::Busy);
    }

    #[test]
    fn released_surface_refuses_acquire_and_publish() {
        let surface = PixmapSurface::new(Canvas::new(2, 2), Arc::new(Collect::default())).unwrap();
        let buf = surface.acquire().unwrap();
        surface.release();
        assert_eq!(surface.publish(buf).unwrap_err(), SurfaceError::Released);
        assert_eq!(surface.acquire().unwrap_err(), SurfaceError::Released);
        assert!(surface.is_released());
    }

    #[test]
    fn foreign_buffer_is_invalid() {
        let surface = PixmapSurface::new(Canvas::new(2, 2), Arc::new(Collect::default())).unwrap();
        let foreign = DrawBuffer::new(Canvas::new(2, 2)).unwrap();
        assert!(matches!(
            surface.publish(foreign),
            Err(SurfaceError::InvalidBuffer(_))
        ));
    }

    #[test]
    fn consumer_rejection_is_reported() {
        let sink = Arc::new(Collect {
            reject: true,
            ..Default::default()
        });
        let surface = PixmapSurface::new(Canvas::new(2, 2), sink).unwrap();
        let buf = surface.acquire().unwrap();
        assert!(matches!(
            surface.publish(buf),
            Err(SurfaceError::Rejected(_))
        ));
        assert_eq!(surface.published(), 0);
        // The slot is unlocked again even though the consumer refused the frame.
        assert!(surface.acquire().is_ok());
    }
}
