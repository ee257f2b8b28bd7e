//! Draw callbacks invoked once per scheduled frame.

use std::sync::{Arc, Mutex};

use crate::fit::{FitTransform, fit_transform};
use crate::foundation::core::Canvas;
use crate::foundation::error::{RecorderError, RecorderResult};
use crate::foundation::lock;
use crate::surface::DrawBuffer;

/// Opaque black, the letterbox color behind fitted content.
pub const LETTERBOX_RGBA: [u8; 4] = [0, 0, 0, 255];

/// Single-method capability that paints one frame.
///
/// The buffer is only borrowed for the duration of the call. The scheduler never invokes a drawer
/// concurrently with itself.
pub trait FrameDrawer: Send {
    fn draw(&mut self, buffer: &mut DrawBuffer);
}

impl<F> FrameDrawer for F
where
    F: FnMut(&mut DrawBuffer) + Send,
{
    fn draw(&mut self, buffer: &mut DrawBuffer) {
        self(buffer)
    }
}

/// Producer of snapshots of some visual content (a view, a window, an image).
///
/// Snapshots are straight-alpha RGBA8. Returning `None` means nothing is available right now.
pub trait ContentSource: Send + Sync {
    fn snapshot(&self) -> Option<image::RgbaImage>;
}

/// Content source backed by an in-memory image that can be replaced at any time.
#[derive(Debug)]
pub struct ImageContent {
    image: Mutex<image::RgbaImage>,
}

impl ImageContent {
    pub fn new(image: image::RgbaImage) -> Self {
        Self {
            image: Mutex::new(image),
        }
    }

    /// Decode an image file (any format the `image` crate understands).
    pub fn open(path: impl AsRef<std::path::Path>) -> RecorderResult<Self> {
        use anyhow::Context as _;
        let path = path.as_ref();
        let img = image::open(path)
            .with_context(|| format!("failed to decode image '{}'", path.display()))?;
        Ok(Self::new(img.to_rgba8()))
    }

    pub fn set_image(&self, image: image::RgbaImage) {
        *lock(&self.image) = image;
    }

    pub fn size(&self) -> Canvas {
        let img = lock(&self.image);
        Canvas::new(img.width(), img.height())
    }
}

impl ContentSource for ImageContent {
    fn snapshot(&self) -> Option<image::RgbaImage> {
        Some(lock(&self.image).clone())
    }
}

/// Shared, swappable reference to the content being recorded.
#[derive(Clone, Default)]
pub struct ContentSlot {
    source: Arc<Mutex<Option<Arc<dyn ContentSource>>>>,
}

impl ContentSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, source: Arc<dyn ContentSource>) {
        *lock(&self.source) = Some(source);
    }

    pub fn clear(&self) {
        *lock(&self.source) = None;
    }

    pub fn get(&self) -> Option<Arc<dyn ContentSource>> {
        lock(&self.source).clone()
    }

    pub fn is_set(&self) -> bool {
        lock(&self.source).is_some()
    }
}

impl std::fmt::Debug for ContentSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentSlot")
            .field("is_set", &self.is_set())
            .finish()
    }
}

/// Draws the current content snapshot centered on the buffer, shrunk to fit.
///
/// Holds only what it needs: the content slot, the destination size and a reusable compositor.
pub struct FitContentDrawer {
    content: ContentSlot,
    video_size: Canvas,
    compositor: FitCompositor,
}

impl FitContentDrawer {
    pub fn new(content: ContentSlot, video_size: Canvas) -> Self {
        Self {
            content,
            video_size,
            compositor: FitCompositor::default(),
        }
    }

    pub fn video_size(&self) -> Canvas {
        self.video_size
    }
}

impl FrameDrawer for FitContentDrawer {
    fn draw(&mut self, buffer: &mut DrawBuffer) {
        if buffer.size() != self.video_size {
            tracing::debug!(
                buffer = %buffer.size(),
                video = %self.video_size,
                "buffer size differs from configured video size"
            );
        }

        let snapshot = self.content.get().and_then(|source| source.snapshot());
        if let Err(err) = self.compositor.compose(buffer, snapshot.as_ref()) {
            tracing::warn!(error = %err, "failed to compose content frame");
        }
    }
}

/// Letterboxing compositor that keeps its `vello_cpu` render context across frames.
#[derive(Default)]
pub struct FitCompositor {
    ctx: Option<vello_cpu::RenderContext>,
}

impl FitCompositor {
    /// Fill `buffer` with opaque black and draw `content` through the content-fit transform.
    ///
    /// A missing or zero-sized snapshot leaves just the black background.
    pub fn compose(
        &mut self,
        buffer: &mut DrawBuffer,
        content: Option<&image::RgbaImage>,
    ) -> RecorderResult<Option<FitTransform>> {
        let Some((content, fit)) = content.and_then(|content| {
            let src = Canvas::new(content.width(), content.height());
            fit_transform(src, buffer.size()).map(|fit| (content, fit))
        }) else {
            buffer.clear(LETTERBOX_RGBA);
            return Ok(None);
        };

        let paint = vello_cpu::Image {
            image: vello_cpu::ImageSource::Pixmap(Arc::new(straight_rgba_to_pixmap(content)?)),
            sampler: vello_cpu::peniko::ImageSampler::default(),
        };

        let (w, h) = buffer.size().as_u16()?;
        let mut ctx = match self.ctx.take() {
            Some(ctx) if ctx.width() == w && ctx.height() == h => ctx,
            _ => vello_cpu::RenderContext::new(w, h),
        };
        ctx.reset();

        // The render covers every pixel, so the background is painted here, not cleared.
        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
            LETTERBOX_RGBA[0],
            LETTERBOX_RGBA[1],
            LETTERBOX_RGBA[2],
            LETTERBOX_RGBA[3],
        ));
        ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            0.0,
            0.0,
            f64::from(w),
            f64::from(h),
        ));

        ctx.set_transform(affine_to_cpu(fit.to_affine()));
        ctx.set_paint(paint);
        ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            0.0,
            0.0,
            f64::from(content.width()),
            f64::from(content.height()),
        ));
        ctx.flush();
        ctx.render_to_pixmap(buffer.pixmap_mut());
        self.ctx = Some(ctx);

        Ok(Some(fit))
    }
}

/// One-off [`FitCompositor::compose`].
pub fn compose_fitted(
    buffer: &mut DrawBuffer,
    content: Option<&image::RgbaImage>,
) -> RecorderResult<Option<FitTransform>> {
    FitCompositor::default().compose(buffer, content)
}

fn affine_to_cpu(a: crate::foundation::core::Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn straight_rgba_to_pixmap(img: &image::RgbaImage) -> RecorderResult<vello_cpu::Pixmap> {
    let (w, h) = Canvas::new(img.width(), img.height()).as_u16()?;
    if img.as_raw().len() != Canvas::new(img.width(), img.height()).rgba_len() {
        return Err(RecorderError::validation("content snapshot byte length mismatch"));
    }

    let mut may_have_opacities = false;
    let mut pixels = Vec::with_capacity(usize::from(w) * usize::from(h));
    for px in img.as_raw().chunks_exact(4) {
        let [r, g, b, a] = premul_rgba8(px[0], px[1], px[2], px[3]);
        may_have_opacities |= a != 255;
        pixels.push(vello_cpu::peniko::color::PremulRgba8 { r, g, b, a });
    }

    Ok(vello_cpu::Pixmap::from_parts_with_opacity(
        pixels,
        w,
        h,
        may_have_opacities,
    ))
}

fn premul_rgba8(r: u8, g: u8, b: u8, a: u8) -> [u8; 4] {
    let premul = |c: u8| -> u8 { ((u16::from(c) * u16::from(a) + 127) / 255) as u8 };
    [premul(r), premul(g), premul(b), a]
}
