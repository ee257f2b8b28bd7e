//! Content-fit transform: center a source buffer on a destination canvas, shrinking to fit.

use crate::foundation::core::{Affine, Canvas, Vec2};

/// Uniform scale followed by a translation.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FitTransform {
    pub scale: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl FitTransform {
    /// The transform as an affine map, scale applied first, then translate.
    pub fn to_affine(self) -> Affine {
        Affine::translate(Vec2::new(self.translate_x, self.translate_y))
            * Affine::scale(self.scale)
    }
}

/// Compute the mapping from a `src`-sized buffer onto a `dst`-sized canvas.
///
/// Never upscales. Returns `None` for a degenerate (zero-sized) source.
pub fn fit_transform(src: Canvas, dst: Canvas) -> Option<FitTransform> {
    if src.is_degenerate() {
        return None;
    }

    let (sw, sh) = (f64::from(src.width), f64::from(src.height));
    let (dw, dh) = (f64::from(dst.width), f64::from(dst.height));

    let scale_x = if sw > dw { dw / sw } else { 1.0 };
    let scale_y = if sh > dh { dh / sh } else { 1.0 };
    let scale = scale_x.min(scale_y);

    Some(FitTransform {
        scale,
        translate_x: (dw - sw * scale) / 2.0,
        translate_y: (dh - sh * scale) / 2.0,
    })
}
