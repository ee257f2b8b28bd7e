//! Acquire-draw-publish protocol for one frame.

use crate::drawer::FrameDrawer;
use crate::surface::DrawableSurface;

/// Phase of the publication protocol that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PublishPhase {
    /// No drawable buffer could be obtained; the drawer was not invoked.
    Acquire,
    /// The drawn buffer could not be handed back to the surface.
    Publish,
}

/// Result of a single acquire-draw-publish cycle. Consumed immediately by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublicationOutcome {
    Success,
    Failure(PublishPhase),
}

impl PublicationOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Run one frame through `surface`: acquire a buffer, let `drawer` paint it, publish it.
pub fn run_once(surface: &dyn DrawableSurface, drawer: &mut dyn FrameDrawer) -> PublicationOutcome {
    let mut buffer = match surface.acquire() {
        Ok(buffer) => buffer,
        Err(err) => {
            tracing::warn!(error = %err, "failed to acquire drawable buffer");
            return PublicationOutcome::Failure(PublishPhase::Acquire);
        }
    };

    drawer.draw(&mut buffer);

    if let Err(err) = surface.publish(buffer) {
        tracing::warn!(error = %err, "failed to publish drawable buffer");
        return PublicationOutcome::Failure(PublishPhase::Publish);
    }

    PublicationOutcome::Success
}
