//! Escalation of unrecoverable surface failures into the engine's error-handler contract.

use std::sync::Arc;

use crate::foundation::error::RecorderResult;
use crate::publish::PublishPhase;

/// Error category reserved for surface failures during recording.
///
/// After a signal of this category the session is stopped; the host must release it and build a
/// new one.
pub const SURFACE_ERROR_CATEGORY: u32 = 10000;

/// Engine-originated error of unspecified kind.
pub const ENGINE_ERROR_UNKNOWN: u32 = 1;

/// Sub-code of [`SURFACE_ERROR_CATEGORY`] signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceErrorCode {
    /// A drawable buffer could not be acquired.
    AcquireFailed,
    /// A drawn buffer could not be published.
    PublishFailed,
}

impl SurfaceErrorCode {
    pub fn code(self) -> u32 {
        match self {
            Self::AcquireFailed => 1,
            Self::PublishFailed => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::AcquireFailed),
            2 => Some(Self::PublishFailed),
            _ => None,
        }
    }
}

impl From<PublishPhase> for SurfaceErrorCode {
    fn from(phase: PublishPhase) -> Self {
        match phase {
            PublishPhase::Acquire => Self::AcquireFailed,
            PublishPhase::Publish => Self::PublishFailed,
        }
    }
}

/// Payload delivered to an [`ErrorHandler`]: `(category, code)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ErrorSignal {
    pub category: u32,
    pub code: u32,
}

impl ErrorSignal {
    pub fn surface(code: SurfaceErrorCode) -> Self {
        Self {
            category: SURFACE_ERROR_CATEGORY,
            code: code.code(),
        }
    }

    pub fn engine(code: u32) -> Self {
        Self {
            category: ENGINE_ERROR_UNKNOWN,
            code,
        }
    }

    /// The surface sub-code, when this is a surface signal.
    pub fn surface_code(self) -> Option<SurfaceErrorCode> {
        if self.category != SURFACE_ERROR_CATEGORY {
            return None;
        }
        SurfaceErrorCode::from_code(self.code)
    }
}

/// Host-registered error callback shared by the session and the engine.
pub type ErrorHandler = Arc<dyn Fn(ErrorSignal) + Send + Sync>;

/// Force a stop, then notify `handler` exactly once.
///
/// A failing `stop` is logged and swallowed so it cannot mask the surface failure.
pub(crate) fn escalate(
    code: SurfaceErrorCode,
    stop: impl FnOnce() -> RecorderResult<()>,
    handler: Option<ErrorHandler>,
) {
    tracing::error!(?code, "unrecoverable surface failure, stopping recording");
    if let Err(err) = stop() {
        tracing::warn!(error = %err, "forced stop after surface failure also failed");
    }
    match handler {
        Some(handler) => handler(ErrorSignal::surface(code)),
        None => tracing::warn!(?code, "no error handler registered for surface failure"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::error::RecorderError;
    use std::sync::Mutex;

    #[test]
    fn phases_map_to_reserved_codes() {
        assert_eq!(
            ErrorSignal::surface(PublishPhase::Acquire.into()),
            ErrorSignal {
                category: 10000,
                code: 1
            }
        );
        assert_eq!(
            ErrorSignal::surface(PublishPhase::Publish.into()),
            ErrorSignal {
                category: 10000,
                code: 2
            }
        );
        assert_eq!(
            ErrorSignal::surface(SurfaceErrorCode::PublishFailed).surface_code(),
            Some(SurfaceErrorCode::PublishFailed)
        );
        assert_eq!(ErrorSignal::engine(2).surface_code(), None);
    }

    #[test]
    fn escalate_stops_before_notifying_once_even_if_stop_fails() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        let stop_log = log.clone();
        let handler_log = log.clone();
        let handler: ErrorHandler = Arc::new(move |sig: ErrorSignal| {
            handler_log
                .lock()
                .unwrap()
                .push(format!("handler {} {}", sig.category, sig.code));
        });

        escalate(
            SurfaceErrorCode::AcquireFailed,
            move || {
                stop_log.lock().unwrap().push("stop".to_string());
                Err(RecorderError::invalid_state("engine already stopped"))
            },
            Some(handler),
        );

        assert_eq!(
            *log.lock().unwrap(),
            vec!["stop".to_string(), "handler 10000 1".to_string()]
        );
    }

    #[test]
    fn escalate_without_handler_still_stops() {
        let stopped = Arc::new(Mutex::new(false));
        let s = stopped.clone();
        escalate(
            SurfaceErrorCode::PublishFailed,
            move || {
                *s.lock().unwrap() = true;
                Ok(())
            },
            None,
        );
        assert!(*stopped.lock().unwrap());
    }
}
