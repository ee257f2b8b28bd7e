use crate::surface::SurfaceError;

pub type RecorderResult<T> = Result<T, RecorderError>;

#[derive(thiserror::Error, Debug)]
pub enum RecorderError {
    /// A lifecycle precondition was violated. Reported synchronously, never retried.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RecorderError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }
}
