//! Client error type

use thiserror::Error;

use crate::backend::BackendError;
use crate::shared::{ConfigError, SharedError};

/// Errors returned by `ChatClient` and the conversation/roster handles
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Input rejected before any backend call
    #[error(transparent)]
    Validation(#[from] SharedError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("not signed in")]
    NotSignedIn,

    /// The background task behind a handle has stopped
    #[error("{0} is closed")]
    Closed(&'static str),
}

impl ClientError {
    /// Field name for validation failures
    pub fn field(&self) -> Option<&str> {
        match self {
            ClientError::Validation(err) => err.field(),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
