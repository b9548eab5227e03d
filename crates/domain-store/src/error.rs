use thiserror::Error;

/// The single error kind the Store contract promises (§4.A). The core
/// never catches this silently; it's mapped to `CoreError::Unavailable`
/// or `CoreError::NotFound` at the component boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for common::CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(reason) => common::CoreError::NotFound(reason),
            StoreError::Unavailable(reason) => common::CoreError::Unavailable(reason),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
