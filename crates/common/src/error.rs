//! A single tagged error enum for the whole core, following the teacher's
//! one-`AppError`-with-`#[from]`-variants convention.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("store or cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
    #[error("insufficient cohort")]
    InsufficientCohort,
    #[error("no anchor date available for patient")]
    NoAnchor,
}

pub type CoreResult<T> = Result<T, CoreError>;
