//! Convenience result type alias for Thumbforge.

use crate::error::AppError;

/// A specialized `Result` type for Thumbforge operations.
pub type AppResult<T> = Result<T, AppError>;
