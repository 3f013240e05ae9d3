//! # thumbforge-core
//!
//! Core crate for Thumbforge. Contains configuration schemas, typed
//! identifiers, the thumbnail and job domain types, the collaborator traits
//! the engine talks through, and the unified error system.
//!
//! This crate has **no** internal dependencies on other Thumbforge crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
