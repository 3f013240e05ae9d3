//! # thumbforge-engine
//!
//! Turns a source file plus target options into a cached thumbnail.
//!
//! - [`capability`] probes the host once for external conversion tools
//! - [`pipeline`] holds one conversion pipeline per MIME category, each a
//!   chain of fallback tiers
//! - [`cache`] maps `(file, size, format)` to a deterministic path and
//!   writes entries atomically
//! - [`lock`] collapses concurrent generations of the same key into one
//! - [`engine`] ties them together behind [`ThumbnailEngine::generate`]

pub mod cache;
pub mod capability;
pub mod engine;
pub mod error;
pub mod executor;
pub mod lock;
pub mod metrics;
pub mod path_resolver;
pub mod pipeline;
pub mod raster;
pub mod temp;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use capability::{CapabilityDetector, CapabilitySet, Tool};
pub use engine::{EngineConfig, ThumbnailEngine};
pub use error::ConversionError;
pub use executor::{ProcessRunner, SystemRunner, ToolCommand, ToolOutput};
pub use path_resolver::ConfigPathResolver;
