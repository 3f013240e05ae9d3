//! Collaborator traits defined in `thumbforge-core` and implemented by
//! other crates (or by the host system).

pub mod job_store;
pub mod metadata;
pub mod path_resolver;

pub use job_store::JobStatusStore;
pub use metadata::MetadataStore;
pub use path_resolver::{PathRequest, PathResolver};
