//! Built-in job handlers.

pub mod thumbnail;
