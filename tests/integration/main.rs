//! End-to-end thumbnail scenarios across engine, service, queue and worker.

mod helpers;
mod queue_test;
mod thumbnail_test;
