//! End-to-end probe acceptance tests.

mod common;
mod config_test;
mod latency_test;
mod soak_test;
