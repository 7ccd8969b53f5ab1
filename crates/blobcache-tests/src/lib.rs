//! blobcache test and validation infrastructure.
//!
//! Provides the shared test harness plus the cross-cutting suites: cache
//! lifecycle and statistics, eviction and trim semantics, concurrency, and
//! persistence across restarts.

pub mod harness;

pub use harness::TestEnv;

#[cfg(test)]
mod concurrency_tests;
#[cfg(test)]
mod maintenance_tests;
