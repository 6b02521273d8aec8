//! Common test utilities for feed-aggregator integration tests

#[allow(dead_code)]
pub mod assertions;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fixtures::*;
