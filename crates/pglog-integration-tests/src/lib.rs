//! pglog Integration Tests
//!
//! End-to-end tests that flush chunks into a real PostgreSQL started with
//! testcontainers. This crate is NOT published.
//!
//! # Running Tests
//!
//! ```bash
//! # Docker must be running
//! cargo test -p pglog-integration-tests -- --ignored
//!
//! # With logging
//! RUST_LOG=pglog=debug cargo test -p pglog-integration-tests -- --ignored --nocapture
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
