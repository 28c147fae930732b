//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - Signed-in users on a shared in-memory store
//! - Wiremock helpers for the HTTP transport
//! - Custom assertion macros

pub mod assertions;
pub mod fixtures;

// Re-export commonly used utilities
pub use assertions::*;
pub use fixtures::*;
pub use mock_server::*;
