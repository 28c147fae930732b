//! Test suite for Shadowchat
//!
//! Integration scenarios run against the in-memory backend (two users
//! sharing one store) and against a wiremock server for the HTTP transport.

pub mod common;
pub mod integration;
