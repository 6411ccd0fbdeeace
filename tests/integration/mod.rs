//! Integration tests for tracegraph
//!
//! These tests drive the builder, the oracles and the code generator
//! together, from in-memory captures up to HAR files on disk.

#[path = "../common/mod.rs"]
pub mod common;

pub mod har_pipeline;
pub mod properties;
pub mod scenarios;
