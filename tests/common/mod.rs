//! Shared test utilities for tracegraph
//!
//! This module provides common helpers for integration tests:
//! - In-memory capture and oracle fixtures for known dependency shapes
//! - HAR documents written to temporary files

pub mod fixtures;
pub mod har;
