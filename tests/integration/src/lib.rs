//! Integration test utilities for the delivery gateway
//!
//! This crate provides helpers for running end-to-end tests against the
//! services over in-memory adapters and against live gateway instances.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
