//! Common test utilities for data loader integration tests
//!
//! This module provides shared fixtures for building instrumented
//! providers and registries.

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod fixtures;

pub use dgs_test_utils::*;
pub use fixtures::*;
