//! Shared test utilities for storyport integration tests.
//!
//! This module provides:
//! - Builders that synthesize ZIP, DOCX, DOC and PDF bytes in memory
//! - `TestHarness` for running the pipeline against a temp-dir database

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{assert_job_consistent, TestHarness};
