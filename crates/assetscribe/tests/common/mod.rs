//! Shared test utilities for assetscribe integration tests.
//!
//! This module provides:
//! - `TestHarness`: an in-memory SQLite store, a temp workspace root and a
//!   controller wired to fake collaborators
//! - Fakes for the media tool and the transcription service

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::*;
