//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the decode crates:
//! - Logging and tracing infrastructure
//! - Host logger sinks
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other modules depend on.
//! It establishes the logging conventions used throughout the workspace.

pub mod error;
pub mod logging;
pub mod sink;

pub use error::{Error, Result};
