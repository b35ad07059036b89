//! CLI-specific utilities for trident-dl
//!
//! This module contains code specific to the command-line interface,
//! separate from the core library functionality.

pub mod progress;
pub mod report;

pub use progress::ProgressBoard;
pub use report::render_table;
