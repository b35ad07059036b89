//! Core library modules for trident-dl
//!
//! This module contains the engine: source parsing, protocol connectors, the
//! per-download state machine and its worker, and the download manager.

pub mod config;
pub mod connector;
pub mod download;
pub mod downloader;
pub mod duplicate;
pub mod error;
pub mod observer;
pub mod source;
pub mod space;
pub mod stream;
pub(crate) mod worker;

