//! nova-stream - resolution cache and streaming proxy for audio content
//!
//! This library crate exposes the core functionality for integration testing.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ids;
pub mod locks;
pub mod resolver;
pub mod scheduler;
pub mod server;
pub mod streaming;

pub use error::{Error, Result};
pub use ids::ContentId;
