//! Core types and shared functionality for rendition.
//!
//! This crate provides:
//! - The cache store capability with memory, file, SQLite and Redis backends
//! - Unified cache-layer error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{Cache, CacheBackend, CacheEntry, ConnectionState};
pub use config::AppConfig;
pub use error::Error;
