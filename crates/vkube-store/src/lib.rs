//! Vkube Storage - Object store behind each cluster API
//!
//! This crate provides:
//! - KVStore trait for storage abstraction
//! - An in-memory implementation
//! - Key encoding and field indexing
//! - `Cluster`: typed CRUD with optimistic concurrency and a watch feed

pub mod cluster;
pub mod encoding;
pub mod error;
pub mod kv;
pub mod memory;

// Re-export commonly used types
pub use cluster::Cluster;
pub use encoding::{IndexKey, KeyEncoder};
pub use error::{Result, StorageError};
pub use kv::KVStore;
pub use memory::MemoryBackend;
