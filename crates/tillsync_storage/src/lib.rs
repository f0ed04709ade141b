//! # TillSync Storage
//!
//! Byte-level backends underneath the TillSync local database.
//!
//! A backend holds one append-only log. It never interprets the bytes it
//! stores: framing, checksums, and documents belong to `tillsync_store`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral, for tests and throwaway tills
//! - [`FileBackend`] - a single file, durable across restarts
//!
//! ## Example
//!
//! ```rust
//! use tillsync_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.append(b"frame-1").unwrap();
//! backend.append(b"frame-2").unwrap();
//! assert_eq!(backend.read_all().unwrap(), b"frame-1frame-2");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
