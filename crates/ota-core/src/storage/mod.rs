//! Durable record storage.
//!
//! A small key -> bytes store. A `save` is all-or-nothing from the caller's
//! point of view: a reader sees either the old or the new record.

pub mod file;
pub mod mem;

pub use file::FileStore;
pub use mem::MemStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid record key: {0}")]
    InvalidKey(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent key/value record store.
pub trait RecordStore: Send {
    /// Read the record stored under `key`, `None` if there is none.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the record stored under `key`.
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
}
