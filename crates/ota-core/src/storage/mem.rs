//! In-memory record store for tests.

use std::collections::HashMap;

use super::{RecordStore, StorageError};

#[derive(Debug, Default)]
pub struct MemStore {
    records: HashMap<String, Vec<u8>>,
    /// When set, every save fails.
    read_only: bool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with one record.
    pub fn with_record(key: &str, bytes: &[u8]) -> Self {
        let mut store = Self::new();
        store.records.insert(key.to_string(), bytes.to_vec());
        store
    }

    /// Make subsequent saves fail.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.records.get(key).map(Vec::as_slice)
    }
}

impl RecordStore for MemStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.records.get(key).cloned())
    }

    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::Unavailable("store is read-only".into()));
        }
        self.records.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}
