use crate::{KVStore, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use tracing::debug;

/// In-memory storage backend
///
/// Keeps keys ordered so prefix scans return objects in a stable order.
#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<BTreeMap<Vec<u8>, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys (objects and index entries)
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KVStore for MemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        debug!("Putting key: {:?}", String::from_utf8_lossy(key));
        self.data
            .write()
            .insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        debug!("Deleting key: {:?}", String::from_utf8_lossy(key));
        self.data.write().remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let data = self.data.read();
        let results: Vec<(Bytes, Bytes)> = data
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (Bytes::copy_from_slice(k), v.clone()))
            .collect();

        debug!(
            "Scan of {:?} found {} results",
            String::from_utf8_lossy(prefix),
            results.len()
        );
        Ok(results)
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.data.read().contains_key(key))
    }

    fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool> {
        let mut data = self.data.write();
        let current = data.get(key).map(|v| v.as_ref());
        if current != expected {
            debug!(
                "Compare-and-swap lost on key: {:?}",
                String::from_utf8_lossy(key)
            );
            return Ok(false);
        }

        match new {
            Some(value) => {
                data.insert(key.to_vec(), Bytes::copy_from_slice(value));
            }
            None => {
                data.remove(key);
            }
        }
        Ok(true)
    }
}
