//! In-memory key-value store.
//!
//! A [`MemoryBatch`] keeps the net effect of its operations (last write wins
//! per key) and can replay it any number of times, which is what
//! [`crate::batch::WriteBatch`] relies on for its replay log.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
  errors::{Errors, Result},
  kv::{Batch, Batcher, KeyValueReader, KeyValueWriter},
};

#[derive(Debug, Clone, Default)]
pub struct MemoryDb {
  db: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryDb {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn has(&self, key: &[u8]) -> Result<bool> {
    Ok(self.db.read().contains_key(key))
  }

  pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
    self.db.read().get(key).cloned().ok_or(Errors::KeyNotFound)
  }

  pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
    self.db.write().insert(key.to_vec(), value.to_vec());
    Ok(())
  }

  pub fn delete(&self, key: &[u8]) -> Result<()> {
    self.db.write().remove(key);
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.db.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.db.read().is_empty()
  }

  pub fn new_batch(&self) -> MemoryBatch {
    MemoryBatch {
      db: self.clone(),
      writes: BTreeMap::new(),
      size: 0,
    }
  }
}

impl KeyValueReader for MemoryDb {
  fn has(&self, key: &[u8]) -> Result<bool> {
    MemoryDb::has(self, key)
  }

  fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
    MemoryDb::get(self, key)
  }
}

impl KeyValueWriter for MemoryDb {
  fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
    MemoryDb::put(self, key, value)
  }

  fn delete(&mut self, key: &[u8]) -> Result<()> {
    MemoryDb::delete(self, key)
  }
}

impl Batcher for MemoryDb {
  type Batch = MemoryBatch;

  fn new_batch(&self) -> MemoryBatch {
    MemoryDb::new_batch(self)
  }
}

/// Pending writes against a [`MemoryDb`]. `None` records a delete.
#[derive(Debug)]
pub struct MemoryBatch {
  db: MemoryDb,
  writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
  size: usize,
}

impl KeyValueWriter for MemoryBatch {
  fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
    self.writes.insert(key.to_vec(), Some(value.to_vec()));
    self.size += key.len() + value.len();
    Ok(())
  }

  fn delete(&mut self, key: &[u8]) -> Result<()> {
    self.writes.insert(key.to_vec(), None);
    self.size += key.len();
    Ok(())
  }
}

impl Batch for MemoryBatch {
  fn value_size(&self) -> usize {
    self.size
  }

  /// Applies the recorded writes to the host store. They stay recorded, so a
  /// later `replay` still sees them.
  fn write(&mut self) -> Result<()> {
    let mut db = self.db.db.write();
    for (key, value) in self.writes.iter() {
      match value {
        Some(value) => {
          db.insert(key.clone(), value.clone());
        }
        None => {
          db.remove(key);
        }
      }
    }
    Ok(())
  }

  fn reset(&mut self) {
    self.writes.clear();
    self.size = 0;
  }

  fn replay(&self, writer: &mut dyn KeyValueWriter) -> Result<()> {
    for (key, value) in self.writes.iter() {
      match value {
        Some(value) => writer.put(key, value)?,
        None => writer.delete(key)?,
      }
    }
    Ok(())
  }
}
