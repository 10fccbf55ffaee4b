//! Engine-agnostic key-value contract.
//!
//! Callers program against these traits; [`crate::db::Database`] implements
//! all of them, [`crate::memorydb::MemoryDb`] the point operations and
//! batching. Any [`KeyValueWriter`] can receive a [`Batch::replay`].

use crate::errors::Result;

pub trait KeyValueReader {
  /// Reports whether the key is present. A missing key is `Ok(false)`.
  fn has(&self, key: &[u8]) -> Result<bool>;

  /// Returns a copy of the value, or `Errors::KeyNotFound`.
  fn get(&self, key: &[u8]) -> Result<Vec<u8>>;
}

pub trait KeyValueWriter {
  fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

  fn delete(&mut self, key: &[u8]) -> Result<()>;
}

pub trait KeyValueStater {
  fn stat(&self, property: &str) -> Result<String>;
}

pub trait Compacter {
  /// Compacts the range `[start, limit)`. `None` stands for the beginning or
  /// the end of the keyspace.
  fn compact(&self, start: Option<&[u8]>, limit: Option<&[u8]>) -> Result<()>;
}

/// Write-only buffer that applies its changes to the host store on `write`.
pub trait Batch: KeyValueWriter {
  /// Amount of data queued up for writing.
  fn value_size(&self) -> usize;

  fn write(&mut self) -> Result<()>;

  fn reset(&mut self);

  /// Emits the net effect of the queued operations, one per key.
  fn replay(&self, writer: &mut dyn KeyValueWriter) -> Result<()>;
}

pub trait Batcher {
  type Batch: Batch;

  fn new_batch(&self) -> Self::Batch;
}

/// Forward-only cursor over a point-in-time view of the store.
pub trait KvIterator {
  /// Moves to the next pair and reports whether one exists. The first call
  /// moves to the first pair.
  fn next(&mut self) -> bool;

  /// Accumulated error. Running out of pairs is not an error.
  fn error(&self) -> Result<()>;

  fn key(&self) -> Option<Vec<u8>>;

  fn value(&self) -> Option<Vec<u8>>;

  /// Frees the snapshot. Safe to call more than once.
  fn release(&mut self);
}

pub trait Iteratee {
  type Iter: KvIterator;

  fn new_iterator(&self) -> Result<Self::Iter>;

  fn new_iterator_with_start(&self, start: &[u8]) -> Result<Self::Iter>;

  fn new_iterator_with_prefix(&self, prefix: &[u8]) -> Result<Self::Iter>;
}

pub trait KeyValueStore:
  KeyValueReader + KeyValueWriter + KeyValueStater + Batcher + Iteratee + Compacter
{
  fn close(&self) -> Result<()>;
}
