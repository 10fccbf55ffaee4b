use std::sync::Arc;

use log::debug;

use crate::{
  engine::{EngineBatch, StorageEngine},
  errors::Result,
  kv::{Batch, KeyValueWriter},
  memorydb::{MemoryBatch, MemoryDb},
  option::WriteBatchOptions,
};

/// Buffers writes for an atomic commit to the engine.
///
/// Every accepted operation goes to the engine's native batch and to an
/// in-memory replay log. The replay log is only touched once the native batch
/// accepted the operation, so both always hold the same operations and
/// [`WriteBatch::replay`] can forward the batch's net effect to any
/// [`KeyValueWriter`], before or after [`WriteBatch::write`].
///
/// A batch is meant for a single writer; share it behind a lock if needed.
pub struct WriteBatch {
  engine: Arc<dyn StorageEngine>,
  options: WriteBatchOptions,
  batch: Box<dyn EngineBatch>,
  replay_host: MemoryDb,
  replay_log: MemoryBatch,
  value_size: usize,
}

impl WriteBatch {
  pub(crate) fn new(engine: Arc<dyn StorageEngine>, options: WriteBatchOptions) -> Self {
    let batch = engine.write_batch(&options);
    let replay_host = MemoryDb::new();
    let replay_log = replay_host.new_batch();
    Self {
      engine,
      options,
      batch,
      replay_host,
      replay_log,
      value_size: 0,
    }
  }

  pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
    self.batch.set(key, value)?;
    self.replay_log.put(key, value)?;
    self.value_size += value.len();
    Ok(())
  }

  pub fn delete(&mut self, key: &[u8]) -> Result<()> {
    self.batch.delete(key)?;
    self.replay_log.delete(key)?;
    self.value_size += 1;
    Ok(())
  }

  /// Bytes of values queued since the last reset, plus one per delete.
  pub fn value_size(&self) -> usize {
    self.value_size
  }

  /// Commits the queued operations. Nothing of the batch is visible to
  /// readers before this returns successfully.
  pub fn write(&mut self) -> Result<()> {
    self.replay_log.write()?;
    self.batch.flush()?;
    debug!("write batch committed, value size {}", self.value_size);
    Ok(())
  }

  /// Drops any unflushed operations and makes the batch reusable. The replay
  /// log starts over on an empty store.
  pub fn reset(&mut self) {
    self.batch.cancel();
    self.batch = self.engine.write_batch(&self.options);
    self.replay_host = MemoryDb::new();
    self.replay_log = self.replay_host.new_batch();
    self.value_size = 0;
  }

  /// Sends the batch's net effect, one operation per key, to `writer`.
  pub fn replay(&self, writer: &mut dyn KeyValueWriter) -> Result<()> {
    self.replay_log.replay(writer)
  }
}

impl KeyValueWriter for WriteBatch {
  fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
    WriteBatch::put(self, key, value)
  }

  fn delete(&mut self, key: &[u8]) -> Result<()> {
    WriteBatch::delete(self, key)
  }
}

impl Batch for WriteBatch {
  fn value_size(&self) -> usize {
    WriteBatch::value_size(self)
  }

  fn write(&mut self) -> Result<()> {
    WriteBatch::write(self)
  }

  fn reset(&mut self) {
    WriteBatch::reset(self)
  }

  fn replay(&self, writer: &mut dyn KeyValueWriter) -> Result<()> {
    WriteBatch::replay(self, writer)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    db::Database,
    errors::Errors,
    option::{EngineType, Options},
  };

  fn open_memory_db() -> Database {
    Database::open_with_options(Options {
      engine_type: EngineType::InMemory,
      ..Default::default()
    })
    .expect("failed to open database")
  }

  #[test]
  fn test_write_batch_replay_net_effect() {
    let db = open_memory_db();
    let mut batch = db.new_batch();
    batch.put(b"a", b"1").unwrap();
    batch.put(b"a", b"2").unwrap();
    batch.delete(b"b").unwrap();

    let mut target = MemoryDb::new();
    batch.replay(&mut target).unwrap();
    assert_eq!(target.len(), 1);
    assert_eq!(target.get(b"a").unwrap(), b"2".to_vec());
    assert!(!target.has(b"b").unwrap());
  }

  #[test]
  fn test_write_batch_commit_is_atomic() {
    let db = open_memory_db();
    db.put(b"b", b"old").unwrap();

    let mut batch = db.new_batch();
    batch.put(b"a", b"1").unwrap();
    batch.put(b"c", b"3").unwrap();
    batch.delete(b"b").unwrap();

    assert!(!db.has(b"a").unwrap());
    assert!(!db.has(b"c").unwrap());
    assert_eq!(db.get(b"b").unwrap(), b"old".to_vec());

    batch.write().unwrap();
    assert_eq!(db.get(b"a").unwrap(), b"1".to_vec());
    assert_eq!(db.get(b"c").unwrap(), b"3".to_vec());
    assert!(!db.has(b"b").unwrap());

    // still replayable after the commit
    let mut target = MemoryDb::new();
    batch.replay(&mut target).unwrap();
    assert_eq!(target.len(), 2);
  }

  #[test]
  fn test_write_batch_value_size_and_reset() {
    let db = open_memory_db();
    let mut batch = db.new_batch();
    batch.put(b"k1", b"abc").unwrap();
    batch.put(b"k2", b"").unwrap();
    batch.delete(b"k3").unwrap();
    assert_eq!(batch.value_size(), 3 + 0 + 1);

    batch.reset();
    assert_eq!(batch.value_size(), 0);
    let mut target = MemoryDb::new();
    batch.replay(&mut target).unwrap();
    assert!(target.is_empty());

    // reset discards unflushed operations
    assert!(batch.write().is_ok());
    assert!(!db.has(b"k1").unwrap());
  }

  #[test]
  fn test_write_batch_reuse_keeps_replay_store_empty() {
    let db = open_memory_db();
    let mut batch = db.new_batch();
    for round in 0..50 {
      for i in 0..100 {
        let key = format!("round-{}-key-{}", round, i);
        batch.put(key.as_bytes(), b"v").unwrap();
      }
      batch.write().unwrap();
      assert_eq!(batch.replay_host.len(), 100);
      batch.reset();
      assert!(batch.replay_host.is_empty());
    }
    assert_eq!(batch.value_size(), 0);
  }

  #[test]
  fn test_write_batch_rejected_op_keeps_logs_aligned() {
    let db = open_memory_db();
    let mut batch = db
      .new_batch_with_options(WriteBatchOptions {
        max_batch_num: 2,
        sync_writes: false,
      })
      .unwrap();

    batch.put(b"a", b"1").unwrap();
    batch.delete(b"b").unwrap();
    assert_eq!(batch.put(b"c", b"333").err(), Some(Errors::ExceedMaxBatchNum));
    assert_eq!(batch.put(b"", b"4").err(), Some(Errors::KeyIsEmpty));
    assert_eq!(batch.value_size(), 1 + 1);

    let mut target = MemoryDb::new();
    target.put(b"b", b"present").unwrap();
    batch.replay(&mut target).unwrap();
    assert!(!target.has(b"c").unwrap());
    assert!(!target.has(b"b").unwrap());
    assert_eq!(target.len(), 1);

    batch.write().unwrap();
    assert!(!db.has(b"c").unwrap());
    assert_eq!(db.get(b"a").unwrap(), b"1".to_vec());
  }

  #[test]
  fn test_write_batch_reuse_after_write() {
    let db = open_memory_db();
    let mut batch = db.new_batch();
    batch.put(b"round", b"1").unwrap();
    batch.write().unwrap();

    assert_eq!(batch.put(b"round", b"2").err(), Some(Errors::BatchAlreadyFlushed));
    assert_eq!(batch.value_size(), 1);

    batch.reset();
    batch.put(b"round", b"2").unwrap();
    batch.write().unwrap();
    assert_eq!(db.get(b"round").unwrap(), b"2".to_vec());
  }

  #[test]
  fn test_write_batch_replay_into_batch() {
    let source_db = open_memory_db();
    let sink_db = open_memory_db();

    let mut source = source_db.new_batch();
    source.put(b"x", b"1").unwrap();
    source.delete(b"y").unwrap();

    sink_db.put(b"y", b"stale").unwrap();
    let mut sink = sink_db.new_batch();
    source.replay(&mut sink).unwrap();
    sink.write().unwrap();

    assert_eq!(sink_db.get(b"x").unwrap(), b"1".to_vec());
    assert!(!sink_db.has(b"y").unwrap());
    assert!(!source_db.has(b"x").unwrap());
  }
}
