//! The storage engine seam.
//!
//! `Database` talks to its engine only through the traits below, so any
//! transactional store offering read snapshots, write transactions, an atomic
//! write batch and a prefix cursor can back it.

pub mod mvcc;

use std::sync::Arc;

use bytes::Bytes;

use crate::{
  errors::Result,
  option::{EngineType, IteratorOptions, Options, WriteBatchOptions},
};

use self::mvcc::MvccEngine;

pub trait StorageEngine: Sync + Send {
  /// Opens a read-only transaction pinned to the latest committed state.
  fn read_txn(&self) -> Result<Box<dyn ReadTxn>>;

  /// Opens a read-write transaction. Its writes become visible atomically on commit.
  fn write_txn(&self) -> Result<Box<dyn WriteTxn>>;

  /// Creates an empty native write batch.
  fn write_batch(&self, options: &WriteBatchOptions) -> Box<dyn EngineBatch>;

  /// Discards stale versions. Range granularity is not supported, the whole
  /// store is considered.
  fn reclaim_space(&self, discard_ratio: f32) -> Result<()>;

  fn close(&self) -> Result<()>;
}

pub trait ReadTxn: Send {
  /// Fails with `KeyNotFound` when the key has no live value in this snapshot.
  fn get(&self, key: &[u8]) -> Result<Bytes>;

  /// Creates a cursor over this transaction's snapshot, positioned nowhere
  /// until the first `seek`.
  fn cursor(&self, options: &IteratorOptions) -> Box<dyn EngineCursor>;

  /// Releases the snapshot. Calling it again has no effect.
  fn discard(&mut self);
}

pub trait WriteTxn: ReadTxn {
  fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

  fn delete(&mut self, key: &[u8]) -> Result<()>;

  fn commit(&mut self) -> Result<()>;
}

pub trait EngineBatch: Send {
  fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

  fn delete(&mut self, key: &[u8]) -> Result<()>;

  /// Commits every queued operation as one atomic write.
  fn flush(&mut self) -> Result<()>;

  /// Drops every queued operation. The batch rejects further writes.
  fn cancel(&mut self);
}

pub trait EngineCursor: Send {
  /// Moves to the first visible key that is `>= key` and carries the prefix.
  fn seek(&mut self, key: &[u8]);

  fn next(&mut self);

  fn valid(&self) -> bool;

  fn key(&self) -> Option<&[u8]>;

  fn value(&self) -> Result<Bytes>;

  fn close(&mut self);
}

/// Opens the engine selected by `options.engine_type`.
pub fn open_engine(options: &Options) -> Result<Arc<dyn StorageEngine>> {
  match options.engine_type {
    EngineType::Persistent => Ok(Arc::new(MvccEngine::open(options.clone())?)),
    EngineType::InMemory => Ok(Arc::new(MvccEngine::in_memory(options.clone()))),
  }
}
