use std::{path::Path, sync::Arc};

use log::{error, info};

use crate::{
  batch::WriteBatch,
  engine::{open_engine, ReadTxn, StorageEngine, WriteTxn},
  errors::{Errors, Result},
  iterator::DbIterator,
  kv::{
    Batcher, Compacter, Iteratee, KeyValueReader, KeyValueStater, KeyValueStore, KeyValueWriter,
  },
  option::{IteratorOptions, Options, WriteBatchOptions},
};

/// Key-value store handle over a transactional engine.
///
/// Point operations each run in their own short-lived transaction and may be
/// called from many threads at once.
pub struct Database {
  options: Arc<Options>,
  engine: Arc<dyn StorageEngine>,
}

impl Database {
  /// Opens (creating if needed) the database stored in `dir_path` with
  /// default options.
  pub fn open<P>(dir_path: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    Self::open_with_options(Options {
      dir_path: dir_path.as_ref().to_path_buf(),
      ..Default::default()
    })
  }

  pub fn open_with_options(options: Options) -> Result<Self> {
    options.check()?;

    let engine = open_engine(&options)?;
    info!(
      "database opened at {:?} with {:?} engine",
      options.dir_path, options.engine_type
    );

    Ok(Self {
      options: Arc::new(options),
      engine,
    })
  }

  fn view<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&dyn ReadTxn) -> Result<T>,
  {
    let mut txn = self.engine.read_txn()?;
    let res = f(txn.as_ref());
    txn.discard();
    res
  }

  fn update<F>(&self, f: F) -> Result<()>
  where
    F: FnOnce(&mut dyn WriteTxn) -> Result<()>,
  {
    let mut txn = self.engine.write_txn()?;
    if let Err(e) = f(txn.as_mut()) {
      txn.discard();
      return Err(e);
    }
    txn.commit()
  }

  pub fn has(&self, key: &[u8]) -> Result<bool> {
    match self.view(|txn| txn.get(key)) {
      Ok(_) => Ok(true),
      Err(Errors::KeyNotFound) => Ok(false),
      Err(e) => Err(e),
    }
  }

  pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
    self.view(|txn| txn.get(key).map(|value| value.to_vec()))
  }

  pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
    self.update(|txn| txn.set(key, value))
  }

  pub fn delete(&self, key: &[u8]) -> Result<()> {
    self.update(|txn| txn.delete(key))
  }

  pub fn new_batch(&self) -> WriteBatch {
    WriteBatch::new(self.engine.clone(), WriteBatchOptions::default())
  }

  pub fn new_batch_with_options(&self, options: WriteBatchOptions) -> Result<WriteBatch> {
    options.check()?;
    Ok(WriteBatch::new(self.engine.clone(), options))
  }

  /// Iterates the whole keyspace in byte order.
  pub fn new_iterator(&self) -> Result<DbIterator> {
    DbIterator::new(self.engine.as_ref(), IteratorOptions::default())
  }

  /// Iterates from the first key `>= start`.
  pub fn new_iterator_with_start(&self, start: &[u8]) -> Result<DbIterator> {
    let mut iter = DbIterator::new(self.engine.as_ref(), IteratorOptions::default())?;
    iter.seek(start);
    Ok(iter)
  }

  /// Iterates only the keys carrying `prefix`.
  pub fn new_iterator_with_prefix(&self, prefix: &[u8]) -> Result<DbIterator> {
    DbIterator::new(
      self.engine.as_ref(),
      IteratorOptions {
        prefix: prefix.to_vec(),
      },
    )
  }

  /// No statistics are exposed yet; always empty.
  pub fn stat(&self, _property: &str) -> Result<String> {
    Ok(String::new())
  }

  /// Discards deleted and overwritten versions.
  ///
  /// The engine only reclaims the whole store, so `start` and `limit` are
  /// accepted but not used. Logical content never changes.
  pub fn compact(&self, _start: Option<&[u8]>, _limit: Option<&[u8]>) -> Result<()> {
    self.engine.reclaim_space(self.options.gc_discard_ratio)
  }

  pub fn close(&self) -> Result<()> {
    self.engine.close()?;
    info!("database closed at {:?}", self.options.dir_path);
    Ok(())
  }
}

impl Drop for Database {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      error!("error whilst closing database: {}", e);
    }
  }
}

impl KeyValueReader for Database {
  fn has(&self, key: &[u8]) -> Result<bool> {
    Database::has(self, key)
  }

  fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
    Database::get(self, key)
  }
}

impl KeyValueWriter for Database {
  fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
    Database::put(self, key, value)
  }

  fn delete(&mut self, key: &[u8]) -> Result<()> {
    Database::delete(self, key)
  }
}

impl KeyValueStater for Database {
  fn stat(&self, property: &str) -> Result<String> {
    Database::stat(self, property)
  }
}

impl Compacter for Database {
  fn compact(&self, start: Option<&[u8]>, limit: Option<&[u8]>) -> Result<()> {
    Database::compact(self, start, limit)
  }
}

impl Batcher for Database {
  type Batch = WriteBatch;

  fn new_batch(&self) -> WriteBatch {
    Database::new_batch(self)
  }
}

impl Iteratee for Database {
  type Iter = DbIterator;

  fn new_iterator(&self) -> Result<DbIterator> {
    Database::new_iterator(self)
  }

  fn new_iterator_with_start(&self, start: &[u8]) -> Result<DbIterator> {
    Database::new_iterator_with_start(self, start)
  }

  fn new_iterator_with_prefix(&self, prefix: &[u8]) -> Result<DbIterator> {
    Database::new_iterator_with_prefix(self, prefix)
  }
}

impl KeyValueStore for Database {
  fn close(&self) -> Result<()> {
    Database::close(self)
  }
}
