use log::debug;

use crate::{
  engine::{EngineCursor, ReadTxn, StorageEngine},
  errors::Result,
  kv::KvIterator,
  option::IteratorOptions,
};

/// Ordered iterator over the snapshot taken when it was created.
///
/// Owns one read transaction and one cursor on it. Both are released by
/// [`DbIterator::release`] or on drop; until then the snapshot keeps the
/// engine from reclaiming the versions it can see.
pub struct DbIterator {
  cursor: Option<Box<dyn EngineCursor>>,
  txn: Option<Box<dyn ReadTxn>>,
  started: bool,
}

impl DbIterator {
  pub(crate) fn new(engine: &dyn StorageEngine, options: IteratorOptions) -> Result<Self> {
    let txn = engine.read_txn()?;
    let mut cursor = txn.cursor(&options);
    cursor.seek(&[]);
    Ok(Self {
      cursor: Some(cursor),
      txn: Some(txn),
      started: false,
    })
  }

  /// Repositions on the first key `>= start`; the next call to `next` lands on it.
  pub(crate) fn seek(&mut self, start: &[u8]) {
    if let Some(cursor) = self.cursor.as_mut() {
      cursor.seek(start);
      self.started = false;
    }
  }

  pub fn next(&mut self) -> bool {
    let Some(cursor) = self.cursor.as_mut() else {
      return false;
    };
    if self.started {
      cursor.next();
    } else {
      self.started = true;
    }
    cursor.valid()
  }

  /// Always `Ok`: the engine cursor has no failure mode to report.
  pub fn error(&self) -> Result<()> {
    Ok(())
  }

  /// Copy of the current key, `None` before the first `next` or once exhausted.
  pub fn key(&self) -> Option<Vec<u8>> {
    let cursor = self.positioned()?;
    cursor.key().map(|key| key.to_vec())
  }

  /// Copy of the current value. A value that can not be read is `None`.
  pub fn value(&self) -> Option<Vec<u8>> {
    let cursor = self.positioned()?;
    match cursor.value() {
      Ok(value) => Some(value.to_vec()),
      Err(e) => {
        debug!("iterator value unavailable: {}", e);
        None
      }
    }
  }

  pub fn release(&mut self) {
    if let Some(mut cursor) = self.cursor.take() {
      cursor.close();
    }
    if let Some(mut txn) = self.txn.take() {
      txn.discard();
    }
  }

  fn positioned(&self) -> Option<&dyn EngineCursor> {
    if !self.started {
      return None;
    }
    match self.cursor.as_deref() {
      Some(cursor) if cursor.valid() => Some(cursor),
      _ => None,
    }
  }
}

impl Drop for DbIterator {
  fn drop(&mut self) {
    self.release();
  }
}

impl KvIterator for DbIterator {
  fn next(&mut self) -> bool {
    DbIterator::next(self)
  }

  fn error(&self) -> Result<()> {
    DbIterator::error(self)
  }

  fn key(&self) -> Option<Vec<u8>> {
    DbIterator::key(self)
  }

  fn value(&self) -> Option<Vec<u8>> {
    DbIterator::value(self)
  }

  fn release(&mut self) {
    DbIterator::release(self)
  }
}
