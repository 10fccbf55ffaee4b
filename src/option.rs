use lazy_static::lazy_static;
use std::path::PathBuf;

use crate::errors::{Errors, Result};

lazy_static! {
  pub static ref DEFAULT_DIR_PATH: PathBuf = std::env::temp_dir().join("snapkv");
}

#[derive(Debug, Clone)]
pub struct Options {
  pub dir_path: PathBuf,

  pub engine_type: EngineType,

  /// Sync the commit log after every point write.
  pub sync_writes: bool,

  /// Replay the commit log through a memory map when opening.
  pub mmap_at_startup: bool,

  /// Minimum share of the commit log that must be stale before
  /// `Compact` rewrites it.
  pub gc_discard_ratio: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
  /// Multi-version store backed by a commit log in `dir_path`.
  Persistent,

  /// Multi-version store that keeps nothing on disk.
  InMemory,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      dir_path: DEFAULT_DIR_PATH.clone(),
      engine_type: EngineType::Persistent,
      sync_writes: false,
      mmap_at_startup: true,
      gc_discard_ratio: 0.5,
    }
  }
}

impl Options {
  pub(crate) fn check(&self) -> Result<()> {
    if self.dir_path.as_os_str().is_empty() {
      return Err(Errors::DirPathIsEmpty);
    }
    if self.gc_discard_ratio <= 0.0 || self.gc_discard_ratio > 1.0 {
      return Err(Errors::InvalidGcDiscardRatio);
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
  pub prefix: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
  pub max_batch_num: usize,

  pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
  fn default() -> Self {
    Self {
      max_batch_num: 10_000,
      sync_writes: true,
    }
  }
}

impl WriteBatchOptions {
  pub(crate) fn check(&self) -> Result<()> {
    if self.max_batch_num == 0 {
      return Err(Errors::InvalidMaxBatchNum);
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOManagerType {
  StandardFileIO,

  MemoryMap,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_options_check() {
    assert!(Options::default().check().is_ok());

    let opts = Options {
      dir_path: PathBuf::new(),
      ..Default::default()
    };
    assert_eq!(opts.check().err(), Some(Errors::DirPathIsEmpty));

    for ratio in [0.0, -0.5, 1.5] {
      let opts = Options {
        gc_discard_ratio: ratio,
        ..Default::default()
      };
      assert_eq!(opts.check().err(), Some(Errors::InvalidGcDiscardRatio));
    }
  }

  #[test]
  fn test_write_batch_options_check() {
    assert!(WriteBatchOptions::default().check().is_ok());

    let opts = WriteBatchOptions {
      max_batch_num: 0,
      sync_writes: false,
    };
    assert_eq!(opts.check().err(), Some(Errors::InvalidMaxBatchNum));
  }
}
