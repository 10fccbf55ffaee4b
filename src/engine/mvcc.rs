//! Multi-version key-value engine.
//!
//! Every committed write is stored under `(key, version)` in a lock-free skip
//! list. A read transaction pins the latest version at the time it is opened
//! and only observes entries at or below it, so later commits stay invisible.
//! Old versions are dropped by [`StorageEngine::reclaim_space`] once no pinned
//! snapshot can reach them.

use std::{
  cmp::Ordering,
  collections::{BTreeMap, HashMap},
  fs::{self, File, OpenOptions},
  ops::Bound,
  sync::{
    atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering},
    Arc,
  },
};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use fs2::FileExt;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::{
  data::{
    log_file::LogFile,
    log_record::{log_record_key_with_version, parse_log_record_key, LogRecord, LogRecordType},
  },
  errors::{Errors, Result},
  option::{IOManagerType, IteratorOptions, Options, WriteBatchOptions},
  util,
};

use super::{EngineBatch, EngineCursor, ReadTxn, StorageEngine, WriteTxn};

pub const FILE_LOCK_NAME: &str = "flock";
const TXN_FIN_KEY: &[u8] = b"txn-fin";

type Ops = Vec<(Vec<u8>, Option<Bytes>)>;

/// Skip list key: user key ascending, then version descending, so the newest
/// version of a key is met first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VersionedKey {
  key: Vec<u8>,
  version: u64,
}

impl VersionedKey {
  fn new(key: Vec<u8>, version: u64) -> Self {
    Self { key, version }
  }
}

impl Ord for VersionedKey {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .key
      .cmp(&other.key)
      .then_with(|| other.version.cmp(&self.version))
  }
}

impl PartialOrd for VersionedKey {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

pub struct MvccEngine {
  inner: Arc<Inner>,
}

struct Inner {
  options: Options,
  // `None` marks a tombstone
  memtable: SkipMap<VersionedKey, Option<Bytes>>,
  latest_version: AtomicU64,
  commit_lock: Mutex<()>,
  compaction_lock: Mutex<()>,
  // read version -> number of open snapshots at it
  pinned: Mutex<BTreeMap<u64, usize>>,
  log_file: RwLock<Option<LogFile>>,
  lock_file: Mutex<Option<File>>,
  closed: AtomicBool,
}

impl MvccEngine {
  /// Opens a persistent engine in `options.dir_path`, replaying its commit log.
  pub fn open(options: Options) -> Result<Self> {
    let dir_path = options.dir_path.clone();
    if !dir_path.is_dir() {
      if let Err(e) = fs::create_dir_all(&dir_path) {
        error!("create database directory err: {}", e);
        return Err(Errors::FailedToCreateDatabaseDir);
      }
    }

    let lock_file = match OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(dir_path.join(FILE_LOCK_NAME))
    {
      Ok(file) => file,
      Err(e) => {
        error!("open lock file err: {}", e);
        return Err(Errors::FailedToOpenLockFile);
      }
    };
    if FileExt::try_lock_exclusive(&lock_file).is_err() {
      return Err(Errors::DatabaseIsUsing);
    }

    let io_type = if options.mmap_at_startup {
      IOManagerType::MemoryMap
    } else {
      IOManagerType::StandardFileIO
    };
    let mut log_file = LogFile::new(&dir_path, io_type)?;

    let inner = Inner::new(options, Some(lock_file));
    let valid_off = inner.replay_log(&log_file)?;

    if io_type == IOManagerType::MemoryMap {
      log_file.set_io_manager(IOManagerType::StandardFileIO)?;
    }
    let file_size = log_file.size();
    if valid_off < file_size {
      warn!(
        "discarding {} bytes of incomplete commit log tail in {:?}",
        file_size - valid_off,
        log_file.path()
      );
      log_file.truncate(valid_off)?;
      log_file.sync()?;
    }
    log_file.set_write_off(valid_off);
    *inner.log_file.write() = Some(log_file);

    info!(
      "opened engine at {:?}, latest version {}",
      dir_path,
      inner.latest_version.load(AtomicOrdering::SeqCst)
    );
    Ok(Self {
      inner: Arc::new(inner),
    })
  }

  /// Creates an engine that keeps everything in memory.
  pub fn in_memory(options: Options) -> Self {
    Self {
      inner: Arc::new(Inner::new(options, None)),
    }
  }

  #[cfg(test)]
  fn version_count(&self) -> usize {
    self.inner.memtable.len()
  }

  #[cfg(test)]
  fn log_size(&self) -> u64 {
    self.inner.log_file.read().as_ref().map_or(0, |f| f.size())
  }
}

impl StorageEngine for MvccEngine {
  fn read_txn(&self) -> Result<Box<dyn ReadTxn>> {
    Ok(Box::new(MvccReadTxn::begin(self.inner.clone())?))
  }

  fn write_txn(&self) -> Result<Box<dyn WriteTxn>> {
    Ok(Box::new(MvccWriteTxn {
      snapshot: MvccReadTxn::begin(self.inner.clone())?,
      pending: BTreeMap::new(),
      sync_writes: self.inner.options.sync_writes,
      finished: false,
    }))
  }

  fn write_batch(&self, options: &WriteBatchOptions) -> Box<dyn EngineBatch> {
    Box::new(MvccWriteBatch {
      inner: self.inner.clone(),
      ops: Vec::new(),
      options: options.clone(),
      state: BatchState::Open,
    })
  }

  fn reclaim_space(&self, discard_ratio: f32) -> Result<()> {
    let _compaction = self
      .inner
      .compaction_lock
      .try_lock()
      .ok_or(Errors::CompactionInProgress)?;
    let _commit = self.inner.commit_lock.lock();
    self.inner.check_open()?;

    let removed = self.inner.collect_versions();
    debug!("version gc removed {} stale entries", removed);

    self.inner.rewrite_log(discard_ratio)
  }

  fn close(&self) -> Result<()> {
    let _commit = self.inner.commit_lock.lock();
    if self.inner.closed.swap(true, AtomicOrdering::SeqCst) {
      return Ok(());
    }

    let sync_res = match self.inner.log_file.write().take() {
      Some(log_file) => log_file.sync(),
      None => Ok(()),
    };

    if let Some(lock_file) = self.inner.lock_file.lock().take() {
      if let Err(e) = FileExt::unlock(&lock_file) {
        error!("failed to unlock the database directory: {}", e);
      }
    }

    info!("engine closed at version {}", self.inner.latest_version.load(AtomicOrdering::SeqCst));
    sync_res
  }
}

impl Inner {
  fn new(options: Options, lock_file: Option<File>) -> Self {
    Self {
      options,
      memtable: SkipMap::new(),
      latest_version: AtomicU64::new(0),
      commit_lock: Mutex::new(()),
      compaction_lock: Mutex::new(()),
      pinned: Mutex::new(BTreeMap::new()),
      log_file: RwLock::new(None),
      lock_file: Mutex::new(lock_file),
      closed: AtomicBool::new(false),
    }
  }

  fn check_open(&self) -> Result<()> {
    if self.closed.load(AtomicOrdering::SeqCst) {
      return Err(Errors::DatabaseClosed);
    }
    Ok(())
  }

  fn pin_latest(&self) -> u64 {
    let mut pinned = self.pinned.lock();
    let version = self.latest_version.load(AtomicOrdering::SeqCst);
    *pinned.entry(version).or_insert(0) += 1;
    version
  }

  fn unpin(&self, version: u64) {
    let mut pinned = self.pinned.lock();
    if let Some(count) = pinned.get_mut(&version) {
      *count -= 1;
      if *count == 0 {
        pinned.remove(&version);
      }
    }
  }

  /// Oldest version any open snapshot may still read.
  fn watermark(&self) -> u64 {
    let pinned = self.pinned.lock();
    match pinned.keys().next() {
      Some(version) => *version,
      None => self.latest_version.load(AtomicOrdering::SeqCst),
    }
  }

  fn get_visible(&self, key: &[u8], read_version: u64) -> Option<Bytes> {
    let lookup = VersionedKey::new(key.to_vec(), read_version);
    let entry = self.memtable.lower_bound(Bound::Included(&lookup))?;
    if entry.key().key != key {
      return None;
    }
    entry.value().clone()
  }

  /// Applies `ops` as one new version. Readers see all of it or none of it.
  fn commit(&self, ops: &[(Vec<u8>, Option<Bytes>)], sync: bool) -> Result<()> {
    let _commit = self.commit_lock.lock();
    self.check_open()?;
    if ops.is_empty() {
      return Ok(());
    }

    let version = self.latest_version.load(AtomicOrdering::SeqCst) + 1;
    if let Some(log_file) = self.log_file.read().as_ref() {
      let write_off = log_file.get_write_off();
      if let Err(e) = append_commit(log_file, ops, version, sync) {
        self.rollback_log(log_file, write_off);
        return Err(e);
      }
    }

    for (key, value) in ops {
      self
        .memtable
        .insert(VersionedKey::new(key.clone(), version), value.clone());
    }
    self.latest_version.store(version, AtomicOrdering::SeqCst);
    Ok(())
  }

  /// Cuts a failed commit group off the log so a reopen can not replay it.
  /// If the cut fails the log can no longer be trusted and the engine stops
  /// accepting operations. The new length reaches disk with the next sync.
  fn rollback_log(&self, log_file: &LogFile, write_off: u64) {
    if let Err(e) = log_file.truncate(write_off) {
      error!(
        "failed to roll back commit log to offset {}: {}, closing engine",
        write_off, e
      );
      self.closed.store(true, AtomicOrdering::SeqCst);
      return;
    }
    if let Err(e) = log_file.sync() {
      warn!("rolled back commit log to offset {} but sync failed: {}", write_off, e);
    }
  }

  /// Loads every complete commit group from the log and returns the offset
  /// right after the last one.
  fn replay_log(&self, log_file: &LogFile) -> Result<u64> {
    let mut groups: HashMap<u64, Ops> = HashMap::new();
    let mut offset = 0;
    let mut valid_off = 0;

    loop {
      let read = match log_file.read_log_record(offset) {
        Ok(read) => read,
        Err(Errors::ReadLogFileEOF) => break,
        Err(Errors::InvalidLogRecordCrc) => {
          warn!("corrupted commit log record at offset {}", offset);
          break;
        }
        Err(e) => return Err(e),
      };
      let Some((key, version)) = parse_log_record_key(&read.record.key) else {
        warn!("malformed commit log key at offset {}", offset);
        break;
      };
      offset += read.size as u64;

      match read.record.rec_type {
        LogRecordType::Normal => groups
          .entry(version)
          .or_default()
          .push((key, Some(Bytes::from(read.record.value)))),
        LogRecordType::Deleted => groups.entry(version).or_default().push((key, None)),
        LogRecordType::TxnFinished => {
          for (key, value) in groups.remove(&version).unwrap_or_default() {
            self.memtable.insert(VersionedKey::new(key, version), value);
          }
          self.latest_version.fetch_max(version, AtomicOrdering::SeqCst);
          valid_off = offset;
        }
      }
    }

    Ok(valid_off)
  }

  /// Removes versions no open snapshot can reach. The newest version at or
  /// below the watermark is kept unless it is a tombstone.
  fn collect_versions(&self) -> usize {
    let watermark = self.watermark();
    let mut removed = 0;
    let mut current: Option<Vec<u8>> = None;
    let mut covered = false;

    for entry in self.memtable.iter() {
      let vk = entry.key();
      if current.as_deref() != Some(vk.key.as_slice()) {
        current = Some(vk.key.clone());
        covered = false;
      }
      if vk.version > watermark {
        continue;
      }
      if covered || entry.value().is_none() {
        entry.remove();
        removed += 1;
      }
      covered = true;
    }

    removed
  }

  /// Rewrites the commit log with only live pairs once enough of it is stale.
  /// Must run under the commit lock.
  fn rewrite_log(&self, discard_ratio: f32) -> Result<()> {
    let mut log_guard = self.log_file.write();
    let Some(log_file) = log_guard.as_mut() else {
      return Ok(());
    };
    let total_size = log_file.size();
    if total_size == 0 {
      return Ok(());
    }

    let version = self.latest_version.load(AtomicOrdering::SeqCst);
    let mut live: Ops = Vec::new();
    let mut last_key: Option<Vec<u8>> = None;
    for entry in self.memtable.iter() {
      let vk = entry.key();
      if last_key.as_deref() == Some(vk.key.as_slice()) {
        continue;
      }
      last_key = Some(vk.key.clone());
      if let Some(value) = entry.value() {
        live.push((vk.key.clone(), Some(value.clone())));
      }
    }

    let enc = encode_commit(&live, version);
    let stale_ratio = total_size.saturating_sub(enc.len() as u64) as f32 / total_size as f32;
    if stale_ratio < discard_ratio {
      debug!(
        "commit log stale ratio {:.2} below {:.2}, skip rewrite",
        stale_ratio, discard_ratio
      );
      return Ok(());
    }

    let dir_path = &self.options.dir_path;
    if enc.len() as u64 >= util::file::available_disk_space(dir_path) {
      return Err(Errors::CompactionNoEnoughSpace);
    }

    let rewrite_file = LogFile::new_rewrite_file(dir_path)?;
    rewrite_file.write(&enc)?;
    rewrite_file.sync()?;
    if let Err(e) = fs::rename(rewrite_file.path(), log_file.path()) {
      error!("failed to replace commit log: {}", e);
      return Err(Errors::FailedToRewriteLogFile);
    }
    log_file.set_io_manager(IOManagerType::StandardFileIO)?;
    log_file.set_write_off(enc.len() as u64);

    info!("rewrote commit log from {} to {} bytes", total_size, enc.len());
    Ok(())
  }
}

fn append_commit(
  log_file: &LogFile,
  ops: &[(Vec<u8>, Option<Bytes>)],
  version: u64,
  sync: bool,
) -> Result<()> {
  log_file.write(&encode_commit(ops, version))?;
  if sync {
    log_file.sync()?;
  }
  Ok(())
}

/// One commit group: a record per operation followed by a finish marker.
fn encode_commit(ops: &[(Vec<u8>, Option<Bytes>)], version: u64) -> Vec<u8> {
  let mut buf = Vec::new();
  for (key, value) in ops {
    let record = match value {
      Some(value) => LogRecord {
        key: log_record_key_with_version(key, version),
        value: value.to_vec(),
        rec_type: LogRecordType::Normal,
      },
      None => LogRecord {
        key: log_record_key_with_version(key, version),
        value: Default::default(),
        rec_type: LogRecordType::Deleted,
      },
    };
    buf.extend_from_slice(&record.encode());
  }

  let finish = LogRecord {
    key: log_record_key_with_version(TXN_FIN_KEY, version),
    value: Default::default(),
    rec_type: LogRecordType::TxnFinished,
  };
  buf.extend_from_slice(&finish.encode());
  buf
}

struct MvccReadTxn {
  inner: Arc<Inner>,
  read_version: u64,
  discarded: bool,
}

impl MvccReadTxn {
  fn begin(inner: Arc<Inner>) -> Result<Self> {
    inner.check_open()?;
    let read_version = inner.pin_latest();
    Ok(Self {
      inner,
      read_version,
      discarded: false,
    })
  }
}

impl ReadTxn for MvccReadTxn {
  fn get(&self, key: &[u8]) -> Result<Bytes> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }
    self.inner.check_open()?;
    self
      .inner
      .get_visible(key, self.read_version)
      .ok_or(Errors::KeyNotFound)
  }

  fn cursor(&self, options: &IteratorOptions) -> Box<dyn EngineCursor> {
    Box::new(MvccCursor {
      inner: self.inner.clone(),
      read_version: self.read_version,
      prefix: options.prefix.clone(),
      current: None,
      closed: false,
    })
  }

  fn discard(&mut self) {
    if !self.discarded {
      self.discarded = true;
      self.inner.unpin(self.read_version);
    }
  }
}

impl Drop for MvccReadTxn {
  fn drop(&mut self) {
    self.discard();
  }
}

/// Buffers writes over a pinned snapshot and commits them as one version.
/// Reads see the buffered writes first; cursors see the snapshot only.
struct MvccWriteTxn {
  snapshot: MvccReadTxn,
  pending: BTreeMap<Vec<u8>, Option<Bytes>>,
  sync_writes: bool,
  finished: bool,
}

impl MvccWriteTxn {
  fn stage(&mut self, key: &[u8], value: Option<Bytes>) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }
    if self.finished {
      return Err(Errors::TxnAlreadyFinished);
    }
    self.pending.insert(key.to_vec(), value);
    Ok(())
  }
}

impl ReadTxn for MvccWriteTxn {
  fn get(&self, key: &[u8]) -> Result<Bytes> {
    match self.pending.get(key) {
      Some(Some(value)) => Ok(value.clone()),
      Some(None) => Err(Errors::KeyNotFound),
      None => self.snapshot.get(key),
    }
  }

  fn cursor(&self, options: &IteratorOptions) -> Box<dyn EngineCursor> {
    self.snapshot.cursor(options)
  }

  fn discard(&mut self) {
    self.finished = true;
    self.pending.clear();
    self.snapshot.discard();
  }
}

impl WriteTxn for MvccWriteTxn {
  fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
    self.stage(key, Some(Bytes::copy_from_slice(value)))
  }

  fn delete(&mut self, key: &[u8]) -> Result<()> {
    self.stage(key, None)
  }

  fn commit(&mut self) -> Result<()> {
    if self.finished {
      return Err(Errors::TxnAlreadyFinished);
    }
    let ops: Ops = std::mem::take(&mut self.pending).into_iter().collect();
    let res = self.snapshot.inner.commit(&ops, self.sync_writes);
    self.discard();
    res
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
  Open,
  Flushed,
  Cancelled,
}

struct MvccWriteBatch {
  inner: Arc<Inner>,
  ops: Ops,
  options: WriteBatchOptions,
  state: BatchState,
}

impl MvccWriteBatch {
  fn append(&mut self, key: &[u8], value: Option<Bytes>) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }
    match self.state {
      BatchState::Flushed => return Err(Errors::BatchAlreadyFlushed),
      BatchState::Cancelled => return Err(Errors::BatchCancelled),
      BatchState::Open => {}
    }
    if self.ops.len() >= self.options.max_batch_num {
      return Err(Errors::ExceedMaxBatchNum);
    }
    self.ops.push((key.to_vec(), value));
    Ok(())
  }
}

impl EngineBatch for MvccWriteBatch {
  fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
    self.append(key, Some(Bytes::copy_from_slice(value)))
  }

  fn delete(&mut self, key: &[u8]) -> Result<()> {
    self.append(key, None)
  }

  fn flush(&mut self) -> Result<()> {
    match self.state {
      BatchState::Cancelled => Err(Errors::BatchCancelled),
      BatchState::Flushed => Ok(()),
      BatchState::Open => {
        self.inner.commit(&self.ops, self.options.sync_writes)?;
        debug!("flushed write batch with {} operations", self.ops.len());
        self.ops.clear();
        self.state = BatchState::Flushed;
        Ok(())
      }
    }
  }

  fn cancel(&mut self) {
    self.ops.clear();
    self.state = BatchState::Cancelled;
  }
}

struct MvccCursor {
  inner: Arc<Inner>,
  read_version: u64,
  prefix: Vec<u8>,
  current: Option<(Vec<u8>, Bytes)>,
  closed: bool,
}

impl MvccCursor {
  /// First live pair at or after `from` that is visible at the read version
  /// and carries the prefix.
  fn find_from(&self, from: Bound<&VersionedKey>) -> Option<(Vec<u8>, Bytes)> {
    let mut entry = self.inner.memtable.lower_bound(from);
    while let Some(e) = entry {
      let vk = e.key();
      if !vk.key.starts_with(&self.prefix) {
        return None;
      }
      if vk.version > self.read_version {
        entry = e.next();
        continue;
      }
      if let Some(value) = e.value() {
        return Some((vk.key.clone(), value.clone()));
      }
      // tombstone, skip the older versions of this key
      let skip = VersionedKey::new(vk.key.clone(), 0);
      entry = self.inner.memtable.lower_bound(Bound::Excluded(&skip));
    }
    None
  }
}

impl EngineCursor for MvccCursor {
  fn seek(&mut self, key: &[u8]) {
    if self.closed {
      return;
    }
    let target = if key < self.prefix.as_slice() {
      self.prefix.clone()
    } else {
      key.to_vec()
    };
    let from = VersionedKey::new(target, u64::MAX);
    self.current = self.find_from(Bound::Included(&from));
  }

  fn next(&mut self) {
    if self.closed {
      return;
    }
    if let Some((key, _)) = self.current.take() {
      let from = VersionedKey::new(key, 0);
      self.current = self.find_from(Bound::Excluded(&from));
    }
  }

  fn valid(&self) -> bool {
    self.current.is_some()
  }

  fn key(&self) -> Option<&[u8]> {
    self.current.as_ref().map(|(key, _)| key.as_slice())
  }

  fn value(&self) -> Result<Bytes> {
    self
      .current
      .as_ref()
      .map(|(_, value)| value.clone())
      .ok_or(Errors::KeyNotFound)
  }

  fn close(&mut self) {
    self.closed = true;
    self.current = None;
  }
}
