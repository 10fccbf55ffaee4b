use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use bytes::{Buf, BytesMut};
use log::error;
use parking_lot::RwLock;
use prost::{decode_length_delimiter, length_delimiter_len};

use crate::{
  errors::{Errors, Result},
  fio::{new_io_manager, IOManager},
  option::IOManagerType,
};

use super::log_record::{max_log_record_header_size, LogRecord, LogRecordType, ReadLogRecord};

pub const LOG_FILE_NAME: &str = "COMMIT.log";
pub const REWRITE_LOG_FILE_NAME: &str = "COMMIT.log.rewrite";

/// Append-only file holding the engine's committed writes.
pub struct LogFile {
  path: PathBuf,
  write_off: Arc<RwLock<u64>>,
  io_manager: Box<dyn IOManager>,
}

impl LogFile {
  pub fn new<P>(dir_path: P, io_type: IOManagerType) -> Result<LogFile>
  where
    P: AsRef<Path>,
  {
    Self::open_file(get_log_file_path(dir_path), io_type)
  }

  /// Opens an empty scratch file next to the commit log for rewriting.
  pub fn new_rewrite_file<P>(dir_path: P) -> Result<LogFile>
  where
    P: AsRef<Path>,
  {
    let path = dir_path.as_ref().join(REWRITE_LOG_FILE_NAME);
    if path.is_file() {
      if let Err(e) = std::fs::remove_file(&path) {
        error!("failed to remove stale rewrite file: {}", e);
        return Err(Errors::FailedToRewriteLogFile);
      }
    }
    Self::open_file(path, IOManagerType::StandardFileIO)
  }

  fn open_file(path: PathBuf, io_type: IOManagerType) -> Result<LogFile> {
    let io_manager = new_io_manager(&path, io_type)?;
    Ok(LogFile {
      path,
      write_off: Arc::new(RwLock::new(0)),
      io_manager,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn get_write_off(&self) -> u64 {
    *self.write_off.read()
  }

  pub fn set_write_off(&self, offset: u64) {
    *self.write_off.write() = offset;
  }

  pub fn size(&self) -> u64 {
    self.io_manager.size()
  }

  /// Reads the record starting at `offset`.
  ///
  /// Returns `ReadLogFileEOF` at the end of the file or when the record is
  /// cut short, and `InvalidLogRecordCrc` when its bytes do not check out.
  pub fn read_log_record(&self, offset: u64) -> Result<ReadLogRecord> {
    let file_size = self.io_manager.size();
    if offset >= file_size {
      return Err(Errors::ReadLogFileEOF);
    }

    let header_size = max_log_record_header_size().min((file_size - offset) as usize);
    let mut header_buf = BytesMut::zeroed(header_size);
    self.io_manager.read(&mut header_buf, offset)?;

    let rec_type = LogRecordType::from_u8(header_buf.get_u8()).ok_or(Errors::InvalidLogRecordCrc)?;
    let key_size =
      decode_length_delimiter(&mut header_buf).map_err(|_| Errors::InvalidLogRecordCrc)?;
    let value_size =
      decode_length_delimiter(&mut header_buf).map_err(|_| Errors::InvalidLogRecordCrc)?;

    let actual_header_size = std::mem::size_of::<u8>()
      + length_delimiter_len(key_size)
      + length_delimiter_len(value_size);

    // sizes come from disk, never allocate past the end of the file
    let remaining = file_size - offset;
    let record_size = (actual_header_size as u64)
      .checked_add(key_size as u64)
      .and_then(|n| n.checked_add(value_size as u64))
      .and_then(|n| n.checked_add(4));
    match record_size {
      Some(n) if n <= remaining => {}
      _ => return Err(Errors::ReadLogFileEOF),
    }

    let mut kv_buf = BytesMut::zeroed(key_size + value_size + 4);
    self.io_manager.read(&mut kv_buf, offset + actual_header_size as u64)?;

    let record = LogRecord {
      key: kv_buf[..key_size].to_vec(),
      value: kv_buf[key_size..key_size + value_size].to_vec(),
      rec_type,
    };

    kv_buf.advance(key_size + value_size);
    if kv_buf.get_u32() != record.get_crc() {
      return Err(Errors::InvalidLogRecordCrc);
    }

    Ok(ReadLogRecord {
      record,
      size: actual_header_size + key_size + value_size + 4,
    })
  }

  pub fn write(&self, buf: &[u8]) -> Result<usize> {
    let n_bytes = self.io_manager.write(buf)?;
    *self.write_off.write() += n_bytes as u64;
    Ok(n_bytes)
  }

  pub fn sync(&self) -> Result<()> {
    self.io_manager.sync()
  }

  /// Drops everything past `offset` and appends from there.
  pub fn truncate(&self, offset: u64) -> Result<()> {
    self.io_manager.truncate(offset)?;
    self.set_write_off(offset);
    Ok(())
  }

  pub fn set_io_manager(&mut self, io_type: IOManagerType) -> Result<()> {
    self.io_manager = new_io_manager(&self.path, io_type)?;
    Ok(())
  }

  #[cfg(test)]
  pub(crate) fn replace_io_manager(&mut self, io_manager: Box<dyn IOManager>) {
    self.io_manager = io_manager;
  }
}

pub fn get_log_file_path<P>(dir_path: P) -> PathBuf
where
  P: AsRef<Path>,
{
  dir_path.as_ref().join(LOG_FILE_NAME)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(key: &str, value: &str, rec_type: LogRecordType) -> LogRecord {
    LogRecord {
      key: key.as_bytes().to_vec(),
      value: value.as_bytes().to_vec(),
      rec_type,
    }
  }

  #[test]
  fn test_new_log_file() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let log_file = LogFile::new(dir.path(), IOManagerType::StandardFileIO)
      .expect("failed to open log file");
    assert_eq!(log_file.get_write_off(), 0);
    assert_eq!(log_file.size(), 0);
    assert_eq!(log_file.path(), dir.path().join(LOG_FILE_NAME));
  }

  #[test]
  fn test_log_file_write_and_read() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let log_file = LogFile::new(dir.path(), IOManagerType::StandardFileIO)
      .expect("failed to open log file");

    let rec1 = record("alpha", "one", LogRecordType::Normal);
    let rec2 = record("beta", "", LogRecordType::Deleted);
    let rec3 = record("fin", "", LogRecordType::TxnFinished);
    for rec in [&rec1, &rec2, &rec3] {
      log_file.write(&rec.encode()).expect("failed to write record");
    }
    log_file.sync().unwrap();
    assert_eq!(log_file.get_write_off(), log_file.size());

    let mut offset = 0;
    for expected in [rec1, rec2, rec3] {
      let read = log_file.read_log_record(offset).expect("failed to read record");
      assert_eq!(read.record, expected);
      assert_eq!(read.size, expected.encoded_len());
      offset += read.size as u64;
    }
    assert_eq!(log_file.read_log_record(offset).err(), Some(Errors::ReadLogFileEOF));
  }

  #[test]
  fn test_log_file_torn_and_corrupted_tail() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let log_file = LogFile::new(dir.path(), IOManagerType::StandardFileIO)
      .expect("failed to open log file");

    let rec = record("gamma", "three", LogRecordType::Normal);
    let enc = rec.encode();
    log_file.write(&enc).unwrap();
    // half a record
    log_file.write(&enc[..enc.len() / 2]).unwrap();
    assert_eq!(
      log_file.read_log_record(enc.len() as u64).err(),
      Some(Errors::ReadLogFileEOF)
    );

    let dir2 = tempfile::tempdir().expect("failed to create temp dir");
    let log_file2 = LogFile::new(dir2.path(), IOManagerType::StandardFileIO)
      .expect("failed to open log file");
    let mut bad = enc.clone();
    let last = bad.len() - 1;
    bad[last] ^= 0xff;
    log_file2.write(&bad).unwrap();
    assert_eq!(log_file2.read_log_record(0).err(), Some(Errors::InvalidLogRecordCrc));
  }

  #[test]
  fn test_log_file_oversized_header() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let log_file = LogFile::new(dir.path(), IOManagerType::StandardFileIO)
      .expect("failed to open log file");

    let enc = record("epsilon", "five", LogRecordType::Normal).encode();
    log_file.write(&enc).unwrap();
    // key and value sizes far beyond the file
    let header = [1u8, 0xff, 0xff, 0xff, 0xff, 0x7f, 0xff, 0xff, 0xff, 0xff, 0x7f, 0, 0];
    log_file.write(&header).unwrap();

    assert!(log_file.read_log_record(0).is_ok());
    assert_eq!(
      log_file.read_log_record(enc.len() as u64).err(),
      Some(Errors::ReadLogFileEOF)
    );
  }

  #[test]
  fn test_log_file_truncate() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let log_file = LogFile::new(dir.path(), IOManagerType::StandardFileIO)
      .expect("failed to open log file");

    let first = record("keep", "1", LogRecordType::Normal);
    let second = record("drop", "2", LogRecordType::Normal);
    log_file.write(&first.encode()).unwrap();
    let off = log_file.get_write_off();
    log_file.write(&second.encode()).unwrap();

    log_file.truncate(off).unwrap();
    assert_eq!(log_file.get_write_off(), off);
    assert_eq!(log_file.size(), off);
    assert_eq!(log_file.read_log_record(off).err(), Some(Errors::ReadLogFileEOF));

    log_file.write(&second.encode()).unwrap();
    assert_eq!(log_file.read_log_record(off).unwrap().record, second);
  }

  #[test]
  fn test_log_file_read_through_mmap() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let rec = record("delta", "four", LogRecordType::Normal);
    {
      let log_file = LogFile::new(dir.path(), IOManagerType::StandardFileIO)
        .expect("failed to open log file");
      log_file.write(&rec.encode()).unwrap();
      log_file.sync().unwrap();
    }

    let mut log_file = LogFile::new(dir.path(), IOManagerType::MemoryMap)
      .expect("failed to map log file");
    let read = log_file.read_log_record(0).expect("failed to read record");
    assert_eq!(read.record, rec);

    log_file.set_io_manager(IOManagerType::StandardFileIO).unwrap();
    log_file.set_write_off(read.size as u64);
    log_file.write(&rec.encode()).unwrap();
    assert_eq!(log_file.size(), 2 * read.size as u64);
  }
}
