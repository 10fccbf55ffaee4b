use std::{
  fs::{File, OpenOptions},
  io::{ErrorKind, Write},
  os::unix::fs::FileExt,
  path::Path,
  sync::Arc,
};

use log::error;
use parking_lot::RwLock;

use crate::errors::{Errors, Result};

use super::IOManager;

pub struct FileIO {
  fd: Arc<RwLock<File>>,
}

impl FileIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    match OpenOptions::new()
      .create(true)
      .read(true)
      .append(true)
      .open(file_name)
    {
      Ok(file) => Ok(FileIO {
        fd: Arc::new(RwLock::new(file)),
      }),
      Err(e) => {
        error!("failed to open log file: {}", e);
        Err(Errors::FailedToOpenLogFile)
      }
    }
  }
}

impl IOManager for FileIO {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    let read_guard = self.fd.read();
    match read_guard.read_exact_at(buf, offset) {
      Ok(()) => Ok(buf.len()),
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Errors::ReadLogFileEOF),
      Err(e) => {
        error!("read from log file err: {}", e);
        Err(Errors::FailedToReadFromLogFile)
      }
    }
  }

  fn write(&self, buf: &[u8]) -> Result<usize> {
    let mut write_guard = self.fd.write();
    match write_guard.write_all(buf) {
      Ok(()) => Ok(buf.len()),
      Err(e) => {
        error!("write to log file err: {}", e);
        Err(Errors::FailedToWriteToLogFile)
      }
    }
  }

  fn sync(&self) -> Result<()> {
    let read_guard = self.fd.read();
    if let Err(e) = read_guard.sync_all() {
      error!("failed to sync log file: {}", e);
      return Err(Errors::FailedToSyncLogFile);
    }
    Ok(())
  }

  fn size(&self) -> u64 {
    let read_guard = self.fd.read();
    match read_guard.metadata() {
      Ok(meta) => meta.len(),
      Err(e) => {
        error!("failed to stat log file: {}", e);
        0
      }
    }
  }

  fn truncate(&self, len: u64) -> Result<()> {
    let write_guard = self.fd.write();
    if let Err(e) = write_guard.set_len(len) {
      error!("failed to truncate log file: {}", e);
      return Err(Errors::FailedToWriteToLogFile);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_file_io_write_and_read() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("io-write-read.log");

    let fio = FileIO::new(&path).expect("failed to open file");
    assert_eq!(fio.write(b"key-a").unwrap(), 5);
    assert_eq!(fio.write(b"key-bc").unwrap(), 6);
    assert!(fio.sync().is_ok());
    assert_eq!(fio.size(), 11);

    let mut buf = [0u8; 6];
    assert_eq!(fio.read(&mut buf, 5).unwrap(), 6);
    assert_eq!(&buf, b"key-bc");
  }

  #[test]
  fn test_file_io_read_past_end() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("io-eof.log");

    let fio = FileIO::new(&path).expect("failed to open file");
    fio.write(b"short").unwrap();

    let mut buf = [0u8; 10];
    assert_eq!(fio.read(&mut buf, 0).err(), Some(Errors::ReadLogFileEOF));
    assert_eq!(fio.read(&mut buf, 100).err(), Some(Errors::ReadLogFileEOF));
  }

  #[test]
  fn test_file_io_truncate_then_append() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("io-truncate.log");

    let fio = FileIO::new(&path).expect("failed to open file");
    fio.write(b"kept").unwrap();
    fio.write(b"dropped").unwrap();
    fio.truncate(4).unwrap();
    assert_eq!(fio.size(), 4);

    fio.write(b"-next").unwrap();
    let mut buf = [0u8; 9];
    fio.read(&mut buf, 0).unwrap();
    assert_eq!(&buf, b"kept-next");
  }
}
