use std::{fs::OpenOptions, path::Path};

use log::{debug, error};
use memmap2::{Advice, Mmap};

use crate::errors::{Errors, Result};

use super::IOManager;

/// Read-only view of a log file, used to replay it quickly on open.
///
/// The map covers the file as it was when opened; bytes appended later are
/// not visible through it.
pub struct MMapIO {
  map: Mmap,
}

impl MMapIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    let file = OpenOptions::new()
      .create(true)
      .read(true)
      .append(true)
      .open(file_name)
      .map_err(|e| {
        error!("failed to open log file for mapping: {}", e);
        Errors::FailedToOpenLogFile
      })?;

    // SAFETY: the log file is only appended to through `FileIO` after the
    // replay that owns this map has finished.
    let map = unsafe { Mmap::map(&file) }.map_err(|e| {
      error!("failed to map log file: {}", e);
      Errors::FailedToOpenLogFile
    })?;

    // replay reads front to back
    if let Err(e) = map.advise(Advice::Sequential) {
      debug!("madvise on log file map ignored: {}", e);
    }

    Ok(MMapIO { map })
  }
}

impl IOManager for MMapIO {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    let src = usize::try_from(offset)
      .ok()
      .and_then(|start| Some(start..start.checked_add(buf.len())?))
      .and_then(|range| self.map.get(range))
      .ok_or(Errors::ReadLogFileEOF)?;
    buf.copy_from_slice(src);
    Ok(src.len())
  }

  fn write(&self, _buf: &[u8]) -> Result<usize> {
    error!("write through a memory mapped log file is not supported");
    Err(Errors::FailedToWriteToLogFile)
  }

  fn sync(&self) -> Result<()> {
    Ok(())
  }

  fn size(&self) -> u64 {
    self.map.len() as u64
  }

  fn truncate(&self, _len: u64) -> Result<()> {
    error!("truncating a memory mapped log file is not supported");
    Err(Errors::FailedToWriteToLogFile)
  }
}

#[cfg(test)]
mod tests {
  use crate::fio::file_io::FileIO;

  use super::*;

  #[test]
  fn test_mmap_read() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("mmap-read.log");

    let empty = MMapIO::new(&path).expect("failed to map empty file");
    let mut buf = [0u8; 4];
    assert_eq!(empty.read(&mut buf, 0).err(), Some(Errors::ReadLogFileEOF));

    let fio = FileIO::new(&path).expect("failed to open file");
    fio.write(b"snapshot").unwrap();
    fio.write(b"replay").unwrap();
    fio.sync().unwrap();

    let mmap_io = MMapIO::new(&path).expect("failed to map file");
    let mut buf = [0u8; 6];
    assert!(mmap_io.read(&mut buf, 8).is_ok());
    assert_eq!(&buf, b"replay");
    assert_eq!(mmap_io.read(&mut buf, 9).err(), Some(Errors::ReadLogFileEOF));
    assert_eq!(mmap_io.read(&mut buf, u64::MAX).err(), Some(Errors::ReadLogFileEOF));
  }

  #[test]
  fn test_mmap_is_read_only() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("mmap-size.log");

    let before = MMapIO::new(&path).expect("failed to map file");
    assert_eq!(before.size(), 0);
    assert_eq!(before.write(b"x").err(), Some(Errors::FailedToWriteToLogFile));
    assert_eq!(before.truncate(0).err(), Some(Errors::FailedToWriteToLogFile));

    let fio = FileIO::new(&path).expect("failed to open file");
    fio.write(b"hello world").unwrap();
    // appends after mapping stay invisible
    assert_eq!(before.size(), 0);

    let after = MMapIO::new(&path).expect("failed to map file");
    assert_eq!(after.size(), 11);
  }
}
