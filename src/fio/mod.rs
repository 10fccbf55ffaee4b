pub mod file_io;
pub mod mmap;

use std::path::Path;

use crate::{errors::Result, option::IOManagerType};

use self::{file_io::FileIO, mmap::MMapIO};

/// Abstract I/O over a single append-only file.
pub trait IOManager: Sync + Send {
  /// Fills `buf` from `offset`, or fails with `ReadLogFileEOF` when the
  /// file ends first.
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

  fn write(&self, buf: &[u8]) -> Result<usize>;

  fn sync(&self) -> Result<()>;

  fn size(&self) -> u64;

  /// Cuts the file down to `len` bytes; later writes append from there.
  fn truncate(&self, len: u64) -> Result<()>;
}

pub fn new_io_manager<P>(file_name: P, io_type: IOManagerType) -> Result<Box<dyn IOManager>>
where
  P: AsRef<Path>,
{
  match io_type {
    IOManagerType::StandardFileIO => Ok(Box::new(FileIO::new(file_name)?)),
    IOManagerType::MemoryMap => Ok(Box::new(MMapIO::new(file_name)?)),
  }
}
