use std::path::Path;

use log::error;

/// Free bytes on the filesystem holding `path`, or 0 when it can not be read.
pub fn available_disk_space<P>(path: P) -> u64
where
  P: AsRef<Path>,
{
  match fs2::available_space(path) {
    Ok(size) => size,
    Err(e) => {
      error!("failed to get available disk space: {}", e);
      0
    }
  }
}
