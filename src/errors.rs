use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Errors {
  #[error("failed to read from log file")]
  FailedToReadFromLogFile,

  #[error("failed to write to log file")]
  FailedToWriteToLogFile,

  #[error("failed to sync log file")]
  FailedToSyncLogFile,

  #[error("failed to open log file")]
  FailedToOpenLogFile,

  #[error("failed to rewrite log file")]
  FailedToRewriteLogFile,

  #[error("the key is empty")]
  KeyIsEmpty,

  #[error("key is not found in database")]
  KeyNotFound,

  #[error("failed to create the database directory")]
  FailedToCreateDatabaseDir,

  #[error("read log file EOF")]
  ReadLogFileEOF,

  #[error("invalid crc value, log record maybe corrupted")]
  InvalidLogRecordCrc,

  #[error("database dir path can not be empty")]
  DirPathIsEmpty,

  #[error("invalid gc discard ratio, must be in (0, 1]")]
  InvalidGcDiscardRatio,

  #[error("invalid max batch num, must be greater than 0")]
  InvalidMaxBatchNum,

  #[error("exceed the max batch num")]
  ExceedMaxBatchNum,

  #[error("the write batch has been flushed, reset it before reuse")]
  BatchAlreadyFlushed,

  #[error("the write batch has been cancelled")]
  BatchCancelled,

  #[error("the transaction has been committed or discarded")]
  TxnAlreadyFinished,

  #[error("compaction is in progress, try again later")]
  CompactionInProgress,

  #[error("no enough space on disk for compaction")]
  CompactionNoEnoughSpace,

  #[error("failed to open the database lock file")]
  FailedToOpenLockFile,

  #[error("the database directory is used by another process")]
  DatabaseIsUsing,

  #[error("the database is closed")]
  DatabaseClosed,
}

pub type Result<T> = std::result::Result<T, Errors>;
