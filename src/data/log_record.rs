use bytes::{Buf, BufMut, BytesMut};
use prost::{
  encode_length_delimiter,
  encoding::{decode_varint, encode_varint},
  length_delimiter_len,
};

#[derive(PartialEq, Clone, Copy, Debug)]
pub enum LogRecordType {
  Normal = 1,

  Deleted = 2,

  /// Closes the group of records written by one commit.
  TxnFinished = 3,
}

impl LogRecordType {
  pub fn from_u8(v: u8) -> Option<Self> {
    match v {
      1 => Some(LogRecordType::Normal),
      2 => Some(LogRecordType::Deleted),
      3 => Some(LogRecordType::TxnFinished),
      _ => None,
    }
  }
}

/// One entry of the commit log.
///
/// On disk: `type | key_size (varint) | value_size (varint) | key | value | crc32`.
/// The key always carries the commit version as a varint prefix.
#[derive(Debug, PartialEq, Clone)]
pub struct LogRecord {
  pub(crate) key: Vec<u8>,
  pub(crate) value: Vec<u8>,
  pub(crate) rec_type: LogRecordType,
}

pub struct ReadLogRecord {
  pub(crate) record: LogRecord,
  pub(crate) size: usize,
}

impl LogRecord {
  pub fn encode(&self) -> Vec<u8> {
    let (enc_buf, _) = self.encode_and_get_crc();
    enc_buf
  }

  pub fn get_crc(&self) -> u32 {
    let (_, crc_value) = self.encode_and_get_crc();
    crc_value
  }

  pub fn encoded_len(&self) -> usize {
    self.header_len() + self.key.len() + self.value.len() + 4
  }

  pub(crate) fn header_len(&self) -> usize {
    std::mem::size_of::<u8>()
      + length_delimiter_len(self.key.len())
      + length_delimiter_len(self.value.len())
  }

  fn encode_and_get_crc(&self) -> (Vec<u8>, u32) {
    let mut buf = BytesMut::with_capacity(self.encoded_len());

    buf.put_u8(self.rec_type as u8);
    // encoding into a BytesMut only fails when capacity can not grow
    let _ = encode_length_delimiter(self.key.len(), &mut buf);
    let _ = encode_length_delimiter(self.value.len(), &mut buf);
    buf.extend_from_slice(&self.key);
    buf.extend_from_slice(&self.value);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf);
    let crc = hasher.finalize();
    buf.put_u32(crc);

    (buf.to_vec(), crc)
  }
}

pub fn max_log_record_header_size() -> usize {
  std::mem::size_of::<u8>() + length_delimiter_len(u32::MAX as usize) * 2
}

pub(crate) fn log_record_key_with_version(key: &[u8], version: u64) -> Vec<u8> {
  let mut enc_key = BytesMut::new();
  encode_varint(version, &mut enc_key);
  enc_key.extend_from_slice(key);
  enc_key.to_vec()
}

/// Splits a log key into the user key and its commit version.
pub(crate) fn parse_log_record_key(key: &[u8]) -> Option<(Vec<u8>, u64)> {
  let mut buf = key;
  let version = decode_varint(&mut buf).ok()?;
  Some((buf.chunk().to_vec(), version))
}
