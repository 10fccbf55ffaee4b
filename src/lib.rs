//! SnapKV: a key-value storage adapter over a transactional engine.
//!
//! The adapter exposes point reads and writes, atomic write batches whose net
//! effect can be replayed to any other writer, and ordered iterators that see
//! a fixed snapshot of the store no matter what is written meanwhile.
//!
//! # Features
//!
//! * Point `get`/`has`/`put`/`delete`, each in its own short transaction
//! * Write batches committed atomically, replayable before or after commit
//! * Full, start-key and prefix iterators with snapshot isolation
//! * Whole-store reclamation of overwritten and deleted versions
//! * A pluggable engine seam with a bundled multi-version engine
//!
//! # Basic Usage
//!
//! ```
//! use snapkv::{db::Database, memorydb::MemoryDb};
//!
//! let dir = tempfile::tempdir().expect("failed to create temp dir");
//! let db = Database::open(dir.path()).expect("failed to open database");
//!
//! db.put(b"hello", b"world").expect("failed to put");
//! assert_eq!(db.get(b"hello").expect("failed to get"), b"world".to_vec());
//!
//! let mut batch = db.new_batch();
//! batch.put(b"a", b"1").expect("failed to queue put");
//! batch.delete(b"hello").expect("failed to queue delete");
//! batch.write().expect("failed to write batch");
//!
//! let mut observer = MemoryDb::new();
//! batch.replay(&mut observer).expect("failed to replay");
//! assert_eq!(observer.get(b"a").expect("missing key"), b"1".to_vec());
//!
//! let mut iter = db.new_iterator().expect("failed to open iterator");
//! while iter.next() {
//!   println!("{:?} = {:?}", iter.key(), iter.value());
//! }
//! iter.release();
//! ```

mod data;
mod fio;

pub mod batch;
pub mod db;
pub mod engine;
pub mod errors;
pub mod iterator;
pub mod kv;
pub mod memorydb;
pub mod option;
pub mod util;
