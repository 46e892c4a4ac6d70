#![forbid(unsafe_code)]
#![deny(clippy::all, deprecated)]
#![allow(
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::similar_names,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::multiple_inherent_impl
)]

//! # Edis - a Redis-compatible keyspace engine
//!
//! Edis is a single-node, multi-database key-value engine speaking the Redis
//! data model: strings, hashes, lists, sets and sorted sets, with per-key
//! expiry, blocking list operations and atomic command batches. Every logical
//! database (shard) is owned by one *keyspace actor* that serializes all
//! commands against a persistent ordered key-value store on disk.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use edis::{Command, Config, Edis, TracingNotifier};
//!
//! # async fn demo() -> Result<(), edis::EdisError> {
//! let server = Edis::open(&Config::default(), Arc::new(TracingNotifier))?;
//! let db = server.db(0).ok_or(edis::EdisError::OutOfRange)?;
//!
//! let set = Command::new("SET", vec![b"greeting".to_vec(), b"hello".to_vec()]);
//! db.run(set, Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Keyspace actor**: one tokio task per shard; strict FIFO command intake.
//! - **Typed value codec**: each user key maps to one persisted `Item` record
//!   carrying its type, encoding metadata, expiry and tagged value.
//! - **Blocking registry**: `BLPOP`/`BRPOP`/`BRPOPLPUSH` park their callers as
//!   stored continuations and are woken FIFO by later pushes.
//! - **Storage**: any `OrderedKeyValueStore`; a file-backed `FileStore` ships
//!   with the crate.

pub mod core;

pub use crate::core::commands::{Command, Reply};
pub use crate::core::common::EdisError;
pub use crate::core::config::Config;
pub use crate::core::keyspace::{Edis, KeyspaceHandle};
pub use crate::core::notify::{CommandNotifier, TracingNotifier};
pub use crate::core::storage::engine::{FileStore, OrderedKeyValueStore};
