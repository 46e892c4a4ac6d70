//! One keyspace (shard) and its actor fabric.

pub mod access;
pub mod actor;
pub mod blocking;

pub use actor::{Edis, KeyspaceHandle};

use crate::core::commands::{command_keys, Command};
use crate::core::common::EdisError;
use crate::core::keyspace::blocking::BlockedOps;
use crate::core::notify::CommandNotifier;
use crate::core::storage::engine::OrderedKeyValueStore;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// The in-memory state of one shard. Owned exclusively by its actor task;
/// everything here is single-threaded.
pub struct Keyspace<S> {
    pub(crate) index: usize,
    pub(crate) path: PathBuf,
    pub(crate) store: S,
    /// Seconds timestamp captured at actor start.
    pub(crate) start_time: i64,
    /// Fractional-seconds timestamp of the last accepted save.
    pub(crate) last_save: f64,
    /// Key -> seconds offset since `start_time` of the most recent access.
    pub(crate) accesses: HashMap<Vec<u8>, i64>,
    pub(crate) blocked: BlockedOps,
    /// Seeded once at actor start; never reseeded per call.
    pub(crate) rng: StdRng,
    pub(crate) notifier: Arc<dyn CommandNotifier>,
    /// Router table: handle per shard, for cross-shard `MOVE`.
    pub(crate) peers: Vec<KeyspaceHandle>,
}

impl<S: OrderedKeyValueStore> Keyspace<S> {
    pub(crate) fn open(
        index: usize,
        path: PathBuf,
        notifier: Arc<dyn CommandNotifier>,
        peers: Vec<KeyspaceHandle>,
    ) -> Result<Self, EdisError> {
        let store = S::open(&path, true)?;
        tracing::info!(db = index, path = %path.display(), "keyspace opened");
        Ok(Keyspace {
            index,
            path,
            store,
            start_time: Utc::now().timestamp(),
            last_save: fractional_now(),
            accesses: HashMap::new(),
            blocked: BlockedOps::default(),
            rng: StdRng::from_entropy(),
            notifier,
            peers,
        })
    }

    /// Seconds elapsed since actor start.
    pub(crate) fn now_offset(&self) -> i64 {
        Utc::now().timestamp() - self.start_time
    }

    /// Records the access instant for every key the command touches. Called
    /// only after the command succeeded.
    pub(crate) fn stamp(&mut self, command: &Command) {
        let offset = self.now_offset();
        for key in command_keys(command) {
            self.accesses.insert(key.to_vec(), offset);
        }
    }
}

pub(crate) fn fractional_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}
