//! Server-level commands for one shard.

use crate::core::commands::{check_arity, check_arity_min, Command, Reply};
use crate::core::common::EdisError;
use crate::core::keyspace::{fractional_now, Keyspace};
use crate::core::storage::engine::{OrderedKeyValueStore, ReadOptions};
use crate::core::types::Item;
use chrono::Utc;

impl<S: OrderedKeyValueStore> Keyspace<S> {
    pub(crate) fn ping(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 0)?;
        Ok(Reply::Simple("PONG".to_string()))
    }

    pub(crate) fn echo(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        Ok(Reply::Bulk(command.args[0].clone()))
    }

    /// Counts only non-expired keys, via a full scan.
    pub(crate) fn dbsize(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 0)?;
        Ok(Reply::Integer(self.live_key_count()?))
    }

    pub(crate) fn live_key_count(&self) -> Result<i64, EdisError> {
        let now = Utc::now();
        self.store.fold(
            0i64,
            |count, (_, blob)| match Item::decode(blob) {
                Ok(item) if !item.is_expired(now) => count + 1,
                _ => count,
            },
            ReadOptions::default(),
        )
    }

    /// Destroys and recreates the underlying store; process-local state
    /// (access stamps, parked waiters) is discarded with it.
    pub(crate) fn flushdb(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 0)?;
        S::destroy(&self.path)?;
        self.store = S::open(&self.path, true)?;
        self.accesses.clear();
        self.blocked.clear();
        tracing::info!(db = self.index, "keyspace flushed");
        Ok(Reply::Ok)
    }

    pub(crate) fn info(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 0)?;
        let mut out = String::new();
        out.push_str(&format!("db:{}\r\n", self.index));
        out.push_str(&format!("uptime_in_seconds:{}\r\n", self.now_offset()));
        out.push_str(&format!("keys:{}\r\n", self.live_key_count()?));
        out.push_str(&format!("blocked_clients:{}\r\n", self.blocked.waiter_count()));
        out.push_str(&format!("last_save:{}\r\n", self.last_save));
        out.push_str(&format!("store_entries:{}\r\n", self.store.status("entries")));
        Ok(Reply::Bulk(out.into_bytes()))
    }

    pub(crate) fn lastsave(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 0)?;
        Ok(Reply::Integer(self.last_save as i64))
    }

    /// Stamps the save instant; the store persists on every write already.
    pub(crate) fn save(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 0)?;
        self.last_save = fractional_now();
        Ok(Reply::Ok)
    }
}
