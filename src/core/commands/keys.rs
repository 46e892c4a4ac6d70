//! Key-level commands: existence, expiry, renaming, scans and metadata.

use crate::core::commands::{check_arity, check_arity_min, int_arg, Command, Reply};
use crate::core::common::EdisError;
use crate::core::keyspace::access::TypeSelector;
use crate::core::keyspace::Keyspace;
use crate::core::storage::engine::{OrderedKeyValueStore, ReadOptions, WriteOp};
use crate::core::types::Item;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// `RANDOMKEY` samples an ordinal within the first this-many live keys.
const RANDOM_SAMPLE_SPAN: usize = 500;

impl<S: OrderedKeyValueStore> Keyspace<S> {
    /// Deletes every listed key that actually exists; replies with the count.
    pub(crate) fn del(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 1)?;
        let keys: Vec<Vec<u8>> = command.args.clone();
        let mut removed = 0i64;
        for key in keys {
            if self.get_item(TypeSelector::Any, &key)?.is_some() {
                self.store.delete(&key)?;
                removed += 1;
            }
        }
        Ok(Reply::Integer(removed))
    }

    pub(crate) fn exists(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        Ok(Reply::Bool(self.get_item(TypeSelector::Any, &command.args[0])?.is_some()))
    }

    pub(crate) fn expire(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let seconds = int_arg(&command.args[1])?;
        let at = Utc::now() + Duration::seconds(seconds);
        self.expire_generic(&command.args[0], at)
    }

    pub(crate) fn expireat(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let timestamp = int_arg(&command.args[1])?;
        let at = DateTime::from_timestamp(timestamp, 0).ok_or(EdisError::OutOfRange)?;
        self.expire_generic(&command.args[0], at)
    }

    /// A timestamp at or before now deletes immediately; either way the reply
    /// is whether a key was actually affected.
    fn expire_generic(&mut self, key: &[u8], at: DateTime<Utc>) -> Result<Reply, EdisError> {
        let Some(mut item) = self.get_item(TypeSelector::Any, key)? else {
            return Ok(Reply::Bool(false));
        };
        if at <= Utc::now() {
            self.store.delete(key)?;
        } else {
            item.expire = Some(at);
            self.put_item(&item)?;
        }
        Ok(Reply::Bool(true))
    }

    pub(crate) fn persist(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        let Some(mut item) = self.get_item(TypeSelector::Any, &command.args[0])? else {
            return Ok(Reply::Bool(false));
        };
        if item.expire.take().is_none() {
            return Ok(Reply::Bool(false));
        }
        self.put_item(&item)?;
        Ok(Reply::Bool(true))
    }

    /// Scans the whole shard for keys matching a POSIX-style regex, excluding
    /// expired entries (without deleting them).
    pub(crate) fn keys(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        let pattern = std::str::from_utf8(&command.args[0])
            .map_err(|_| EdisError::BadPattern("pattern is not valid utf-8".to_string()))?;
        let regex = regex::bytes::Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| EdisError::BadPattern(e.to_string()))?;
        let now = Utc::now();
        let matches = self.store.fold(
            Vec::new(),
            |mut acc, (key, blob)| {
                if regex.is_match(key) {
                    if let Ok(item) = Item::decode(blob) {
                        if !item.is_expired(now) {
                            acc.push(Reply::Bulk(key.to_vec()));
                        }
                    }
                }
                acc
            },
            ReadOptions::default(),
        )?;
        Ok(Reply::Array(matches))
    }

    /// Bounded random sampler: draws an ordinal in `[1, 500]` over the live
    /// keys in store order, wrapping around when fewer keys exist. Keys past
    /// the first 500 are never returned.
    pub(crate) fn randomkey(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 0)?;
        let now = Utc::now();
        let sample = self.store.fold(
            Vec::new(),
            |mut acc: Vec<Vec<u8>>, (key, blob)| {
                if acc.len() < RANDOM_SAMPLE_SPAN {
                    if let Ok(item) = Item::decode(blob) {
                        if !item.is_expired(now) {
                            acc.push(key.to_vec());
                        }
                    }
                }
                acc
            },
            ReadOptions::default(),
        )?;
        if sample.is_empty() {
            return Ok(Reply::Nil);
        }
        let offset = self.rng.gen_range(1..=RANDOM_SAMPLE_SPAN);
        Ok(Reply::Bulk(sample[(offset - 1) % sample.len()].clone()))
    }

    pub(crate) fn rename(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        self.rename_item(&command.args[0], &command.args[1])?;
        Ok(Reply::Ok)
    }

    pub(crate) fn renamenx(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        if self.get_item(TypeSelector::Any, &command.args[1])?.is_some() {
            return Ok(Reply::Bool(false));
        }
        self.rename_item(&command.args[0], &command.args[1])?;
        Ok(Reply::Bool(true))
    }

    /// Atomic two-op write: the record moves keys wholesale, preserving type,
    /// encoding, expiry and value.
    fn rename_item(&mut self, source: &[u8], destination: &[u8]) -> Result<(), EdisError> {
        let Some(mut item) = self.get_item(TypeSelector::Any, source)? else {
            return Err(EdisError::NoSuchKey);
        };
        item.key = destination.to_vec();
        self.store.write(vec![
            WriteOp::Delete { key: source.to_vec() },
            WriteOp::Put { key: destination.to_vec(), value: item.encode()? },
        ])
    }

    /// Remaining whole seconds to live; -1 for absent or never-expiring keys.
    pub(crate) fn ttl(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        let remaining = self
            .get_item(TypeSelector::Any, &command.args[0])?
            .and_then(|item| item.expire)
            .map_or(-1, |at| (at - Utc::now()).num_seconds().max(0));
        Ok(Reply::Integer(remaining))
    }

    pub(crate) fn type_of(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        match self.get_item(TypeSelector::Any, &command.args[0])? {
            Some(item) => Ok(Reply::Simple(item.item_type.name().to_string())),
            None => Ok(Reply::Simple("none".to_string())),
        }
    }

    pub(crate) fn object(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let subcommand = command.args[0].to_ascii_uppercase();
        let key = command.args[1].clone();
        let Some(item) = self.get_item(TypeSelector::Any, &key)? else {
            return Err(EdisError::NoSuchKey);
        };
        match subcommand.as_slice() {
            // the actor is the single owner of every record
            b"REFCOUNT" => Ok(Reply::Integer(1)),
            b"ENCODING" => Ok(Reply::Bulk(item.encoding.name().as_bytes().to_vec())),
            b"IDLETIME" => {
                let idle = self
                    .accesses
                    .get(&key)
                    .map_or(0, |stamp| (self.now_offset() - stamp).max(0));
                Ok(Reply::Integer(idle))
            }
            _ => Err(EdisError::Unexpected("unknown OBJECT subcommand".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keyspace::test_util::{bulk, cmd, keyspace, run};

    #[test]
    fn del_counts_only_existing_keys() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["a", "1"]).unwrap();
        run(&mut ks, "SET", &["b", "2"]).unwrap();
        assert_eq!(run(&mut ks, "DEL", &["a", "missing", "b"]).unwrap(), Reply::Integer(2));
        assert_eq!(run(&mut ks, "EXISTS", &["a"]).unwrap(), Reply::Bool(false));
    }

    #[test]
    fn expireat_in_the_past_deletes_immediately() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["k", "v"]).unwrap();
        let past = (Utc::now() - Duration::seconds(5)).timestamp().to_string();
        assert_eq!(run(&mut ks, "EXPIREAT", &["k", &past]).unwrap(), Reply::Bool(true));
        assert_eq!(run(&mut ks, "EXISTS", &["k"]).unwrap(), Reply::Bool(false));
        assert_eq!(run(&mut ks, "EXPIREAT", &["k", &past]).unwrap(), Reply::Bool(false));
    }

    #[test]
    fn expire_zero_deletes_a_list_lazily_visible() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "LPUSH", &["k", "v"]).unwrap();
        assert_eq!(run(&mut ks, "EXPIRE", &["k", "0"]).unwrap(), Reply::Bool(true));
        assert_eq!(run(&mut ks, "LLEN", &["k"]).unwrap(), Reply::Integer(0));
        assert_eq!(run(&mut ks, "TYPE", &["k"]).unwrap(), Reply::Simple("none".to_string()));
    }

    #[test]
    fn ttl_and_persist() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["k", "v"]).unwrap();
        assert_eq!(run(&mut ks, "TTL", &["k"]).unwrap(), Reply::Integer(-1));
        run(&mut ks, "EXPIRE", &["k", "100"]).unwrap();
        match run(&mut ks, "TTL", &["k"]).unwrap() {
            Reply::Integer(remaining) => assert!((90..=100).contains(&remaining)),
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(run(&mut ks, "PERSIST", &["k"]).unwrap(), Reply::Bool(true));
        assert_eq!(run(&mut ks, "TTL", &["k"]).unwrap(), Reply::Integer(-1));
        assert_eq!(run(&mut ks, "PERSIST", &["k"]).unwrap(), Reply::Bool(false));
        assert_eq!(run(&mut ks, "TTL", &["missing"]).unwrap(), Reply::Integer(-1));
    }

    #[test]
    fn rename_preserves_the_record() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["old", "value"]).unwrap();
        run(&mut ks, "EXPIRE", &["old", "1000"]).unwrap();
        assert_eq!(run(&mut ks, "RENAME", &["old", "new"]).unwrap(), Reply::Ok);
        assert_eq!(run(&mut ks, "EXISTS", &["old"]).unwrap(), Reply::Bool(false));
        assert_eq!(run(&mut ks, "GET", &["new"]).unwrap(), bulk("value"));
        match run(&mut ks, "TTL", &["new"]).unwrap() {
            Reply::Integer(remaining) => assert!(remaining > 0),
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(run(&mut ks, "RENAME", &["missing", "x"]), Err(EdisError::NoSuchKey));
    }

    #[test]
    fn renamenx_requires_absent_destination() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["a", "1"]).unwrap();
        run(&mut ks, "SET", &["b", "2"]).unwrap();
        assert_eq!(run(&mut ks, "RENAMENX", &["a", "b"]).unwrap(), Reply::Bool(false));
        assert_eq!(run(&mut ks, "RENAMENX", &["a", "c"]).unwrap(), Reply::Bool(true));
        assert_eq!(run(&mut ks, "GET", &["c"]).unwrap(), bulk("1"));
    }

    #[test]
    fn keys_matches_patterns_and_rejects_bad_ones() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["one", "1"]).unwrap();
        run(&mut ks, "SET", &["two", "2"]).unwrap();
        run(&mut ks, "SET", &["three", "3"]).unwrap();
        let reply = run(&mut ks, "KEYS", &["t.*"]).unwrap();
        match reply {
            Reply::Array(keys) => {
                assert_eq!(keys.len(), 2);
                assert!(keys.contains(&bulk("two")));
                assert!(keys.contains(&bulk("three")));
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert!(matches!(run(&mut ks, "KEYS", &["("]), Err(EdisError::BadPattern(_))));
    }

    #[test]
    fn keys_excludes_expired_entries() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["live", "1"]).unwrap();
        run(&mut ks, "SET", &["dead", "2"]).unwrap();
        // write the expiry directly so the record stays on disk
        let mut item = ks.get_item(TypeSelector::Any, b"dead").unwrap().unwrap();
        item.expire = Some(Utc::now() - Duration::seconds(1));
        ks.put_item(&item).unwrap();
        assert_eq!(run(&mut ks, "KEYS", &[".*"]).unwrap(), Reply::Array(vec![bulk("live")]));
        // the scan excluded but did not delete the expired record
        assert!(ks.exists_item(b"dead").unwrap());
    }

    #[test]
    fn randomkey_returns_a_live_key() {
        let (_dir, mut ks) = keyspace();
        assert_eq!(run(&mut ks, "RANDOMKEY", &[]).unwrap(), Reply::Nil);
        run(&mut ks, "SET", &["only", "1"]).unwrap();
        assert_eq!(run(&mut ks, "RANDOMKEY", &[]).unwrap(), bulk("only"));
    }

    #[test]
    fn object_metadata() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["k", "v"]).unwrap();
        assert_eq!(run(&mut ks, "OBJECT", &["refcount", "k"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut ks, "OBJECT", &["encoding", "k"]).unwrap(), bulk("raw"));
        run(&mut ks, "LPUSH", &["l", "x"]).unwrap();
        assert_eq!(run(&mut ks, "OBJECT", &["encoding", "l"]).unwrap(), bulk("linkedlist"));
        // never stamped: idle time is zero
        assert_eq!(run(&mut ks, "OBJECT", &["idletime", "k"]).unwrap(), Reply::Integer(0));
        ks.stamp(&cmd("GET", &["k"]));
        assert_eq!(run(&mut ks, "OBJECT", &["idletime", "k"]).unwrap(), Reply::Integer(0));
        assert_eq!(run(&mut ks, "OBJECT", &["refcount", "missing"]), Err(EdisError::NoSuchKey));
    }

    #[test]
    fn type_reports_stored_families() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["s", "v"]).unwrap();
        run(&mut ks, "LPUSH", &["l", "v"]).unwrap();
        run(&mut ks, "SADD", &["set", "v"]).unwrap();
        assert_eq!(run(&mut ks, "TYPE", &["s"]).unwrap(), Reply::Simple("string".to_string()));
        assert_eq!(run(&mut ks, "TYPE", &["l"]).unwrap(), Reply::Simple("list".to_string()));
        assert_eq!(run(&mut ks, "TYPE", &["set"]).unwrap(), Reply::Simple("set".to_string()));
        assert_eq!(run(&mut ks, "TYPE", &["none"]).unwrap(), Reply::Simple("none".to_string()));
    }
}
