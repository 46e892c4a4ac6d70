//! String commands.

use crate::core::commands::{
    check_arity, check_arity_min, int_arg, normalize_range, Command, Reply,
};
use crate::core::common::EdisError;
use crate::core::keyspace::access::TypeSelector;
use crate::core::keyspace::Keyspace;
use crate::core::storage::engine::{OrderedKeyValueStore, WriteOp};
use crate::core::types::{Item, ItemType, Value};
use chrono::{Duration, Utc};

/// Value length ceiling: 512 MB, i.e. bit offsets up to 2^32 - 1.
const MAX_STRING_BYTES: usize = 512 * 1024 * 1024;

impl<S: OrderedKeyValueStore> Keyspace<S> {
    pub(crate) fn append(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let suffix = &command.args[1];
        self.upsert(&command.args[0], ItemType::String, Value::Str(Vec::new()), |item| {
            let current = item.str_mut()?;
            current.extend_from_slice(suffix);
            Ok(Reply::Integer(current.len() as i64))
        })
    }

    pub(crate) fn get(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        match self.get_item(TypeSelector::Exact(ItemType::String), &command.args[0])? {
            Some(item) => Ok(Reply::Bulk(item.into_str()?)),
            None => Ok(Reply::Nil),
        }
    }

    pub(crate) fn getrange(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let start = int_arg(&command.args[1])?;
        let stop = int_arg(&command.args[2])?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::String), &command.args[0])?
        else {
            return Ok(Reply::Bulk(Vec::new()));
        };
        let bytes = item.str_ref()?;
        let slice = match normalize_range(start, stop, bytes.len()) {
            Some((from, to)) => bytes[from..=to].to_vec(),
            None => Vec::new(),
        };
        Ok(Reply::Bulk(slice))
    }

    pub(crate) fn getset(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let previous =
            match self.get_item(TypeSelector::Exact(ItemType::String), &command.args[0])? {
                Some(item) => Reply::Bulk(item.into_str()?),
                None => Reply::Nil,
            };
        let item = Item::new(command.args[0].clone(), Value::Str(command.args[1].clone()));
        self.put_item(&item)?;
        Ok(previous)
    }

    pub(crate) fn getbit(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let offset = bit_offset(&command.args[1])?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::String), &command.args[0])?
        else {
            return Ok(Reply::Integer(0));
        };
        let bytes = item.str_ref()?;
        let byte = bytes.get(offset / 8).copied().unwrap_or(0);
        Ok(Reply::Integer(i64::from((byte >> (7 - offset % 8)) & 1)))
    }

    pub(crate) fn set(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let item = Item::new(command.args[0].clone(), Value::Str(command.args[1].clone()));
        self.put_item(&item)?;
        Ok(Reply::Ok)
    }

    pub(crate) fn setex(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let seconds = int_arg(&command.args[1])?;
        if seconds <= 0 {
            return Err(EdisError::OutOfRange);
        }
        let mut item = Item::new(command.args[0].clone(), Value::Str(command.args[2].clone()));
        item.expire = Some(Utc::now() + Duration::seconds(seconds));
        self.put_item(&item)?;
        Ok(Reply::Ok)
    }

    pub(crate) fn setnx(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        if self.get_item(TypeSelector::Any, &command.args[0])?.is_some() {
            return Ok(Reply::Bool(false));
        }
        let item = Item::new(command.args[0].clone(), Value::Str(command.args[1].clone()));
        self.put_item(&item)?;
        Ok(Reply::Bool(true))
    }

    pub(crate) fn mset(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        if command.args.len() % 2 != 0 {
            return Err(EdisError::Unexpected(
                "wrong number of arguments for 'MSET'".to_string(),
            ));
        }
        let batch = string_batch(&command.args)?;
        self.store.write(batch)?;
        Ok(Reply::Ok)
    }

    /// All-or-nothing multi set: a single existing target key makes the whole
    /// command a no-op.
    pub(crate) fn msetnx(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        if command.args.len() % 2 != 0 {
            return Err(EdisError::Unexpected(
                "wrong number of arguments for 'MSETNX'".to_string(),
            ));
        }
        for pair in command.args.chunks(2) {
            if self.get_item(TypeSelector::Any, &pair[0])?.is_some() {
                return Ok(Reply::Bool(false));
            }
        }
        let batch = string_batch(&command.args)?;
        self.store.write(batch)?;
        Ok(Reply::Bool(true))
    }

    pub(crate) fn mget(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 1)?;
        let keys: Vec<Vec<u8>> = command.args.clone();
        let mut slots = Vec::with_capacity(keys.len());
        for key in keys {
            let slot = match self.get_item(TypeSelector::Exact(ItemType::String), &key) {
                Ok(Some(item)) => Reply::Bulk(item.into_str()?),
                Ok(None) | Err(EdisError::WrongType) => Reply::Nil,
                Err(e) => return Err(e),
            };
            slots.push(slot);
        }
        Ok(Reply::Array(slots))
    }

    pub(crate) fn setrange(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let offset = int_arg(&command.args[1])?;
        if offset < 0 {
            return Err(EdisError::OutOfRange);
        }
        let offset = offset as usize;
        let patch = &command.args[2];
        if offset + patch.len() > MAX_STRING_BYTES {
            return Err(EdisError::OutOfRange);
        }
        self.upsert(&command.args[0], ItemType::String, Value::Str(Vec::new()), |item| {
            let current = item.str_mut()?;
            if current.len() < offset + patch.len() {
                current.resize(offset + patch.len(), 0);
            }
            current[offset..offset + patch.len()].copy_from_slice(patch);
            Ok(Reply::Integer(current.len() as i64))
        })
    }

    /// Sets the bit at `offset`, zero-padding as needed. Bits before and
    /// after the offset are unchanged; the old bit is returned.
    pub(crate) fn setbit(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let offset = bit_offset(&command.args[1])?;
        let bit = match int_arg(&command.args[2])? {
            0 => false,
            1 => true,
            _ => return Err(EdisError::OutOfRange),
        };
        self.upsert(&command.args[0], ItemType::String, Value::Str(Vec::new()), |item| {
            let current = item.str_mut()?;
            let byte_index = offset / 8;
            if current.len() <= byte_index {
                current.resize(byte_index + 1, 0);
            }
            let mask = 1u8 << (7 - offset % 8);
            let old = current[byte_index] & mask != 0;
            if bit {
                current[byte_index] |= mask;
            } else {
                current[byte_index] &= !mask;
            }
            Ok(Reply::Integer(i64::from(old)))
        })
    }

    pub(crate) fn strlen(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        match self.get_item(TypeSelector::Exact(ItemType::String), &command.args[0])? {
            Some(item) => Ok(Reply::Integer(item.str_ref()?.len() as i64)),
            None => Ok(Reply::Integer(0)),
        }
    }

    pub(crate) fn incr(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        self.incr_by(&command.args[0], 1)
    }

    pub(crate) fn incrby(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let delta = int_arg(&command.args[1])?;
        self.incr_by(&command.args[0], delta)
    }

    pub(crate) fn decr(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        self.incr_by(&command.args[0], -1)
    }

    pub(crate) fn decrby(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let delta = int_arg(&command.args[1])?;
        self.incr_by(&command.args[0], delta.checked_neg().ok_or(EdisError::NotInteger)?)
    }

    /// Shared arithmetic: a missing key starts from "0" and the delta is
    /// applied to it; overflow reports `not_integer`.
    fn incr_by(&mut self, key: &[u8], delta: i64) -> Result<Reply, EdisError> {
        self.upsert(key, ItemType::String, Value::Str(b"0".to_vec()), |item| {
            let current = item.str_mut()?;
            let number = int_arg(current)?;
            let next = number.checked_add(delta).ok_or(EdisError::NotInteger)?;
            *current = next.to_string().into_bytes();
            Ok(Reply::Integer(next))
        })
    }
}

fn string_batch(args: &[Vec<u8>]) -> Result<Vec<WriteOp>, EdisError> {
    args.chunks(2)
        .map(|pair| {
            let item = Item::new(pair[0].clone(), Value::Str(pair[1].clone()));
            Ok(WriteOp::Put { key: pair[0].clone(), value: item.encode()? })
        })
        .collect()
}

fn bit_offset(raw: &[u8]) -> Result<usize, EdisError> {
    let offset = int_arg(raw)?;
    if offset < 0 || offset >= (MAX_STRING_BYTES as i64) * 8 {
        return Err(EdisError::OutOfRange);
    }
    Ok(offset as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keyspace::test_util::{bulk, keyspace, run};

    #[test]
    fn set_get_strlen() {
        let (_dir, mut ks) = keyspace();
        assert_eq!(run(&mut ks, "SET", &["foo", "Hello"]).unwrap(), Reply::Ok);
        assert_eq!(run(&mut ks, "GET", &["foo"]).unwrap(), bulk("Hello"));
        assert_eq!(run(&mut ks, "STRLEN", &["foo"]).unwrap(), Reply::Integer(5));
        assert_eq!(run(&mut ks, "GET", &["missing"]).unwrap(), Reply::Nil);
        assert_eq!(run(&mut ks, "STRLEN", &["missing"]).unwrap(), Reply::Integer(0));
    }

    #[test]
    fn append_builds_hello_world() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["foo", "Hello"]).unwrap();
        assert_eq!(run(&mut ks, "APPEND", &["foo", " World"]).unwrap(), Reply::Integer(11));
        assert_eq!(run(&mut ks, "GET", &["foo"]).unwrap(), bulk("Hello World"));
        assert_eq!(run(&mut ks, "STRLEN", &["foo"]).unwrap(), Reply::Integer(11));
        // append to a missing key returns the running length too
        assert_eq!(run(&mut ks, "APPEND", &["bar", "ab"]).unwrap(), Reply::Integer(2));
    }

    #[test]
    fn incr_and_decr_are_inverse() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["k", "10"]).unwrap();
        assert_eq!(run(&mut ks, "INCRBY", &["k", "5"]).unwrap(), Reply::Integer(15));
        assert_eq!(run(&mut ks, "DECRBY", &["k", "5"]).unwrap(), Reply::Integer(10));
        assert_eq!(run(&mut ks, "INCR", &["k"]).unwrap(), Reply::Integer(11));
        assert_eq!(run(&mut ks, "DECR", &["k"]).unwrap(), Reply::Integer(10));
    }

    #[test]
    fn arithmetic_on_missing_key_starts_from_zero() {
        let (_dir, mut ks) = keyspace();
        assert_eq!(run(&mut ks, "DECR", &["down"]).unwrap(), Reply::Integer(-1));
        assert_eq!(run(&mut ks, "INCR", &["up"]).unwrap(), Reply::Integer(1));
    }

    #[test]
    fn arithmetic_rejects_non_integers() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["k", "x"]).unwrap();
        assert_eq!(run(&mut ks, "INCRBY", &["k", "1"]), Err(EdisError::NotInteger));
        run(&mut ks, "SET", &["k", &i64::MAX.to_string()]).unwrap();
        assert_eq!(run(&mut ks, "INCR", &["k"]), Err(EdisError::NotInteger));
    }

    #[test]
    fn getrange_normalizes_indices() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["k", "This is a string"]).unwrap();
        assert_eq!(run(&mut ks, "GETRANGE", &["k", "0", "3"]).unwrap(), bulk("This"));
        assert_eq!(run(&mut ks, "GETRANGE", &["k", "-3", "-1"]).unwrap(), bulk("ing"));
        assert_eq!(run(&mut ks, "GETRANGE", &["k", "0", "-1"]).unwrap(), bulk("This is a string"));
        assert_eq!(run(&mut ks, "GETRANGE", &["k", "99", "120"]).unwrap(), bulk(""));
        assert_eq!(run(&mut ks, "GETRANGE", &["missing", "0", "-1"]).unwrap(), bulk(""));
    }

    #[test]
    fn getset_returns_previous_value() {
        let (_dir, mut ks) = keyspace();
        assert_eq!(run(&mut ks, "GETSET", &["k", "one"]).unwrap(), Reply::Nil);
        assert_eq!(run(&mut ks, "GETSET", &["k", "two"]).unwrap(), bulk("one"));
        assert_eq!(run(&mut ks, "GETSET", &["k", "two"]).unwrap(), bulk("two"));
        assert_eq!(run(&mut ks, "GET", &["k"]).unwrap(), bulk("two"));
    }

    #[test]
    fn setnx_and_msetnx_are_all_or_nothing() {
        let (_dir, mut ks) = keyspace();
        assert_eq!(run(&mut ks, "SETNX", &["k", "v"]).unwrap(), Reply::Bool(true));
        assert_eq!(run(&mut ks, "SETNX", &["k", "other"]).unwrap(), Reply::Bool(false));
        assert_eq!(run(&mut ks, "GET", &["k"]).unwrap(), bulk("v"));

        let verdict = run(&mut ks, "MSETNX", &["a", "1", "k", "2"]).unwrap();
        assert_eq!(verdict, Reply::Bool(false));
        // nothing was written
        assert_eq!(run(&mut ks, "GET", &["a"]).unwrap(), Reply::Nil);

        assert_eq!(run(&mut ks, "MSETNX", &["a", "1", "b", "2"]).unwrap(), Reply::Bool(true));
        assert_eq!(run(&mut ks, "GET", &["b"]).unwrap(), bulk("2"));
    }

    #[test]
    fn mset_and_mget() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "MSET", &["a", "1", "b", "2"]).unwrap();
        run(&mut ks, "LPUSH", &["l", "x"]).unwrap();
        let replies = run(&mut ks, "MGET", &["a", "missing", "l", "b"]).unwrap();
        assert_eq!(
            replies,
            Reply::Array(vec![bulk("1"), Reply::Nil, Reply::Nil, bulk("2")])
        );
    }

    #[test]
    fn setrange_zero_pads() {
        let (_dir, mut ks) = keyspace();
        assert_eq!(run(&mut ks, "SETRANGE", &["k", "5", "xy"]).unwrap(), Reply::Integer(7));
        let stored = run(&mut ks, "GET", &["k"]).unwrap();
        assert_eq!(stored, Reply::Bulk(vec![0, 0, 0, 0, 0, b'x', b'y']));
        assert_eq!(run(&mut ks, "SETRANGE", &["k", "0", "ab"]).unwrap(), Reply::Integer(7));
    }

    #[test]
    fn setbit_and_getbit() {
        let (_dir, mut ks) = keyspace();
        assert_eq!(run(&mut ks, "SETBIT", &["k", "7", "1"]).unwrap(), Reply::Integer(0));
        assert_eq!(run(&mut ks, "GET", &["k"]).unwrap(), Reply::Bulk(vec![1]));
        assert_eq!(run(&mut ks, "GETBIT", &["k", "7"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut ks, "GETBIT", &["k", "6"]).unwrap(), Reply::Integer(0));
        // clearing reports the previous bit and leaves neighbours alone
        run(&mut ks, "SETBIT", &["k", "0", "1"]).unwrap();
        assert_eq!(run(&mut ks, "SETBIT", &["k", "7", "0"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut ks, "GET", &["k"]).unwrap(), Reply::Bulk(vec![0b1000_0000]));
        // reading past the end is zero
        assert_eq!(run(&mut ks, "GETBIT", &["k", "100"]).unwrap(), Reply::Integer(0));
        assert_eq!(run(&mut ks, "SETBIT", &["k", "7", "2"]), Err(EdisError::OutOfRange));
    }

    #[test]
    fn string_commands_reject_other_types() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "LPUSH", &["l", "x"]).unwrap();
        assert_eq!(run(&mut ks, "GET", &["l"]), Err(EdisError::WrongType));
        assert_eq!(run(&mut ks, "APPEND", &["l", "y"]), Err(EdisError::WrongType));
        assert_eq!(run(&mut ks, "INCR", &["l"]), Err(EdisError::WrongType));
    }
}
