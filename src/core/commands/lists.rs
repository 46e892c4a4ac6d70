//! List commands, including the blocking pops.

use crate::core::commands::{
    check_arity, check_arity_min, int_arg, normalize_index, normalize_range, Command, Reply,
    Verdict,
};
use crate::core::common::EdisError;
use crate::core::keyspace::access::TypeSelector;
use crate::core::keyspace::Keyspace;
use crate::core::storage::engine::{OrderedKeyValueStore, WriteOp};
use crate::core::types::{Item, ItemType, Value};
use std::time::{Duration, Instant};

impl<S: OrderedKeyValueStore> Keyspace<S> {
    /// `LPUSH v1 v2` prepends one by one, so the final head order is
    /// `v2, v1, ...old...`.
    pub(crate) fn lpush(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        let values = &command.args[1..];
        self.upsert(&command.args[0], ItemType::List, Value::empty(ItemType::List), |item| {
            let list = item.list_mut()?;
            for value in values {
                list.push_front(value.clone());
            }
            Ok(Reply::Integer(list.len() as i64))
        })
    }

    pub(crate) fn rpush(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        let values = &command.args[1..];
        self.upsert(&command.args[0], ItemType::List, Value::empty(ItemType::List), |item| {
            let list = item.list_mut()?;
            for value in values {
                list.push_back(value.clone());
            }
            Ok(Reply::Integer(list.len() as i64))
        })
    }

    /// Push variants that refuse to create the key.
    pub(crate) fn lpushx(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        let values = &command.args[1..];
        self.update_or(&command.args[0], ItemType::List, Reply::Integer(0), |item| {
            let list = item.list_mut()?;
            for value in values {
                list.push_front(value.clone());
            }
            Ok(Reply::Integer(list.len() as i64))
        })
    }

    pub(crate) fn rpushx(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        let values = &command.args[1..];
        self.update_or(&command.args[0], ItemType::List, Reply::Integer(0), |item| {
            let list = item.list_mut()?;
            for value in values {
                list.push_back(value.clone());
            }
            Ok(Reply::Integer(list.len() as i64))
        })
    }

    pub(crate) fn lpop(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        Ok(self.list_pop(&command.args[0], false)?.map_or(Reply::Nil, Reply::Bulk))
    }

    pub(crate) fn rpop(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        Ok(self.list_pop(&command.args[0], true)?.map_or(Reply::Nil, Reply::Bulk))
    }

    /// Non-blocking pop shared by `LPOP`/`RPOP` and the blocking retries.
    /// Popping the last element deletes the key.
    pub(crate) fn list_pop(
        &mut self,
        key: &[u8],
        back: bool,
    ) -> Result<Option<Vec<u8>>, EdisError> {
        self.update_or(key, ItemType::List, None, |item| {
            let list = item.list_mut()?;
            Ok(if back { list.pop_back() } else { list.pop_front() })
        })
    }

    pub(crate) fn llen(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::List), &command.args[0])?
        else {
            return Ok(Reply::Integer(0));
        };
        Ok(Reply::Integer(item.list_ref()?.len() as i64))
    }

    pub(crate) fn lindex(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let index = int_arg(&command.args[1])?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::List), &command.args[0])?
        else {
            return Ok(Reply::Nil);
        };
        let list = item.list_ref()?;
        Ok(normalize_index(index, list.len())
            .and_then(|i| list.get(i))
            .map_or(Reply::Nil, |v| Reply::Bulk(v.clone())))
    }

    /// New length, or -1 when the pivot is missing, or 0 when the key is.
    pub(crate) fn linsert(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 4)?;
        let after = match command.args[1].to_ascii_uppercase().as_slice() {
            b"BEFORE" => false,
            b"AFTER" => true,
            _ => {
                return Err(EdisError::Unexpected(
                    "LINSERT expects BEFORE or AFTER".to_string(),
                ))
            }
        };
        let (pivot, value) = (&command.args[2], &command.args[3]);
        self.update_or(&command.args[0], ItemType::List, Reply::Integer(0), |item| {
            let list = item.list_mut()?;
            match list.iter().position(|v| v == pivot) {
                Some(at) => {
                    list.insert(if after { at + 1 } else { at }, value.clone());
                    Ok(Reply::Integer(list.len() as i64))
                }
                None => Ok(Reply::Integer(-1)),
            }
        })
    }

    pub(crate) fn lrange(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let start = int_arg(&command.args[1])?;
        let stop = int_arg(&command.args[2])?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::List), &command.args[0])?
        else {
            return Ok(Reply::Array(Vec::new()));
        };
        let list = item.list_ref()?;
        let slice = match normalize_range(start, stop, list.len()) {
            Some((from, to)) => {
                list.iter().skip(from).take(to - from + 1).map(|v| Reply::Bulk(v.clone())).collect()
            }
            None => Vec::new(),
        };
        Ok(Reply::Array(slice))
    }

    /// Trims to the inclusive window; an empty window deletes the key.
    pub(crate) fn ltrim(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let start = int_arg(&command.args[1])?;
        let stop = int_arg(&command.args[2])?;
        self.update_or(&command.args[0], ItemType::List, Reply::Ok, |item| {
            let list = item.list_mut()?;
            match normalize_range(start, stop, list.len()) {
                Some((from, to)) => {
                    list.truncate(to + 1);
                    for _ in 0..from {
                        list.pop_front();
                    }
                }
                None => list.clear(),
            }
            Ok(Reply::Ok)
        })
    }

    /// count > 0 removes the first `count` occurrences, count < 0 the last
    /// `|count|`, count = 0 all of them.
    pub(crate) fn lrem(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let count = int_arg(&command.args[1])?;
        let target = &command.args[2];
        self.update_or(&command.args[0], ItemType::List, Reply::Integer(0), |item| {
            let list = item.list_mut()?;
            let before = list.len();
            if count >= 0 {
                let mut left = if count == 0 { usize::MAX } else { count as usize };
                list.retain(|v| {
                    if left > 0 && v == target {
                        left -= 1;
                        false
                    } else {
                        true
                    }
                });
            } else {
                let mut left = count.unsigned_abs() as usize;
                let mut index = list.len();
                while index > 0 && left > 0 {
                    index -= 1;
                    if list[index] == *target {
                        list.remove(index);
                        left -= 1;
                    }
                }
            }
            Ok(Reply::Integer((before - list.len()) as i64))
        })
    }

    pub(crate) fn lset(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let index = int_arg(&command.args[1])?;
        let value = &command.args[2];
        let result = self.update(&command.args[0], ItemType::List, |item| {
            let list = item.list_mut()?;
            let at = normalize_index(index, list.len()).ok_or(EdisError::OutOfRange)?;
            list[at] = value.clone();
            Ok(Reply::Ok)
        });
        match result {
            Err(EdisError::NotFound) => Err(EdisError::NoSuchKey),
            other => other,
        }
    }

    pub(crate) fn rpoplpush(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        match self.rpoplpush_logic(&command.args[0], &command.args[1]) {
            Ok(value) => Ok(Reply::Bulk(value)),
            Err(EdisError::NotFound) => Ok(Reply::Nil),
            Err(e) => Err(e),
        }
    }

    /// Atomically moves tail(source) to head(destination); rotates in place
    /// when both name the same key. An absent or empty source reports the
    /// internal `not_found` signal.
    pub(crate) fn rpoplpush_logic(
        &mut self,
        source: &[u8],
        destination: &[u8],
    ) -> Result<Vec<u8>, EdisError> {
        if source == destination {
            return self.update(source, ItemType::List, |item| {
                let list = item.list_mut()?;
                let value = list.pop_back().ok_or(EdisError::NotFound)?;
                list.push_front(value.clone());
                Ok(value)
            });
        }

        let Some(mut src_item) = self.get_item(TypeSelector::Exact(ItemType::List), source)?
        else {
            return Err(EdisError::NotFound);
        };
        let mut dst_item = match self.get_item(TypeSelector::Exact(ItemType::List), destination)? {
            Some(item) => item,
            None => Item::new(destination.to_vec(), Value::empty(ItemType::List)),
        };
        let value = src_item.list_mut()?.pop_back().ok_or(EdisError::NotFound)?;
        dst_item.list_mut()?.push_front(value.clone());

        let mut batch = Vec::with_capacity(2);
        if src_item.value.is_empty_aggregate() {
            batch.push(WriteOp::Delete { key: source.to_vec() });
        } else {
            batch.push(WriteOp::Put { key: source.to_vec(), value: src_item.encode()? });
        }
        batch.push(WriteOp::Put { key: destination.to_vec(), value: dst_item.encode()? });
        self.store.write(batch)?;
        Ok(value)
    }

    /// `BLPOP`/`BRPOP`: try every key in order; park on all of them when
    /// nothing pops. A timeout of 0 never expires.
    pub(crate) fn blpop(&mut self, command: &Command, back: bool) -> Result<Verdict, EdisError> {
        check_arity_min(command, 2)?;
        let deadline = blocking_deadline(command.args.last().map_or(&[][..], Vec::as_slice))?;
        let keys = &command.args[..command.args.len() - 1];
        for key in keys {
            if let Some(value) = self.list_pop(key, back)? {
                return Ok(Verdict::Reply(Reply::Array(vec![
                    Reply::Bulk(key.clone()),
                    Reply::Bulk(value),
                ])));
            }
        }
        Ok(Verdict::Park { keys: keys.to_vec(), deadline })
    }

    /// `BRPOPLPUSH`: try the move; park on the source when it comes up empty.
    pub(crate) fn brpoplpush(&mut self, command: &Command) -> Result<Verdict, EdisError> {
        check_arity(command, 3)?;
        let deadline = blocking_deadline(&command.args[2])?;
        match self.rpoplpush_logic(&command.args[0], &command.args[1]) {
            Ok(value) => Ok(Verdict::Reply(Reply::Bulk(value))),
            Err(EdisError::NotFound) => {
                Ok(Verdict::Park { keys: vec![command.args[0].clone()], deadline })
            }
            Err(e) => Err(e),
        }
    }
}

fn blocking_deadline(raw: &[u8]) -> Result<Option<Instant>, EdisError> {
    let seconds = int_arg(raw)?;
    if seconds < 0 {
        return Err(EdisError::OutOfRange);
    }
    if seconds == 0 {
        return Ok(None);
    }
    Ok(Some(Instant::now() + Duration::from_secs(seconds as u64)))
}
