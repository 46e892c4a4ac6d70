//! Hash commands: a field -> value mapping per key.

use crate::core::commands::{check_arity, check_arity_min, int_arg, Command, Reply};
use crate::core::common::EdisError;
use crate::core::keyspace::access::TypeSelector;
use crate::core::keyspace::Keyspace;
use crate::core::storage::engine::OrderedKeyValueStore;
use crate::core::types::{ItemType, Value};

impl<S: OrderedKeyValueStore> Keyspace<S> {
    /// Replies with the number of newly added fields.
    pub(crate) fn hset(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let (field, value) = (&command.args[1], &command.args[2]);
        self.upsert(&command.args[0], ItemType::Hash, Value::empty(ItemType::Hash), |item| {
            let added = item.hash_mut()?.insert(field.clone(), value.clone()).is_none();
            Ok(Reply::Integer(i64::from(added)))
        })
    }

    /// Multi-field variant of `HSET`; same newly-added-count reply.
    pub(crate) fn hmset(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 3)?;
        if command.args.len() % 2 == 0 {
            return Err(EdisError::Unexpected(
                "wrong number of arguments for 'HMSET'".to_string(),
            ));
        }
        let pairs = &command.args[1..];
        self.upsert(&command.args[0], ItemType::Hash, Value::empty(ItemType::Hash), |item| {
            let map = item.hash_mut()?;
            let mut added = 0i64;
            for pair in pairs.chunks(2) {
                if map.insert(pair[0].clone(), pair[1].clone()).is_none() {
                    added += 1;
                }
            }
            Ok(Reply::Integer(added))
        })
    }

    pub(crate) fn hsetnx(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let (field, value) = (&command.args[1], &command.args[2]);
        self.upsert(&command.args[0], ItemType::Hash, Value::empty(ItemType::Hash), |item| {
            let map = item.hash_mut()?;
            if map.contains_key(field) {
                Ok(Reply::Bool(false))
            } else {
                map.insert(field.clone(), value.clone());
                Ok(Reply::Bool(true))
            }
        })
    }

    pub(crate) fn hget(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::Hash), &command.args[0])?
        else {
            return Ok(Reply::Nil);
        };
        Ok(item.hash_ref()?.get(&command.args[1]).map_or(Reply::Nil, |v| Reply::Bulk(v.clone())))
    }

    pub(crate) fn hmget(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::Hash), &command.args[0])?
        else {
            return Ok(Reply::Array(vec![Reply::Nil; command.args.len() - 1]));
        };
        let map = item.hash_ref()?;
        let slots = command.args[1..]
            .iter()
            .map(|field| map.get(field).map_or(Reply::Nil, |v| Reply::Bulk(v.clone())))
            .collect();
        Ok(Reply::Array(slots))
    }

    /// Alternating `[field, value, ...]` in mapping iteration order.
    pub(crate) fn hgetall(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::Hash), &command.args[0])?
        else {
            return Ok(Reply::Array(Vec::new()));
        };
        let mut flat = Vec::new();
        for (field, value) in item.hash_ref()? {
            flat.push(Reply::Bulk(field.clone()));
            flat.push(Reply::Bulk(value.clone()));
        }
        Ok(Reply::Array(flat))
    }

    pub(crate) fn hkeys(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::Hash), &command.args[0])?
        else {
            return Ok(Reply::Array(Vec::new()));
        };
        Ok(Reply::Array(item.hash_ref()?.keys().map(|f| Reply::Bulk(f.clone())).collect()))
    }

    pub(crate) fn hvals(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::Hash), &command.args[0])?
        else {
            return Ok(Reply::Array(Vec::new()));
        };
        Ok(Reply::Array(item.hash_ref()?.values().map(|v| Reply::Bulk(v.clone())).collect()))
    }

    pub(crate) fn hlen(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::Hash), &command.args[0])?
        else {
            return Ok(Reply::Integer(0));
        };
        Ok(Reply::Integer(item.hash_ref()?.len() as i64))
    }

    pub(crate) fn hexists(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::Hash), &command.args[0])?
        else {
            return Ok(Reply::Bool(false));
        };
        Ok(Reply::Bool(item.hash_ref()?.contains_key(&command.args[1])))
    }

    /// Removes fields, replying with how many were present. A hash emptied by
    /// the removals deletes its key.
    pub(crate) fn hdel(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        let fields = &command.args[1..];
        self.update_or(&command.args[0], ItemType::Hash, Reply::Integer(0), |item| {
            let map = item.hash_mut()?;
            let mut removed = 0i64;
            for field in fields {
                if map.remove(field).is_some() {
                    removed += 1;
                }
            }
            Ok(Reply::Integer(removed))
        })
    }

    /// A missing field is created holding the increment itself.
    pub(crate) fn hincrby(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let field = &command.args[1];
        let delta = int_arg(&command.args[2])?;
        self.upsert(&command.args[0], ItemType::Hash, Value::empty(ItemType::Hash), |item| {
            let map = item.hash_mut()?;
            let next = match map.get(field) {
                Some(current) => int_arg(current)?
                    .checked_add(delta)
                    .ok_or(EdisError::NotInteger)?,
                None => delta,
            };
            map.insert(field.clone(), next.to_string().into_bytes());
            Ok(Reply::Integer(next))
        })
    }
}
