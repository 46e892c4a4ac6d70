//! Set commands and the difference/intersection/union operators.

use crate::core::commands::{check_arity, check_arity_min, Command, Reply};
use crate::core::common::EdisError;
use crate::core::keyspace::access::TypeSelector;
use crate::core::keyspace::Keyspace;
use crate::core::storage::engine::{OrderedKeyValueStore, WriteOp};
use crate::core::types::{Item, ItemType, Value};
use rand::Rng;
use std::collections::BTreeSet;

impl<S: OrderedKeyValueStore> Keyspace<S> {
    pub(crate) fn sadd(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        let members = &command.args[1..];
        self.upsert(&command.args[0], ItemType::Set, Value::empty(ItemType::Set), |item| {
            let set = item.set_mut()?;
            let mut added = 0i64;
            for member in members {
                if set.insert(member.clone()) {
                    added += 1;
                }
            }
            Ok(Reply::Integer(added))
        })
    }

    pub(crate) fn srem(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        let members = &command.args[1..];
        self.update_or(&command.args[0], ItemType::Set, Reply::Integer(0), |item| {
            let set = item.set_mut()?;
            let mut removed = 0i64;
            for member in members {
                if set.remove(member) {
                    removed += 1;
                }
            }
            Ok(Reply::Integer(removed))
        })
    }

    pub(crate) fn scard(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::Set), &command.args[0])?
        else {
            return Ok(Reply::Integer(0));
        };
        Ok(Reply::Integer(item.set_ref()?.len() as i64))
    }

    pub(crate) fn sismember(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::Set), &command.args[0])?
        else {
            return Ok(Reply::Bool(false));
        };
        Ok(Reply::Bool(item.set_ref()?.contains(&command.args[1])))
    }

    pub(crate) fn smembers(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::Set), &command.args[0])?
        else {
            return Ok(Reply::Array(Vec::new()));
        };
        Ok(Reply::Array(item.set_ref()?.iter().map(|m| Reply::Bulk(m.clone())).collect()))
    }

    /// Atomic move of one member: the source loses it (and disappears when
    /// emptied), the destination gains it, in one batch.
    pub(crate) fn smove(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let (source, destination, member) =
            (&command.args[0], &command.args[1], &command.args[2]);
        let Some(mut src_item) = self.get_item(TypeSelector::Exact(ItemType::Set), source)?
        else {
            return Ok(Reply::Bool(false));
        };
        if !src_item.set_ref()?.contains(member) {
            return Ok(Reply::Bool(false));
        }
        if source == destination {
            return Ok(Reply::Bool(true));
        }
        let mut dst_item = match self.get_item(TypeSelector::Exact(ItemType::Set), destination)? {
            Some(item) => item,
            None => Item::new(destination.clone(), Value::empty(ItemType::Set)),
        };
        src_item.set_mut()?.remove(member);
        dst_item.set_mut()?.insert(member.clone());

        let mut batch = Vec::with_capacity(2);
        if src_item.value.is_empty_aggregate() {
            batch.push(WriteOp::Delete { key: source.clone() });
        } else {
            batch.push(WriteOp::Put { key: source.clone(), value: src_item.encode()? });
        }
        batch.push(WriteOp::Put { key: destination.clone(), value: dst_item.encode()? });
        self.store.write(batch)?;
        Ok(Reply::Bool(true))
    }

    /// Removes and returns the smallest member by value order. Deterministic,
    /// not random.
    pub(crate) fn spop(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        self.update_or(&command.args[0], ItemType::Set, Reply::Nil, |item| {
            let set = item.set_mut()?;
            match set.iter().next().cloned() {
                Some(member) => {
                    set.remove(&member);
                    Ok(Reply::Bulk(member))
                }
                None => Ok(Reply::Nil),
            }
        })
    }

    /// Uniform over the current cardinality, without removing.
    pub(crate) fn srandmember(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::Set), &command.args[0])?
        else {
            return Ok(Reply::Nil);
        };
        let set = item.set_ref()?;
        if set.is_empty() {
            return Ok(Reply::Nil);
        }
        let pick = self.rng.gen_range(0..set.len());
        Ok(set.iter().nth(pick).map_or(Reply::Nil, |m| Reply::Bulk(m.clone())))
    }

    pub(crate) fn sdiff(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 1)?;
        let result = self.sdiff_value(&command.args)?;
        Ok(members_reply(&result))
    }

    pub(crate) fn sdiffstore(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        let result = self.sdiff_value(&command.args[1..])?;
        self.store_set(&command.args[0], result)
    }

    pub(crate) fn sinter(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 1)?;
        let result = self.sinter_value(&command.args)?;
        Ok(members_reply(&result))
    }

    pub(crate) fn sinterstore(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        let result = self.sinter_value(&command.args[1..])?;
        self.store_set(&command.args[0], result)
    }

    pub(crate) fn sunion(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 1)?;
        let result = self.sunion_value(&command.args)?;
        Ok(members_reply(&result))
    }

    pub(crate) fn sunionstore(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        let result = self.sunion_value(&command.args[1..])?;
        self.store_set(&command.args[0], result)
    }

    /// Gated set read; a missing key behaves as the empty set.
    fn read_set(&mut self, key: &[u8]) -> Result<BTreeSet<Vec<u8>>, EdisError> {
        match self.get_item(TypeSelector::Exact(ItemType::Set), key)? {
            Some(item) => Ok(item.set_ref()?.clone()),
            None => Ok(BTreeSet::new()),
        }
    }

    /// First set minus every following one.
    fn sdiff_value(&mut self, keys: &[Vec<u8>]) -> Result<BTreeSet<Vec<u8>>, EdisError> {
        let Some((first, rest)) = keys.split_first() else {
            return Ok(BTreeSet::new());
        };
        let mut result = self.read_set(first)?;
        for key in rest {
            let other = self.read_set(key)?;
            result.retain(|member| !other.contains(member));
        }
        Ok(result)
    }

    /// Intersection; any missing input key makes the result empty.
    fn sinter_value(&mut self, keys: &[Vec<u8>]) -> Result<BTreeSet<Vec<u8>>, EdisError> {
        let Some((first, rest)) = keys.split_first() else {
            return Ok(BTreeSet::new());
        };
        let mut result = self.read_set(first)?;
        for key in rest {
            if result.is_empty() {
                break;
            }
            let other = self.read_set(key)?;
            result.retain(|member| other.contains(member));
        }
        Ok(result)
    }

    fn sunion_value(&mut self, keys: &[Vec<u8>]) -> Result<BTreeSet<Vec<u8>>, EdisError> {
        let mut result = BTreeSet::new();
        for key in keys {
            result.extend(self.read_set(key)?);
        }
        Ok(result)
    }

    /// Writes a computed set to `destination`, deleting it when the result is
    /// empty. Replies with the stored cardinality.
    fn store_set(
        &mut self,
        destination: &[u8],
        result: BTreeSet<Vec<u8>>,
    ) -> Result<Reply, EdisError> {
        let cardinality = result.len() as i64;
        if result.is_empty() {
            self.store.delete(destination)?;
        } else {
            self.put_item(&Item::new(destination.to_vec(), Value::Set(result)))?;
        }
        Ok(Reply::Integer(cardinality))
    }
}

fn members_reply(set: &BTreeSet<Vec<u8>>) -> Reply {
    Reply::Array(set.iter().map(|m| Reply::Bulk(m.clone())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keyspace::test_util::{bulk, bulks, keyspace, run};

    #[test]
    fn cardinality_tracks_adds_and_removals() {
        let (_dir, mut ks) = keyspace();
        assert_eq!(run(&mut ks, "SADD", &["s", "a", "b", "a"]).unwrap(), Reply::Integer(2));
        assert_eq!(run(&mut ks, "SCARD", &["s"]).unwrap(), Reply::Integer(2));
        assert_eq!(run(&mut ks, "SREM", &["s", "a", "zz"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut ks, "SCARD", &["s"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut ks, "SMEMBERS", &["s"]).unwrap(), bulks(&["b"]));
        assert_eq!(run(&mut ks, "SISMEMBER", &["s", "b"]).unwrap(), Reply::Bool(true));
        assert_eq!(run(&mut ks, "SISMEMBER", &["s", "a"]).unwrap(), Reply::Bool(false));
    }

    #[test]
    fn srem_that_empties_deletes_the_key() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SADD", &["s", "only"]).unwrap();
        assert_eq!(run(&mut ks, "SREM", &["s", "only"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut ks, "EXISTS", &["s"]).unwrap(), Reply::Bool(false));
    }

    #[test]
    fn spop_returns_the_smallest_member() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SADD", &["s", "c", "a", "b"]).unwrap();
        assert_eq!(run(&mut ks, "SPOP", &["s"]).unwrap(), bulk("a"));
        assert_eq!(run(&mut ks, "SPOP", &["s"]).unwrap(), bulk("b"));
        assert_eq!(run(&mut ks, "SPOP", &["s"]).unwrap(), bulk("c"));
        assert_eq!(run(&mut ks, "EXISTS", &["s"]).unwrap(), Reply::Bool(false));
        assert_eq!(run(&mut ks, "SPOP", &["s"]).unwrap(), Reply::Nil);
    }

    #[test]
    fn srandmember_returns_a_live_member() {
        let (_dir, mut ks) = keyspace();
        assert_eq!(run(&mut ks, "SRANDMEMBER", &["s"]).unwrap(), Reply::Nil);
        run(&mut ks, "SADD", &["s", "a", "b", "c"]).unwrap();
        for _ in 0..16 {
            match run(&mut ks, "SRANDMEMBER", &["s"]).unwrap() {
                Reply::Bulk(member) => {
                    assert!([b"a".to_vec(), b"b".to_vec(), b"c".to_vec()].contains(&member));
                }
                other => panic!("unexpected reply {other:?}"),
            }
        }
        // sampling does not remove
        assert_eq!(run(&mut ks, "SCARD", &["s"]).unwrap(), Reply::Integer(3));
    }

    #[test]
    fn smove_is_atomic_and_prunes_empty_sources() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SADD", &["src", "m"]).unwrap();
        assert_eq!(run(&mut ks, "SMOVE", &["src", "dst", "m"]).unwrap(), Reply::Bool(true));
        assert_eq!(run(&mut ks, "EXISTS", &["src"]).unwrap(), Reply::Bool(false));
        assert_eq!(run(&mut ks, "SMEMBERS", &["dst"]).unwrap(), bulks(&["m"]));
        assert_eq!(run(&mut ks, "SMOVE", &["src", "dst", "m"]).unwrap(), Reply::Bool(false));
        assert_eq!(run(&mut ks, "SMOVE", &["dst", "x", "zz"]).unwrap(), Reply::Bool(false));
    }

    #[test]
    fn operators_over_two_sets() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SADD", &["s1", "a", "b", "c"]).unwrap();
        run(&mut ks, "SADD", &["s2", "b", "c", "d"]).unwrap();
        assert_eq!(run(&mut ks, "SINTER", &["s1", "s2"]).unwrap(), bulks(&["b", "c"]));
        assert_eq!(run(&mut ks, "SDIFF", &["s1", "s2"]).unwrap(), bulks(&["a"]));
        assert_eq!(
            run(&mut ks, "SUNION", &["s1", "s2"]).unwrap(),
            bulks(&["a", "b", "c", "d"])
        );
        // intersecting with a missing key yields empty
        assert_eq!(run(&mut ks, "SINTER", &["s1", "missing"]).unwrap(), Reply::Array(vec![]));
        assert_eq!(run(&mut ks, "SUNION", &["missing", "s2"]).unwrap(), bulks(&["b", "c", "d"]));
    }

    #[test]
    fn interstore_writes_the_result() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SADD", &["s1", "a", "b", "c"]).unwrap();
        run(&mut ks, "SADD", &["s2", "b", "c", "d"]).unwrap();
        assert_eq!(run(&mut ks, "SINTERSTORE", &["out", "s1", "s2"]).unwrap(), Reply::Integer(2));
        assert_eq!(run(&mut ks, "SMEMBERS", &["out"]).unwrap(), bulks(&["b", "c"]));
    }

    #[test]
    fn empty_store_result_deletes_the_destination() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SADD", &["a", "x"]).unwrap();
        run(&mut ks, "SADD", &["d", "stale"]).unwrap();
        // a \ a is empty, so the destination goes away
        assert_eq!(run(&mut ks, "SDIFFSTORE", &["d", "a", "a"]).unwrap(), Reply::Integer(0));
        assert_eq!(run(&mut ks, "EXISTS", &["d"]).unwrap(), Reply::Bool(false));
    }

    #[test]
    fn set_commands_reject_other_types() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "SET", &["s", "v"]).unwrap();
        assert_eq!(run(&mut ks, "SADD", &["s", "m"]), Err(EdisError::WrongType));
        assert_eq!(run(&mut ks, "SMEMBERS", &["s"]), Err(EdisError::WrongType));
        assert_eq!(run(&mut ks, "SUNION", &["s"]), Err(EdisError::WrongType));
    }
}
