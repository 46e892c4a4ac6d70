//! Sorted-set commands, including the weighted union/intersection stores.

use crate::core::commands::{
    check_arity, check_arity_min, float_arg, int_arg, normalize_range, Command, Reply,
};
use crate::core::common::EdisError;
use crate::core::keyspace::access::TypeSelector;
use crate::core::keyspace::Keyspace;
use crate::core::storage::engine::OrderedKeyValueStore;
use crate::core::types::{Aggregate, Item, ItemType, ScoreBound, SortedSet, Value};
use std::collections::BTreeMap;

impl<S: OrderedKeyValueStore> Keyspace<S> {
    /// Insert-or-update of (score, member) pairs; replies with the change in
    /// cardinality.
    pub(crate) fn zadd(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 3)?;
        if command.args.len() % 2 == 0 {
            return Err(EdisError::Unexpected(
                "wrong number of arguments for 'ZADD'".to_string(),
            ));
        }
        let mut pairs = Vec::with_capacity((command.args.len() - 1) / 2);
        for chunk in command.args[1..].chunks(2) {
            pairs.push((float_arg(&chunk[0])?, chunk[1].clone()));
        }
        self.upsert(&command.args[0], ItemType::ZSet, Value::empty(ItemType::ZSet), |item| {
            let zset = item.zset_mut()?;
            let mut added = 0i64;
            for (score, member) in pairs {
                if zset.insert(member, score) {
                    added += 1;
                }
            }
            Ok(Reply::Integer(added))
        })
    }

    pub(crate) fn zcard(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 1)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::ZSet), &command.args[0])?
        else {
            return Ok(Reply::Integer(0));
        };
        Ok(Reply::Integer(item.zset_ref()?.len() as i64))
    }

    pub(crate) fn zcount(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let min = ScoreBound::parse(&command.args[1])?;
        let max = ScoreBound::parse(&command.args[2])?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::ZSet), &command.args[0])?
        else {
            return Ok(Reply::Integer(0));
        };
        Ok(Reply::Integer(item.zset_ref()?.count(&min, &max) as i64))
    }

    /// A missing member starts from 0; replies with the new score.
    pub(crate) fn zincrby(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let delta = float_arg(&command.args[1])?;
        let member = &command.args[2];
        self.upsert(&command.args[0], ItemType::ZSet, Value::empty(ItemType::ZSet), |item| {
            let zset = item.zset_mut()?;
            let next = zset.score(member).unwrap_or(0.0) + delta;
            if next.is_nan() {
                return Err(EdisError::NotFloat);
            }
            zset.insert(member.clone(), next);
            Ok(Reply::Float(next))
        })
    }

    pub(crate) fn zrange(&mut self, command: &Command) -> Result<Reply, EdisError> {
        self.zrange_generic(command, false)
    }

    pub(crate) fn zrevrange(&mut self, command: &Command) -> Result<Reply, EdisError> {
        self.zrange_generic(command, true)
    }

    /// Rank ranges with the usual inclusive, negative-aware window; the
    /// optional `WITHSCORES` flag alternates scores into the reply.
    fn zrange_generic(&mut self, command: &Command, reverse: bool) -> Result<Reply, EdisError> {
        check_arity_min(command, 3)?;
        let with_scores = match command.args.len() {
            3 => false,
            4 if command.args[3].eq_ignore_ascii_case(b"WITHSCORES") => true,
            _ => {
                return Err(EdisError::Unexpected(format!(
                    "wrong number of arguments for '{}'",
                    command.name
                )))
            }
        };
        let start = int_arg(&command.args[1])?;
        let stop = int_arg(&command.args[2])?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::ZSet), &command.args[0])?
        else {
            return Ok(Reply::Array(Vec::new()));
        };
        let zset = item.zset_ref()?;
        let mut entries: Vec<(f64, Vec<u8>)> =
            zset.iter().map(|(score, member)| (score, member.to_vec())).collect();
        if reverse {
            entries.reverse();
        }
        let mut flat = Vec::new();
        if let Some((from, to)) = normalize_range(start, stop, entries.len()) {
            for (score, member) in &entries[from..=to] {
                flat.push(Reply::Bulk(member.clone()));
                if with_scores {
                    flat.push(Reply::Float(*score));
                }
            }
        }
        Ok(Reply::Array(flat))
    }

    /// Score ranges reply with (score, member) pairs; a missing key is an
    /// empty array.
    pub(crate) fn zrangebyscore(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let min = ScoreBound::parse(&command.args[1])?;
        let max = ScoreBound::parse(&command.args[2])?;
        self.score_range_reply(&command.args[0], &min, &max, false)
    }

    /// Reverse variant: bounds arrive as (max, min) and the pairs come back
    /// descending.
    pub(crate) fn zrevrangebyscore(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let max = ScoreBound::parse(&command.args[1])?;
        let min = ScoreBound::parse(&command.args[2])?;
        self.score_range_reply(&command.args[0], &min, &max, true)
    }

    fn score_range_reply(
        &mut self,
        key: &[u8],
        min: &ScoreBound,
        max: &ScoreBound,
        reverse: bool,
    ) -> Result<Reply, EdisError> {
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::ZSet), key)? else {
            return Ok(Reply::Array(Vec::new()));
        };
        let mut entries = item.zset_ref()?.range_by_score(min, max);
        if reverse {
            entries.reverse();
        }
        Ok(Reply::Array(
            entries
                .into_iter()
                .map(|(score, member)| {
                    Reply::Array(vec![Reply::Float(score), Reply::Bulk(member)])
                })
                .collect(),
        ))
    }

    pub(crate) fn zrank(&mut self, command: &Command) -> Result<Reply, EdisError> {
        self.zrank_generic(command, false)
    }

    pub(crate) fn zrevrank(&mut self, command: &Command) -> Result<Reply, EdisError> {
        self.zrank_generic(command, true)
    }

    fn zrank_generic(&mut self, command: &Command, reverse: bool) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::ZSet), &command.args[0])?
        else {
            return Ok(Reply::Nil);
        };
        let zset = item.zset_ref()?;
        Ok(zset.rank(&command.args[1]).map_or(Reply::Nil, |rank| {
            let rank = if reverse { zset.len() - 1 - rank } else { rank };
            Reply::Integer(rank as i64)
        }))
    }

    pub(crate) fn zrem(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity_min(command, 2)?;
        let members = &command.args[1..];
        self.update_or(&command.args[0], ItemType::ZSet, Reply::Integer(0), |item| {
            let zset = item.zset_mut()?;
            let mut removed = 0i64;
            for member in members {
                if zset.remove(member).is_some() {
                    removed += 1;
                }
            }
            Ok(Reply::Integer(removed))
        })
    }

    /// RANGE composed with REM: members inside the rank window go away.
    pub(crate) fn zremrangebyrank(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let start = int_arg(&command.args[1])?;
        let stop = int_arg(&command.args[2])?;
        self.update_or(&command.args[0], ItemType::ZSet, Reply::Integer(0), |item| {
            let zset = item.zset_mut()?;
            let doomed: Vec<Vec<u8>> = match normalize_range(start, stop, zset.len()) {
                Some((from, to)) => zset
                    .iter()
                    .skip(from)
                    .take(to - from + 1)
                    .map(|(_, member)| member.to_vec())
                    .collect(),
                None => Vec::new(),
            };
            for member in &doomed {
                zset.remove(member);
            }
            Ok(Reply::Integer(doomed.len() as i64))
        })
    }

    pub(crate) fn zremrangebyscore(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 3)?;
        let min = ScoreBound::parse(&command.args[1])?;
        let max = ScoreBound::parse(&command.args[2])?;
        self.update_or(&command.args[0], ItemType::ZSet, Reply::Integer(0), |item| {
            let zset = item.zset_mut()?;
            let doomed: Vec<Vec<u8>> =
                zset.range_by_score(&min, &max).into_iter().map(|(_, member)| member).collect();
            for member in &doomed {
                zset.remove(member);
            }
            Ok(Reply::Integer(doomed.len() as i64))
        })
    }

    pub(crate) fn zscore(&mut self, command: &Command) -> Result<Reply, EdisError> {
        check_arity(command, 2)?;
        let Some(item) = self.get_item(TypeSelector::Exact(ItemType::ZSet), &command.args[0])?
        else {
            return Ok(Reply::Nil);
        };
        Ok(item.zset_ref()?.score(&command.args[1]).map_or(Reply::Nil, Reply::Float))
    }

    pub(crate) fn zunionstore(&mut self, command: &Command) -> Result<Reply, EdisError> {
        self.zstore_generic(command, true)
    }

    pub(crate) fn zinterstore(&mut self, command: &Command) -> Result<Reply, EdisError> {
        self.zstore_generic(command, false)
    }

    /// `dst numkeys key... [WEIGHTS w...] [AGGREGATE SUM|MIN|MAX]`.
    /// Weights default to 1, aggregation to SUM; an empty result deletes the
    /// destination.
    fn zstore_generic(&mut self, command: &Command, union: bool) -> Result<Reply, EdisError> {
        check_arity_min(command, 3)?;
        let numkeys = int_arg(&command.args[1])?;
        let numkeys = usize::try_from(numkeys).map_err(|_| EdisError::OutOfRange)?;
        if numkeys == 0 || command.args.len() < 2 + numkeys {
            return Err(EdisError::Unexpected(format!(
                "wrong number of arguments for '{}'",
                command.name
            )));
        }
        let keys: Vec<Vec<u8>> = command.args[2..2 + numkeys].to_vec();

        let mut weights = vec![1.0f64; numkeys];
        let mut aggregate = Aggregate::Sum;
        let mut rest = &command.args[2 + numkeys..];
        while !rest.is_empty() {
            match rest[0].to_ascii_uppercase().as_slice() {
                b"WEIGHTS" => {
                    if rest.len() < 1 + numkeys {
                        return Err(EdisError::Unexpected(
                            "WEIGHTS expects one weight per input key".to_string(),
                        ));
                    }
                    for (slot, raw) in weights.iter_mut().zip(&rest[1..=numkeys]) {
                        *slot = float_arg(raw)?;
                    }
                    rest = &rest[1 + numkeys..];
                }
                b"AGGREGATE" => {
                    if rest.len() < 2 {
                        return Err(EdisError::Unexpected(
                            "AGGREGATE expects a function name".to_string(),
                        ));
                    }
                    aggregate = Aggregate::parse(&rest[1])?;
                    rest = &rest[2..];
                }
                _ => {
                    return Err(EdisError::Unexpected(format!(
                        "syntax error in '{}'",
                        command.name
                    )))
                }
            }
        }

        let mut inputs = Vec::with_capacity(numkeys);
        for (key, weight) in keys.iter().zip(&weights) {
            let zset = match self.get_item(TypeSelector::Exact(ItemType::ZSet), key)? {
                Some(item) => Some(item.zset_ref()?.clone()),
                None => None,
            };
            inputs.push((zset, *weight));
        }

        let result =
            if union { weighted_union(&inputs, aggregate) } else { weighted_inter(&inputs, aggregate) };

        let cardinality = result.len() as i64;
        if result.is_empty() {
            self.store.delete(&command.args[0])?;
        } else {
            let mut zset = SortedSet::new();
            for (member, score) in result {
                zset.insert(member, score);
            }
            self.put_item(&Item::new(command.args[0].clone(), Value::SortedSet(zset)))?;
        }
        Ok(Reply::Integer(cardinality))
    }
}

/// Union: every member of any input, scores weighted then aggregated over the
/// inputs that contain the member. Missing keys behave as empty zsets.
fn weighted_union(
    inputs: &[(Option<SortedSet>, f64)],
    aggregate: Aggregate,
) -> BTreeMap<Vec<u8>, f64> {
    let mut combined: BTreeMap<Vec<u8>, f64> = BTreeMap::new();
    for (zset, weight) in inputs {
        let Some(zset) = zset else { continue };
        for (score, member) in zset.iter() {
            let weighted = score * weight;
            combined
                .entry(member.to_vec())
                .and_modify(|acc| *acc = aggregate.combine(*acc, weighted))
                .or_insert(weighted);
        }
    }
    combined
}

/// Intersection: only members present in every input survive; an absent input
/// key empties the whole result.
fn weighted_inter(
    inputs: &[(Option<SortedSet>, f64)],
    aggregate: Aggregate,
) -> BTreeMap<Vec<u8>, f64> {
    let mut combined = BTreeMap::new();
    let Some(((first, first_weight), rest)) = inputs.split_first() else {
        return combined;
    };
    let Some(first) = first else { return combined };
    if rest.iter().any(|(zset, _)| zset.is_none()) {
        return combined;
    }
    'members: for (score, member) in first.iter() {
        let mut acc = score * first_weight;
        for (zset, weight) in rest {
            let Some(zset) = zset else { return BTreeMap::new() };
            match zset.score(member) {
                Some(other) => acc = aggregate.combine(acc, other * weight),
                None => continue 'members,
            }
        }
        combined.insert(member.to_vec(), acc);
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keyspace::test_util::{bulk, keyspace, run};

    fn pair(score: f64, member: &str) -> Reply {
        Reply::Array(vec![Reply::Float(score), bulk(member)])
    }

    #[test]
    fn zadd_reports_cardinality_delta() {
        let (_dir, mut ks) = keyspace();
        assert_eq!(
            run(&mut ks, "ZADD", &["z", "1", "a", "2", "b"]).unwrap(),
            Reply::Integer(2)
        );
        // updating an existing member adds nothing
        assert_eq!(
            run(&mut ks, "ZADD", &["z", "5", "a", "3", "c"]).unwrap(),
            Reply::Integer(1)
        );
        assert_eq!(run(&mut ks, "ZCARD", &["z"]).unwrap(), Reply::Integer(3));
        assert_eq!(run(&mut ks, "ZSCORE", &["z", "a"]).unwrap(), Reply::Float(5.0));
    }

    #[test]
    fn zrange_with_scores_is_flat_and_ordered() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "ZADD", &["z", "1", "a", "2", "b", "3", "c"]).unwrap();
        assert_eq!(
            run(&mut ks, "ZRANGE", &["z", "0", "-1", "WITHSCORES"]).unwrap(),
            Reply::Array(vec![
                bulk("a"),
                Reply::Float(1.0),
                bulk("b"),
                Reply::Float(2.0),
                bulk("c"),
                Reply::Float(3.0),
            ])
        );
        assert_eq!(
            run(&mut ks, "ZREVRANGE", &["z", "0", "1"]).unwrap(),
            Reply::Array(vec![bulk("c"), bulk("b")])
        );
        assert_eq!(run(&mut ks, "ZRANGE", &["missing", "0", "-1"]).unwrap(), Reply::Array(vec![]));
    }

    #[test]
    fn zrangebyscore_returns_score_member_pairs() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "ZADD", &["z", "1", "a", "2", "b", "3", "c"]).unwrap();
        assert_eq!(
            run(&mut ks, "ZRANGEBYSCORE", &["z", "1", "2"]).unwrap(),
            Reply::Array(vec![pair(1.0, "a"), pair(2.0, "b")])
        );
        assert_eq!(
            run(&mut ks, "ZRANGEBYSCORE", &["z", "(1", "+inf"]).unwrap(),
            Reply::Array(vec![pair(2.0, "b"), pair(3.0, "c")])
        );
        assert_eq!(
            run(&mut ks, "ZREVRANGEBYSCORE", &["z", "+inf", "2"]).unwrap(),
            Reply::Array(vec![pair(3.0, "c"), pair(2.0, "b")])
        );
        // redesign flag: a missing key is an empty array, not a zero
        assert_eq!(
            run(&mut ks, "ZRANGEBYSCORE", &["missing", "-inf", "+inf"]).unwrap(),
            Reply::Array(vec![])
        );
    }

    #[test]
    fn zrank_counts_smaller_entries() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "ZADD", &["z", "1", "a", "1", "b", "2", "c"]).unwrap();
        assert_eq!(run(&mut ks, "ZRANK", &["z", "a"]).unwrap(), Reply::Integer(0));
        // equal score, lexicographically larger member ranks after
        assert_eq!(run(&mut ks, "ZRANK", &["z", "b"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut ks, "ZRANK", &["z", "c"]).unwrap(), Reply::Integer(2));
        assert_eq!(run(&mut ks, "ZREVRANK", &["z", "a"]).unwrap(), Reply::Integer(2));
        assert_eq!(run(&mut ks, "ZRANK", &["z", "zz"]).unwrap(), Reply::Nil);
    }

    #[test]
    fn zincrby_starts_missing_members_at_zero() {
        let (_dir, mut ks) = keyspace();
        assert_eq!(run(&mut ks, "ZINCRBY", &["z", "2.5", "m"]).unwrap(), Reply::Float(2.5));
        assert_eq!(run(&mut ks, "ZINCRBY", &["z", "-1", "m"]).unwrap(), Reply::Float(1.5));
    }

    #[test]
    fn zcount_honours_bounds() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "ZADD", &["z", "1", "a", "2", "b", "3", "c"]).unwrap();
        assert_eq!(run(&mut ks, "ZCOUNT", &["z", "-inf", "+inf"]).unwrap(), Reply::Integer(3));
        assert_eq!(run(&mut ks, "ZCOUNT", &["z", "(1", "3"]).unwrap(), Reply::Integer(2));
        assert_eq!(run(&mut ks, "ZCOUNT", &["missing", "-inf", "+inf"]).unwrap(), Reply::Integer(0));
    }

    #[test]
    fn zrem_and_remrange_delete_emptied_keys() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "ZADD", &["z", "1", "a", "2", "b"]).unwrap();
        assert_eq!(run(&mut ks, "ZREM", &["z", "a", "zz"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut ks, "ZREM", &["z", "b"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut ks, "EXISTS", &["z"]).unwrap(), Reply::Bool(false));

        run(&mut ks, "ZADD", &["z", "1", "a", "2", "b", "3", "c"]).unwrap();
        assert_eq!(run(&mut ks, "ZREMRANGEBYRANK", &["z", "0", "1"]).unwrap(), Reply::Integer(2));
        assert_eq!(run(&mut ks, "ZCARD", &["z"]).unwrap(), Reply::Integer(1));
        assert_eq!(
            run(&mut ks, "ZREMRANGEBYSCORE", &["z", "-inf", "+inf"]).unwrap(),
            Reply::Integer(1)
        );
        assert_eq!(run(&mut ks, "EXISTS", &["z"]).unwrap(), Reply::Bool(false));
    }

    #[test]
    fn zunionstore_sums_weighted_scores() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "ZADD", &["a", "1", "x", "2", "y"]).unwrap();
        run(&mut ks, "ZADD", &["b", "10", "y", "20", "z"]).unwrap();
        assert_eq!(
            run(&mut ks, "ZUNIONSTORE", &["dst", "2", "a", "b"]).unwrap(),
            Reply::Integer(3)
        );
        assert_eq!(run(&mut ks, "ZSCORE", &["dst", "x"]).unwrap(), Reply::Float(1.0));
        assert_eq!(run(&mut ks, "ZSCORE", &["dst", "y"]).unwrap(), Reply::Float(12.0));
        assert_eq!(run(&mut ks, "ZSCORE", &["dst", "z"]).unwrap(), Reply::Float(20.0));
        // weights multiply before aggregation
        run(&mut ks, "ZUNIONSTORE", &["dst", "2", "a", "b", "WEIGHTS", "2", "0.5"]).unwrap();
        assert_eq!(run(&mut ks, "ZSCORE", &["dst", "y"]).unwrap(), Reply::Float(9.0));
        // MIN keeps the smallest weighted contribution
        run(&mut ks, "ZUNIONSTORE", &["dst", "2", "a", "b", "AGGREGATE", "MIN"]).unwrap();
        assert_eq!(run(&mut ks, "ZSCORE", &["dst", "y"]).unwrap(), Reply::Float(2.0));
    }

    #[test]
    fn zinterstore_requires_presence_in_every_input() {
        let (_dir, mut ks) = keyspace();
        run(&mut ks, "ZADD", &["a", "1", "x", "2", "y"]).unwrap();
        run(&mut ks, "ZADD", &["b", "10", "y", "20", "z"]).unwrap();
        assert_eq!(
            run(&mut ks, "ZINTERSTORE", &["dst", "2", "a", "b"]).unwrap(),
            Reply::Integer(1)
        );
        assert_eq!(run(&mut ks, "ZSCORE", &["dst", "y"]).unwrap(), Reply::Float(12.0));
        // an absent input key empties the result, deleting the destination
        assert_eq!(
            run(&mut ks, "ZINTERSTORE", &["dst", "2", "a", "missing"]).unwrap(),
            Reply::Integer(0)
        );
        assert_eq!(run(&mut ks, "EXISTS", &["dst"]).unwrap(), Reply::Bool(false));
    }
}
