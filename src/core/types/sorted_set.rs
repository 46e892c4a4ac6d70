//! Sorted set with skiplist-like semantics: unique members, ordering by
//! (score, member), rank queries and open/closed/infinite score ranges.
//!
//! Two views of the same data: a member -> score map for point lookups and a
//! `BTreeSet` over `(OrderedFloat<f64>, member)` for ordered traversal. Both
//! are kept in lockstep by the mutating methods.

use crate::core::common::EdisError;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<(f64, Vec<u8>)>", into = "Vec<(f64, Vec<u8>)>")]
pub struct SortedSet {
    scores: BTreeMap<Vec<u8>, f64>,
    ordered: BTreeSet<(OrderedFloat<f64>, Vec<u8>)>,
}

impl From<Vec<(f64, Vec<u8>)>> for SortedSet {
    fn from(entries: Vec<(f64, Vec<u8>)>) -> Self {
        let mut zset = SortedSet::new();
        for (score, member) in entries {
            zset.insert(member, score);
        }
        zset
    }
}

impl From<SortedSet> for Vec<(f64, Vec<u8>)> {
    fn from(zset: SortedSet) -> Self {
        zset.ordered.into_iter().map(|(score, member)| (score.into_inner(), member)).collect()
    }
}

impl SortedSet {
    pub fn new() -> SortedSet {
        SortedSet::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.scores.contains_key(member)
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Insert-or-update. Returns true when the member is new.
    pub fn insert(&mut self, member: Vec<u8>, score: f64) -> bool {
        match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(OrderedFloat(old), member.clone()));
                self.ordered.insert((OrderedFloat(score), member));
                false
            }
            None => {
                self.ordered.insert((OrderedFloat(score), member));
                true
            }
        }
    }

    /// Removes a member, returning its score if it was present.
    pub fn remove(&mut self, member: &[u8]) -> Option<f64> {
        let score = self.scores.remove(member)?;
        self.ordered.remove(&(OrderedFloat(score), member.to_vec()));
        Some(score)
    }

    /// 0-based forward rank: number of entries ordered strictly before the
    /// member under (score, member) ordering.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = self.score(member)?;
        let target = (OrderedFloat(score), member.to_vec());
        self.ordered.iter().position(|entry| *entry == target)
    }

    /// Ascending (score, member) traversal.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &[u8])> + '_ {
        self.ordered.iter().map(|(score, member)| (score.into_inner(), member.as_slice()))
    }

    /// Entries whose score lies within `[min, max]` as bounded, ascending.
    pub fn range_by_score(&self, min: &ScoreBound, max: &ScoreBound) -> Vec<(f64, Vec<u8>)> {
        self.ordered
            .iter()
            .filter(|(score, _)| min.admits_from_below(score.into_inner()) && max.admits_from_above(score.into_inner()))
            .map(|(score, member)| (score.into_inner(), member.clone()))
            .collect()
    }

    pub fn count(&self, min: &ScoreBound, max: &ScoreBound) -> usize {
        self.ordered
            .iter()
            .filter(|(score, _)| min.admits_from_below(score.into_inner()) && max.admits_from_above(score.into_inner()))
            .count()
    }
}

/// One side of a score range: inclusive, exclusive, or infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    Incl(f64),
    Excl(f64),
}

impl ScoreBound {
    /// Parses Redis score-range syntax: `-inf`, `+inf`, `(x` for exclusive,
    /// or a plain number for inclusive.
    pub fn parse(raw: &[u8]) -> Result<ScoreBound, EdisError> {
        let text = std::str::from_utf8(raw).map_err(|_| EdisError::NotFloat)?;
        if text.eq_ignore_ascii_case("-inf") {
            return Ok(ScoreBound::NegInf);
        }
        if text.eq_ignore_ascii_case("+inf") || text.eq_ignore_ascii_case("inf") {
            return Ok(ScoreBound::PosInf);
        }
        let (exclusive, number) =
            if let Some(rest) = text.strip_prefix('(') { (true, rest) } else { (false, text) };
        let score: f64 = number.parse().map_err(|_| EdisError::NotFloat)?;
        if score.is_nan() {
            return Err(EdisError::NotFloat);
        }
        Ok(if exclusive { ScoreBound::Excl(score) } else { ScoreBound::Incl(score) })
    }

    /// True when `score` satisfies this bound used as the lower end.
    pub fn admits_from_below(&self, score: f64) -> bool {
        match *self {
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
            ScoreBound::Incl(limit) => score >= limit,
            ScoreBound::Excl(limit) => score > limit,
        }
    }

    /// True when `score` satisfies this bound used as the upper end.
    pub fn admits_from_above(&self, score: f64) -> bool {
        match *self {
            ScoreBound::NegInf => false,
            ScoreBound::PosInf => true,
            ScoreBound::Incl(limit) => score <= limit,
            ScoreBound::Excl(limit) => score < limit,
        }
    }
}

/// Score-combining function for the weighted union/intersection operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Min,
    Max,
}

impl Aggregate {
    pub fn parse(raw: &[u8]) -> Result<Aggregate, EdisError> {
        match raw.to_ascii_uppercase().as_slice() {
            b"SUM" => Ok(Aggregate::Sum),
            b"MIN" => Ok(Aggregate::Min),
            b"MAX" => Ok(Aggregate::Max),
            _ => Err(EdisError::Unexpected("unknown aggregation".to_string())),
        }
    }

    pub fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            Aggregate::Sum => a + b,
            Aggregate::Min => a.min(b),
            Aggregate::Max => a.max(b),
        }
    }
}
