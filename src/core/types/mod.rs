//! The persisted data model.
//!
//! Every user key maps to exactly one [`Item`] record in the ordered store:
//! the key itself, its declared type, advisory encoding metadata, an optional
//! absolute expiry instant and the tagged [`Value`] union. Records are
//! serialized to self-describing JSON blobs; byte-keyed maps go through a
//! pair-list adapter so arbitrary binary keys survive the round trip.

pub mod sorted_set;

pub use sorted_set::{Aggregate, ScoreBound, SortedSet};

use crate::core::common::EdisError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Declared type of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    String,
    Hash,
    List,
    Set,
    ZSet,
}

impl ItemType {
    /// The name reported by `TYPE`.
    pub fn name(self) -> &'static str {
        match self {
            ItemType::String => "string",
            ItemType::Hash => "hash",
            ItemType::List => "list",
            ItemType::Set => "set",
            ItemType::ZSet => "zset",
        }
    }

    /// The encoding this implementation writes for freshly created items.
    pub fn canonical_encoding(self) -> ItemEncoding {
        match self {
            ItemType::String => ItemEncoding::Raw,
            ItemType::Hash | ItemType::Set => ItemEncoding::Hashtable,
            ItemType::List => ItemEncoding::Linkedlist,
            ItemType::ZSet => ItemEncoding::Skiplist,
        }
    }
}

/// Advisory representation metadata, reported by `OBJECT ENCODING`.
///
/// Only the canonical encodings are ever written by this implementation;
/// the remaining names may arrive via migration and are preserved on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemEncoding {
    Raw,
    Int,
    Ziplist,
    Linkedlist,
    Intset,
    Hashtable,
    Zipmap,
    Skiplist,
}

impl ItemEncoding {
    pub fn name(self) -> &'static str {
        match self {
            ItemEncoding::Raw => "raw",
            ItemEncoding::Int => "int",
            ItemEncoding::Ziplist => "ziplist",
            ItemEncoding::Linkedlist => "linkedlist",
            ItemEncoding::Intset => "intset",
            ItemEncoding::Hashtable => "hashtable",
            ItemEncoding::Zipmap => "zipmap",
            ItemEncoding::Skiplist => "skiplist",
        }
    }
}

/// The tagged value union. Each variant matches one [`ItemType`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Str(Vec<u8>),
    Hash(#[serde_as(as = "Vec<(_, _)>")] BTreeMap<Vec<u8>, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
    Set(BTreeSet<Vec<u8>>),
    SortedSet(SortedSet),
}

impl Value {
    pub fn item_type(&self) -> ItemType {
        match self {
            Value::Str(_) => ItemType::String,
            Value::Hash(_) => ItemType::Hash,
            Value::List(_) => ItemType::List,
            Value::Set(_) => ItemType::Set,
            Value::SortedSet(_) => ItemType::ZSet,
        }
    }

    /// Fresh empty container for a type. Strings start out empty too; only
    /// aggregate emptiness triggers deletion on write-back.
    pub fn empty(item_type: ItemType) -> Value {
        match item_type {
            ItemType::String => Value::Str(Vec::new()),
            ItemType::Hash => Value::Hash(BTreeMap::new()),
            ItemType::List => Value::List(VecDeque::new()),
            ItemType::Set => Value::Set(BTreeSet::new()),
            ItemType::ZSet => Value::SortedSet(SortedSet::new()),
        }
    }

    /// True for an aggregate container with no members. Empty aggregates are
    /// never persisted; the owning key is deleted instead.
    pub fn is_empty_aggregate(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Hash(map) => map.is_empty(),
            Value::List(list) => list.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::SortedSet(zset) => zset.is_empty(),
        }
    }
}

/// One persisted keyspace record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: Vec<u8>,
    pub item_type: ItemType,
    pub encoding: ItemEncoding,
    pub expire: Option<DateTime<Utc>>,
    pub value: Value,
}

impl Item {
    /// A fresh, never-expiring item with the canonical encoding for its type.
    pub fn new(key: Vec<u8>, value: Value) -> Item {
        let item_type = value.item_type();
        Item { key, item_type, encoding: item_type.canonical_encoding(), expire: None, value }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire.is_some_and(|at| at <= now)
    }

    /// Serializes the record into its storage blob.
    pub fn encode(&self) -> Result<Vec<u8>, EdisError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a storage blob. An unrecognizable record is reported as
    /// `wrong_type`; the caller must leave the stored bytes in place.
    pub fn decode(bytes: &[u8]) -> Result<Item, EdisError> {
        serde_json::from_slice(bytes).map_err(|_| EdisError::WrongType)
    }

    pub fn str_ref(&self) -> Result<&Vec<u8>, EdisError> {
        if let Value::Str(s) = &self.value { Ok(s) } else { Err(EdisError::WrongType) }
    }

    pub fn str_mut(&mut self) -> Result<&mut Vec<u8>, EdisError> {
        if let Value::Str(s) = &mut self.value { Ok(s) } else { Err(EdisError::WrongType) }
    }

    pub fn into_str(self) -> Result<Vec<u8>, EdisError> {
        if let Value::Str(s) = self.value { Ok(s) } else { Err(EdisError::WrongType) }
    }

    pub fn hash_ref(&self) -> Result<&BTreeMap<Vec<u8>, Vec<u8>>, EdisError> {
        if let Value::Hash(h) = &self.value { Ok(h) } else { Err(EdisError::WrongType) }
    }

    pub fn hash_mut(&mut self) -> Result<&mut BTreeMap<Vec<u8>, Vec<u8>>, EdisError> {
        if let Value::Hash(h) = &mut self.value { Ok(h) } else { Err(EdisError::WrongType) }
    }

    pub fn list_ref(&self) -> Result<&VecDeque<Vec<u8>>, EdisError> {
        if let Value::List(l) = &self.value { Ok(l) } else { Err(EdisError::WrongType) }
    }

    pub fn list_mut(&mut self) -> Result<&mut VecDeque<Vec<u8>>, EdisError> {
        if let Value::List(l) = &mut self.value { Ok(l) } else { Err(EdisError::WrongType) }
    }

    pub fn set_ref(&self) -> Result<&BTreeSet<Vec<u8>>, EdisError> {
        if let Value::Set(s) = &self.value { Ok(s) } else { Err(EdisError::WrongType) }
    }

    pub fn set_mut(&mut self) -> Result<&mut BTreeSet<Vec<u8>>, EdisError> {
        if let Value::Set(s) = &mut self.value { Ok(s) } else { Err(EdisError::WrongType) }
    }

    pub fn zset_ref(&self) -> Result<&SortedSet, EdisError> {
        if let Value::SortedSet(z) = &self.value { Ok(z) } else { Err(EdisError::WrongType) }
    }

    pub fn zset_mut(&mut self) -> Result<&mut SortedSet, EdisError> {
        if let Value::SortedSet(z) = &mut self.value { Ok(z) } else { Err(EdisError::WrongType) }
    }
}
