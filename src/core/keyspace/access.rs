//! Typed record access: the expiry gate and the read-modify-write helpers
//! every mutating handler goes through.

use crate::core::common::EdisError;
use crate::core::keyspace::Keyspace;
use crate::core::storage::engine::OrderedKeyValueStore;
use crate::core::types::{Item, ItemType, Value};
use chrono::Utc;

/// Expected type of a read: a specific one, or anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeSelector {
    Any,
    Exact(ItemType),
}

impl<S: OrderedKeyValueStore> Keyspace<S> {
    /// The gated reader. Absent and expired records read as `None`; an
    /// expired record is lazily deleted on the way. A type mismatch against
    /// `Exact(..)` is `wrong_type`; a record that does not decode is reported
    /// as `wrong_type` and left in place.
    pub(crate) fn get_item(
        &mut self,
        expected: TypeSelector,
        key: &[u8],
    ) -> Result<Option<Item>, EdisError> {
        let Some(blob) = self.store.get(key)? else {
            return Ok(None);
        };
        let item = Item::decode(&blob)?;
        if item.is_expired(Utc::now()) {
            self.store.delete(key)?;
            return Ok(None);
        }
        match expected {
            TypeSelector::Any => Ok(Some(item)),
            TypeSelector::Exact(item_type) if item.item_type == item_type => Ok(Some(item)),
            TypeSelector::Exact(_) => Err(EdisError::WrongType),
        }
    }

    /// True iff the byte slot under `key` is occupied, *ignoring* expiry.
    /// Only for operations whose semantics are about slot occupancy (the
    /// cross-shard receive); value-returning paths use [`Self::get_item`].
    pub(crate) fn exists_item(&self, key: &[u8]) -> Result<bool, EdisError> {
        Ok(self.store.get(key)?.is_some())
    }

    /// Encodes and stores a record under its own key.
    pub(crate) fn put_item(&mut self, item: &Item) -> Result<(), EdisError> {
        let blob = item.encode()?;
        self.store.put(item.key.clone(), blob)
    }

    /// Write-back shared by the update helpers: an aggregate that ended up
    /// empty deletes the key instead of persisting (the empty-container
    /// invariant); anything else is stored.
    fn commit(&mut self, item: &Item) -> Result<(), EdisError> {
        if item.value.is_empty_aggregate() {
            self.store.delete(&item.key)
        } else {
            self.put_item(item)
        }
    }

    /// Read-modify-write over an existing record. Fails with the internal
    /// `not_found` signal when the key is absent; callers translate it.
    pub(crate) fn update<R>(
        &mut self,
        key: &[u8],
        item_type: ItemType,
        mutate: impl FnOnce(&mut Item) -> Result<R, EdisError>,
    ) -> Result<R, EdisError> {
        let Some(mut item) = self.get_item(TypeSelector::Exact(item_type), key)? else {
            return Err(EdisError::NotFound);
        };
        let reply = mutate(&mut item)?;
        self.commit(&item)?;
        Ok(reply)
    }

    /// Like [`Self::update`], but an absent key returns the provided reply
    /// unchanged and writes nothing.
    pub(crate) fn update_or<R>(
        &mut self,
        key: &[u8],
        item_type: ItemType,
        absent: R,
        mutate: impl FnOnce(&mut Item) -> Result<R, EdisError>,
    ) -> Result<R, EdisError> {
        let Some(mut item) = self.get_item(TypeSelector::Exact(item_type), key)? else {
            return Ok(absent);
        };
        let reply = mutate(&mut item)?;
        self.commit(&item)?;
        Ok(reply)
    }

    /// Like [`Self::update`], but an absent key constructs a fresh item with
    /// the given default value (canonical encoding) and applies the mutation
    /// to it.
    pub(crate) fn upsert<R>(
        &mut self,
        key: &[u8],
        item_type: ItemType,
        default: Value,
        mutate: impl FnOnce(&mut Item) -> Result<R, EdisError>,
    ) -> Result<R, EdisError> {
        let mut item = match self.get_item(TypeSelector::Exact(item_type), key)? {
            Some(item) => item,
            None => Item::new(key.to_vec(), default),
        };
        let reply = mutate(&mut item)?;
        self.commit(&item)?;
        Ok(reply)
    }
}
