use crate::core::common::EdisError;
use std::path::Path;

/// One operation inside an atomic write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Read knobs of LSM-style stores. Implementations are free to ignore them.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub fill_cache: bool,
    pub verify_checksums: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions { fill_cache: true, verify_checksums: false }
    }
}

/// Trait for the ordered byte-key byte-value store a keyspace actor owns.
///
/// Records are opaque serialized blobs; the store never interprets them.
/// Iteration (`fold`, `fold_keys`) visits entries in ascending key order.
pub trait OrderedKeyValueStore: Send + 'static {
    /// Opens (or creates, when `create_if_missing`) the store rooted at `path`.
    fn open(path: &Path, create_if_missing: bool) -> Result<Self, EdisError>
    where
        Self: Sized;

    /// Retrieves the value associated with a key.
    /// Returns `Ok(Some(value))` if the key exists, `Ok(None)` otherwise.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EdisError>;

    /// Inserts a key-value pair into the store.
    /// If the key already exists, its value is updated.
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), EdisError>;

    /// Deletes a key. Deleting an absent key is not an error.
    fn delete(&mut self, key: &[u8]) -> Result<(), EdisError>;

    /// Applies a batch of puts and deletes atomically, in order.
    fn write(&mut self, batch: Vec<WriteOp>) -> Result<(), EdisError>;

    /// True when the store holds no records at all.
    fn is_empty(&self) -> Result<bool, EdisError>;

    /// Folds over every `(key, value)` pair in ascending key order.
    fn fold<A, F>(&self, acc: A, f: F, options: ReadOptions) -> Result<A, EdisError>
    where
        F: FnMut(A, (&[u8], &[u8])) -> A;

    /// Folds over every key in ascending order.
    fn fold_keys<A, F>(&self, acc: A, f: F, options: ReadOptions) -> Result<A, EdisError>
    where
        F: FnMut(A, &[u8]) -> A;

    /// Free-form store property, `""` when the property is unknown.
    fn status(&self, property: &str) -> String;

    /// Removes the store rooted at `path` from disk. Destroying a store that
    /// does not exist is not an error.
    fn destroy(path: &Path) -> Result<(), EdisError>
    where
        Self: Sized;
}
