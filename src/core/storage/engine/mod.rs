pub mod file_store;
pub mod traits;

pub use file_store::FileStore;
pub use traits::{OrderedKeyValueStore, ReadOptions, WriteOp};
