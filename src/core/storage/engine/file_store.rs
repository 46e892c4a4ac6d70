use crate::core::common::EdisError;
use crate::core::storage::engine::traits::{OrderedKeyValueStore, ReadOptions, WriteOp};
use std::collections::BTreeMap;
use std::fs::{rename, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

const DATA_FILE: &str = "edis.data";

/// A file-backed ordered key-value store.
///
/// The full contents live in an ordered in-memory map and every mutation is
/// persisted by rewriting a data file through an atomic temp-file rename, so
/// a crash mid-save leaves either the previous or the next generation intact.
/// Recovery prefers a complete temp file over the main file.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    cache: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl FileStore {
    fn data_path(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }

    // Reads length-prefixed key/value records from `file_to_load` into the cache.
    fn read_data_into_cache(&mut self, file_to_load: &Path) -> Result<(), EdisError> {
        self.cache.clear();
        let file = match File::open(file_to_load) {
            Ok(f) => f,
            // No data file yet means an empty store.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(EdisError::from(e)),
        };

        let mut reader = BufReader::new(file);
        loop {
            let buffer = reader.fill_buf()?;
            if buffer.is_empty() {
                break; // Clean EOF
            }

            let key = read_record(&mut reader).map_err(|e| {
                EdisError::Storage(format!(
                    "failed to read key from {}: {}",
                    file_to_load.display(),
                    e
                ))
            })?;
            let value = read_record(&mut reader).map_err(|e| {
                EdisError::Storage(format!(
                    "failed to read value for key {:?} from {}: {}",
                    String::from_utf8_lossy(&key),
                    file_to_load.display(),
                    e
                ))
            })?;

            self.cache.insert(key, value);
        }
        Ok(())
    }

    fn load_from_disk(&mut self) -> Result<(), EdisError> {
        let data_path = self.data_path();
        let temp_path = data_path.with_extension("tmp");

        if temp_path.exists() {
            match self.read_data_into_cache(&temp_path) {
                Ok(()) => {
                    // The temp file is a complete newer generation; promote it.
                    rename(&temp_path, &data_path).map_err(|e| {
                        EdisError::Storage(format!(
                            "loaded temporary file {} but failed to promote it: {}",
                            temp_path.display(),
                            e
                        ))
                    })?;
                    return Ok(());
                }
                Err(_) => {
                    // Incomplete save; discard it and fall back to the main file.
                    std::fs::remove_file(&temp_path).map_err(|e| {
                        EdisError::Storage(format!(
                            "could not remove corrupt temporary file {}: {}",
                            temp_path.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        self.read_data_into_cache(&data_path)
    }

    fn save_to_disk(&self) -> Result<(), EdisError> {
        let data_path = self.data_path();
        let temp_path = data_path.with_extension("tmp");

        let temp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(temp_file);

        for (key, value) in &self.cache {
            write_record(&mut writer, key)?;
            write_record(&mut writer, value)?;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;

        rename(&temp_path, &data_path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            EdisError::from(e)
        })
    }
}

fn write_record<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), EdisError> {
    let len = bytes.len() as u64;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_record<R: Read>(reader: &mut R) -> Result<Vec<u8>, EdisError> {
    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let len_u64 = u64::from_be_bytes(len_bytes);
    let len = usize::try_from(len_u64)
        .map_err(|_| EdisError::Storage(format!("record length {len_u64} exceeds usize")))?;
    if len > 1_000_000_000 {
        return Err(EdisError::Storage(format!(
            "record length {len} exceeds maximum allowed size"
        )));
    }
    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer)?;
    Ok(buffer)
}

impl OrderedKeyValueStore for FileStore {
    fn open(path: &Path, create_if_missing: bool) -> Result<Self, EdisError> {
        if !path.exists() {
            if !create_if_missing {
                return Err(EdisError::Storage(format!(
                    "store directory {} does not exist",
                    path.display()
                )));
            }
            std::fs::create_dir_all(path)?;
        }
        let mut store = FileStore { dir: path.to_path_buf(), cache: BTreeMap::new() };
        store.load_from_disk()?;
        Ok(store)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EdisError> {
        Ok(self.cache.get(key).cloned())
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), EdisError> {
        self.cache.insert(key, value);
        self.save_to_disk()
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), EdisError> {
        if self.cache.remove(key).is_some() {
            self.save_to_disk()?;
        }
        Ok(())
    }

    fn write(&mut self, batch: Vec<WriteOp>) -> Result<(), EdisError> {
        for op in batch {
            match op {
                WriteOp::Put { key, value } => {
                    self.cache.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    self.cache.remove(&key);
                }
            }
        }
        self.save_to_disk()
    }

    fn is_empty(&self) -> Result<bool, EdisError> {
        Ok(self.cache.is_empty())
    }

    fn fold<A, F>(&self, acc: A, mut f: F, _options: ReadOptions) -> Result<A, EdisError>
    where
        F: FnMut(A, (&[u8], &[u8])) -> A,
    {
        let mut acc = acc;
        for (key, value) in &self.cache {
            acc = f(acc, (key.as_slice(), value.as_slice()));
        }
        Ok(acc)
    }

    fn fold_keys<A, F>(&self, acc: A, mut f: F, _options: ReadOptions) -> Result<A, EdisError>
    where
        F: FnMut(A, &[u8]) -> A,
    {
        let mut acc = acc;
        for key in self.cache.keys() {
            acc = f(acc, key.as_slice());
        }
        Ok(acc)
    }

    fn status(&self, property: &str) -> String {
        match property {
            "entries" => self.cache.len().to_string(),
            "path" => self.dir.display().to_string(),
            "size-on-disk" => std::fs::metadata(self.data_path())
                .map(|m| m.len().to_string())
                .unwrap_or_default(),
            _ => String::new(),
        }
    }

    fn destroy(path: &Path) -> Result<(), EdisError> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EdisError::from(e)),
        }
    }
}
