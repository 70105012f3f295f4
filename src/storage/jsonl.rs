//! JSONL-based storage implementation with in-memory caching.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Serialize, de::DeserializeOwned};

use super::traits::{Filter, Keyed, Storage};
use crate::error::{AthenaError, Result};

/// JSONL-based storage with in-memory caching.
///
/// Each collection lives in `<base_path>/<collection>.jsonl`, one record per line.
pub struct JsonlStorage {
    base_path: PathBuf,
    cache: RwLock<HashMap<String, Vec<serde_json::Value>>>,
}

impl std::fmt::Debug for JsonlStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlStorage")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

fn poisoned(e: impl std::fmt::Display) -> AthenaError {
    AthenaError::StoreQuery(format!("cache lock poisoned: {}", e))
}

fn not_loaded(collection: &str) -> AthenaError {
    AthenaError::StoreQuery(format!("Collection not loaded: {}", collection))
}

fn has_key(record: &serde_json::Value, field: &str, key: u64) -> bool {
    record.get(field).and_then(|v| v.as_u64()) == Some(key)
}

impl JsonlStorage {
    /// Create a new JsonlStorage at the given path.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Get the file path for a collection.
    fn collection_path(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", collection))
    }

    /// Load a collection into cache if not already loaded.
    fn ensure_loaded(&self, collection: &str) -> Result<()> {
        {
            let cache = self.cache.read().map_err(poisoned)?;
            if cache.contains_key(collection) {
                return Ok(());
            }
        }

        let mut cache = self.cache.write().map_err(poisoned)?;
        if cache.contains_key(collection) {
            return Ok(());
        }

        let path = self.collection_path(collection);
        let records = if path.exists() {
            let file = File::open(&path)?;
            let reader = BufReader::new(file);
            let mut records = Vec::new();
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: serde_json::Value = serde_json::from_str(&line).map_err(|e| {
                    AthenaError::StoreQuery(format!("{}:{}: {}", path.display(), lineno + 1, e))
                })?;
                records.push(record);
            }
            records
        } else {
            Vec::new()
        };

        log::debug!("Loaded {} records from {}", records.len(), path.display());
        cache.insert(collection.to_string(), records);
        Ok(())
    }

    /// Append a record to the JSONL file.
    fn append_to_file(&self, collection: &str, record: &serde_json::Value) -> Result<()> {
        let path = self.collection_path(collection);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    /// Rewrite the entire collection file from the given records.
    ///
    /// Writes to a temporary file first so a crash never leaves a truncated collection.
    fn rewrite_file(&self, collection: &str, records: &[serde_json::Value]) -> Result<()> {
        let path = self.collection_path(collection);
        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp)?;
            for record in records {
                writeln!(file, "{}", serde_json::to_string(record)?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn decode<T: DeserializeOwned>(collection: &str, record: &serde_json::Value) -> Result<T> {
        serde_json::from_value(record.clone()).map_err(|e| {
            AthenaError::StoreQuery(format!("malformed record in {}: {}", collection, e))
        })
    }
}

impl Storage for JsonlStorage {
    fn create<T: Serialize + Keyed>(&self, collection: &str, record: &T) -> Result<()> {
        self.ensure_loaded(collection)?;

        let value = serde_json::to_value(record)?;
        let mut cache = self.cache.write().map_err(poisoned)?;
        let records = cache
            .get_mut(collection)
            .ok_or_else(|| not_loaded(collection))?;

        if records.iter().any(|r| has_key(r, T::KEY_FIELD, record.key())) {
            return Err(AthenaError::StoreQuery(format!(
                "Duplicate key {} in {}",
                record.key(),
                collection
            )));
        }

        // Append to file first (source of truth)
        self.append_to_file(collection, &value)?;
        records.push(value);

        Ok(())
    }

    fn get<T: DeserializeOwned + Keyed>(&self, collection: &str, key: u64) -> Result<Option<T>> {
        self.ensure_loaded(collection)?;

        let cache = self.cache.read().map_err(poisoned)?;
        let records = cache
            .get(collection)
            .ok_or_else(|| not_loaded(collection))?;

        records
            .iter()
            .find(|r| has_key(r, T::KEY_FIELD, key))
            .map(|r| Self::decode(collection, r))
            .transpose()
    }

    fn update<T: Serialize + Keyed>(&self, collection: &str, record: &T) -> Result<()> {
        self.ensure_loaded(collection)?;

        let value = serde_json::to_value(record)?;
        let mut cache = self.cache.write().map_err(poisoned)?;
        let records = cache
            .get_mut(collection)
            .ok_or_else(|| not_loaded(collection))?;

        let index = records
            .iter()
            .position(|r| has_key(r, T::KEY_FIELD, record.key()))
            .ok_or_else(|| {
                AthenaError::StoreQuery(format!("No record {} in {}", record.key(), collection))
            })?;

        // The cache only changes once the file holds the new record
        let mut updated = records.clone();
        updated[index] = value;
        self.rewrite_file(collection, &updated)?;
        *records = updated;
        Ok(())
    }

    fn query<T: DeserializeOwned>(&self, collection: &str, filters: &[Filter]) -> Result<Vec<T>> {
        self.ensure_loaded(collection)?;

        let cache = self.cache.read().map_err(poisoned)?;
        let records = cache
            .get(collection)
            .ok_or_else(|| not_loaded(collection))?;

        records
            .iter()
            .filter(|r| filters.iter().all(|f| f.matches(r)))
            .map(|r| Self::decode(collection, r))
            .collect()
    }

    fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        self.query(collection, &[])
    }

    fn clear(&self, collection: &str) -> Result<()> {
        let mut cache = self.cache.write().map_err(poisoned)?;
        self.rewrite_file(collection, &[])?;
        cache.insert(collection.to_string(), Vec::new());
        Ok(())
    }
}
