//! Local JSONL file store.
//!
//! Appends one JSON line per mutation to `entries.jsonl` and replays the
//! log on open.  Deletions are written as tombstones (`_deleted: true`);
//! compaction rewrites the log with only live entries through an
//! atomically persisted temp file.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{Store, StoreError, StoreFuture};
use crate::config::LocalStoreConfig;

const LOG_FILE: &str = "entries.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct JsonEntry {
    key: String,
    /// Base64 of the stored bytes; empty for tombstones.
    #[serde(default)]
    value: String,
    #[serde(default)]
    _deleted: bool,
}

impl JsonEntry {
    fn live(key: &str, value: &[u8]) -> Self {
        JsonEntry {
            key: key.to_string(),
            value: STANDARD.encode(value),
            _deleted: false,
        }
    }

    fn tombstone(key: &str) -> Self {
        JsonEntry {
            key: key.to_string(),
            value: String::new(),
            _deleted: true,
        }
    }
}

pub struct LocalStore {
    root_dir: PathBuf,
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl LocalStore {
    pub fn new(config: &LocalStoreConfig) -> anyhow::Result<Self> {
        let root_dir = PathBuf::from(&config.root_dir);
        std::fs::create_dir_all(&root_dir)?;

        let entries = Self::load(&root_dir)?;
        let store = Self {
            root_dir,
            entries: Mutex::new(entries),
        };
        if config.compact_on_startup {
            store.compact()?;
        }
        Ok(store)
    }

    fn load(root_dir: &Path) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
        let mut entries = BTreeMap::new();
        let path = root_dir.join(LOG_FILE);
        if !path.exists() {
            return Ok(entries);
        }
        let reader = BufReader::new(std::fs::File::open(&path)?);
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let entry: JsonEntry = serde_json::from_str(&line)?;
            if entry._deleted {
                entries.remove(&entry.key);
            } else {
                let value = STANDARD.decode(entry.value.as_bytes())?;
                entries.insert(entry.key, value);
            }
        }
        Ok(entries)
    }

    fn append(&self, entry: &JsonEntry) -> anyhow::Result<()> {
        let line = serde_json::to_string(entry)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root_dir.join(LOG_FILE))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }

    /// Rewrite the log so it holds exactly one line per live entry.
    pub fn compact(&self) -> anyhow::Result<()> {
        let entries = self.entries.lock().expect("mutex poisoned");
        let temp = NamedTempFile::new_in(&self.root_dir)?;
        {
            let mut writer = BufWriter::new(&temp);
            for (key, value) in entries.iter() {
                let line = serde_json::to_string(&JsonEntry::live(key, value))?;
                writeln!(writer, "{line}")?;
            }
            writer.flush()?;
        }
        temp.persist(self.root_dir.join(LOG_FILE))?;
        Ok(())
    }
}

impl Store for LocalStore {
    fn get(&self, key: &str) -> StoreFuture<'_, Vec<u8>> {
        let key = key.to_string();
        Box::pin(async move {
            let entries = self.entries.lock().expect("mutex poisoned");
            entries.get(&key).cloned().ok_or(StoreError::NotFound(key))
        })
    }

    fn put(&self, key: &str, value: Vec<u8>) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            // Log first so memory never runs ahead of the file.
            let mut entries = self.entries.lock().expect("mutex poisoned");
            self.append(&JsonEntry::live(&key, &value))?;
            entries.insert(key, value);
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let mut entries = self.entries.lock().expect("mutex poisoned");
            if !entries.contains_key(&key) {
                return Err(StoreError::NotFound(key));
            }
            self.append(&JsonEntry::tombstone(&key))?;
            entries.remove(&key);
            Ok(())
        })
    }

    fn list(&self, prefix: &str) -> StoreFuture<'_, Vec<String>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let entries = self.entries.lock().expect("mutex poisoned");
            Ok(entries
                .keys()
                .filter_map(|k| k.strip_prefix(&prefix))
                .map(str::to_string)
                .collect())
        })
    }
}
