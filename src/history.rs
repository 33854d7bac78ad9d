//! Open history and per-path open counts.
//!
//! Both stores are written only from the control thread. Background jobs get
//! an `Arc` snapshot taken at job start; later writes copy on write and never
//! show up inside a running job.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::storage::write_replace;
use crate::types::IndexedItem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime<Local>,
    pub query_text: String,
    #[serde(rename = "FullPath")]
    pub selected_full_path: String,
    #[serde(rename = "Name")]
    pub selected_name: String,
}

/// Query text to the path most recently opened for it.
pub type HistorySnapshot = Arc<HashMap<String, String>>;

/// Path to open count.
pub type LookupSnapshot = Arc<HashMap<String, u32>>;

#[derive(Debug, Default)]
pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
    latest_by_query: HashMap<String, usize>,
    latest_paths: HistorySnapshot,
    incognito: bool,
    file: Option<PathBuf>,
}

impl HistoryStore {
    /// History that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Reads `history.jsonl`, oldest first. Unparseable lines, invalid
    /// UTF-8 included, are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let mut store = Self {
            file: Some(path.to_path_buf()),
            ..Self::default()
        };
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(store),
            Err(e) => return Err(SearchError::io(path, e)),
        };
        // Split on raw bytes so a damaged line is skipped like bad JSON.
        for (line_no, line) in BufReader::new(file).split(b'\n').enumerate() {
            let line = line.map_err(|e| SearchError::io(path, e))?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<HistoryEntry>(&line) {
                Ok(entry) => store.push(entry),
                Err(e) => tracing::warn!(
                    "skipping history line {} in {}: {}",
                    line_no + 1,
                    path.display(),
                    e
                ),
            }
        }
        Ok(store)
    }

    fn push(&mut self, entry: HistoryEntry) {
        self.latest_by_query
            .insert(entry.query_text.clone(), self.entries.len());
        Arc::make_mut(&mut self.latest_paths)
            .insert(entry.query_text.clone(), entry.selected_full_path.clone());
        self.entries.push(entry);
    }

    /// Appends an entry unless incognito is on. Returns whether anything was
    /// recorded. The in-memory log is updated even when the file append fails.
    pub fn record(&mut self, query: &str, item: &IndexedItem, now: DateTime<Local>) -> Result<bool> {
        if self.incognito {
            return Ok(false);
        }
        let entry = HistoryEntry {
            timestamp: now,
            query_text: query.to_string(),
            selected_full_path: item.full_path.clone(),
            selected_name: item.name.clone(),
        };
        let line = serde_json::to_string(&entry);
        self.push(entry);
        if let Some(path) = &self.file {
            let line = line.map_err(|e| SearchError::corrupt(path, e))?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| SearchError::io(path, e))?;
            writeln!(file, "{line}").map_err(|e| SearchError::io(path, e))?;
        }
        Ok(true)
    }

    /// Most recent entry recorded for exactly this query text.
    pub fn find_exact(&self, query: &str) -> Option<&HistoryEntry> {
        self.latest_by_query
            .get(query)
            .and_then(|&i| self.entries.get(i))
    }

    /// The `n`-th entry counting back from the newest (0 = newest).
    pub fn nth_newest(&self, n: usize) -> Option<&HistoryEntry> {
        self.entries.iter().rev().nth(n)
    }

    pub fn newest_first(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        Arc::clone(&self.latest_paths)
    }

    pub fn is_incognito(&self) -> bool {
        self.incognito
    }

    pub fn set_incognito(&mut self, incognito: bool) {
        self.incognito = incognito;
    }

    /// Flips incognito and returns the new state.
    pub fn toggle_incognito(&mut self) -> bool {
        self.incognito = !self.incognito;
        self.incognito
    }
}

#[derive(Debug, Default)]
pub struct LookupCounter {
    counts: LookupSnapshot,
    file: Option<PathBuf>,
}

impl LookupCounter {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let counts = match fs::read(path) {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| SearchError::corrupt(path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(SearchError::io(path, e)),
        };
        Ok(Self {
            counts: Arc::new(counts),
            file: Some(path.to_path_buf()),
        })
    }

    pub fn get(&self, path: &str) -> u32 {
        self.counts.get(path).copied().unwrap_or(0)
    }

    /// Adds one open for `path` and rewrites the store. Returns the new count;
    /// the in-memory count is kept even when the rewrite fails.
    pub fn increment(&mut self, path: &str) -> Result<u32> {
        let counts = Arc::make_mut(&mut self.counts);
        let count = counts.entry(path.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        if let Some(file) = &self.file {
            let data =
                serde_json::to_vec_pretty(&*self.counts).map_err(|e| SearchError::corrupt(file, e))?;
            write_replace(file, &data)?;
        }
        Ok(count)
    }

    pub fn snapshot(&self) -> LookupSnapshot {
        Arc::clone(&self.counts)
    }
}
