//! Flat-file stores under the data directory. Last writer wins.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;

use crate::error::{Result, SearchError};
use crate::types::SearchIndex;

const INDEX_FILE: &str = "index.json";
const MARKER_FILE: &str = "crawl_marker";
const HISTORY_FILE: &str = "history.jsonl";
const LOOKUPS_FILE: &str = "lookups.json";
const MARKER_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
    index_writes: Arc<Mutex<()>>,
}

impl Storage {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SearchError::io(&dir, e))?;
        Ok(Self {
            dir,
            index_writes: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(MARKER_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn lookups_path(&self) -> PathBuf {
        self.dir.join(LOOKUPS_FILE)
    }

    /// Serializes index publication between overlapping crawl jobs.
    pub(crate) fn lock_index_writes(&self) -> MutexGuard<'_, ()> {
        self.index_writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn load_index(&self) -> Result<Option<SearchIndex>> {
        let path = self.index_path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SearchError::io(path, e)),
        };
        let index = serde_json::from_slice(&data).map_err(|e| SearchError::corrupt(&path, e))?;
        Ok(Some(index))
    }

    /// Writes the index and stamps the crawl marker with its completion day.
    pub fn save_index(&self, index: &SearchIndex) -> Result<()> {
        let path = self.index_path();
        let data = serde_json::to_vec(index).map_err(|e| SearchError::corrupt(&path, e))?;
        write_replace(&path, &data)?;
        self.write_crawl_marker(index.completed_at.date_naive())
    }

    /// Day of the last successful crawl. An unreadable marker counts as none.
    pub fn last_crawl_date(&self) -> Result<Option<NaiveDate>> {
        let path = self.marker_path();
        match fs::read_to_string(&path) {
            Ok(text) => match NaiveDate::parse_from_str(text.trim(), MARKER_FORMAT) {
                Ok(date) => Ok(Some(date)),
                Err(e) => {
                    tracing::warn!("ignoring unreadable crawl marker {}: {}", path.display(), e);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SearchError::io(path, e)),
        }
    }

    pub fn write_crawl_marker(&self, date: NaiveDate) -> Result<()> {
        let line = format!("{}\n", date.format(MARKER_FORMAT));
        write_replace(&self.marker_path(), line.as_bytes())
    }
}

/// Writes to a sibling temp file and renames it over `path`.
pub(crate) fn write_replace(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp).map_err(|e| SearchError::io(&tmp, e))?;
    file.write_all(data).map_err(|e| SearchError::io(&tmp, e))?;
    file.sync_all().map_err(|e| SearchError::io(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| SearchError::io(path, e))
}
