use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use rayon::prelude::*;
use tokio::runtime::Handle;
use walkdir::WalkDir;

use crate::cancel::{CancelToken, JobHandle, JobStatus};
use crate::error::{Result, SearchError};
use crate::history::LookupSnapshot;
use crate::ranker::{self, RankInput};
use crate::storage::Storage;
use crate::types::{IndexedItem, SearchIndex};

/// One entry seen by the walk, before scoring.
struct WalkedEntry {
    path: PathBuf,
    name: String,
    extension: String,
    is_dir: bool,
    modified: Option<DateTime<Local>>,
    created: Option<DateTime<Local>>,
}

#[derive(Debug)]
pub enum CrawlStatus {
    Idle,
    Running,
    Completed(Arc<SearchIndex>),
    Failed(SearchError),
}

struct CrawlJob {
    root: PathBuf,
    handle: JobHandle<Result<SearchIndex>>,
}

/// Runs at most one crawl at a time. Starting a crawl cancels the one in
/// flight; the cancelled job never publishes.
pub struct Crawler {
    runtime: Handle,
    storage: Storage,
    job: Option<CrawlJob>,
}

impl Crawler {
    pub fn new(runtime: Handle, storage: Storage) -> Self {
        Self {
            runtime,
            storage,
            job: None,
        }
    }

    pub fn start_crawl(&mut self, root: &Path, lookups: LookupSnapshot) -> Result<()> {
        if !root.is_dir() {
            return Err(SearchError::InvalidPath(root.to_path_buf()));
        }
        let root = std::fs::canonicalize(root).map_err(|e| SearchError::io(root, e))?;
        if let Some(previous) = self.job.take() {
            previous.handle.cancel();
            tracing::info!("crawl of {} superseded", previous.root.display());
        }

        tracing::info!("crawl started root={}", root.display());
        let storage = self.storage.clone();
        let job_root = root.clone();
        let handle = JobHandle::spawn(&self.runtime, move |cancel| {
            let started = Instant::now();
            let index = match crawl(&job_root, &lookups, Local::now(), cancel)? {
                Ok(index) => index,
                Err(e) => return Some(Err(e)),
            };
            let _guard = storage.lock_index_writes();
            cancel.check()?;
            if let Err(e) = storage.save_index(&index) {
                return Some(Err(e));
            }
            tracing::info!(
                "crawl finished root={} items={} elapsed_ms={}",
                job_root.display(),
                index.len(),
                started.elapsed().as_millis()
            );
            Some(Ok(index))
        });
        self.job = Some(CrawlJob { root, handle });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.job.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(job) = self.job.take() {
            job.handle.cancel();
        }
    }

    /// Checks the current crawl once. A finished crawl is reported exactly
    /// once, then the crawler is idle again.
    pub fn poll(&mut self) -> CrawlStatus {
        let Some(job) = self.job.as_mut() else {
            return CrawlStatus::Idle;
        };
        match job.handle.poll() {
            JobStatus::Running => CrawlStatus::Running,
            JobStatus::Finished(result) => {
                self.job = None;
                match result {
                    Ok(index) => CrawlStatus::Completed(Arc::new(index)),
                    Err(e) => CrawlStatus::Failed(e),
                }
            }
            JobStatus::Gone => {
                self.job = None;
                CrawlStatus::Idle
            }
        }
    }
}

fn to_local(time: std::io::Result<std::time::SystemTime>) -> Option<DateTime<Local>> {
    time.ok().map(DateTime::<Local>::from)
}

/// Walks `root` and scores every entry below it. Returns `None` when
/// cancelled. Entries that can't be read are skipped.
pub fn crawl(
    root: &Path,
    lookups: &HashMap<String, u32>,
    now: DateTime<Local>,
    cancel: &CancelToken,
) -> Option<Result<SearchIndex>> {
    if !root.is_dir() {
        return Some(Err(SearchError::InvalidPath(root.to_path_buf())));
    }

    // walk once, counting files per parent for the sibling score
    let mut entries = Vec::new();
    let mut files_per_dir: HashMap<PathBuf, usize> = HashMap::new();
    for (i, entry) in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .enumerate()
    {
        cancel.check_sparse(i)?;
        let path = entry.path().to_path_buf();
        let is_dir = entry.file_type().is_dir();
        if !is_dir {
            if let Some(parent) = path.parent() {
                *files_per_dir.entry(parent.to_path_buf()).or_insert(0) += 1;
            }
        }
        let metadata = entry.metadata().ok();
        entries.push(WalkedEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            extension: path
                .extension()
                .and_then(|s| s.to_str())
                .unwrap_or("")
                .to_lowercase(),
            is_dir,
            modified: metadata.as_ref().and_then(|m| to_local(m.modified())),
            created: metadata.as_ref().and_then(|m| to_local(m.created())),
            path,
        });
    }
    cancel.check()?;

    // scoring is pure, so it fans out over rayon
    let root_depth = root.components().count();
    let mut items: Vec<IndexedItem> = entries
        .par_iter()
        .map(|entry| {
            let full_path = entry.path.to_string_lossy().to_string();
            let sibling_count = entry
                .path
                .parent()
                .and_then(|p| files_per_dir.get(p))
                .copied()
                .unwrap_or(0);
            let input = RankInput {
                name: &entry.name,
                extension: &entry.extension,
                path_depth: entry.path.components().count(),
                modified: entry.modified,
                created: entry.created,
                sibling_count,
                lookup_count: lookups.get(&full_path).copied().unwrap_or(0),
            };
            IndexedItem {
                relevance_score: ranker::score(&input, root_depth, now),
                name: entry.name.clone(),
                is_dir: entry.is_dir,
                final_score: 0.0,
                full_path,
            }
        })
        .collect();
    cancel.check()?;

    items.par_sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then_with(|| a.full_path.cmp(&b.full_path))
    });

    Some(Ok(SearchIndex {
        root: root.to_path_buf(),
        completed_at: now,
        items,
    }))
}
