use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use tokio::runtime::Handle;

use crate::cancel::{CancelToken, JobHandle, JobStatus};
use crate::error::Result;
use crate::history::HistorySnapshot;
use crate::types::{IndexedItem, Query, ResultSet, SearchIndex};

const HISTORY_WEIGHT: f64 = 4.0;

/// Name predicate for one query. Both modes ignore case.
#[derive(Debug, Clone)]
pub enum Matcher {
    Substring(String),
    Pattern(Regex),
}

impl Matcher {
    pub fn new(query: &Query) -> Result<Self> {
        if query.use_regex {
            let regex = RegexBuilder::new(&query.content)
                .case_insensitive(true)
                .build()?;
            Ok(Self::Pattern(regex))
        } else {
            Ok(Self::Substring(query.content.to_lowercase()))
        }
    }

    pub fn is_match(&self, name: &str) -> bool {
        match self {
            Self::Substring(needle) => name.to_lowercase().contains(needle.as_str()),
            Self::Pattern(regex) => regex.is_match(name),
        }
    }
}

fn accepts(matcher: &Matcher, query: &Query, item: &IndexedItem) -> bool {
    (!query.directory_only || item.is_dir) && matcher.is_match(&item.name)
}

/// Walks `items` in index order and stops as soon as `cap` matches are
/// found, so a capped query never scans more of the index than it needs.
fn first_matches<'a>(
    items: &'a [IndexedItem],
    cap: usize,
    mut accept: impl FnMut(&IndexedItem) -> bool,
    cancel: &CancelToken,
) -> Option<Vec<&'a IndexedItem>> {
    let mut found = Vec::with_capacity(cap);
    if cap == 0 {
        return Some(found);
    }
    for (i, item) in items.iter().enumerate() {
        cancel.check_sparse(i)?;
        if accept(item) {
            found.push(item);
            if found.len() == cap {
                break;
            }
        }
    }
    Some(found)
}

/// Parallel full scan. Every worker stops taking items once the token is
/// cancelled.
fn all_matches<'a>(
    items: &'a [IndexedItem],
    accept: impl Fn(&IndexedItem) -> bool + Sync,
    cancel: &CancelToken,
) -> Option<Vec<&'a IndexedItem>> {
    let found: Vec<&IndexedItem> = items
        .par_iter()
        .map(|item| cancel.check().map(|()| item))
        .while_some()
        .filter(|item| accept(item))
        .collect();
    // while_some ends quietly, so a cancelled scan looks complete here.
    cancel.check()?;
    Some(found)
}

fn final_score(query: &Query, item: &IndexedItem, history: &HashMap<String, String>) -> f64 {
    let name_len = item.name.chars().count();
    let coverage = if name_len == 0 {
        0.0
    } else {
        query.content.chars().count() as f64 / name_len as f64
    };
    let history_bonus = match history.get(&query.content) {
        Some(path) if *path == item.full_path => 1.0,
        _ => 0.0,
    };
    coverage + HISTORY_WEIGHT * history_bonus + item.relevance_score
}

/// Runs one query against `index`. Returns `None` when cancelled.
///
/// Capped queries drop items whose path has vanished since the crawl;
/// unbounded queries skip that check.
pub fn search(
    index: &SearchIndex,
    query: &Query,
    matcher: &Matcher,
    history: &HashMap<String, String>,
    max_results: usize,
    generation: u64,
    cancel: &CancelToken,
) -> Option<ResultSet> {
    let matched: Vec<&IndexedItem> = if query.unbounded {
        all_matches(&index.items, |item| accepts(matcher, query, item), cancel)?
    } else {
        first_matches(
            &index.items,
            max_results,
            |item| accepts(matcher, query, item),
            cancel,
        )?
        .into_iter()
        .filter(|item| Path::new(&item.full_path).exists())
        .collect()
    };
    cancel.check()?;

    let mut results: Vec<IndexedItem> = matched
        .into_iter()
        .map(|item| IndexedItem {
            final_score: final_score(query, item, history),
            ..item.clone()
        })
        .collect();
    // Stable sort: ties keep index order.
    results.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
    Some(ResultSet::new(results, generation))
}

/// Owns the single in-flight query job and the generation counter.
pub struct QueryEngine {
    runtime: Handle,
    max_results: usize,
    generation: u64,
    job: Option<JobHandle<ResultSet>>,
}

impl QueryEngine {
    pub fn new(runtime: Handle, max_results: usize) -> Self {
        Self {
            runtime,
            max_results,
            generation: 0,
            job: None,
        }
    }

    /// Newest generation handed out so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancels the in-flight job, if any, and hands out a fresh generation.
    pub fn supersede(&mut self) -> u64 {
        if let Some(job) = self.job.take() {
            job.cancel();
        }
        self.generation += 1;
        self.generation
    }

    /// Starts a query job, replacing the previous one. Fails without
    /// touching the running job when the pattern does not compile.
    pub fn submit(
        &mut self,
        index: Arc<SearchIndex>,
        query: Query,
        history: HistorySnapshot,
    ) -> Result<u64> {
        let matcher = Matcher::new(&query)?;
        let generation = self.supersede();
        let max_results = self.max_results;
        tracing::debug!(
            "query job generation={} text={:?} regex={} unbounded={}",
            generation,
            query.content,
            query.use_regex,
            query.unbounded
        );
        self.job = Some(JobHandle::spawn(&self.runtime, move |cancel| {
            let started = Instant::now();
            let results = search(
                &index,
                &query,
                &matcher,
                &history,
                max_results,
                generation,
                cancel,
            )?;
            tracing::debug!(
                "query job generation={} results={} elapsed_ms={}",
                generation,
                results.len(),
                started.elapsed().as_millis()
            );
            Some(results)
        }));
        Ok(generation)
    }

    pub fn is_running(&self) -> bool {
        self.job.is_some()
    }

    /// Returns the finished result of the current job, once.
    pub fn poll(&mut self) -> Option<ResultSet> {
        let job = self.job.as_mut()?;
        match job.poll() {
            JobStatus::Running => None,
            JobStatus::Finished(results) => {
                self.job = None;
                Some(results)
            }
            JobStatus::Gone => {
                self.job = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use chrono::Local;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn item(dir: &Path, name: &str, is_dir: bool, relevance: f64) -> IndexedItem {
        IndexedItem {
            full_path: dir.join(name).to_string_lossy().to_string(),
            name: name.to_string(),
            is_dir,
            relevance_score: relevance,
            final_score: 0.0,
        }
    }

    fn index_of(root: &Path, items: Vec<IndexedItem>) -> SearchIndex {
        SearchIndex {
            root: root.to_path_buf(),
            completed_at: Local::now(),
            items,
        }
    }

    fn run(index: &SearchIndex, query: &Query, history: &HashMap<String, String>) -> ResultSet {
        let matcher = Matcher::new(query).unwrap();
        search(index, query, &matcher, history, 50, 1, &CancelToken::new()).unwrap()
    }

    fn names(results: &ResultSet) -> Vec<&str> {
        results.items.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn substring_match_ignores_case_and_ranks_by_final_score() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        fs::write(dir.path().join("b.bin"), "").unwrap();
        fs::write(dir.path().join("Alpha.md"), "").unwrap();
        let index = index_of(
            dir.path(),
            vec![
                item(dir.path(), "a.txt", false, 4.0),
                item(dir.path(), "Alpha.md", false, 2.5),
                item(dir.path(), "b.bin", false, 0.5),
            ],
        );
        let results = run(&index, &Query::new("a"), &HashMap::new());
        assert_eq!(names(&results), ["a.txt", "Alpha.md"]);
        assert!((results.items[0].final_score - (1.0 / 5.0 + 4.0)).abs() < 1e-9);

        let results = run(&index, &Query::new("b"), &HashMap::new());
        assert_eq!(names(&results), ["b.bin"]);
    }

    #[test]
    fn history_bonus_lifts_remembered_item() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["report-old.txt", "report.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let old = item(dir.path(), "report-old.txt", false, 1.0);
        let index = index_of(
            dir.path(),
            vec![item(dir.path(), "report.txt", false, 2.0), old.clone()],
        );
        let history = HashMap::from([("rep".to_string(), old.full_path.clone())]);
        let results = run(&index, &Query::new("rep"), &history);
        assert_eq!(names(&results), ["report-old.txt", "report.txt"]);
    }

    #[test]
    fn capped_query_stops_at_limit_and_drops_vanished_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut items = Vec::new();
        for i in 0..120 {
            let name = format!("file{i:03}.txt");
            if i != 0 {
                fs::write(dir.path().join(&name), "").unwrap();
            }
            items.push(item(dir.path(), &name, false, 200.0 - i as f64));
        }
        let index = index_of(dir.path(), items);
        let results = run(&index, &Query::new("file"), &HashMap::new());
        // file000 matched first but no longer exists.
        assert_eq!(results.len(), 49);
        assert_eq!(results.items[0].name, "file001.txt");

        let mut unbounded = Query::new("file");
        unbounded.unbounded = true;
        let results = run(&index, &unbounded, &HashMap::new());
        assert_eq!(results.len(), 120);
        assert_eq!(results.items[0].name, "file000.txt");
    }

    #[test]
    fn directory_only_and_regex_filters() {
        let root = PathBuf::from("/never/exists");
        let index = index_of(
            &root,
            vec![
                item(&root, "src", true, 1.0),
                item(&root, "src.rs", false, 1.0),
                item(&root, "2024-01-01.md", false, 1.0),
            ],
        );
        let mut query = Query::new("src");
        query.directory_only = true;
        query.unbounded = true;
        assert_eq!(names(&run(&index, &query, &HashMap::new())), ["src"]);

        let mut query = Query::new(r"^\d{4}-");
        query.use_regex = true;
        query.unbounded = true;
        assert_eq!(names(&run(&index, &query, &HashMap::new())), ["2024-01-01.md"]);
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let mut query = Query::new("[");
        query.use_regex = true;
        assert!(matches!(
            Matcher::new(&query),
            Err(SearchError::InvalidQueryPattern(_))
        ));
        query.use_regex = false;
        assert!(Matcher::new(&query).is_ok());
    }

    #[test]
    fn cancelled_full_scan_stops_without_visiting_items() {
        let root = PathBuf::from("/never/exists");
        let items: Vec<IndexedItem> = (0..10_000)
            .map(|i| item(&root, &format!("f{i}"), false, 1.0))
            .collect();
        let visited = AtomicUsize::new(0);
        let accept = |_: &IndexedItem| {
            visited.fetch_add(1, Ordering::Relaxed);
            true
        };

        let live = CancelToken::new();
        assert_eq!(all_matches(&items, accept, &live).unwrap().len(), 10_000);
        assert_eq!(visited.swap(0, Ordering::Relaxed), 10_000);

        let cancelled = CancelToken::new();
        cancelled.cancel();
        assert!(all_matches(&items, accept, &cancelled).is_none());
        assert_eq!(visited.load(Ordering::Relaxed), 0);

        let index = index_of(&root, items);
        let mut query = Query::new("f");
        query.unbounded = true;
        let matcher = Matcher::new(&query).unwrap();
        assert!(search(&index, &query, &matcher, &HashMap::new(), 50, 1, &cancelled).is_none());
    }

    #[test]
    fn ties_are_deterministic() {
        let root = PathBuf::from("/never/exists");
        let index = index_of(
            &root,
            vec![item(&root, "ab", false, 1.0), item(&root, "ba", false, 1.0)],
        );
        let mut query = Query::new("a");
        query.unbounded = true;
        for _ in 0..5 {
            assert_eq!(names(&run(&index, &query, &HashMap::new())), ["ab", "ba"]);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn newer_submission_supersedes_older() {
        let root = PathBuf::from("/never/exists");
        let index = Arc::new(index_of(&root, vec![item(&root, "x", false, 1.0)]));
        let mut engine = QueryEngine::new(Handle::current(), 50);
        let mut query = Query::new("x");
        query.unbounded = true;
        let first = engine
            .submit(index.clone(), query.clone(), HistorySnapshot::default())
            .unwrap();
        let second = engine
            .submit(index, query, HistorySnapshot::default())
            .unwrap();
        assert!(second > first);

        let mut delivered = None;
        for _ in 0..500 {
            if let Some(results) = engine.poll() {
                delivered = Some(results);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let delivered = delivered.expect("query job finished");
        assert_eq!(delivered.generation, second);
        assert!(!engine.is_running());
    }
}
