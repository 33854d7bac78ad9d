use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::actions::Actions;
use crate::config::SessionConfig;
use crate::error::{Result, SearchError};
use crate::history::{HistoryStore, LookupCounter};
use crate::indexer::{CrawlStatus, Crawler};
use crate::searcher::{Matcher, QueryEngine};
use crate::session::command::{self, Command};
use crate::session::mode::Mode;
use crate::storage::Storage;
use crate::types::{IndexedItem, Query, ResultSet, SearchIndex};

/// How a session is started.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub root: PathBuf,
    pub initial_query: Option<String>,
    pub incognito: bool,
    /// Crawl at startup even if today's index is on disk.
    pub force_crawl: bool,
    pub config: SessionConfig,
}

/// What the renderer gets to see after each tick.
#[derive(Debug)]
pub struct SessionView<'a> {
    pub mode: Mode,
    pub root: &'a Path,
    pub query: &'a Query,
    pub command_buffer: &'a str,
    /// Rows currently in view.
    pub rows: &'a [IndexedItem],
    /// Position of the cursor inside `rows`.
    pub cursor_row: usize,
    pub total: usize,
    pub status: Option<&'a str>,
    pub regex_invalid: bool,
    pub incognito: bool,
    pub indexing: bool,
    pub show_relative: bool,
    pub show_parent_name: bool,
}

impl SessionView<'_> {
    /// Display text for one result row under the current display toggles.
    pub fn label(&self, item: &IndexedItem) -> String {
        let path = item.path();
        let mut shown = if self.show_relative {
            path.strip_prefix(self.root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string()
        } else {
            item.full_path.clone()
        };
        if self.show_parent_name {
            if let Some(parent) = path.parent().and_then(|p| p.file_name()) {
                shown = format!("[{}] {}", parent.to_string_lossy(), shown);
            }
        }
        if item.is_dir {
            shown.push(std::path::MAIN_SEPARATOR);
        }
        shown
    }
}

/// The interactive state machine. Lives on the control thread; crawls and
/// queries run as background jobs that are polled once per tick.
pub struct SessionController {
    config: SessionConfig,
    root: PathBuf,
    mode: Mode,
    query: Query,
    results: ResultSet,
    needs_refresh: bool,
    regex_invalid: bool,
    command_buffer: String,
    history_cursor: Option<usize>,
    live_buffer: Option<String>,
    show_relative: bool,
    show_parent_name: bool,
    status: Option<String>,
    last_key_press: Instant,
    index: Option<Arc<SearchIndex>>,
    crawler: Crawler,
    engine: QueryEngine,
    history: HistoryStore,
    lookups: LookupCounter,
    actions: Arc<dyn Actions>,
    runtime: Handle,
    open_jobs: Vec<JoinHandle<()>>,
    open_failures: mpsc::Receiver<String>,
    open_failure_sender: mpsc::Sender<String>,
}

impl SessionController {
    /// Loads the stores and the persisted index, and starts a crawl when the
    /// index is missing, for another root, or not from today. Store failures
    /// are returned; an unusable root is only reported in the status line.
    pub fn start(
        runtime: Handle,
        storage: Storage,
        actions: Arc<dyn Actions>,
        options: SessionOptions,
        now: Instant,
    ) -> Result<Self> {
        let mut history = HistoryStore::load(&storage.history_path())?;
        history.set_incognito(options.incognito);
        let lookups = LookupCounter::load(&storage.lookups_path())?;
        let root = std::fs::canonicalize(&options.root).unwrap_or(options.root);

        let persisted = storage.load_index()?.filter(|index| index.root == root);
        let crawled_today = storage.last_crawl_date()? == Some(Local::now().date_naive());
        let wants_crawl = options.force_crawl || persisted.is_none() || !crawled_today;

        let initial_query = options.initial_query.unwrap_or_default();
        let (open_failure_sender, open_failures) = mpsc::channel();
        let mut controller = Self {
            mode: Mode::initial(!initial_query.is_empty()),
            query: Query::new(initial_query),
            results: ResultSet::default(),
            needs_refresh: true,
            regex_invalid: false,
            command_buffer: String::new(),
            history_cursor: None,
            live_buffer: None,
            show_relative: false,
            show_parent_name: false,
            status: None,
            last_key_press: now,
            index: None,
            crawler: Crawler::new(runtime.clone(), storage),
            engine: QueryEngine::new(runtime.clone(), options.config.max_results),
            config: options.config,
            root,
            history,
            lookups,
            actions,
            runtime,
            open_jobs: Vec::new(),
            open_failures,
            open_failure_sender,
        };
        if let Some(index) = persisted {
            tracing::info!("loaded index root={} items={}", index.root.display(), index.len());
            controller.install_index(Arc::new(index));
        }
        if wants_crawl {
            controller.start_crawl();
        }
        Ok(controller)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn regex_invalid(&self) -> bool {
        self.regex_invalid
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> Option<&Arc<SearchIndex>> {
        self.index.as_ref()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn lookups(&self) -> &LookupCounter {
        &self.lookups
    }

    pub fn is_indexing(&self) -> bool {
        self.crawler.is_running()
    }

    /// Interval until the next tick. Sleeping sessions tick slowly.
    pub fn tick_interval(&self) -> std::time::Duration {
        if self.mode == Mode::Sleep {
            self.config.sleep_tick()
        } else {
            self.config.tick()
        }
    }

    pub fn view(&self) -> SessionView<'_> {
        let rows = self.results.visible(self.config.visible_rows);
        SessionView {
            mode: self.mode,
            root: &self.root,
            query: &self.query,
            command_buffer: &self.command_buffer,
            rows,
            cursor_row: self.results.cursor() - self.results.window_start(),
            total: self.results.len(),
            status: self.status.as_deref(),
            regex_invalid: self.regex_invalid,
            incognito: self.history.is_incognito(),
            indexing: self.crawler.is_running(),
            show_relative: self.show_relative,
            show_parent_name: self.show_parent_name,
        }
    }

    /// One pass of the control loop: apply at most one key, check the idle
    /// timers, collect finished jobs and issue a query refresh if needed.
    pub fn tick(&mut self, now: Instant, key: Option<KeyEvent>) {
        if self.mode == Mode::Exit {
            return;
        }
        if let Some(key) = key {
            self.last_key_press = now;
            self.handle_key(key);
        }
        self.check_idle(now);
        if self.mode == Mode::Exit {
            return;
        }
        self.poll_crawl();
        self.poll_open_failures();
        self.refresh();
        self.adopt_results();
    }

    fn check_idle(&mut self, now: Instant) {
        let idle = now.saturating_duration_since(self.last_key_press);
        if idle >= self.config.shutdown_after() {
            tracing::info!("idle for {}s, shutting down", idle.as_secs());
            self.mode = Mode::Exit;
        } else if idle >= self.config.sleep_after() && self.mode.is_awake() {
            tracing::debug!("idle for {}s, sleeping", idle.as_secs());
            self.mode = Mode::Sleep;
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL)
            && !key.modifiers.contains(KeyModifiers::ALT)
            && key.code == KeyCode::Char('c')
        {
            self.mode = Mode::Exit;
            return;
        }
        match self.mode {
            Mode::Sleep => self.mode = Mode::Select,
            Mode::Select => self.handle_select_key(key),
            Mode::Insert => self.handle_insert_key(key),
            Mode::Command => self.handle_command_key(key),
            Mode::Exit => {}
        }
    }

    fn handle_select_key(&mut self, key: KeyEvent) {
        let rows = self.config.visible_rows;
        let modified = key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT);
        match key.code {
            KeyCode::Char('i') | KeyCode::Char('I') => self.enter_insert(),
            KeyCode::Char(':') => {
                self.command_buffer.clear();
                self.mode = Mode::Command;
            }
            KeyCode::Char('q') | KeyCode::Char('Q') => self.mode = Mode::Exit,
            KeyCode::Enter => self.open_selected(modified, false),
            KeyCode::Char('o') => self.open_selected(true, false),
            KeyCode::Char('e') => self.open_selected(false, true),
            KeyCode::Char('y') => self.copy_selected(),
            KeyCode::Char('r') => {
                self.query.use_regex = !self.query.use_regex;
                self.mark_query_changed();
            }
            KeyCode::Char('u') => {
                self.query.unbounded = !self.query.unbounded;
                self.mark_query_changed();
            }
            KeyCode::Char('d') => {
                self.query.directory_only = !self.query.directory_only;
                self.mark_query_changed();
            }
            KeyCode::Char('p') => self.show_relative = !self.show_relative,
            KeyCode::Char('n') => self.show_parent_name = !self.show_parent_name,
            KeyCode::Up | KeyCode::Char('k') => self.results.move_cursor(-1, rows),
            KeyCode::Down | KeyCode::Char('j') => self.results.move_cursor(1, rows),
            KeyCode::PageUp => self.results.move_cursor(-(rows as isize), rows),
            KeyCode::PageDown => self.results.move_cursor(rows as isize, rows),
            KeyCode::Char('g') | KeyCode::Home => self.results.select_first(rows),
            KeyCode::Char('G') | KeyCode::End => self.results.select_last(rows),
            _ => {}
        }
    }

    fn handle_insert_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        // Windows reports AltGr as Ctrl+Alt; those keys are plain text.
        let altgr = ctrl && alt;
        let ctrl = ctrl && !alt;
        let word = (ctrl || alt) && !altgr;
        let edited = match key.code {
            KeyCode::Enter | KeyCode::Esc => {
                self.mode = Mode::Select;
                false
            }
            KeyCode::Up => {
                self.history_older();
                false
            }
            KeyCode::Down => {
                self.history_newer();
                false
            }
            KeyCode::Char('w') if ctrl => self.query.delete_word_back(),
            KeyCode::Char('u') if ctrl => {
                let had_text = !self.query.content.is_empty();
                self.query.clear();
                had_text
            }
            KeyCode::Char('a') if ctrl => {
                self.query.move_home();
                false
            }
            KeyCode::Char('e') if ctrl => {
                self.query.move_end();
                false
            }
            KeyCode::Char(c) if !word => {
                self.query.insert_char(c);
                true
            }
            KeyCode::Backspace if word => self.query.delete_word_back(),
            KeyCode::Backspace => self.query.delete_back(),
            KeyCode::Delete => self.query.delete_forward(),
            KeyCode::Left if word => {
                self.query.move_word_left();
                false
            }
            KeyCode::Right if word => {
                self.query.move_word_right();
                false
            }
            KeyCode::Left => {
                self.query.move_left();
                false
            }
            KeyCode::Right => {
                self.query.move_right();
                false
            }
            KeyCode::Home => {
                self.query.move_home();
                false
            }
            KeyCode::End => {
                self.query.move_end();
                false
            }
            _ => false,
        };
        if edited {
            self.history_cursor = None;
            self.live_buffer = None;
            self.mark_query_changed();
        }
    }

    /// Starts a fresh history walk from whatever text is in the buffer.
    fn enter_insert(&mut self) {
        self.history_cursor = None;
        self.live_buffer = None;
        self.mode = Mode::Insert;
    }

    fn handle_command_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.command_buffer.clear();
                self.mode = Mode::Select;
            }
            KeyCode::Enter => {
                let line = std::mem::take(&mut self.command_buffer);
                self.mode = Mode::Select;
                self.execute(&line);
            }
            KeyCode::Backspace => {
                if self.command_buffer.pop().is_none() {
                    self.mode = Mode::Select;
                }
            }
            KeyCode::Tab => {
                if let Some(name) = command::complete(&self.command_buffer) {
                    self.command_buffer = name.to_string();
                }
            }
            KeyCode::Char(c) => self.command_buffer.push(c),
            _ => {}
        }
    }

    fn execute(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match command::parse(line) {
            Ok(Command::RebuildIndex { root }) => {
                if let Some(root) = root {
                    let previous = std::mem::replace(&mut self.root, root);
                    if !self.start_crawl() {
                        self.root = previous;
                    }
                } else {
                    self.start_crawl();
                }
            }
            Ok(Command::ToggleIncognito) => {
                let on = self.history.toggle_incognito();
                tracing::info!("incognito {}", if on { "on" } else { "off" });
                self.status = Some(format!("incognito {}", if on { "on" } else { "off" }));
            }
            Err(e) => {
                tracing::warn!("{}", e);
                self.status = Some(e.to_string());
            }
        }
    }

    /// Requests a fresh crawl of the current root. Returns false when the
    /// root was rejected.
    fn start_crawl(&mut self) -> bool {
        match self.crawler.start_crawl(&self.root, self.lookups.snapshot()) {
            Ok(()) => {
                if let Ok(root) = std::fs::canonicalize(&self.root) {
                    self.root = root;
                }
                self.status = Some("indexing...".to_string());
                true
            }
            Err(e) => {
                tracing::warn!("crawl not started: {}", e);
                self.status = Some(e.to_string());
                false
            }
        }
    }

    fn install_index(&mut self, index: Arc<SearchIndex>) {
        self.index = Some(index);
        self.needs_refresh = true;
    }

    fn poll_crawl(&mut self) {
        match self.crawler.poll() {
            CrawlStatus::Completed(index) => {
                self.status = Some(format!("indexed {} items", index.len()));
                self.install_index(index);
            }
            CrawlStatus::Failed(e) => {
                tracing::warn!("crawl failed: {}", e);
                self.status = Some(format!("indexing failed: {e}"));
            }
            CrawlStatus::Idle | CrawlStatus::Running => {}
        }
    }

    fn poll_open_failures(&mut self) {
        while let Ok(message) = self.open_failures.try_recv() {
            self.status = Some(message);
        }
    }

    fn mark_query_changed(&mut self) {
        self.needs_refresh = true;
        self.regex_invalid = false;
    }

    fn history_older(&mut self) {
        let next = self.history_cursor.map_or(0, |c| c + 1);
        let Some(entry) = self.history.nth_newest(next) else {
            return;
        };
        let text = entry.query_text.clone();
        if self.history_cursor.is_none() {
            self.live_buffer = Some(self.query.content.clone());
        }
        self.history_cursor = Some(next);
        self.query.set_content(text);
        self.mark_query_changed();
    }

    fn history_newer(&mut self) {
        let text = match self.history_cursor {
            None => return,
            Some(0) => {
                self.history_cursor = None;
                self.live_buffer.take().unwrap_or_default()
            }
            Some(n) => {
                self.history_cursor = Some(n - 1);
                match self.history.nth_newest(n - 1) {
                    Some(entry) => entry.query_text.clone(),
                    None => return,
                }
            }
        };
        self.query.set_content(text);
        self.mark_query_changed();
    }

    /// Remembered answer for exactly this query text, if its target is
    /// still on disk.
    fn cached_hit(&self) -> Option<IndexedItem> {
        if self.query.content.is_empty() || self.query.unbounded {
            return None;
        }
        // An invalid pattern must reach the engine to be flagged.
        if self.query.use_regex && Matcher::new(&self.query).is_err() {
            return None;
        }
        let entry = self.history.find_exact(&self.query.content)?;
        let path = Path::new(&entry.selected_full_path);
        let metadata = std::fs::metadata(path).ok()?;
        if self.query.directory_only && !metadata.is_dir() {
            return None;
        }
        Some(IndexedItem {
            full_path: entry.selected_full_path.clone(),
            name: entry.selected_name.clone(),
            is_dir: metadata.is_dir(),
            relevance_score: 0.0,
            final_score: 0.0,
        })
    }

    fn refresh(&mut self) {
        if !self.needs_refresh {
            return;
        }
        if let Some(hit) = self.cached_hit() {
            let generation = self.engine.supersede();
            tracing::debug!("history hit for {:?} generation={}", self.query.content, generation);
            self.results = ResultSet::new(vec![hit], generation);
            self.needs_refresh = false;
            return;
        }
        let Some(index) = self.index.clone() else {
            return;
        };
        match self
            .engine
            .submit(index, self.query.clone(), self.history.snapshot())
        {
            Ok(_) => self.needs_refresh = false,
            Err(SearchError::InvalidQueryPattern(e)) => {
                tracing::debug!("regex rejected: {}", e);
                self.regex_invalid = true;
                self.needs_refresh = false;
            }
            Err(e) => {
                tracing::warn!("query not started: {}", e);
                self.needs_refresh = false;
            }
        }
    }

    fn adopt_results(&mut self) {
        let Some(results) = self.engine.poll() else {
            return;
        };
        if results.generation > self.results.generation {
            self.results = results;
        } else {
            tracing::trace!(
                "dropping stale results generation={} shown={}",
                results.generation,
                self.results.generation
            );
        }
    }

    fn copy_selected(&mut self) {
        let Some(item) = self.results.selected() else {
            return;
        };
        self.status = Some(match self.actions.copy_to_clipboard(&item.full_path) {
            Ok(()) => format!("copied {}", item.full_path),
            Err(e) => {
                tracing::warn!("clipboard: {}", e);
                format!("copy failed: {e}")
            }
        });
    }

    /// Opens the selected item: records history (unless incognito), bumps
    /// its open count and hands the OS open off to a background task.
    fn open_selected(&mut self, keep_open: bool, parent: bool) {
        let Some(item) = self.results.selected().cloned() else {
            return;
        };
        let path = PathBuf::from(&item.full_path);
        if !path.exists() {
            let e = SearchError::ItemNotFound(path);
            tracing::warn!("{}", e);
            self.status = Some(e.to_string());
            return;
        }
        // bookkeeping failures only reach the status line
        if let Err(e) = self.history.record(&self.query.content, &item, Local::now()) {
            tracing::warn!("history not saved: {}", e);
            self.status = Some(format!("history not saved: {e}"));
        }
        if let Err(e) = self.lookups.increment(&item.full_path) {
            tracing::warn!("open count not saved: {}", e);
            self.status = Some(format!("open count not saved: {e}"));
        }

        // hand the OS open to the blocking pool
        let actions = Arc::clone(&self.actions);
        let failures = self.open_failure_sender.clone();
        self.open_jobs.retain(|job| !job.is_finished());
        self.open_jobs.push(self.runtime.spawn_blocking(move || {
            if let Err(e) = actions.open(&path, parent) {
                tracing::warn!("open {} failed: {}", path.display(), e);
                let _ = failures.send(format!("open failed: {e}"));
            }
        }));
        if keep_open {
            self.status = Some(format!("opened {}", item.name));
        } else {
            self.mode = Mode::Exit;
        }
    }

    /// Stops background work and waits for every started open action.
    pub async fn finish(&mut self) {
        self.crawler.cancel();
        self.engine.supersede();
        for job in self.open_jobs.drain(..) {
            if let Err(e) = job.await {
                tracing::warn!("open task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingActions {
        opened: Mutex<Vec<(PathBuf, bool)>>,
        copied: Mutex<Vec<String>>,
    }

    impl Actions for RecordingActions {
        fn open(&self, path: &Path, parent: bool) -> io::Result<()> {
            self.opened.lock().unwrap().push((path.to_path_buf(), parent));
            Ok(())
        }

        fn copy_to_clipboard(&self, text: &str) -> io::Result<()> {
            self.copied.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Harness {
        controller: SessionController,
        actions: Arc<RecordingActions>,
        root: TempDir,
        _data: TempDir,
        now: Instant,
    }

    impl Harness {
        fn new(initial_query: Option<&str>) -> Self {
            let root = tempfile::tempdir().unwrap();
            for name in ["alpha.txt", "beta.bin", "gamma.txt"] {
                fs::write(root.path().join(name), "x").unwrap();
            }
            fs::create_dir(root.path().join("albums")).unwrap();
            Self::with_root(root, initial_query)
        }

        fn with_root(root: TempDir, initial_query: Option<&str>) -> Self {
            let data = tempfile::tempdir().unwrap();
            let actions = Arc::new(RecordingActions::default());
            let now = Instant::now();
            let controller = SessionController::start(
                Handle::current(),
                Storage::open(data.path()).unwrap(),
                actions.clone(),
                SessionOptions {
                    root: root.path().to_path_buf(),
                    initial_query: initial_query.map(str::to_string),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
            Self {
                controller,
                actions,
                root,
                _data: data,
                now,
            }
        }

        fn press(&mut self, key: KeyEvent) {
            self.now += Duration::from_millis(20);
            self.controller.tick(self.now, Some(key));
        }

        fn chr(&mut self, c: char) {
            self.press(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
        }

        fn code(&mut self, code: KeyCode) {
            self.press(KeyEvent::new(code, KeyModifiers::NONE));
        }

        fn type_text(&mut self, text: &str) {
            for c in text.chars() {
                self.chr(c);
            }
        }

        fn idle(&mut self, by: Duration) {
            self.now += by;
            self.controller.tick(self.now, None);
        }

        /// Ticks until the crawl is in and no query is pending.
        async fn settle(&mut self) {
            for _ in 0..1000 {
                self.idle(Duration::from_millis(1));
                if self.controller.index().is_some()
                    && !self.controller.is_indexing()
                    && !self.controller.needs_refresh()
                    && !self.controller.engine.is_running()
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("session did not settle");
        }

        fn names(&self) -> Vec<String> {
            self.controller
                .results()
                .items
                .iter()
                .map(|i| i.name.clone())
                .collect()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn starts_in_insert_without_query_and_select_with_one() {
        let h = Harness::new(None);
        assert_eq!(h.controller.mode(), Mode::Insert);
        assert!(h.controller.is_indexing());
        let h = Harness::new(Some("alpha"));
        assert_eq!(h.controller.mode(), Mode::Select);
        assert_eq!(h.controller.query().cursor, 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mode_transitions_follow_keys() {
        let mut h = Harness::new(None);
        h.code(KeyCode::Esc);
        assert_eq!(h.controller.mode(), Mode::Select);
        h.chr('i');
        assert_eq!(h.controller.mode(), Mode::Insert);
        h.code(KeyCode::Enter);
        h.chr(':');
        assert_eq!(h.controller.mode(), Mode::Command);
        h.chr('x');
        h.code(KeyCode::Backspace);
        assert_eq!(h.controller.mode(), Mode::Command);
        h.code(KeyCode::Backspace);
        assert_eq!(h.controller.mode(), Mode::Select);
        h.chr('q');
        assert_eq!(h.controller.mode(), Mode::Exit);
        h.chr('i');
        assert_eq!(h.controller.mode(), Mode::Exit);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn typing_refreshes_results_and_cursor_stays_in_bounds() {
        let mut h = Harness::new(None);
        h.settle().await;
        h.type_text("al");
        h.settle().await;
        let mut names = h.names();
        names.sort();
        assert_eq!(names, ["albums", "alpha.txt"]);

        h.code(KeyCode::Esc);
        h.code(KeyCode::Down);
        h.code(KeyCode::Down);
        h.code(KeyCode::Down);
        assert_eq!(h.controller.results().cursor(), 1);
        h.code(KeyCode::Up);
        h.code(KeyCode::Up);
        assert_eq!(h.controller.results().cursor(), 0);

        h.chr('d');
        h.settle().await;
        assert_eq!(h.names(), ["albums"]);
        assert_eq!(h.controller.results().cursor(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_regex_keeps_old_results_and_suppresses_refresh() {
        let mut h = Harness::new(None);
        h.settle().await;
        h.chr('[');
        h.settle().await;
        let shown = h.controller.results().generation;
        assert!(h.controller.results().is_empty());

        h.code(KeyCode::Backspace);
        h.chr('a');
        h.settle().await;
        let shown_items = h.names();
        assert!(!shown_items.is_empty());
        let shown = shown.max(h.controller.results().generation);

        h.chr('[');
        h.code(KeyCode::Esc);
        h.chr('r');
        assert!(h.controller.regex_invalid());
        assert!(!h.controller.needs_refresh());
        let generation = h.controller.engine.generation();
        h.idle(Duration::from_millis(20));
        h.idle(Duration::from_millis(20));
        assert_eq!(h.controller.engine.generation(), generation);
        // the last good results stay on screen
        assert!(h.controller.results().generation >= shown);

        h.chr('i');
        h.code(KeyCode::Backspace);
        assert!(!h.controller.regex_invalid());
        assert!(h.controller.engine.generation() > generation);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn opening_records_history_and_counts() {
        let mut h = Harness::new(None);
        h.settle().await;
        h.type_text("gamma");
        h.settle().await;
        h.code(KeyCode::Esc);
        h.chr('o');
        assert_eq!(h.controller.mode(), Mode::Select);
        let target = h.controller.results().selected().unwrap().full_path.clone();
        assert_eq!(h.controller.history().len(), 1);
        assert_eq!(h.controller.lookups().get(&target), 1);

        h.code(KeyCode::Enter);
        assert_eq!(h.controller.mode(), Mode::Exit);
        assert_eq!(h.controller.history().len(), 2);
        assert_eq!(h.controller.lookups().get(&target), 2);

        h.controller.finish().await;
        let opened = h.actions.opened.lock().unwrap().clone();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[0], (PathBuf::from(&target), false));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn incognito_skips_history_but_still_counts() {
        let mut h = Harness::new(None);
        h.settle().await;
        h.code(KeyCode::Esc);
        h.chr(':');
        h.type_text("toggle");
        h.code(KeyCode::Tab);
        h.code(KeyCode::Enter);
        assert_eq!(h.controller.status(), Some("incognito on"));
        h.chr('i');
        h.type_text("beta");
        h.settle().await;
        h.code(KeyCode::Esc);
        h.chr('o');
        let target = h.controller.results().selected().unwrap().full_path.clone();
        assert!(h.controller.history().is_empty());
        assert_eq!(h.controller.lookups().get(&target), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn vanished_item_is_reported_not_opened() {
        let mut h = Harness::new(None);
        h.settle().await;
        h.type_text("gamma");
        h.settle().await;
        fs::remove_file(h.root.path().join("gamma.txt")).unwrap();
        h.code(KeyCode::Esc);
        h.code(KeyCode::Enter);
        assert_eq!(h.controller.mode(), Mode::Select);
        assert!(h.controller.status().unwrap().contains("no longer exists"));
        assert!(h.controller.history().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remembered_query_answers_from_history() {
        let mut h = Harness::new(None);
        h.settle().await;
        h.type_text("a");
        h.settle().await;
        h.code(KeyCode::Esc);
        h.code(KeyCode::Down);
        let picked = h.controller.results().selected().unwrap().full_path.clone();
        h.chr('o');

        h.chr('i');
        h.code(KeyCode::Backspace);
        h.settle().await;
        let before = h.controller.engine.generation();
        h.chr('a');
        assert_eq!(h.controller.results().len(), 1);
        assert_eq!(h.controller.results().selected().unwrap().full_path, picked);
        assert!(h.controller.results().generation > before);
        assert!(!h.controller.needs_refresh());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn history_navigation_restores_live_buffer() {
        let mut h = Harness::new(None);
        h.settle().await;
        for text in ["alpha", "beta"] {
            h.type_text(text);
            h.settle().await;
            h.code(KeyCode::Esc);
            h.chr('o');
            h.chr('i');
            h.press(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL));
        }
        h.type_text("ga");
        h.code(KeyCode::Up);
        assert_eq!(h.controller.query().content, "beta");
        h.code(KeyCode::Up);
        assert_eq!(h.controller.query().content, "alpha");
        h.code(KeyCode::Up);
        assert_eq!(h.controller.query().content, "alpha");
        h.code(KeyCode::Down);
        assert_eq!(h.controller.query().content, "beta");
        h.code(KeyCode::Down);
        assert_eq!(h.controller.query().content, "ga");
        h.code(KeyCode::Down);
        assert_eq!(h.controller.query().content, "ga");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn idle_session_sleeps_then_shuts_down() {
        let mut h = Harness::new(None);
        h.idle(Duration::from_secs(61));
        assert_eq!(h.controller.mode(), Mode::Sleep);
        assert_eq!(h.controller.tick_interval(), Duration::from_secs(1));
        h.chr('q');
        assert_eq!(h.controller.mode(), Mode::Select);
        h.idle(Duration::from_secs(601));
        assert_eq!(h.controller.mode(), Mode::Exit);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_command_is_ignored() {
        let mut h = Harness::new(None);
        h.code(KeyCode::Esc);
        h.chr(':');
        h.type_text("Frobnicate");
        h.code(KeyCode::Enter);
        assert_eq!(h.controller.mode(), Mode::Select);
        assert!(h.controller.status().unwrap().contains("unknown command"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rebuild_to_missing_root_keeps_current_root() {
        let mut h = Harness::new(None);
        h.settle().await;
        let root = h.controller.root().to_path_buf();
        h.code(KeyCode::Esc);
        h.chr(':');
        h.type_text("RebuildIndex root=/definitely/not/here");
        h.code(KeyCode::Enter);
        assert_eq!(h.controller.root(), root);
        assert!(!h.controller.is_indexing());
        assert!(h.controller.status().unwrap().contains("not a directory"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ctrl_c_exits_from_command_mode() {
        let mut h = Harness::new(None);
        h.code(KeyCode::Esc);
        h.chr(':');
        h.press(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert_eq!(h.controller.mode(), Mode::Exit);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn view_labels_follow_display_toggles() {
        let mut h = Harness::new(None);
        h.settle().await;
        h.type_text("albums");
        h.settle().await;
        h.code(KeyCode::Esc);
        let view = h.controller.view();
        let item = &view.rows[0];
        assert!(view.label(item).ends_with(&format!("albums{}", std::path::MAIN_SEPARATOR)));
        assert!(view.label(item).starts_with(&item.full_path));
        h.chr('p');
        h.chr('n');
        let view = h.controller.view();
        let parent = h.controller.root().file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(
            view.label(&view.rows[0]),
            format!("[{parent}] albums{}", std::path::MAIN_SEPARATOR)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn altgr_characters_are_typed_into_the_query() {
        let mut h = Harness::new(None);
        let altgr = KeyModifiers::CONTROL | KeyModifiers::ALT;
        for c in ['@', '[', 'c'] {
            h.press(KeyEvent::new(KeyCode::Char(c), altgr));
        }
        assert_eq!(h.controller.query().content, "@[c");
        assert_eq!(h.controller.mode(), Mode::Insert);

        h.press(KeyEvent::new(KeyCode::Char('x'), KeyModifiers::ALT));
        assert_eq!(h.controller.query().content, "@[c");
        h.press(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL));
        assert_eq!(h.controller.query().content, "");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn history_walk_restarts_after_keep_open() {
        let mut h = Harness::new(None);
        h.settle().await;
        for text in ["alpha", "beta"] {
            h.type_text(text);
            h.settle().await;
            h.code(KeyCode::Esc);
            h.chr('o');
            h.chr('i');
            h.press(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL));
        }
        h.code(KeyCode::Up);
        h.code(KeyCode::Up);
        assert_eq!(h.controller.query().content, "alpha");
        h.settle().await;
        h.code(KeyCode::Esc);
        h.chr('o');
        assert_eq!(h.controller.history().len(), 3);

        // newest first: alpha, beta, alpha
        h.chr('i');
        h.code(KeyCode::Up);
        assert_eq!(h.controller.query().content, "alpha");
        h.code(KeyCode::Up);
        assert_eq!(h.controller.query().content, "beta");
        h.code(KeyCode::Up);
        assert_eq!(h.controller.query().content, "alpha");
        h.code(KeyCode::Up);
        assert_eq!(h.controller.query().content, "alpha");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn finished_open_tasks_are_released() {
        let mut h = Harness::new(None);
        h.settle().await;
        h.type_text("alpha");
        h.settle().await;
        h.code(KeyCode::Esc);
        for _ in 0..3 {
            h.chr('o');
            for _ in 0..200 {
                if h.controller.open_jobs.iter().all(|job| job.is_finished()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        assert_eq!(h.controller.open_jobs.len(), 1);
        assert_eq!(h.actions.opened.lock().unwrap().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn history_hit_does_not_hide_invalid_regex() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a[1].txt"), "x").unwrap();
        let mut h = Harness::with_root(root, None);
        h.settle().await;
        h.chr('[');
        h.settle().await;
        assert_eq!(h.names(), ["a[1].txt"]);
        h.code(KeyCode::Esc);
        h.chr('o');
        assert_eq!(h.controller.history().len(), 1);

        h.chr('r');
        assert!(h.controller.regex_invalid());
        assert_eq!(h.names(), ["a[1].txt"]);

        h.chr('r');
        assert!(!h.controller.regex_invalid());
        assert_eq!(h.controller.results().len(), 1);
    }
}
