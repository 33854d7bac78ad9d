use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One file or directory found by a crawl.
///
/// `full_path` is the identity of the item. `relevance_score` is fixed at
/// crawl time; `final_score` is only meaningful inside a `ResultSet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexedItem {
    pub full_path: String,
    pub name: String,
    #[serde(rename = "IsDirectory")]
    pub is_dir: bool,
    pub relevance_score: f64,
    #[serde(default)]
    pub final_score: f64,
}

impl IndexedItem {
    pub fn path(&self) -> &Path {
        Path::new(&self.full_path)
    }
}

/// Output of one crawl. Never mutated after it is published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchIndex {
    pub root: PathBuf,
    pub completed_at: DateTime<Local>,
    pub items: Vec<IndexedItem>,
}

impl SearchIndex {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Live query text plus match options.
///
/// `cursor` counts characters, not bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub content: String,
    pub cursor: usize,
    pub use_regex: bool,
    pub directory_only: bool,
    pub unbounded: bool,
}

impl Query {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let cursor = content.chars().count();
        Self {
            content,
            cursor,
            ..Default::default()
        }
    }

    fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    fn byte_offset(&self, char_idx: usize) -> usize {
        self.content
            .char_indices()
            .nth(char_idx)
            .map(|(i, _)| i)
            .unwrap_or(self.content.len())
    }

    /// Replaces the whole text and parks the cursor at the end.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.cursor = self.char_len();
    }

    pub fn clear(&mut self) {
        self.content.clear();
        self.cursor = 0;
    }

    pub fn insert_char(&mut self, c: char) {
        let at = self.byte_offset(self.cursor);
        self.content.insert(at, c);
        self.cursor += 1;
    }

    /// Deletes the character before the cursor. Returns false at the start.
    pub fn delete_back(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        let at = self.byte_offset(self.cursor);
        self.content.remove(at);
        true
    }

    /// Deletes the character under the cursor. Returns false at the end.
    pub fn delete_forward(&mut self) -> bool {
        if self.cursor >= self.char_len() {
            return false;
        }
        let at = self.byte_offset(self.cursor);
        self.content.remove(at);
        true
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.char_len());
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.char_len();
    }

    fn word_start_before(&self, from: usize) -> usize {
        let chars: Vec<char> = self.content.chars().collect();
        let mut i = from;
        while i > 0 && chars[i - 1].is_whitespace() {
            i -= 1;
        }
        while i > 0 && !chars[i - 1].is_whitespace() {
            i -= 1;
        }
        i
    }

    fn word_end_after(&self, from: usize) -> usize {
        let chars: Vec<char> = self.content.chars().collect();
        let mut i = from;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        while i < chars.len() && !chars[i].is_whitespace() {
            i += 1;
        }
        i
    }

    pub fn move_word_left(&mut self) {
        self.cursor = self.word_start_before(self.cursor);
    }

    pub fn move_word_right(&mut self) {
        self.cursor = self.word_end_after(self.cursor);
    }

    /// Deletes from the start of the previous word up to the cursor.
    pub fn delete_word_back(&mut self) -> bool {
        let start = self.word_start_before(self.cursor);
        if start == self.cursor {
            return false;
        }
        let from = self.byte_offset(start);
        let to = self.byte_offset(self.cursor);
        self.content.replace_range(from..to, "");
        self.cursor = start;
        true
    }
}

/// Ranked output of one query run, with the selection cursor and the
/// window of rows currently in view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub items: Vec<IndexedItem>,
    pub generation: u64,
    cursor: usize,
    window_start: usize,
}

impl ResultSet {
    pub fn new(items: Vec<IndexedItem>, generation: u64) -> Self {
        Self {
            items,
            generation,
            cursor: 0,
            window_start: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn window_start(&self) -> usize {
        self.window_start
    }

    pub fn selected(&self) -> Option<&IndexedItem> {
        self.items.get(self.cursor)
    }

    /// Moves the cursor by `delta`, clamped to the results, and scrolls the
    /// window of `rows` visible rows so the cursor stays inside it.
    pub fn move_cursor(&mut self, delta: isize, rows: usize) {
        if self.items.is_empty() {
            self.cursor = 0;
            self.window_start = 0;
            return;
        }
        let last = self.items.len() - 1;
        self.cursor = self.cursor.saturating_add_signed(delta).min(last);
        self.scroll_into_view(rows);
    }

    pub fn select_first(&mut self, rows: usize) {
        self.cursor = 0;
        self.scroll_into_view(rows);
    }

    pub fn select_last(&mut self, rows: usize) {
        self.cursor = self.items.len().saturating_sub(1);
        self.scroll_into_view(rows);
    }

    fn scroll_into_view(&mut self, rows: usize) {
        let rows = rows.max(1);
        if self.cursor < self.window_start {
            self.window_start = self.cursor;
        } else if self.cursor >= self.window_start + rows {
            self.window_start = self.cursor + 1 - rows;
        }
    }

    /// Rows of the result set currently in view.
    pub fn visible(&self, rows: usize) -> &[IndexedItem] {
        let start = self.window_start.min(self.items.len());
        let end = (start + rows).min(self.items.len());
        &self.items[start..end]
    }
}
