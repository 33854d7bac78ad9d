//! Static relevance scoring, computed once per item at crawl time.
//!
//! Every heuristic is a plain function of the item's filesystem metadata and
//! its prior open count. Nothing here looks at the live query.

use chrono::{DateTime, Duration, Local};
use once_cell::sync::Lazy;
use regex::Regex;

const DEPTH_WEIGHT: f64 = 10.0;
const DEPTH_DIVISOR: f64 = 1600.0;
/// Levels below the root that are never penalized.
const FREE_DEPTH: usize = 2;
const LOOKUP_CAP: u32 = 5;

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static ISO date pattern"));

/// Metadata the ranker needs for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct RankInput<'a> {
    pub name: &'a str,
    /// Lower-cased extension without the dot, empty if none.
    pub extension: &'a str,
    /// Number of path components of the item.
    pub path_depth: usize,
    pub modified: Option<DateTime<Local>>,
    pub created: Option<DateTime<Local>>,
    /// Files in the same parent directory, the item included.
    pub sibling_count: usize,
    pub lookup_count: u32,
}

/// Total relevance score for one item.
pub fn score(input: &RankInput<'_>, root_depth: usize, now: DateTime<Local>) -> f64 {
    DEPTH_WEIGHT * depth_score(input.path_depth, root_depth)
        + type_score(input.extension)
        + recency_score(input.modified, now)
        + write_gap_score(input.modified, input.created, input.extension, now)
        + name_score(input.name)
        + sibling_score(input.sibling_count)
        + lookup_score(input.lookup_count)
}

pub fn depth_score(path_depth: usize, root_depth: usize) -> f64 {
    let depth = path_depth.saturating_sub(root_depth + FREE_DEPTH) as f64;
    (1.0 - depth.powf(std::f64::consts::E)) / DEPTH_DIVISOR
}

pub fn type_score(extension: &str) -> f64 {
    match extension {
        "bin" => -1.0,
        "txt" | "docx" | "pdf" => 1.0,
        _ => 0.0,
    }
}

fn days_between(earlier: DateTime<Local>, later: DateTime<Local>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / Duration::days(1).num_milliseconds() as f64
}

pub fn recency_score(modified: Option<DateTime<Local>>, now: DateTime<Local>) -> f64 {
    let Some(modified) = modified else {
        return 0.0;
    };
    let days = days_between(modified, now);
    // Same-instant and future writes would blow up the reciprocal.
    let days = if days <= 0.0 { 1.0 } else { days };
    (1.0 / days).min(1.0)
}

pub fn write_gap_score(
    modified: Option<DateTime<Local>>,
    created: Option<DateTime<Local>>,
    extension: &str,
    now: DateTime<Local>,
) -> f64 {
    let (Some(modified), Some(created)) = (modified, created) else {
        return 0.0;
    };
    let gap = modified - created;
    let created_age = now - created;
    if gap < Duration::days(1) && created_age > Duration::days(3) && extension != "pdf" {
        -1.0
    } else {
        0.0
    }
}

pub fn name_score(name: &str) -> f64 {
    let mut score = if name.contains(' ') { -1.0 } else { 1.0 };
    let prefix: String = name.chars().take(10).collect();
    if ISO_DATE.is_match(&prefix) {
        score += 1.0;
    }
    score
}

pub fn sibling_score(siblings: usize) -> f64 {
    let n = siblings as f64;
    if siblings < 5 {
        ((n - 5.0) / 4.0).max(-1.0)
    } else if siblings <= 25 {
        0.0
    } else {
        (-((n - 25.0) / 100.0).powi(2)).max(-1.0)
    }
}

pub fn lookup_score(lookup_count: u32) -> f64 {
    f64::from(lookup_count.min(LOOKUP_CAP))
}
