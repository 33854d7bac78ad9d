//! Command-mode parsing: `<CommandName> [<key>=<value> ...]`.

use std::path::PathBuf;

use crate::error::{Result, SearchError};

/// Names offered by Tab completion, in completion order.
pub const COMMAND_NAMES: [&str; 2] = ["RebuildIndex", "ToggleIncognito"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Restart the crawl, optionally against a new search root.
    RebuildIndex { root: Option<PathBuf> },
    ToggleIncognito,
}

/// Parses one submitted command line. Names match without regard to case.
/// Unknown arguments are logged and dropped.
pub fn parse(input: &str) -> Result<Command> {
    let mut words = input.split_whitespace();
    let name = words.next().unwrap_or("");
    let args: Vec<(&str, &str)> = words
        .filter_map(|word| match word.split_once('=') {
            Some(pair) => Some(pair),
            None => {
                tracing::warn!("ignoring malformed command argument {:?}", word);
                None
            }
        })
        .collect();

    let command = if name.eq_ignore_ascii_case("RebuildIndex") {
        let mut root = None;
        for (key, value) in args {
            if key.eq_ignore_ascii_case("root") {
                root = Some(PathBuf::from(value));
            } else {
                tracing::warn!("RebuildIndex: ignoring unknown argument {}", key);
            }
        }
        Command::RebuildIndex { root }
    } else if name.eq_ignore_ascii_case("ToggleIncognito") {
        for (key, _) in args {
            tracing::warn!("ToggleIncognito: ignoring unknown argument {}", key);
        }
        Command::ToggleIncognito
    } else {
        return Err(SearchError::UnknownCommand(name.to_string()));
    };
    Ok(command)
}

/// Completes the command name at the start of `buffer`. Returns `None` when
/// nothing matches or the buffer already has arguments.
pub fn complete(buffer: &str) -> Option<&'static str> {
    if buffer.contains(char::is_whitespace) {
        return None;
    }
    let prefix = buffer.to_lowercase();
    COMMAND_NAMES
        .iter()
        .find(|name| name.to_lowercase().starts_with(&prefix))
        .copied()
}
