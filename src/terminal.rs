//! Keyboard input and a plain full-screen renderer on top of crossterm.

use std::io::{self, Stdout, Write};
use std::time::Duration;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyEvent, KeyEventKind};
use crossterm::style::Print;
use crossterm::terminal::{
    self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, queue};

use crate::session::{Mode, SessionView};

/// Source of key presses. Must never block.
pub trait InputSource {
    fn poll_key(&mut self) -> io::Result<Option<KeyEvent>>;
}

/// Draws the session after every tick.
pub trait Renderer {
    fn draw(&mut self, view: &SessionView<'_>) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct TerminalInput;

impl InputSource for TerminalInput {
    fn poll_key(&mut self) -> io::Result<Option<KeyEvent>> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Release {
                    return Ok(Some(key));
                }
            }
        }
        Ok(None)
    }
}

/// Owns raw mode and the alternate screen until dropped.
pub struct TerminalRenderer {
    out: Stdout,
}

impl TerminalRenderer {
    pub fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut out = io::stdout();
        execute!(out, EnterAlternateScreen, Hide)?;
        Ok(Self { out })
    }
}

impl Drop for TerminalRenderer {
    fn drop(&mut self) {
        let _ = execute!(self.out, Show, LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

fn flags(view: &SessionView<'_>) -> String {
    let mut flags = Vec::new();
    if view.query.use_regex {
        flags.push(if view.regex_invalid { "regex!" } else { "regex" });
    }
    if view.query.directory_only {
        flags.push("dirs");
    }
    if view.query.unbounded {
        flags.push("all");
    }
    if view.incognito {
        flags.push("incognito");
    }
    if view.indexing {
        flags.push("indexing");
    }
    flags.join(" ")
}

impl Renderer for TerminalRenderer {
    fn draw(&mut self, view: &SessionView<'_>) -> io::Result<()> {
        let (width, _) = terminal::size().unwrap_or((80, 24));
        let width = usize::from(width);
        let clip = |s: String| s.chars().take(width).collect::<String>();

        queue!(self.out, MoveTo(0, 0), Clear(ClearType::All))?;
        let header = format!(
            "[{}] {} ({} results) {} {}",
            view.mode,
            view.root.display(),
            view.total,
            flags(view),
            view.status.unwrap_or("")
        );
        queue!(self.out, Print(clip(header)))?;

        let prompt = match view.mode {
            Mode::Command => format!(":{}", view.command_buffer),
            _ => format!("> {}", view.query.content),
        };
        queue!(self.out, MoveTo(0, 1), Print(clip(prompt)))?;

        for (i, item) in view.rows.iter().enumerate() {
            let marker = if i == view.cursor_row { "> " } else { "  " };
            let line = format!("{}{}", marker, view.label(item));
            queue!(self.out, MoveTo(0, (i + 2) as u16), Print(clip(line)))?;
        }

        match view.mode {
            Mode::Insert => {
                queue!(self.out, MoveTo((view.query.cursor + 2) as u16, 1), Show)?;
            }
            Mode::Command => {
                let col = view.command_buffer.chars().count() + 1;
                queue!(self.out, MoveTo(col as u16, 1), Show)?;
            }
            _ => queue!(self.out, Hide)?,
        }
        self.out.flush()
    }
}
