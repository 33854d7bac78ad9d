use std::io;
use std::path::Path;

/// Side effects the session triggers outside the process.
pub trait Actions: Send + Sync {
    /// Opens `path` with the OS handler, or its parent folder when `parent`
    /// is set.
    fn open(&self, path: &Path, parent: bool) -> io::Result<()>;

    fn copy_to_clipboard(&self, text: &str) -> io::Result<()>;
}

/// The real desktop: `open` for files and folders, `arboard` for the clipboard.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemActions;

impl Actions for SystemActions {
    fn open(&self, path: &Path, parent: bool) -> io::Result<()> {
        let target = if parent {
            path.parent().unwrap_or(path)
        } else {
            path
        };
        tracing::info!("opening {}", target.display());
        open::that(target)
    }

    fn copy_to_clipboard(&self, text: &str) -> io::Result<()> {
        let mut clipboard = arboard::Clipboard::new().map_err(io::Error::other)?;
        clipboard.set_text(text).map_err(io::Error::other)
    }
}
