use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tokio::runtime::Handle;

use crate::actions::SystemActions;
use crate::config::{SessionConfig, CONFIG_FILE};
use crate::session::{self, SessionController, SessionOptions};
use crate::storage::Storage;
use crate::terminal::{TerminalInput, TerminalRenderer};

#[derive(Parser, Debug)]
#[command(author, version, about = "Ranked interactive file-name search", long_about = None)]
pub struct CliArgs {
    /// Initial query; the session then starts in select mode
    pub query: Option<String>,

    /// Directory to index and search (default: current directory)
    #[arg(short = 'r', long = "root")]
    pub root: Option<PathBuf>,

    /// Do not record opened items in the history
    #[arg(long = "incognito")]
    pub incognito: bool,

    /// Re-crawl at startup even if today's index exists
    #[arg(long = "rebuild")]
    pub rebuild: bool,

    /// Where the index, history and log live
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl CliArgs {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(crate::config::data_dir)
    }
}

/// Loads state, runs the interactive session and waits for pending opens.
pub async fn run_cli(args: CliArgs) -> anyhow::Result<()> {
    let data_dir = args.data_dir();
    let storage = Storage::open(&data_dir)
        .with_context(|| format!("cannot use data directory {}", data_dir.display()))?;
    let config = SessionConfig::load(&data_dir.join(CONFIG_FILE)).context("bad config file")?;
    let root = match args.root {
        Some(root) => root,
        None => std::env::current_dir().context("cannot read current directory")?,
    };

    let options = SessionOptions {
        root,
        initial_query: args.query.filter(|q| !q.is_empty()),
        incognito: args.incognito,
        force_crawl: args.rebuild,
        config,
    };
    let mut controller = SessionController::start(
        Handle::current(),
        storage,
        Arc::new(SystemActions),
        options,
        Instant::now(),
    )
    .context("failed to load search state")?;

    let mut renderer = TerminalRenderer::enter().context("failed to set up terminal")?;
    let outcome = session::run(&mut controller, &mut TerminalInput, &mut renderer).await;
    drop(renderer);
    outcome.context("terminal session failed")
}
