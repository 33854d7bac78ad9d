pub mod actions;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod indexer;
pub mod ranker;
pub mod searcher;
pub mod session;
pub mod storage;
pub mod terminal;
pub mod types;

pub use error::{Result, SearchError};
