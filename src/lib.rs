pub mod batch;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod matching;
pub mod models;
pub mod nullable;
pub mod ops;
pub mod path;
pub mod progress;
pub mod transcode;
pub mod validator;

pub use batch::{run_batch, BatchOperation, BatchReport, BatchState, RowOutcome};
pub use config::AppConfig;
pub use db::DbManager;
pub use engine::{Engine, OperationHandle};
pub use error::{EngineError, ErrorKind, Result};
pub use progress::{LogReporter, OperationContext, ProgressReporter};

/// Entry point of the `deckfix` binary.
pub fn run() -> anyhow::Result<()> {
    cli::run()
}
