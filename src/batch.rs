//! The control flow shared by every bulk operation:
//! validate → back up → connect → enumerate → process each row → finalize.

use crate::db::DbManager;
use crate::error::{EngineError, Result};
use crate::progress::OperationContext;
use crate::validator::{self, FieldRule};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Number of unmatched names listed before "... and N more".
const WARNING_LIST_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchState {
    Idle,
    Validating,
    BackingUp,
    Connected,
    Enumerating,
    Processing,
    Completed,
    Cancelled,
    Failed,
}

/// Result of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// Mutation applied; number of database rows it changed.
    Applied(usize),
    /// No counterpart found. Reported, never fatal.
    Unmatched(String),
    /// Nothing to do for this row.
    Skipped,
    /// The row observed cancellation part-way and undid its own work.
    Interrupted,
}

pub trait BatchOperation: Send {
    type Item: Send;

    fn name(&self) -> &str;

    /// Mutating operations get a backup before they connect.
    fn mutates(&self) -> bool {
        true
    }

    fn field_rules(&self) -> Vec<FieldRule<'_>>;

    /// Checks that do not fit a [`FieldRule`], run right after them.
    fn validate_inputs(&self) -> Result<()> {
        Ok(())
    }

    /// An empty candidate set is an error instead of a status message.
    fn require_candidates(&self) -> bool {
        false
    }

    fn enumerate(&mut self, db: &DbManager, ctx: &OperationContext) -> Result<Vec<Self::Item>>;

    /// Label used in progress text and error context.
    fn describe(&self, item: &Self::Item) -> String;

    fn apply(&mut self, db: &DbManager, item: Self::Item, ctx: &OperationContext) -> Result<RowOutcome>;
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub operation: String,
    pub state: BatchState,
    pub processed: usize,
    pub total: usize,
    pub changed: usize,
    pub skipped: usize,
    pub unmatched: Vec<String>,
    pub backup: Option<PathBuf>,
}

impl BatchReport {
    fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            state: BatchState::Idle,
            processed: 0,
            total: 0,
            changed: 0,
            skipped: 0,
            unmatched: Vec::new(),
            backup: None,
        }
    }

    fn enter(&mut self, state: BatchState) {
        log::info!("{}: {:?} -> {:?}", self.operation, self.state, state);
        self.state = state;
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == BatchState::Cancelled
    }

    pub fn summary_text(&self) -> String {
        let mut text = match self.state {
            BatchState::Cancelled => format!(
                "{} cancelled after {}/{} rows",
                self.operation, self.processed, self.total
            ),
            _ if self.total == 0 => format!("{}: nothing to do", self.operation),
            _ => format!(
                "{} completed: {}/{} rows processed",
                self.operation, self.processed, self.total
            ),
        };
        text.push_str(&format!(", {} changed", self.changed));
        if self.skipped > 0 {
            text.push_str(&format!(", {} skipped", self.skipped));
        }
        if !self.unmatched.is_empty() {
            text.push_str(&format!(", {} without a match", self.unmatched.len()));
        }
        text
    }

    /// Capped list of unmatched names, or `None` when everything matched.
    pub fn warning_text(&self) -> Option<String> {
        format_warning_list(&self.unmatched)
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary_text())?;
        if let Some(warning) = self.warning_text() {
            write!(f, "\n{warning}")?;
        }
        Ok(())
    }
}

pub fn format_warning_list(names: &[String]) -> Option<String> {
    if names.is_empty() {
        return None;
    }
    let mut lines = vec![format!("No match found for {} item(s):", names.len())];
    lines.extend(names.iter().take(WARNING_LIST_LIMIT).map(|n| format!("  {n}")));
    if names.len() > WARNING_LIST_LIMIT {
        lines.push(format!("  ... and {} more", names.len() - WARNING_LIST_LIMIT));
    }
    Some(lines.join("\n"))
}

/// Run `op` to a terminal state and tell the reporter how it ended.
///
/// The connection opened for the run is released on every path, including
/// unwinding out of `op`.
pub fn run_batch<O: BatchOperation>(
    op: &mut O,
    db: &mut DbManager,
    ctx: &OperationContext,
) -> Result<BatchReport> {
    let result = drive(op, db, ctx);
    match &result {
        Ok(report) => {
            log::info!("{}", report.summary_text());
            ctx.reporter.on_complete(&report.to_string());
        }
        Err(e) => {
            log::error!("{} failed: {}", op.name(), error_chain(e));
            ctx.reporter.on_error(e);
        }
    }
    result
}

fn error_chain(e: &EngineError) -> String {
    let mut text = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        text.push_str(&format!(" | caused by: {inner}"));
        source = std::error::Error::source(inner);
    }
    text
}

fn drive<O: BatchOperation>(
    op: &mut O,
    db: &mut DbManager,
    ctx: &OperationContext,
) -> Result<BatchReport> {
    let name = op.name().to_string();
    let mut report = BatchReport::new(&name);

    report.enter(BatchState::Validating);
    op.validate_inputs()?;
    validator::validate(&name, db, &op.field_rules(), op.mutates())?;

    if op.mutates() {
        report.enter(BatchState::BackingUp);
        report.backup = Some(db.backup_database()?);
    }

    let session = db.session()?;
    report.enter(BatchState::Connected);

    report.enter(BatchState::Enumerating);
    let items = op.enumerate(&session, ctx)?;
    report.total = items.len();

    if items.is_empty() {
        if op.require_candidates() {
            return Err(EngineError::NothingToProcess { operation: name });
        }
        ctx.report(1.0, "Nothing to process");
        report.enter(BatchState::Completed);
        return Ok(report);
    }

    report.enter(BatchState::Processing);
    let total = report.total;
    for (index, item) in items.into_iter().enumerate() {
        if ctx.is_cancelled() {
            report.enter(BatchState::Cancelled);
            return Ok(report);
        }

        let label = op.describe(&item);
        match op.apply(&session, item, ctx) {
            Ok(RowOutcome::Applied(rows)) => {
                log::debug!("{}: {} ({} rows)", name, label, rows);
                report.changed += rows;
                ctx.throttle();
            }
            Ok(RowOutcome::Unmatched(missing)) => {
                log::debug!("{}: no match for {}", name, missing);
                report.unmatched.push(missing);
            }
            Ok(RowOutcome::Skipped) => report.skipped += 1,
            Ok(RowOutcome::Interrupted) => {
                report.enter(BatchState::Cancelled);
                return Ok(report);
            }
            Err(e) => {
                report.enter(BatchState::Failed);
                return Err(EngineError::RowFailed {
                    operation: name,
                    row: label,
                    processed: report.processed,
                    total,
                    source: Box::new(e),
                });
            }
        }

        report.processed = index + 1;
        ctx.report(
            report.processed as f64 / total as f64,
            &format!("{} ({}/{})", label, report.processed, total),
        );
    }

    report.enter(BatchState::Completed);
    Ok(report)
}
