use crate::batch::{BatchOperation, RowOutcome};
use crate::db::{folder_clause, folder_filter, DbManager};
use crate::error::{EngineError, Result};
use crate::progress::OperationContext;
use crate::validator::{parse_date, FieldKind, FieldRule, DATE_FORMAT};
use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};

/// Folder prefixes accepted by custom mode.
pub const MAX_CUSTOM_FOLDERS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateSyncMode {
    /// Added and created dates take each track's release date.
    #[default]
    Standard,
    /// Added and created dates take one given date.
    Custom,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateSyncConfig {
    pub mode: DateSyncMode,
    /// Standard mode: folders whose tracks are left alone.
    pub excluded_folders: Vec<String>,
    /// Custom mode: the date to apply, `YYYY-MM-DD`.
    pub custom_date: Option<String>,
    /// Custom mode: folders whose tracks get the date.
    pub custom_folders: Vec<String>,
}

/// The whole date sync is one UPDATE, so the batch has a single item carrying
/// the pre-computed row count.
#[derive(Debug)]
pub struct DatePlan {
    pub affected: usize,
}

fn non_empty(folders: &[String]) -> impl Iterator<Item = &str> {
    folders.iter().map(|f| f.trim()).filter(|f| !f.is_empty())
}

pub struct DateSync {
    config: DateSyncConfig,
}

impl DateSync {
    pub fn new(config: DateSyncConfig) -> Self {
        Self { config }
    }

    /// WHERE clause and its parameters; both statements share it.
    fn predicate(&self) -> Result<(String, Vec<String>)> {
        let mut params = Vec::new();
        let clause = match self.config.mode {
            DateSyncMode::Standard => {
                let mut clause = String::from("ReleaseDate IS NOT NULL AND ReleaseDate <> ''");
                for folder in non_empty(&self.config.excluded_folders) {
                    let first = params.len() + 1;
                    params.extend(folder_filter(folder));
                    // NULL FolderPath is outside every excluded folder.
                    clause.push_str(&format!(
                        " AND NOT {}",
                        folder_clause("COALESCE(FolderPath, '')", first)
                    ));
                }
                clause
            }
            DateSyncMode::Custom => {
                let mut alternatives = Vec::new();
                for folder in non_empty(&self.config.custom_folders) {
                    let first = params.len() + 1;
                    params.extend(folder_filter(folder));
                    alternatives.push(folder_clause("FolderPath", first));
                }
                if alternatives.is_empty() {
                    return Err(EngineError::validation("custom_folders", "at least one folder is required"));
                }
                format!("({})", alternatives.join(" OR "))
            }
        };
        Ok((clause, params))
    }

    fn custom_date(&self) -> Result<String> {
        let raw = self
            .config
            .custom_date
            .as_deref()
            .ok_or_else(|| EngineError::validation("custom_date", "is required"))?;
        Ok(parse_date(raw)?.format(DATE_FORMAT).to_string())
    }
}

impl BatchOperation for DateSync {
    type Item = DatePlan;

    fn name(&self) -> &str {
        match self.config.mode {
            DateSyncMode::Standard => "Date sync",
            DateSyncMode::Custom => "Custom date sync",
        }
    }

    fn field_rules(&self) -> Vec<FieldRule<'_>> {
        let custom = self.config.mode == DateSyncMode::Custom;
        vec![
            FieldRule::required_when(
                "custom_date",
                FieldKind::Date,
                self.config.custom_date.as_deref(),
                custom,
            ),
            FieldRule::required_when(
                "custom_folders",
                FieldKind::Folder,
                self.config.custom_folders.first().map(String::as_str),
                custom,
            ),
        ]
    }

    fn validate_inputs(&self) -> Result<()> {
        if self.config.mode == DateSyncMode::Custom
            && non_empty(&self.config.custom_folders).count() > MAX_CUSTOM_FOLDERS
        {
            return Err(EngineError::validation(
                "custom_folders",
                format!("at most {MAX_CUSTOM_FOLDERS} folders can be given"),
            ));
        }
        self.predicate().map(|_| ())
    }

    fn enumerate(&mut self, db: &DbManager, ctx: &OperationContext) -> Result<Vec<DatePlan>> {
        let (clause, params) = self.predicate()?;
        let count: i64 = db
            .query_row(
                &format!("SELECT COUNT(*) FROM djmdContent WHERE {clause}"),
                params_from_iter(params.iter()),
                |r| r.get(0),
            )?
            .unwrap_or(0);
        let affected = usize::try_from(count).unwrap_or(0);

        let status = format!("{affected} records will be changed");
        log::info!("{}: {}", self.name(), status);
        ctx.report(0.0, &status);

        Ok(if affected == 0 { Vec::new() } else { vec![DatePlan { affected }] })
    }

    fn describe(&self, plan: &DatePlan) -> String {
        format!("{} records", plan.affected)
    }

    fn apply(&mut self, db: &DbManager, _plan: DatePlan, _ctx: &OperationContext) -> Result<RowOutcome> {
        let (clause, mut params) = self.predicate()?;
        let assignment = match self.config.mode {
            DateSyncMode::Standard => "StockDate = ReleaseDate, DateCreated = ReleaseDate".to_string(),
            DateSyncMode::Custom => {
                params.push(self.custom_date()?);
                let idx = params.len();
                format!("StockDate = ?{idx}, DateCreated = ?{idx}")
            }
        };
        let rows = db.execute(
            &format!("UPDATE djmdContent SET {assignment} WHERE {clause}"),
            params_from_iter(params.iter()),
        )?;
        Ok(RowOutcome::Applied(rows))
    }
}
