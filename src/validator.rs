//! Pre-flight checks run before any operation touches the library.
//!
//! The checklist is fixed: required fields first, then that a database is
//! configured and opens, then (for mutating operations) that a backup could be
//! written. The first failing check is returned and nothing is left behind:
//! the trial connection is always released.

use crate::db::DbManager;
use crate::error::{EngineError, Result};
use chrono::NaiveDate;
use std::path::Path;

/// Date format accepted for user-supplied dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Any non-empty text.
    Text,
    /// A folder path as stored in the database; it need not exist locally.
    Folder,
    /// A folder that must exist on this machine.
    ExistingFolder,
    /// A playlist ID.
    Playlist,
    /// A date in `YYYY-MM-DD` form.
    Date,
}

/// One required-field check. `required` is evaluated by the operation, which
/// is how "required only when custom mode is selected" is expressed.
#[derive(Debug, Clone)]
pub struct FieldRule<'a> {
    pub name: &'static str,
    pub kind: FieldKind,
    pub value: Option<&'a str>,
    pub required: bool,
}

impl<'a> FieldRule<'a> {
    pub fn required(name: &'static str, kind: FieldKind, value: Option<&'a str>) -> Self {
        Self { name, kind, value, required: true }
    }

    pub fn required_when(
        name: &'static str,
        kind: FieldKind,
        value: Option<&'a str>,
        condition: bool,
    ) -> Self {
        Self { name, kind, value, required: condition }
    }

    fn check(&self) -> Result<()> {
        let value = self.value.map(str::trim).filter(|v| !v.is_empty());
        let Some(value) = value else {
            if self.required {
                return Err(EngineError::validation(self.name, "is required"));
            }
            return Ok(());
        };
        match self.kind {
            FieldKind::Text | FieldKind::Folder | FieldKind::Playlist => Ok(()),
            FieldKind::ExistingFolder => {
                if Path::new(value).is_dir() {
                    Ok(())
                } else {
                    Err(EngineError::validation(
                        self.name,
                        format!("folder {value} does not exist"),
                    ))
                }
            }
            FieldKind::Date => parse_date(value).map(|_| ()).map_err(|e| match e {
                EngineError::Validation { message, .. } => EngineError::validation(self.name, message),
                other => other,
            }),
        }
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        EngineError::validation("date", format!("{value:?} is not a date (expected YYYY-MM-DD)"))
    })
}

/// Field checks only, no database access.
pub fn validate_fields(rules: &[FieldRule<'_>]) -> Result<()> {
    rules.iter().try_for_each(FieldRule::check)
}

/// Full checklist for `operation`. Leaves `db` disconnected whether it passes
/// or not.
pub fn validate(
    operation: &str,
    db: &mut DbManager,
    rules: &[FieldRule<'_>],
    mutates: bool,
) -> Result<()> {
    log::debug!("Validating {}", operation);
    validate_fields(rules)?;

    if db.database_path().is_none() {
        return Err(EngineError::NotConfigured);
    }
    // Connection check only: the guard finalizes immediately.
    drop(db.session()?);

    if mutates {
        db.check_backup_feasible()?;
    }
    log::debug!("{} passed validation", operation);
    Ok(())
}
