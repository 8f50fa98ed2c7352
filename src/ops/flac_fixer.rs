use crate::batch::{BatchOperation, RowOutcome};
use crate::db::{folder_clause, folder_filter, row_to_track, DbManager};
use crate::error::Result;
use crate::models::TrackItem;
use crate::path::FileType;
use crate::progress::OperationContext;
use crate::validator::{FieldKind, FieldRule};
use rusqlite::{params, params_from_iter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlacFixerConfig {
    /// Limit the repair to tracks under this folder.
    pub folder: Option<String>,
}

/// Sets FileType to the FLAC code on tracks whose file name says `.flac` but
/// whose stored type says otherwise.
pub struct FlacFixer {
    config: FlacFixerConfig,
}

impl FlacFixer {
    pub fn new(config: FlacFixerConfig) -> Self {
        Self { config }
    }

    fn folder(&self) -> Option<&str> {
        self.config
            .folder
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }
}

impl BatchOperation for FlacFixer {
    type Item = TrackItem;

    fn name(&self) -> &str {
        "FLAC fixer"
    }

    fn field_rules(&self) -> Vec<FieldRule<'_>> {
        vec![FieldRule::required_when(
            "folder",
            FieldKind::Folder,
            self.config.folder.as_deref(),
            false,
        )]
    }

    fn enumerate(&mut self, db: &DbManager, _ctx: &OperationContext) -> Result<Vec<TrackItem>> {
        let mut sql = String::from(
            "SELECT c.ID, c.FolderPath, c.FileNameL, c.FileType, c.Title FROM djmdContent c
             WHERE lower(c.FileNameL) LIKE '%.flac'
               AND (c.FileType IS NULL OR CAST(c.FileType AS INTEGER) <> ?1)",
        );
        let mut args: Vec<rusqlite::types::Value> = vec![FileType::Flac.code().into()];
        if let Some(folder) = self.folder() {
            sql.push_str(&format!(" AND {}", folder_clause("c.FolderPath", 2)));
            args.extend(folder_filter(folder).map(rusqlite::types::Value::from));
        }
        sql.push_str(" ORDER BY c.FolderPath, c.FileNameL");
        db.query(&sql, params_from_iter(args), row_to_track)
    }

    fn describe(&self, track: &TrackItem) -> String {
        track.file_name.clone()
    }

    fn apply(&mut self, db: &DbManager, track: TrackItem, _ctx: &OperationContext) -> Result<RowOutcome> {
        let rows = db.execute(
            "UPDATE djmdContent SET FileType = ?1 WHERE ID = ?2",
            params![track.expected_file_type().code(), track.id],
        )?;
        Ok(RowOutcome::Applied(rows))
    }
}
