use super::{pair_tracks, TrackPair, TrackSource};
use crate::batch::{BatchOperation, RowOutcome};
use crate::db::DbManager;
use crate::error::{EngineError, Result};
use crate::models::CueRow;
use crate::progress::OperationContext;
use crate::validator::FieldRule;
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotCueSyncConfig {
    pub source: TrackSource,
    pub target: TrackSource,
}

/// Copies hot cues from each source track onto its counterpart. A target cue
/// of the same Kind is replaced, so a track never ends up with two cues of
/// one Kind.
pub struct HotCueSync {
    config: HotCueSyncConfig,
}

fn cue_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.3f +00:00").to_string()
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn next_cue_id(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(CAST(ID AS INTEGER)), 0) + 1 FROM djmdCue",
        [],
        |r| r.get(0),
    )
}

fn insert_cue(conn: &Connection, cue: &CueRow) -> rusqlite::Result<usize> {
    let columns: Vec<String> = cue.columns().map(quote_ident).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO djmdCue ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    conn.execute(&sql, params_from_iter(cue.0.values()))
}

impl HotCueSync {
    pub fn new(config: HotCueSyncConfig) -> Self {
        Self { config }
    }

    /// Source cue rewritten to belong to `target_id`: fresh ID, owner,
    /// timestamps and UUIDs, everything else as on the source.
    fn retarget(cue: &CueRow, id: i64, target_id: &str, target_uuid: Option<&str>, now: &str) -> CueRow {
        let mut cue = cue.clone();
        cue.set("ID", Value::Text(id.to_string()));
        cue.set("ContentID", Value::Text(target_id.to_string()));
        for column in ["created_at", "updated_at"] {
            if cue.has_column(column) {
                cue.set(column, Value::Text(now.to_string()));
            }
        }
        if cue.has_column("UUID") {
            cue.set("UUID", Value::Text(Uuid::new_v4().to_string()));
        }
        if cue.has_column("ContentUUID") {
            let value = target_uuid.map_or(Value::Null, |u| Value::Text(u.to_string()));
            cue.set("ContentUUID", value);
        }
        cue
    }
}

impl BatchOperation for HotCueSync {
    type Item = TrackPair;

    fn name(&self) -> &str {
        "Hot cue sync"
    }

    fn field_rules(&self) -> Vec<FieldRule<'_>> {
        vec![
            self.config.source.field_rule("source"),
            self.config.target.field_rule("target"),
        ]
    }

    fn validate_inputs(&self) -> Result<()> {
        if self.config.source == self.config.target {
            return Err(EngineError::validation("target", "source and target are the same"));
        }
        Ok(())
    }

    fn enumerate(&mut self, db: &DbManager, _ctx: &OperationContext) -> Result<Vec<TrackPair>> {
        pair_tracks(db, &self.config.source, &self.config.target)
    }

    fn describe(&self, pair: &TrackPair) -> String {
        pair.source.file_name.clone()
    }

    fn apply(&mut self, db: &DbManager, pair: TrackPair, _ctx: &OperationContext) -> Result<RowOutcome> {
        let Some(target) = pair.target else {
            return Ok(RowOutcome::Unmatched(pair.source.file_name));
        };
        let cues = db.get_track_hot_cues(&pair.source.id)?;
        if cues.is_empty() {
            return Ok(RowOutcome::Skipped);
        }

        let target_uuid: Option<String> = if cues[0].has_column("ContentUUID") {
            db.query_row(
                "SELECT UUID FROM djmdContent WHERE ID = ?1",
                params![target.id],
                |r| r.get(0),
            )?
            .flatten()
        } else {
            None
        };
        let now = cue_timestamp();

        let copied = db.transaction(|conn| {
            let mut copied = 0;
            for cue in &cues {
                let Some(kind) = cue.kind() else {
                    log::warn!("Skipping cue without Kind on track {}", pair.source.id);
                    continue;
                };
                conn.execute(
                    "DELETE FROM djmdCue WHERE ContentID = ?1 AND CAST(Kind AS INTEGER) = ?2",
                    params![target.id, kind],
                )
                .map_err(|e| EngineError::database("removing existing cue", e))?;
                let id = next_cue_id(conn).map_err(|e| EngineError::database("allocating cue ID", e))?;
                let row = Self::retarget(cue, id, &target.id, target_uuid.as_deref(), &now);
                copied += insert_cue(conn, &row).map_err(|e| EngineError::database("inserting cue", e))?;
            }
            Ok(copied)
        })?;

        log::debug!(
            "Copied {} hot cues {} -> {}",
            copied,
            pair.source.file_name,
            target.file_name
        );
        Ok(RowOutcome::Applied(copied))
    }
}
