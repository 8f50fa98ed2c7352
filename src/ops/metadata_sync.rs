use super::{pair_tracks, TrackPair, TrackSource};
use crate::batch::{BatchOperation, RowOutcome};
use crate::db::DbManager;
use crate::error::{EngineError, Result};
use crate::nullable::{NullInt64, NullString};
use crate::progress::OperationContext;
use crate::validator::FieldRule;
use rusqlite::types::ToSqlOutput;
use rusqlite::{params, params_from_iter, ToSql};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataField {
    StockDate,
    DateCreated,
    ReleaseDate,
    AlbumID,
    ArtistID,
    OrgArtistID,
    Subtitle,
    ColorID,
    DJPlayCount,
}

impl MetadataField {
    pub const ALL: [MetadataField; 9] = [
        MetadataField::StockDate,
        MetadataField::DateCreated,
        MetadataField::ReleaseDate,
        MetadataField::AlbumID,
        MetadataField::ArtistID,
        MetadataField::OrgArtistID,
        MetadataField::Subtitle,
        MetadataField::ColorID,
        MetadataField::DJPlayCount,
    ];

    pub fn column(self) -> &'static str {
        match self {
            MetadataField::StockDate => "StockDate",
            MetadataField::DateCreated => "DateCreated",
            MetadataField::ReleaseDate => "ReleaseDate",
            MetadataField::AlbumID => "AlbumID",
            MetadataField::ArtistID => "ArtistID",
            MetadataField::OrgArtistID => "OrgArtistID",
            MetadataField::Subtitle => "Subtitle",
            MetadataField::ColorID => "ColorID",
            MetadataField::DJPlayCount => "DJPlayCount",
        }
    }

    fn is_counter(self) -> bool {
        self == MetadataField::DJPlayCount
    }
}

fn default_fields() -> Vec<MetadataField> {
    MetadataField::ALL.to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSyncConfig {
    pub source: TrackSource,
    pub target: TrackSource,
    #[serde(default = "default_fields")]
    pub fields: Vec<MetadataField>,
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Text(NullString),
    Counter(NullInt64),
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            FieldValue::Text(v) => v.to_sql(),
            FieldValue::Counter(v) => v.to_sql(),
        }
    }
}

/// Copies selected metadata columns from each source track to its
/// counterpart (typically an older format of the same song to the new one).
pub struct MetadataSync {
    config: MetadataSyncConfig,
}

impl MetadataSync {
    pub fn new(config: MetadataSyncConfig) -> Self {
        Self { config }
    }

    fn columns(&self) -> Vec<&'static str> {
        self.config.fields.iter().map(|f| f.column()).collect()
    }

    fn read_values(&self, db: &DbManager, track_id: &str) -> Result<Option<Vec<FieldValue>>> {
        let fields = &self.config.fields;
        db.query_row(
            &format!("SELECT {} FROM djmdContent WHERE ID = ?1", self.columns().join(", ")),
            params![track_id],
            |row| {
                fields
                    .iter()
                    .enumerate()
                    .map(|(i, field)| {
                        Ok::<_, rusqlite::Error>(if field.is_counter() {
                            FieldValue::Counter(row.get(i)?)
                        } else {
                            FieldValue::Text(row.get(i)?)
                        })
                    })
                    .collect()
            },
        )
    }
}

impl BatchOperation for MetadataSync {
    type Item = TrackPair;

    fn name(&self) -> &str {
        "Metadata sync"
    }

    fn field_rules(&self) -> Vec<FieldRule<'_>> {
        vec![
            self.config.source.field_rule("source"),
            self.config.target.field_rule("target"),
        ]
    }

    fn validate_inputs(&self) -> Result<()> {
        if self.config.fields.is_empty() {
            return Err(EngineError::validation("fields", "select at least one field"));
        }
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
        let Some(source_values) = self.read_values(db, &pair.source.id)? else {
            return Ok(RowOutcome::Skipped);
        };
        if self.read_values(db, &target.id)?.as_ref() == Some(&source_values) {
            return Ok(RowOutcome::Skipped);
        }

        let assignments: Vec<String> = self
            .columns()
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{column} = ?{}", i + 1))
            .collect();
        let sql = format!(
            "UPDATE djmdContent SET {} WHERE ID = ?{}",
            assignments.join(", "),
            assignments.len() + 1
        );
        let mut values: Vec<&dyn ToSql> = source_values.iter().map(|v| v as &dyn ToSql).collect();
        values.push(&target.id);
        let rows = db.execute(&sql, params_from_iter(values))?;
        Ok(RowOutcome::Applied(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::run_batch;
    use crate::testutil::{Library, RecordingReporter};
    use std::sync::Arc;

    fn config(fields: Vec<MetadataField>) -> MetadataSyncConfig {
        MetadataSyncConfig {
            source: TrackSource::Folder("/Music/Old".into()),
            target: TrackSource::Folder("/Music/New".into()),
            fields,
        }
    }

    fn run(lib: &Library, config: MetadataSyncConfig) -> crate::batch::BatchReport {
        let mut db = lib.manager();
        let ctx = OperationContext::new(Arc::new(RecordingReporter::default()));
        run_batch(&mut MetadataSync::new(config), &mut db, &ctx).unwrap()
    }

    fn field(lib: &Library, id: &str, column: &str) -> Option<String> {
        let conn = rusqlite::Connection::open(&lib.db_path).unwrap();
        conn.query_row(
            &format!("SELECT CAST({column} AS TEXT) FROM djmdContent WHERE ID = ?1"),
            [id],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn copies_all_fields_including_nulls() {
        let lib = Library::new();
        lib.add_track("1", "/Music/Old", "Song A.mp3", Some("2019-01-01"));
        lib.add_track("2", "/Music/New", "Song A.flac", None);
        lib.set_field("1", "ArtistID", "77");
        lib.set_field("1", "DJPlayCount", "12");
        lib.set_field("2", "Subtitle", "stale");

        let report = run(&lib, config(MetadataField::ALL.to_vec()));
        assert_eq!(report.changed, 1);
        assert_eq!(field(&lib, "2", "ReleaseDate").as_deref(), Some("2019-01-01"));
        assert_eq!(field(&lib, "2", "ArtistID").as_deref(), Some("77"));
        assert_eq!(field(&lib, "2", "DJPlayCount").as_deref(), Some("12"));
        assert_eq!(field(&lib, "2", "Subtitle"), None);
        // source untouched
        assert_eq!(field(&lib, "1", "ArtistID").as_deref(), Some("77"));
    }

    #[test]
    fn only_selected_fields_are_written() {
        let lib = Library::new();
        lib.add_track("1", "/Music/Old", "Song A.mp3", Some("2019-01-01"));
        lib.add_track("2", "/Music/New", "Song A.flac", None);
        lib.set_field("1", "ColorID", "3");
        lib.set_field("2", "Subtitle", "keep me");

        run(&lib, config(vec![MetadataField::ColorID]));
        assert_eq!(field(&lib, "2", "ColorID").as_deref(), Some("3"));
        assert_eq!(field(&lib, "2", "Subtitle").as_deref(), Some("keep me"));
        assert_eq!(field(&lib, "2", "ReleaseDate"), None);
    }

    #[test]
    fn identical_values_are_skipped() {
        let lib = Library::new();
        lib.add_track("1", "/Music/Old", "Song A.mp3", None);
        lib.add_track("2", "/Music/New", "Song A.flac", None);
        lib.add_track("3", "/Music/Old", "Orphan.mp3", None);
        let report = run(&lib, config(MetadataField::ALL.to_vec()));
        assert_eq!(report.skipped, 1);
        assert_eq!(report.unmatched, vec!["Orphan.mp3".to_string()]);
        assert_eq!(report.changed, 0);
    }

    #[test]
    fn empty_field_list_is_rejected() {
        let lib = Library::new();
        let mut db = lib.manager();
        let ctx = OperationContext::new(Arc::new(RecordingReporter::default()));
        let result = run_batch(&mut MetadataSync::new(config(Vec::new())), &mut db, &ctx);
        assert!(matches!(result, Err(EngineError::Validation { .. })));
    }

    #[test]
    fn config_defaults_to_every_field() {
        let json = r#"{"source":{"kind":"folder","value":"/a"},"target":{"kind":"playlist","value":"9"}}"#;
        let config: MetadataSyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.fields.len(), MetadataField::ALL.len());
        assert_eq!(config.target, TrackSource::Playlist("9".into()));
    }
}
