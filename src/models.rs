use crate::path::{base_name, track_file_path, FileType};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrackItem {
    pub id: String,          // djmdContent.ID
    pub folder_path: String, // containing directory, database form
    pub file_name: String,   // FileNameL
    pub file_type: i64,
    pub title: Option<String>,
}

impl TrackItem {
    pub fn base_name(&self) -> &str {
        base_name(&self.file_name)
    }

    /// Type derived from the file name, which is what the stored code must match.
    pub fn expected_file_type(&self) -> FileType {
        FileType::from_file_name(&self.file_name)
    }

    pub fn disk_path(&self) -> PathBuf {
        track_file_path(&self.folder_path, &self.file_name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlaylistItem {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub path: String, // "Parent/Child", unique where names are not
    pub is_folder: bool,
    pub is_smart: bool,
}

/// One `djmdCue` row keyed by column name. Cue rows are copied verbatim apart
/// from identity and timestamp columns, so they are kept schema-agnostic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueRow(pub BTreeMap<String, Value>);

impl CueRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn set(&mut self, column: &str, value: Value) {
        self.0.insert(column.to_string(), value);
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn kind(&self) -> Option<i64> {
        match self.0.get("Kind")? {
            Value::Integer(k) => Some(*k),
            Value::Text(t) => t.trim().parse().ok(),
            Value::Real(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}
