use crate::batch::{BatchOperation, RowOutcome};
use crate::db::DbManager;
use crate::error::{EngineError, Result};
use crate::matching::FolderIndex;
use crate::models::TrackItem;
use crate::progress::OperationContext;
use crate::validator::{FieldKind, FieldRule};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracksUpdaterConfig {
    /// Playlist holding the tracks to be replaced.
    pub playlist_id: Option<String>,
    /// Folder holding the new files.
    pub new_folder: Option<String>,
}

/// Repoints playlist tracks at same-named files in another folder, updating
/// location and format code in one statement per track.
pub struct TracksUpdater {
    config: TracksUpdaterConfig,
    index: Option<FolderIndex>,
}

impl TracksUpdater {
    pub fn new(config: TracksUpdaterConfig) -> Self {
        Self { config, index: None }
    }
}

impl BatchOperation for TracksUpdater {
    type Item = TrackItem;

    fn name(&self) -> &str {
        "Tracks updater"
    }

    fn field_rules(&self) -> Vec<FieldRule<'_>> {
        vec![
            FieldRule::required("playlist", FieldKind::Playlist, self.config.playlist_id.as_deref()),
            FieldRule::required("new_folder", FieldKind::ExistingFolder, self.config.new_folder.as_deref()),
        ]
    }

    fn require_candidates(&self) -> bool {
        true
    }

    fn enumerate(&mut self, db: &DbManager, _ctx: &OperationContext) -> Result<Vec<TrackItem>> {
        let (Some(playlist), Some(folder)) = (&self.config.playlist_id, &self.config.new_folder) else {
            return Err(EngineError::validation("playlist", "is required"));
        };
        let index = FolderIndex::scan(Path::new(folder.trim()))?;
        log::info!("{} candidate files in {}", index.len(), index.folder());
        self.index = Some(index);
        db.get_tracks_based_on_playlist(playlist.trim())
    }

    fn describe(&self, track: &TrackItem) -> String {
        track.file_name.clone()
    }

    fn apply(&mut self, db: &DbManager, track: TrackItem, _ctx: &OperationContext) -> Result<RowOutcome> {
        let index = self.index.as_ref().ok_or(EngineError::NotConnected)?;
        let Some(found) = index.find(track.base_name()) else {
            return Ok(RowOutcome::Unmatched(track.file_name));
        };
        if track.folder_path == index.folder()
            && track.file_name == found.file_name
            && track.file_type == found.file_type.code()
        {
            return Ok(RowOutcome::Skipped);
        }

        let rows = db.execute(
            "UPDATE djmdContent SET FolderPath = ?1, FileNameL = ?2, FileType = ?3 WHERE ID = ?4",
            params![index.folder(), found.file_name, found.file_type.code(), track.id],
        )?;
        log::debug!(
            "{} -> {}/{}",
            track.file_name,
            index.folder(),
            found.file_name
        );
        Ok(RowOutcome::Applied(rows))
    }
}
