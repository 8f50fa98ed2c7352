//! The bulk operations. Each one is a [`BatchOperation`](crate::batch::BatchOperation)
//! plus a serde config struct describing its inputs.

pub mod convert;
pub mod date_sync;
pub mod flac_fixer;
pub mod hot_cue_sync;
pub mod metadata_sync;
pub mod tracks_updater;

pub use convert::{Convert, ConvertConfig};
pub use date_sync::{DateSync, DateSyncConfig, DateSyncMode};
pub use flac_fixer::{FlacFixer, FlacFixerConfig};
pub use hot_cue_sync::{HotCueSync, HotCueSyncConfig};
pub use metadata_sync::{MetadataField, MetadataSync, MetadataSyncConfig};
pub use tracks_updater::{TracksUpdater, TracksUpdaterConfig};

use crate::db::DbManager;
use crate::error::Result;
use crate::matching::TrackIndex;
use crate::models::TrackItem;
use crate::validator::{FieldKind, FieldRule};
use serde::{Deserialize, Serialize};

/// Where a set of tracks comes from: every track under a folder prefix, or the
/// members of a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TrackSource {
    Folder(String),
    Playlist(String),
}

impl TrackSource {
    pub fn load(&self, db: &DbManager) -> Result<Vec<TrackItem>> {
        match self {
            TrackSource::Folder(folder) => db.get_tracks_based_on_folder(folder),
            TrackSource::Playlist(id) => db.get_tracks_based_on_playlist(id),
        }
    }

    pub(crate) fn field_rule(&self, name: &'static str) -> FieldRule<'_> {
        match self {
            TrackSource::Folder(folder) => FieldRule::required(name, FieldKind::Folder, Some(folder)),
            TrackSource::Playlist(id) => FieldRule::required(name, FieldKind::Playlist, Some(id)),
        }
    }
}

/// A source track paired with its counterpart, if one was found.
#[derive(Debug, Clone)]
pub struct TrackPair {
    pub source: TrackItem,
    pub target: Option<TrackItem>,
}

/// Pair every source track with the best same-base-name target track.
pub(crate) fn pair_tracks(db: &DbManager, source: &TrackSource, target: &TrackSource) -> Result<Vec<TrackPair>> {
    let sources = source.load(db)?;
    let targets = TrackIndex::new(target.load(db)?);
    log::debug!("Pairing {} source tracks against {} targets", sources.len(), targets.len());
    Ok(sources
        .into_iter()
        .map(|source| {
            let target = targets.find(&source).cloned();
            TrackPair { source, target }
        })
        .collect())
}
