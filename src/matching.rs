//! Correlating "the same song" across folders, playlists and formats.
//!
//! Two entries match when their file names are identical after stripping the
//! last extension (case-sensitive). When several candidates share a base name
//! the winner is picked by [`FileType::PRIORITY`], then by the smallest file
//! name, so the result never depends on directory enumeration order.

use crate::error::{EngineError, Result};
use crate::models::TrackItem;
use crate::path::{absolute_path, base_name, path_to_db, FileType};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Pick the preferred candidate among entries sharing a base name.
pub fn best_candidate<'a, T>(
    candidates: impl IntoIterator<Item = &'a T>,
    file_name: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    candidates.into_iter().min_by(|a, b| {
        let (a, b) = (file_name(a), file_name(b));
        FileType::from_file_name(a)
            .rank()
            .cmp(&FileType::from_file_name(b).rank())
            .then_with(|| a.cmp(b))
    })
}

/// Tracks from a database query, keyed by base name.
#[derive(Debug, Default)]
pub struct TrackIndex {
    by_base: HashMap<String, Vec<TrackItem>>,
}

impl TrackIndex {
    pub fn new(tracks: impl IntoIterator<Item = TrackItem>) -> Self {
        let mut by_base: HashMap<String, Vec<TrackItem>> = HashMap::new();
        for track in tracks {
            by_base
                .entry(track.base_name().to_string())
                .or_default()
                .push(track);
        }
        Self { by_base }
    }

    /// Counterpart of `source`: same base name, never the source row itself.
    pub fn find(&self, source: &TrackItem) -> Option<&TrackItem> {
        let candidates = self.by_base.get(source.base_name())?;
        best_candidate(
            candidates.iter().filter(|t| t.id != source.id),
            |t: &TrackItem| t.file_name.as_str(),
        )
    }

    pub fn len(&self) -> usize {
        self.by_base.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_base.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderEntry {
    pub file_name: String,
    pub file_type: FileType,
    pub path: PathBuf,
}

/// Audio files directly inside one folder, keyed by base name.
#[derive(Debug)]
pub struct FolderIndex {
    folder: String,
    by_base: HashMap<String, Vec<FolderEntry>>,
}

impl FolderIndex {
    /// Scans `folder` (not recursively). Files whose extension has no
    /// FileType code are ignored.
    pub fn scan(folder: &Path) -> Result<Self> {
        let folder = &absolute_path(folder)
            .map_err(|e| EngineError::io(format!("resolving {}", folder.display()), e))?;
        if !folder.is_dir() {
            return Err(EngineError::io(
                format!("scanning {}", folder.display()),
                io::Error::new(io::ErrorKind::NotFound, "not a directory"),
            ));
        }

        let mut by_base: HashMap<String, Vec<FolderEntry>> = HashMap::new();
        for entry in WalkDir::new(folder)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry in {}: {}", folder.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str() else {
                log::warn!("Skipping non UTF-8 file name {:?}", entry.file_name());
                continue;
            };
            let file_type = FileType::from_file_name(file_name);
            if !file_type.is_known() {
                continue;
            }
            by_base
                .entry(base_name(file_name).to_string())
                .or_default()
                .push(FolderEntry {
                    file_name: file_name.to_string(),
                    file_type,
                    path: entry.path().to_path_buf(),
                });
        }

        log::debug!(
            "Indexed {} audio files in {}",
            by_base.values().map(Vec::len).sum::<usize>(),
            folder.display()
        );
        Ok(Self {
            folder: path_to_db(folder),
            by_base,
        })
    }

    /// The scanned folder in database form.
    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn find(&self, base: &str) -> Option<&FolderEntry> {
        best_candidate(self.by_base.get(base)?, |e: &FolderEntry| e.file_name.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_base.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_base.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn track(id: &str, folder: &str, name: &str) -> TrackItem {
        TrackItem {
            id: id.into(),
            folder_path: folder.into(),
            file_name: name.into(),
            file_type: FileType::from_file_name(name).code(),
            title: None,
        }
    }

    fn folder_with(names: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in names {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        dir
    }

    #[test]
    fn single_flac_matches_mp3_source() {
        let dir = folder_with(&["Song A.flac", "Other.flac"]);
        let index = FolderIndex::scan(dir.path()).unwrap();
        let source = track("1", "/Music/A", "Song A.mp3");
        let found = index.find(source.base_name()).unwrap();
        assert_eq!(found.file_name, "Song A.flac");
        assert_eq!(found.file_type.code(), 5);
    }

    #[test]
    fn tie_break_prefers_flac_over_wav() {
        let dir = folder_with(&["Song A.wav", "Song A.flac", "Song A.mp3"]);
        let index = FolderIndex::scan(dir.path()).unwrap();
        assert_eq!(index.find("Song A").unwrap().file_name, "Song A.flac");
    }

    #[test]
    fn aiff_spellings_tie_break_by_name() {
        let dir = folder_with(&["Song.aiff", "Song.aif"]);
        let index = FolderIndex::scan(dir.path()).unwrap();
        assert_eq!(index.find("Song").unwrap().file_name, "Song.aif");
    }

    #[test]
    fn unknown_extensions_and_subfolders_are_ignored() {
        let dir = folder_with(&["Song A.txt", "Song A.ogg"]);
        fs::create_dir(dir.path().join("Song A.flac")).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("Song A.wav"), b"").unwrap();
        let index = FolderIndex::scan(dir.path()).unwrap();
        assert!(index.find("Song A").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn base_name_match_is_case_sensitive() {
        let dir = folder_with(&["song a.flac"]);
        let index = FolderIndex::scan(dir.path()).unwrap();
        assert!(index.find("Song A").is_none());
    }

    #[test]
    fn missing_folder_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let err = FolderIndex::scan(&dir.path().join("gone")).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }

    #[test]
    fn track_index_skips_source_row_and_applies_priority() {
        let index = TrackIndex::new(vec![
            track("1", "/Music/A", "Song A.mp3"),
            track("2", "/Music/B", "Song A.wav"),
            track("3", "/Music/C", "Song A.flac"),
            track("4", "/Music/C", "Song B.flac"),
        ]);
        assert_eq!(index.len(), 4);
        let source = track("1", "/Music/A", "Song A.mp3");
        assert_eq!(index.find(&source).unwrap().id, "3");
        let lonely = track("4", "/Music/C", "Song B.flac");
        assert!(index.find(&lonely).is_none());
    }
}
