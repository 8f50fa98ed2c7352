#![allow(dead_code)]

use deckfix_lib::path::FileType;
use deckfix_lib::{DbManager, EngineError, ProgressReporter};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

const SCHEMA: &str = include_str!("../fixtures/schema.sql");

pub struct Library {
    pub dir: TempDir,
    pub db_path: PathBuf,
}

impl Library {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("master.db");
        Connection::open(&db_path).unwrap().execute_batch(SCHEMA).unwrap();
        Self { dir, db_path }
    }

    pub fn manager(&self) -> DbManager {
        DbManager::new(Some(self.db_path.clone()), self.backup_dir())
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    pub fn conn(&self) -> Connection {
        Connection::open(&self.db_path).unwrap()
    }

    pub fn add_track(&self, id: &str, folder: &str, file_name: &str, release_date: Option<&str>) {
        self.conn()
            .execute(
                "INSERT INTO djmdContent (ID, FolderPath, FileNameL, FileType, Title, ReleaseDate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    folder,
                    file_name,
                    FileType::from_file_name(file_name).code(),
                    file_name,
                    release_date
                ],
            )
            .unwrap();
    }

    pub fn add_playlist(&self, id: &str, name: &str) {
        self.conn()
            .execute(
                "INSERT INTO djmdPlaylist (ID, Seq, Name, Attribute, ParentID) VALUES (?1, 0, ?2, 0, 'root')",
                params![id, name],
            )
            .unwrap();
    }

    pub fn add_to_playlist(&self, playlist: &str, content: &str, track_no: i64) {
        self.conn()
            .execute(
                "INSERT INTO djmdSongPlaylist (ID, PlaylistID, ContentID, TrackNo) VALUES (?1, ?2, ?3, ?4)",
                params![format!("{playlist}-{content}"), playlist, content, track_no],
            )
            .unwrap();
    }

    pub fn add_cue(&self, id: &str, content: &str, kind: i64, in_msec: i64) {
        self.conn()
            .execute(
                "INSERT INTO djmdCue (ID, ContentID, InMsec, InFrame, OutMsec, OutFrame, Kind, Color, ActiveLoop, Comment)
                 VALUES (?1, ?2, ?3, 0, -1, 0, ?4, -1, 0, '')",
                params![id, content, in_msec, kind],
            )
            .unwrap();
    }

    pub fn count(&self, sql: &str) -> i64 {
        self.conn().query_row(sql, [], |r| r.get(0)).unwrap()
    }

    pub fn text(&self, sql: &str) -> Option<String> {
        self.conn().query_row(sql, [], |r| r.get(0)).unwrap()
    }
}

pub fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<(f64, String)>>,
    completions: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    cancel_after: Mutex<Option<usize>>,
}

impl RecordingReporter {
    pub fn cancelling_after(reports: usize) -> Self {
        let reporter = Self::default();
        *reporter.cancel_after.lock().unwrap() = Some(reports);
        reporter
    }

    pub fn fractions(&self) -> Vec<f64> {
        self.reports.lock().unwrap().iter().map(|(f, _)| *f).collect()
    }

    pub fn completions(&self) -> Vec<String> {
        self.completions.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, fraction: f64, status: &str) {
        self.reports.lock().unwrap().push((fraction, status.to_string()));
    }

    fn is_cancelled(&self) -> bool {
        match *self.cancel_after.lock().unwrap() {
            Some(n) => self.reports.lock().unwrap().len() >= n,
            None => false,
        }
    }

    fn on_complete(&self, summary: &str) {
        self.completions.lock().unwrap().push(summary.to_string());
    }

    fn on_error(&self, error: &EngineError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}
