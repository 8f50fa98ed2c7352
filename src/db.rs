use crate::config::AppConfig;
use crate::error::{EngineError, Result};
use crate::models::{CueRow, PlaylistItem, TrackItem};
use crate::nullable::{NullInt64, NullString};
use crate::path::to_db_path;
use chrono::Local;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Params, Row};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Track columns shared by every track query, `c` being `djmdContent`.
const TRACK_SELECT: &str = "SELECT c.ID, c.FolderPath, c.FileNameL, c.FileType, c.Title FROM djmdContent c";

/// Escape SQL LIKE wildcard characters so they are matched literally.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Parameters selecting `folder` and every folder below it, but not siblings
/// sharing its name as a prefix (`/Music/A` never selects `/Music/AB`): the
/// folder itself for an exact match and an escaped `folder/%` pattern. Bind
/// both and use [`folder_clause`].
pub fn folder_filter(folder: &str) -> [String; 2] {
    let folder = to_db_path(folder);
    let escaped = escape_like(&folder);
    let pattern = if folder.ends_with('/') {
        format!("{escaped}%")
    } else {
        format!("{escaped}/%")
    };
    [folder, pattern]
}

/// SQL matching [`folder_filter`] bound at `?first` and `?first + 1`.
pub fn folder_clause(column: &str, first: usize) -> String {
    format!("({column} = ?{first} OR {column} LIKE ?{} ESCAPE '\\')", first + 1)
}

/// Short, single-line label for a statement, used as error context.
fn sql_label(sql: &str) -> String {
    let flat: Vec<&str> = sql.split_whitespace().collect();
    let flat = flat.join(" ");
    if flat.chars().count() > 72 {
        let cut: String = flat.chars().take(72).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

pub(crate) fn row_to_track(row: &Row<'_>) -> rusqlite::Result<TrackItem> {
    let id: NullString = row.get(0)?;
    let folder_path: NullString = row.get(1)?;
    let file_name: NullString = row.get(2)?;
    let file_type: NullInt64 = row.get(3)?;
    let title: NullString = row.get(4)?;
    Ok(TrackItem {
        id: id.or_empty(),
        folder_path: folder_path.or_empty(),
        file_name: file_name.or_empty(),
        file_type: file_type.or_zero(),
        title: title.0,
    })
}

fn collect_rows<T, P, F>(conn: &Connection, sql: &str, params: P, f: F) -> rusqlite::Result<Vec<T>>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, f)?;
    rows.collect()
}

fn collect_maps<P: Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<Vec<CueRow>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = CueRow::default();
        for (idx, name) in names.iter().enumerate() {
            map.set(name, row.get::<_, Value>(idx)?);
        }
        out.push(map);
    }
    Ok(out)
}

/// Owner of the single connection to the library database.
///
/// Every operation connects, works, and finalizes; nothing keeps the external
/// application's live file open between operations.
pub struct DbManager {
    db_path: Option<PathBuf>,
    backup_dir: PathBuf,
    conn: Option<Connection>,
}

impl DbManager {
    pub fn new(db_path: Option<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path,
            backup_dir: backup_dir.into(),
            conn: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.database_path().map(Path::to_path_buf), config.backup_dir())
    }

    /// `None` means "not configured" and stops every module before any work.
    pub fn database_path(&self) -> Option<&Path> {
        self.db_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn set_database_path(&mut self, path: Option<PathBuf>) {
        self.finalize();
        self.db_path = path;
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Opens the connection unless it is already open.
    pub fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let path = self
            .database_path()
            .ok_or(EngineError::NotConfigured)?
            .to_path_buf();

        let connection_err = |source| EngineError::Connection {
            path: path.clone(),
            source,
        };
        // No CREATE flag: a wrong path must fail instead of producing an empty library.
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(connection_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(connection_err)?;
        // Catches "file is not a database" and a locked file up front.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))
            .map_err(connection_err)?;

        log::info!("Connected to {}", path.display());
        self.conn = Some(conn);
        Ok(())
    }

    /// Releases the connection. No-op when not connected.
    pub fn finalize(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                log::warn!("Closing database reported an error: {}", e);
            }
            log::debug!("Connection released");
        }
    }

    /// Like [`finalize`](Self::finalize) but surfaces the close error.
    pub fn close(&mut self) -> Result<()> {
        match self.conn.take() {
            None => Ok(()),
            Some(conn) => conn
                .close()
                .map_err(|(_, e)| EngineError::database("closing database", e)),
        }
    }

    /// Connects and returns a guard that finalizes on every exit path.
    pub fn session(&mut self) -> Result<ConnectionGuard<'_>> {
        self.connect()?;
        Ok(ConnectionGuard { db: self })
    }

    pub(crate) fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(EngineError::NotConnected)
    }

    /// Byte copy of the database file into the backup directory, named after
    /// the source plus a timestamp. The copy is written to a temporary file and
    /// moved into place, so an interrupted backup never leaves a partial file
    /// under a backup name.
    pub fn backup_database(&self) -> Result<PathBuf> {
        let source = self.database_path().ok_or(EngineError::NotConfigured)?;
        fs::create_dir_all(&self.backup_dir).map_err(|e| {
            EngineError::io(format!("creating backup directory {}", self.backup_dir.display()), e)
        })?;

        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("library");
        let ext = source.extension().and_then(|s| s.to_str()).unwrap_or("db");
        let dest = self.backup_dir.join(format!(
            "{stem}_{}.{ext}",
            Local::now().format("%Y%m%d_%H%M%S_%3f")
        ));

        let mut input = File::open(source)
            .map_err(|e| EngineError::io(format!("reading {}", source.display()), e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.backup_dir)
            .map_err(|e| EngineError::io("creating backup file", e))?;
        io::copy(&mut input, tmp.as_file_mut())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| EngineError::io("writing backup", e))?;
        tmp.persist(&dest)
            .map_err(|e| EngineError::io(format!("saving backup {}", dest.display()), e.error))?;

        log::info!("Backed up {} to {}", source.display(), dest.display());
        Ok(dest)
    }

    /// Checks that a backup could be written right now without writing one.
    pub fn check_backup_feasible(&self) -> Result<()> {
        let source = self.database_path().ok_or(EngineError::NotConfigured)?;
        File::open(source)
            .map_err(|e| EngineError::io(format!("reading {}", source.display()), e))?;
        fs::create_dir_all(&self.backup_dir).map_err(|e| {
            EngineError::io(format!("creating backup directory {}", self.backup_dir.display()), e)
        })?;
        tempfile::NamedTempFile::new_in(&self.backup_dir).map_err(|e| {
            EngineError::io(format!("backup directory {} is not writable", self.backup_dir.display()), e)
        })?;
        Ok(())
    }

    pub fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        collect_rows(self.conn()?, sql, params, f)
            .map_err(|e| EngineError::database(sql_label(sql), e))
    }

    /// First row, or `None` when the query matches nothing.
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.conn()?
            .query_row(sql, params, f)
            .optional()
            .map_err(|e| EngineError::database(sql_label(sql), e))
    }

    /// Rows as column-name maps, for tables copied without a fixed shape.
    pub fn query_rows<P: Params>(&self, sql: &str, params: P) -> Result<Vec<CueRow>> {
        collect_maps(self.conn()?, sql, params).map_err(|e| EngineError::database(sql_label(sql), e))
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.conn()?
            .execute(sql, params)
            .map_err(|e| EngineError::database(sql_label(sql), e))
    }

    /// Runs `f` inside a transaction; any error rolls it back.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| EngineError::database("begin transaction", e))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| EngineError::database("commit transaction", e))?;
        Ok(value)
    }

    pub fn get_playlists(&self) -> Result<Vec<PlaylistItem>> {
        let rows = self.query(
            "SELECT ID, Name, ParentID, Attribute FROM djmdPlaylist ORDER BY Seq, ID",
            [],
            |row| {
                let id: NullString = row.get(0)?;
                let name: NullString = row.get(1)?;
                let parent: NullString = row.get(2)?;
                let attribute: NullInt64 = row.get(3)?;
                Ok((id.or_empty(), name.or_empty(), parent.0, attribute.or_zero()))
            },
        )?;

        let by_id: HashMap<&str, (&str, Option<&str>)> = rows
            .iter()
            .map(|(id, name, parent, _)| (id.as_str(), (name.as_str(), parent.as_deref())))
            .collect();

        let mut playlists: Vec<PlaylistItem> = rows
            .iter()
            .map(|(id, name, parent, attribute)| {
                let mut parts = vec![name.as_str()];
                let mut next = parent.as_deref();
                // Bounded walk: a corrupt parent cycle must not hang.
                for _ in 0..rows.len() {
                    match next.and_then(|p| by_id.get(p)) {
                        Some((parent_name, grand)) => {
                            parts.push(*parent_name);
                            next = *grand;
                        }
                        None => break,
                    }
                }
                parts.reverse();
                PlaylistItem {
                    id: id.clone(),
                    name: name.clone(),
                    parent_id: parent.clone().filter(|p| !p.is_empty() && p != "root"),
                    path: parts.join("/"),
                    is_folder: *attribute == 1,
                    is_smart: *attribute == 4,
                }
            })
            .collect();
        playlists.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(playlists)
    }

    pub fn get_track(&self, id: &str) -> Result<Option<TrackItem>> {
        self.query_row(&format!("{TRACK_SELECT} WHERE c.ID = ?1"), params![id], row_to_track)
    }

    /// Tracks whose FolderPath starts with `folder` (database form).
    pub fn get_tracks_based_on_folder(&self, folder: &str) -> Result<Vec<TrackItem>> {
        let [exact, pattern] = folder_filter(folder);
        self.query(
            &format!(
                "{TRACK_SELECT} WHERE {} ORDER BY c.FolderPath, c.FileNameL",
                folder_clause("c.FolderPath", 1)
            ),
            params![exact, pattern],
            row_to_track,
        )
    }

    pub fn get_tracks_based_on_playlist(&self, playlist_id: &str) -> Result<Vec<TrackItem>> {
        self.query(
            "SELECT c.ID, c.FolderPath, c.FileNameL, c.FileType, c.Title
             FROM djmdSongPlaylist sp
             INNER JOIN djmdContent c ON c.ID = sp.ContentID
             WHERE sp.PlaylistID = ?1
             ORDER BY sp.TrackNo",
            params![playlist_id],
            row_to_track,
        )
    }

    /// Hot cues (Kind > 0) of a track, ordered by Kind. Memory cues are Kind 0.
    pub fn get_track_hot_cues(&self, track_id: &str) -> Result<Vec<CueRow>> {
        self.query_rows(
            "SELECT * FROM djmdCue
             WHERE ContentID = ?1 AND CAST(Kind AS INTEGER) > 0
             ORDER BY CAST(Kind AS INTEGER), InMsec",
            params![track_id],
        )
    }
}

impl Drop for DbManager {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Scoped connection: finalizes the owning [`DbManager`] when dropped,
/// including during unwinding.
pub struct ConnectionGuard<'a> {
    db: &'a mut DbManager,
}

impl Deref for ConnectionGuard<'_> {
    type Target = DbManager;

    fn deref(&self) -> &DbManager {
        self.db
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.db.finalize();
    }
}
