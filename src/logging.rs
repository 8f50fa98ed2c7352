//! Process-wide logger behind the `log` facade.
//!
//! Records go to a size-rotated file in the log directory and to a bounded
//! in-memory buffer a front end can show. DEBUG is dropped unless debug mode
//! is on.

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

const ROTATE_AT_BYTES: u64 = 5 * 1024 * 1024;
/// Rotated generations kept next to the active file.
const KEEP_ROTATED: usize = 5;
const BUFFER_CAPACITY: usize = 2000;
const FILE_STEM: &str = "deckfix";

static LOGGER: OnceLock<LogState> = OnceLock::new();

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct LogStats {
    pub log_dir: String,
    pub total_size_bytes: u64,
    pub file_count: usize,
    pub current_file_size_bytes: u64,
}

/// The open log file and how much of it has been written.
struct FileSink {
    dir: PathBuf,
    file: Option<File>,
    size: u64,
}

impl FileSink {
    fn active_path(dir: &Path) -> PathBuf {
        dir.join(format!("{FILE_STEM}.log"))
    }

    fn rotated_path(dir: &Path, generation: usize) -> PathBuf {
        dir.join(format!("{FILE_STEM}.{generation}.log"))
    }

    fn open(dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = Self::active_path(dir);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            dir: dir.to_path_buf(),
            file: Some(file),
            size,
        })
    }

    /// Shift `deckfix.N.log` up one generation, dropping the oldest, and
    /// start an empty active file.
    fn rotate(&mut self) {
        self.file = None;
        let _ = fs::remove_file(Self::rotated_path(&self.dir, KEEP_ROTATED));
        for generation in (1..KEEP_ROTATED).rev() {
            let _ = fs::rename(
                Self::rotated_path(&self.dir, generation),
                Self::rotated_path(&self.dir, generation + 1),
            );
        }
        let active = Self::active_path(&self.dir);
        let _ = fs::rename(&active, Self::rotated_path(&self.dir, 1));
        self.file = OpenOptions::new().create(true).append(true).open(&active).ok();
        self.size = 0;
    }

    fn write_line(&mut self, line: &str) {
        // The file may have been truncated or appended to elsewhere.
        if let Ok(meta) = fs::metadata(Self::active_path(&self.dir)) {
            self.size = meta.len();
        }
        if self.size >= ROTATE_AT_BYTES {
            self.rotate();
        }
        if let Some(file) = self.file.as_mut() {
            if file.write_all(line.as_bytes()).is_ok() {
                self.size += line.len() as u64;
            }
        }
    }
}

pub struct LogState {
    buffer: Mutex<VecDeque<LogEntry>>,
    sink: Mutex<Option<FileSink>>,
    debug: AtomicBool,
}

impl Default for LogState {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl LogState {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(BUFFER_CAPACITY)),
            sink: Mutex::new(None),
            debug: AtomicBool::new(false),
        }
    }

    /// Start persisting to `dir`. On failure the logger keeps only the
    /// in-memory buffer.
    pub fn init_log_dir(&self, dir: &Path) {
        match FileSink::open(dir) {
            Ok(sink) => {
                *lock(&self.sink) = Some(sink);
                self.push(
                    Level::Info,
                    FILE_STEM,
                    &format!("--- session started {} ---", Local::now().format("%Y-%m-%d %H:%M:%S %Z")),
                );
            }
            Err(e) => eprintln!("deckfix: cannot log to {}: {}", dir.display(), e),
        }
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        lock(&self.sink).as_ref().map(|s| s.dir.clone())
    }

    pub fn current_log_path(&self) -> Option<PathBuf> {
        self.log_dir().map(|d| FileSink::active_path(&d))
    }

    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, enabled: bool) {
        log::set_max_level(if enabled { LevelFilter::Debug } else { LevelFilter::Info });
        if self.debug.swap(enabled, Ordering::Relaxed) != enabled {
            self.push(
                Level::Info,
                FILE_STEM,
                if enabled { "debug logging on" } else { "debug logging off" },
            );
        }
    }

    /// Record one entry in the buffer and the file.
    pub fn push(&self, level: Level, target: &str, message: &str) {
        if level >= Level::Debug && !self.is_debug() {
            return;
        }
        let now = Local::now();
        let level_name = match level {
            Level::Trace => "DEBUG",
            other => other.as_str(),
        };

        {
            let mut buffer = lock(&self.buffer);
            if buffer.len() >= BUFFER_CAPACITY {
                buffer.drain(..BUFFER_CAPACITY / 5);
            }
            buffer.push_back(LogEntry {
                timestamp: now.format("%Y-%m-%d %H:%M:%S").to_string(),
                level: level_name.to_string(),
                target: target.to_string(),
                message: message.to_string(),
            });
        }

        if let Some(sink) = lock(&self.sink).as_mut() {
            sink.write_line(&format!(
                "[{}] [{}] {}: {}\n",
                now.format("%Y-%m-%d %H:%M:%S%.3f"),
                level_name,
                target,
                message
            ));
        }
    }

    /// Buffered entries, oldest first.
    pub fn recent(&self) -> Vec<LogEntry> {
        lock(&self.buffer).iter().cloned().collect()
    }

    pub fn log_stats(&self) -> Option<LogStats> {
        let dir = self.log_dir()?;
        let mut stats = LogStats {
            log_dir: dir.display().to_string(),
            total_size_bytes: 0,
            file_count: 0,
            current_file_size_bytes: fs::metadata(FileSink::active_path(&dir))
                .map(|m| m.len())
                .unwrap_or(0),
        };
        for entry in fs::read_dir(&dir).ok()?.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(FILE_STEM) || !name.ends_with(".log") {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                stats.file_count += 1;
                stats.total_size_bytes += meta.len();
            }
        }
        Some(stats)
    }
}

impl Log for LogState {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        // Dependencies trace through the same facade; never keep those.
        metadata.level() <= Level::Info || (metadata.level() == Level::Debug && self.is_debug())
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.push(record.level(), record.target(), &record.args().to_string());
        }
    }

    fn flush(&self) {
        if let Some(file) = lock(&self.sink).as_mut().and_then(|s| s.file.as_mut()) {
            let _ = file.flush();
        }
    }
}

/// Install the process-wide logger once. Later calls only change the debug
/// flag.
pub fn init(log_dir: Option<&Path>, debug: bool) -> &'static LogState {
    let mut installed = false;
    let state = LOGGER.get_or_init(|| {
        installed = true;
        let state = LogState::new();
        if let Some(dir) = log_dir {
            state.init_log_dir(dir);
        }
        state
    });
    if installed && log::set_logger(state).is_err() {
        eprintln!("deckfix: another logger is already installed");
    }
    state.set_debug(debug);
    state
}

pub fn state() -> Option<&'static LogState> {
    LOGGER.get()
}

pub fn current_log_path() -> Option<PathBuf> {
    state()?.current_log_path()
}

pub fn log_stats() -> Option<LogStats> {
    state()?.log_stats()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn debug_entries_need_debug_mode() {
        let state = LogState::new();
        state.push(Level::Debug, "t", "hidden");
        state.push(Level::Info, "t", "shown");
        state.debug.store(true, Ordering::Relaxed);
        state.push(Level::Debug, "t", "now shown");
        let messages: Vec<String> = state.recent().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["shown", "now shown"]);
    }

    #[test]
    fn full_buffer_drops_oldest_fifth() {
        let state = LogState::new();
        for i in 0..=BUFFER_CAPACITY {
            state.push(Level::Info, "t", &i.to_string());
        }
        let entries = state.recent();
        assert_eq!(entries.len(), BUFFER_CAPACITY + 1 - BUFFER_CAPACITY / 5);
        assert_eq!(entries[0].message, (BUFFER_CAPACITY / 5).to_string());
    }

    #[test]
    fn file_rotates_past_size_limit() {
        let dir = TempDir::new().unwrap();
        let state = LogState::new();
        state.init_log_dir(dir.path());
        state.push(Level::Warn, "deckfix_lib::db", "backup slow");
        let path = state.current_log_path().unwrap();
        assert!(fs::read_to_string(&path)
            .unwrap()
            .contains("[WARN] deckfix_lib::db: backup slow"));

        fs::write(&path, vec![b'x'; ROTATE_AT_BYTES as usize]).unwrap();
        state.push(Level::Info, "t", "after rotation");
        assert!(dir.path().join("deckfix.1.log").exists());
        assert!(fs::read_to_string(&path).unwrap().contains("after rotation"));
        assert_eq!(state.log_stats().unwrap().file_count, 2);
    }
}
