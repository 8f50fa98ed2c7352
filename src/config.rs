use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "deckfix";
const CONFIG_FILE: &str = "config.json";
const DEFAULT_ROW_DELAY_MS: u64 = 25;

fn default_row_delay_ms() -> u64 {
    DEFAULT_ROW_DELAY_MS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    /// Pause between row mutations so the library file is not hammered.
    #[serde(default = "default_row_delay_ms")]
    pub row_delay_ms: u64,
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            backup_dir: None,
            log_dir: None,
            row_delay_ms: DEFAULT_ROW_DELAY_MS,
            debug: false,
        }
    }
}

fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR)
            .join(CONFIG_FILE)
    }

    /// Missing file means defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(EngineError::io(format!("reading {}", path.display()), e)),
        };
        serde_json::from_str(&text)
            .map_err(|e| EngineError::validation("config", format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .map_err(|e| EngineError::io(format!("creating {}", dir.display()), e))?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::validation("config", e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| EngineError::io("creating temporary config file", e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| EngineError::io("writing config", e))?;
        tmp.persist(path)
            .map_err(|e| EngineError::io(format!("replacing {}", path.display()), e.error))?;
        Ok(())
    }

    /// Configured database path; an empty path counts as not configured.
    pub fn database_path(&self) -> Option<&Path> {
        self.database_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| app_data_dir().join("backups"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| app_data_dir().join("logs"))
    }

    pub fn row_delay(&self) -> Duration {
        Duration::from_millis(self.row_delay_ms)
    }
}
