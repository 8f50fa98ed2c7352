use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Audio container codes as stored in `djmdContent.FileType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    Unknown,
    Mp3,
    M4a,
    Flac,
    Wav,
    Aiff,
}

impl FileType {
    /// Preference order when several files share a base name.
    pub const PRIORITY: [FileType; 6] = [
        FileType::Flac,
        FileType::Wav,
        FileType::Aiff,
        FileType::M4a,
        FileType::Mp3,
        FileType::Unknown,
    ];

    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp3" => FileType::Mp3,
            "m4a" => FileType::M4a,
            "flac" => FileType::Flac,
            "wav" => FileType::Wav,
            "aiff" | "aif" => FileType::Aiff,
            _ => FileType::Unknown,
        }
    }

    pub fn from_file_name(name: &str) -> Self {
        extension(name).map(Self::from_extension).unwrap_or(FileType::Unknown)
    }

    pub fn code(self) -> i64 {
        match self {
            FileType::Unknown => 0,
            FileType::Mp3 => 1,
            FileType::M4a => 4,
            FileType::Flac => 5,
            FileType::Wav => 11,
            FileType::Aiff => 12,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => FileType::Mp3,
            4 => FileType::M4a,
            5 => FileType::Flac,
            11 => FileType::Wav,
            12 => FileType::Aiff,
            _ => FileType::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        self != FileType::Unknown
    }

    /// Position in [`FileType::PRIORITY`]; lower wins.
    pub fn rank(self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|t| *t == self)
            .unwrap_or(Self::PRIORITY.len())
    }
}

/// File name without its last extension: `"Song A.mp3"` -> `"Song A"`.
pub fn base_name(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(idx) => &file_name[..idx],
    }
}

/// Last extension without the dot, if any.
pub fn extension(file_name: &str) -> Option<&str> {
    match file_name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&file_name[idx + 1..]),
    }
}

fn has_drive_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Canonicalize a filesystem path into the form the library database stores:
/// forward slashes, no repeated or trailing separators, upper-case drive letter.
///
/// Backslashes are only treated as separators for Windows-looking paths (drive
/// letter or UNC prefix) or when running on Windows; elsewhere they are legal
/// file name characters and are kept.
pub fn to_db_path(input: &str) -> String {
    let mut s = input.trim();
    if s.is_empty() {
        return String::new();
    }
    if let Some(rest) = s.strip_prefix("file://localhost") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("file://") {
        s = rest;
    }

    let windows_style = cfg!(target_os = "windows") || has_drive_prefix(s) || s.starts_with("\\\\");
    let s: String = if windows_style {
        s.replace('\\', "/")
    } else {
        s.to_string()
    };

    // "/C:/Music" comes out of file:///C:/Music
    let s = if s.strip_prefix('/').is_some_and(has_drive_prefix) {
        s[1..].to_string()
    } else {
        s
    };

    let unc = windows_style && s.starts_with("//");
    let mut out = String::with_capacity(s.len());
    if unc {
        out.push_str("//");
    }
    let mut prev_slash = unc;
    for ch in s.chars().skip(if unc { 2 } else { 0 }) {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }

    while out.ends_with('/') && out.len() > 1 && !(out.len() == 3 && has_drive_prefix(&out)) {
        out.pop();
    }

    if has_drive_prefix(&out) {
        let drive = out[..1].to_ascii_uppercase();
        out.replace_range(..1, &drive);
    }
    out
}

/// Reverse of [`to_db_path`]: a database path rendered for display and for
/// filesystem access on the current platform.
pub fn normalize_path(db_path: &str) -> PathBuf {
    if cfg!(target_os = "windows") {
        PathBuf::from(db_path.replace('/', "\\"))
    } else {
        PathBuf::from(db_path)
    }
}

/// Full on-disk location of a track stored as folder + file name.
pub fn track_file_path(folder_path: &str, file_name: &str) -> PathBuf {
    normalize_path(folder_path).join(file_name)
}

/// `to_db_path` for a [`Path`].
pub fn path_to_db(path: &Path) -> String {
    to_db_path(&path.to_string_lossy())
}

/// `path` made absolute against the working directory, with `.` and `..`
/// resolved lexically. Symlinks are kept as written.
pub fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in std::path::absolute(path)?.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_table() {
        assert_eq!(FileType::from_extension("mp3").code(), 1);
        assert_eq!(FileType::from_extension("M4A").code(), 4);
        assert_eq!(FileType::from_extension(".flac").code(), 5);
        assert_eq!(FileType::from_extension("wav").code(), 11);
        assert_eq!(FileType::from_extension("aiff").code(), 12);
        assert_eq!(FileType::from_extension("aif").code(), 12);
        assert_eq!(FileType::from_extension("ogg").code(), 0);
        assert_eq!(FileType::from_code(5), FileType::Flac);
        assert_eq!(FileType::from_code(99), FileType::Unknown);
        assert_eq!(FileType::from_file_name("Song A.FLAC"), FileType::Flac);
        assert_eq!(FileType::from_file_name("README"), FileType::Unknown);
    }

    #[test]
    fn priority_prefers_lossless() {
        assert!(FileType::Flac.rank() < FileType::Wav.rank());
        assert!(FileType::Wav.rank() < FileType::Mp3.rank());
        assert!(FileType::Mp3.rank() < FileType::Unknown.rank());
    }

    #[test]
    fn base_name_strips_last_extension_only() {
        assert_eq!(base_name("Song A.mp3"), "Song A");
        assert_eq!(base_name("Artist - Track (v1.2).flac"), "Artist - Track (v1.2)");
        assert_eq!(base_name("noext"), "noext");
        assert_eq!(base_name(".hidden"), ".hidden");
        assert_eq!(extension("a.b.wav"), Some("wav"));
        assert_eq!(extension("noext"), None);
    }

    #[test]
    fn db_path_unix_style() {
        assert_eq!(to_db_path("/Music//House/"), "/Music/House");
        assert_eq!(to_db_path("  /Music/A  "), "/Music/A");
        assert_eq!(to_db_path("file:///Users/dj/Music"), "/Users/dj/Music");
        assert_eq!(to_db_path("/"), "/");
        assert_eq!(to_db_path(""), "");
    }

    #[test]
    fn db_path_windows_style() {
        assert_eq!(to_db_path("c:\\Music\\House\\"), "C:/Music/House");
        assert_eq!(to_db_path("D:\\\\Tracks"), "D:/Tracks");
        assert_eq!(to_db_path("file:///c:/Music"), "C:/Music");
        assert_eq!(to_db_path("C:\\"), "C:/");
        assert_eq!(to_db_path("\\\\nas\\share\\music"), "//nas/share/music");
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn backslash_is_a_file_name_character_on_unix() {
        assert_eq!(to_db_path("/Music/AC\\DC"), "/Music/AC\\DC");
    }

    #[test]
    fn track_path_joins_folder_and_name() {
        let p = track_file_path("/Music/A", "Song.mp3");
        assert!(p.ends_with("Song.mp3"));
        assert_eq!(path_to_db(&p), "/Music/A/Song.mp3");
    }

    #[test]
    fn absolute_path_resolves_against_working_dir() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(absolute_path(Path::new("a/../b/./c")).unwrap(), cwd.join("b").join("c"));
        assert_eq!(absolute_path(&cwd).unwrap(), cwd);
        assert!(absolute_path(Path::new("lossless")).unwrap().is_absolute());
    }
}
