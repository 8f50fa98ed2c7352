use crate::batch::{BatchOperation, RowOutcome};
use crate::db::DbManager;
use crate::error::{EngineError, Result};
use crate::models::TrackItem;
use crate::path::FileType;
use crate::progress::OperationContext;
use crate::transcode::{TranscodeStatus, Transcoder};
use crate::validator::{FieldKind, FieldRule};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn default_format() -> String {
    "flac".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertConfig {
    pub playlist_id: Option<String>,
    pub output_folder: Option<String>,
    /// Target extension, e.g. `flac` or `wav`.
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub overwrite: bool,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            playlist_id: None,
            output_folder: None,
            format: default_format(),
            overwrite: false,
        }
    }
}

/// Transcodes every track of a playlist into `<output folder>/<base name>.<format>`.
/// Reads the library but never writes it.
pub struct Convert {
    config: ConvertConfig,
    transcoder: Arc<dyn Transcoder>,
}

impl Convert {
    pub fn new(config: ConvertConfig, transcoder: Arc<dyn Transcoder>) -> Self {
        Self { config, transcoder }
    }

    fn format(&self) -> String {
        self.config
            .format
            .trim()
            .trim_start_matches('.')
            .to_ascii_lowercase()
    }

    fn output_folder(&self) -> Result<PathBuf> {
        self.config
            .output_folder
            .as_deref()
            .map(|f| PathBuf::from(f.trim()))
            .ok_or_else(|| EngineError::validation("output_folder", "is required"))
    }
}

impl BatchOperation for Convert {
    type Item = TrackItem;

    fn name(&self) -> &str {
        "Format converter"
    }

    fn mutates(&self) -> bool {
        false
    }

    fn field_rules(&self) -> Vec<FieldRule<'_>> {
        vec![
            FieldRule::required("playlist", FieldKind::Playlist, self.config.playlist_id.as_deref()),
            FieldRule::required("output_folder", FieldKind::Folder, self.config.output_folder.as_deref()),
            FieldRule::required("format", FieldKind::Text, Some(&self.config.format)),
        ]
    }

    fn validate_inputs(&self) -> Result<()> {
        if !FileType::from_extension(&self.format()).is_known() {
            return Err(EngineError::validation(
                "format",
                format!("{} is not a supported audio format", self.config.format),
            ));
        }
        Ok(())
    }

    fn enumerate(&mut self, db: &DbManager, _ctx: &OperationContext) -> Result<Vec<TrackItem>> {
        let folder = self.output_folder()?;
        fs::create_dir_all(&folder)
            .map_err(|e| EngineError::io(format!("creating {}", folder.display()), e))?;
        let playlist = self.config.playlist_id.as_deref().unwrap_or_default().trim();
        db.get_tracks_based_on_playlist(playlist)
    }

    fn describe(&self, track: &TrackItem) -> String {
        track.file_name.clone()
    }

    fn apply(&mut self, _db: &DbManager, track: TrackItem, ctx: &OperationContext) -> Result<RowOutcome> {
        let input = track.disk_path();
        if !input.is_file() {
            log::warn!("Source file missing: {}", input.display());
            return Ok(RowOutcome::Unmatched(track.file_name));
        }
        let output = self
            .output_folder()?
            .join(format!("{}.{}", track.base_name(), self.format()));
        if same_file(&input, &output) {
            log::warn!("Output would replace its source, skipping {}", input.display());
            return Ok(RowOutcome::Skipped);
        }
        if output.exists() && !self.config.overwrite {
            return Ok(RowOutcome::Skipped);
        }

        match self.transcoder.transcode(&input, &output, &|| ctx.is_cancelled())? {
            TranscodeStatus::Done => Ok(RowOutcome::Applied(1)),
            TranscodeStatus::Cancelled => Ok(RowOutcome::Interrupted),
        }
    }
}

/// Both paths resolve to the same existing file.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{run_batch, BatchState};
    use crate::path::path_to_db;
    use crate::testutil::{Library, RecordingReporter};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CopyTranscoder {
        calls: Mutex<Vec<PathBuf>>,
    }

    impl Transcoder for CopyTranscoder {
        fn transcode(&self, input: &Path, output: &Path, cancelled: &dyn Fn() -> bool) -> Result<TranscodeStatus> {
            if cancelled() {
                return Ok(TranscodeStatus::Cancelled);
            }
            self.calls.lock().unwrap().push(input.to_path_buf());
            fs::copy(input, output).map_err(|e| EngineError::io("copy", e))?;
            Ok(TranscodeStatus::Done)
        }
    }

    fn setup() -> (Library, PathBuf) {
        let lib = Library::new();
        let music = lib.dir.path().join("music");
        fs::create_dir(&music).unwrap();
        fs::write(music.join("one.mp3"), b"1").unwrap();
        fs::write(music.join("two.mp3"), b"2").unwrap();
        let folder = path_to_db(&music);
        lib.add_track("1", &folder, "one.mp3", None);
        lib.add_track("2", &folder, "two.mp3", None);
        lib.add_track("3", &folder, "gone.mp3", None);
        lib.add_playlist("p", "Convert", "root", 0);
        lib.add_to_playlist("p", "1", 1);
        lib.add_to_playlist("p", "2", 2);
        lib.add_to_playlist("p", "3", 3);
        let out = lib.dir.path().join("out");
        (lib, out)
    }

    fn config(out: &Path) -> ConvertConfig {
        ConvertConfig {
            playlist_id: Some("p".into()),
            output_folder: Some(out.to_string_lossy().into()),
            ..ConvertConfig::default()
        }
    }

    #[test]
    fn converts_playlist_without_touching_library() {
        let (lib, out) = setup();
        let before = fs::read(&lib.db_path).unwrap();
        let transcoder = Arc::new(CopyTranscoder::default());
        let mut db = lib.manager();
        let ctx = OperationContext::new(Arc::new(RecordingReporter::default()));

        let report = run_batch(&mut Convert::new(config(&out), transcoder.clone()), &mut db, &ctx).unwrap();
        assert_eq!(report.changed, 2);
        assert_eq!(report.unmatched, vec!["gone.mp3".to_string()]);
        assert!(report.backup.is_none());
        assert_eq!(fs::read(out.join("one.flac")).unwrap(), b"1");
        assert_eq!(fs::read(&lib.db_path).unwrap(), before);

        let again = run_batch(&mut Convert::new(config(&out), transcoder.clone()), &mut db, &ctx).unwrap();
        assert_eq!(again.skipped, 2);
        assert_eq!(transcoder.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn output_over_its_own_source_is_skipped() {
        let (lib, _) = setup();
        let music = lib.dir.path().join("music");
        let transcoder = Arc::new(CopyTranscoder::default());
        let mut db = lib.manager();
        let ctx = OperationContext::new(Arc::new(RecordingReporter::default()));
        let cfg = ConvertConfig {
            format: "mp3".into(),
            overwrite: true,
            // Same folder spelled differently still resolves to the source.
            output_folder: Some(music.join(".").to_string_lossy().into()),
            ..config(&music)
        };

        let report = run_batch(&mut Convert::new(cfg, transcoder.clone()), &mut db, &ctx).unwrap();
        assert_eq!(report.changed, 0);
        assert_eq!(report.skipped, 2);
        assert!(transcoder.calls.lock().unwrap().is_empty());
        assert_eq!(fs::read(music.join("one.mp3")).unwrap(), b"1");
        assert_eq!(fs::read(music.join("two.mp3")).unwrap(), b"2");
    }

    /// Behaves like a tool killed part-way through its first file.
    struct InterruptedTranscoder;

    impl Transcoder for InterruptedTranscoder {
        fn transcode(&self, _input: &Path, _output: &Path, _cancelled: &dyn Fn() -> bool) -> Result<TranscodeStatus> {
            Ok(TranscodeStatus::Cancelled)
        }
    }

    #[test]
    fn interrupted_transcode_cancels_the_batch() {
        let (lib, out) = setup();
        let mut db = lib.manager();
        let ctx = OperationContext::new(Arc::new(RecordingReporter::default()));
        let mut op = Convert::new(config(&out), Arc::new(InterruptedTranscoder));
        let report = run_batch(&mut op, &mut db, &ctx).unwrap();
        assert_eq!(report.state, BatchState::Cancelled);
        assert_eq!(report.processed, 0);
    }

    #[test]
    fn cancellation_between_files_keeps_finished_outputs() {
        let (lib, out) = setup();
        let mut db = lib.manager();
        let reporter = Arc::new(RecordingReporter::default());
        reporter.cancel_after(1);
        let ctx = OperationContext::new(reporter);
        let mut op = Convert::new(config(&out), Arc::new(CopyTranscoder::default()));
        let report = run_batch(&mut op, &mut db, &ctx).unwrap();
        assert!(report.is_cancelled());
        assert_eq!((report.processed, report.total), (1, 3));
        assert!(out.join("one.flac").exists());
        assert!(!out.join("two.flac").exists());
    }

    #[test]
    fn unknown_format_is_rejected() {
        let (lib, out) = setup();
        let mut db = lib.manager();
        let ctx = OperationContext::new(Arc::new(RecordingReporter::default()));
        let mut op = Convert::new(
            ConvertConfig { format: "xyz".into(), ..config(&out) },
            Arc::new(CopyTranscoder::default()),
        );
        assert!(matches!(run_batch(&mut op, &mut db, &ctx), Err(EngineError::Validation { .. })));
    }
}
