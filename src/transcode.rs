use crate::error::{EngineError, Result};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tempfile::{NamedTempFile, TempPath};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Tail of the tool's stderr kept in error messages.
const STDERR_TAIL: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeStatus {
    Done,
    Cancelled,
}

/// External converter. `output` is only written once a conversion has fully
/// succeeded; a failed or cancelled run leaves any existing file at `output`
/// (including the input itself) untouched.
pub trait Transcoder: Send + Sync {
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<TranscodeStatus>;
}

/// Runs a program per file. `{input}` and `{output}` in the argument
/// template are replaced by the paths.
#[derive(Debug, Clone)]
pub struct CommandTranscoder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandTranscoder {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `ffmpeg` keeping tags; the container follows the output extension.
    pub fn ffmpeg() -> Self {
        Self::new(
            "ffmpeg",
            [
                "-hide_banner",
                "-loglevel",
                "error",
                "-nostdin",
                "-y",
                "-i",
                "{input}",
                "-map_metadata",
                "0",
                "{output}",
            ],
        )
    }

    /// Same argument template, different executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        for arg in &self.args {
            match arg.as_str() {
                "{input}" => cmd.arg(input),
                "{output}" => cmd.arg(output),
                other => cmd.arg(other),
            };
        }
        cmd
    }
}

/// Temp file next to `output`, keeping its extension so tools that pick the
/// container from the file name still work. Deleted on drop.
fn staging_path(output: &Path) -> Result<TempPath> {
    let dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let suffix = output
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(".deckfix-")
        .suffix(&suffix)
        .tempfile_in(dir)
        .map(NamedTempFile::into_temp_path)
        .map_err(|e| EngineError::io(format!("creating temp output in {}", dir.display()), e))
}

fn read_tail(mut file: fs::File) -> String {
    let mut text = String::new();
    if file.seek(SeekFrom::Start(0)).is_ok() {
        let _ = file.read_to_string(&mut text);
    }
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

impl Transcoder for CommandTranscoder {
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<TranscodeStatus> {
        let fail = |message: String| EngineError::Transcode {
            input: input.to_path_buf(),
            message,
        };

        // stderr goes to a file so a chatty tool can never block on a full pipe
        let stderr = tempfile::tempfile().map_err(|e| EngineError::io("creating stderr capture", e))?;
        let stderr_writer = stderr
            .try_clone()
            .map_err(|e| EngineError::io("creating stderr capture", e))?;

        let staging = staging_path(output)?;
        let mut child = self
            .command(input, &staging)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_writer))
            .spawn()
            .map_err(|e| fail(format!("cannot start {}: {e}", self.program.display())))?;

        log::debug!("Transcoding {} -> {}", input.display(), output.display());
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => {
                    staging.persist(output).map_err(|e| {
                        EngineError::io(format!("moving output to {}", output.display()), e.error)
                    })?;
                    return Ok(TranscodeStatus::Done);
                }
                Ok(Some(status)) => {
                    return Err(fail(format!("{status}: {}", read_tail(stderr))));
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(fail(e.to_string()));
                }
            }

            if cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                log::info!("Transcode of {} cancelled", input.display());
                return Ok(TranscodeStatus::Cancelled);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn sh(script: &str) -> CommandTranscoder {
        CommandTranscoder::new("sh", ["-c", script, "sh", "{input}", "{output}"])
    }

    #[test]
    fn successful_run_produces_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.mp3");
        let output = dir.path().join("out.flac");
        fs::write(&input, b"audio").unwrap();

        let status = sh("cp \"$1\" \"$2\"").transcode(&input, &output, &|| false).unwrap();
        assert_eq!(status, TranscodeStatus::Done);
        assert_eq!(fs::read(&output).unwrap(), b"audio");
    }

    #[test]
    fn failure_leaves_no_output_and_keeps_stderr() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.mp3");
        let output = dir.path().join("out.flac");

        let err = sh("echo partial > \"$2\"; echo boom >&2; exit 3")
            .transcode(&input, &output, &|| false)
            .unwrap_err();
        match err {
            EngineError::Transcode { message, .. } => assert!(message.contains("boom")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!output.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failure_keeps_existing_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.mp3");
        let output = dir.path().join("out.flac");
        fs::write(&input, b"audio").unwrap();
        fs::write(&output, b"previous").unwrap();

        sh("echo partial > \"$2\"; exit 1")
            .transcode(&input, &output, &|| false)
            .unwrap_err();
        assert_eq!(fs::read(&output).unwrap(), b"previous");
    }

    #[test]
    fn failing_in_place_run_keeps_the_source() {
        let dir = TempDir::new().unwrap();
        let track = dir.path().join("one.mp3");
        fs::write(&track, b"audio").unwrap();

        sh("exit 1").transcode(&track, &track, &|| false).unwrap_err();
        assert_eq!(fs::read(&track).unwrap(), b"audio");
    }

    #[test]
    fn staging_file_keeps_output_extension() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.flac");
        let seen = dir.path().join("seen.txt");
        let script = format!("echo \"$2\" > '{}'; cp \"$1\" \"$2\"", seen.display());
        fs::write(dir.path().join("in.mp3"), b"x").unwrap();

        sh(&script)
            .transcode(&dir.path().join("in.mp3"), &output, &|| false)
            .unwrap();
        let staged = fs::read_to_string(&seen).unwrap();
        assert!(staged.trim().ends_with(".flac"));
        assert_ne!(Path::new(staged.trim()), output);
        assert!(!Path::new(staged.trim()).exists());
        assert_eq!(fs::read(&output).unwrap(), b"x");
    }

    #[test]
    fn cancellation_kills_child_and_removes_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.mp3");
        let output = dir.path().join("out.flac");
        let polls = Cell::new(0);
        let cancelled = || {
            polls.set(polls.get() + 1);
            polls.get() > 3
        };

        let status = sh("echo partial > \"$2\"; sleep 30")
            .transcode(&input, &output, &cancelled)
            .unwrap();
        assert_eq!(status, TranscodeStatus::Cancelled);
        assert!(!output.exists());
    }

    #[test]
    fn missing_program_is_a_transcode_error() {
        let dir = TempDir::new().unwrap();
        let err = CommandTranscoder::new("deckfix-no-such-tool", ["{input}"])
            .transcode(&dir.path().join("a"), &dir.path().join("b"), &|| false)
            .unwrap_err();
        assert!(matches!(err, EngineError::Transcode { .. }));
    }
}
