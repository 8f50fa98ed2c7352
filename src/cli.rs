use crate::batch::BatchOperation;
use crate::config::AppConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::logging;
use crate::models::CueRow;
use crate::ops::{
    Convert, ConvertConfig, DateSync, DateSyncConfig, DateSyncMode, FlacFixer, FlacFixerConfig,
    HotCueSync, HotCueSyncConfig, MetadataField, MetadataSync, MetadataSyncConfig, TrackSource,
    TracksUpdater, TracksUpdaterConfig,
};
use crate::progress::ProgressReporter;
use crate::transcode::CommandTranscoder;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rusqlite::types::Value;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::block_in_place;

#[derive(Parser, Debug)]
#[command(name = "deckfix", version, about = "Bulk fixes for a DJ library database")]
pub struct Cli {
    /// Config file (default: <config dir>/deckfix/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Library database file, overrides the config
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Where backups are written, overrides the config
    #[arg(long, global = true)]
    pub backup_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List playlists with their full paths
    Playlists,
    /// List the tracks of a folder or playlist
    Tracks(SourceArgs),
    /// Show the hot cues of one track
    Cues { track_id: String },
    /// Rewrite added/created dates
    DateSync {
        #[command(subcommand)]
        mode: DateSyncCommand,
    },
    /// Copy hot cues to the matching tracks of another folder or playlist
    CopyCues(PairArgs),
    /// Copy metadata to the matching tracks of another folder or playlist
    CopyMetadata {
        #[command(flatten)]
        pair: PairArgs,
        /// Column to copy; repeat for several (default: all)
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<MetadataField>,
    },
    /// Set FileType on .flac tracks recorded with another type
    FixFlac {
        #[arg(long)]
        folder: Option<String>,
    },
    /// Point playlist tracks at same-named files in a new folder
    UpdateFormats {
        #[arg(long)]
        playlist: String,
        #[arg(long)]
        folder: String,
    },
    /// Transcode the tracks of a playlist into a folder
    Convert {
        #[arg(long)]
        playlist: String,
        #[arg(long)]
        output: String,
        #[arg(long, default_value = "flac")]
        format: String,
        #[arg(long)]
        overwrite: bool,
        /// ffmpeg executable to use
        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: PathBuf,
    },
    /// Show the end of the persisted log
    Logs {
        #[arg(long, default_value_t = 40)]
        tail: usize,
    },
    /// Print the effective configuration, optionally saving it
    Config {
        #[arg(long)]
        save: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DateSyncCommand {
    /// Added and created dates become the release date
    Standard {
        /// Folder to leave alone; repeat for several
        #[arg(long = "exclude")]
        excluded: Vec<String>,
    },
    /// Added and created dates become one given date
    Custom {
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        /// Folder to update; repeat for up to six
        #[arg(long = "folder", required = true)]
        folders: Vec<String>,
    },
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    #[arg(long, conflicts_with = "playlist", required_unless_present = "playlist")]
    pub folder: Option<String>,
    #[arg(long)]
    pub playlist: Option<String>,
}

impl SourceArgs {
    fn source(&self) -> TrackSource {
        match (&self.folder, &self.playlist) {
            (Some(folder), _) => TrackSource::Folder(folder.clone()),
            (None, Some(playlist)) => TrackSource::Playlist(playlist.clone()),
            (None, None) => TrackSource::Folder(String::new()),
        }
    }
}

#[derive(Args, Debug)]
pub struct PairArgs {
    #[arg(long, conflicts_with = "from_playlist", required_unless_present = "from_playlist")]
    pub from_folder: Option<String>,
    #[arg(long)]
    pub from_playlist: Option<String>,
    #[arg(long, conflicts_with = "to_playlist", required_unless_present = "to_playlist")]
    pub to_folder: Option<String>,
    #[arg(long)]
    pub to_playlist: Option<String>,
}

impl PairArgs {
    fn sources(&self) -> (TrackSource, TrackSource) {
        let pick = |folder: &Option<String>, playlist: &Option<String>| {
            SourceArgs { folder: folder.clone(), playlist: playlist.clone() }.source()
        };
        (
            pick(&self.from_folder, &self.from_playlist),
            pick(&self.to_folder, &self.to_playlist),
        )
    }
}

fn parse_field(s: &str) -> std::result::Result<MetadataField, String> {
    MetadataField::ALL
        .into_iter()
        .find(|f| f.column().eq_ignore_ascii_case(s))
        .ok_or_else(|| {
            let names: Vec<&str> = MetadataField::ALL.iter().map(|f| f.column()).collect();
            format!("unknown field {s:?}, expected one of {}", names.join(", "))
        })
}

/// Progress on stderr, summaries on stdout.
#[derive(Default)]
pub struct ConsoleReporter {
    line_open: AtomicBool,
}

impl ConsoleReporter {
    fn end_line(&self) {
        if self.line_open.swap(false, Ordering::Relaxed) {
            eprintln!();
        }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn report(&self, fraction: f64, status: &str) {
        let mut err = io::stderr().lock();
        let _ = write!(err, "\r\x1b[2K[{:>3.0}%] {}", fraction * 100.0, status);
        let _ = err.flush();
        self.line_open.store(true, Ordering::Relaxed);
    }

    fn on_complete(&self, summary: &str) {
        self.end_line();
        println!("{summary}");
    }

    fn on_error(&self, _error: &EngineError) {
        self.end_line();
        if let Some(path) = logging::current_log_path() {
            eprintln!("Details are in {}", path.display());
        }
    }
}

/// Parse the command line and run it.
pub fn run() -> Result<()> {
    execute(Cli::parse())
}

pub fn execute(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&config_path)?;
    if let Some(db) = cli.db {
        config.database_path = Some(db);
    }
    if let Some(dir) = cli.backup_dir {
        config.backup_dir = Some(dir);
    }
    config.debug |= cli.debug;

    logging::init(Some(&config.log_dir()), config.debug);
    log::debug!("Using config {}", config_path.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(dispatch(cli.command, config, config_path))
}

async fn dispatch(command: Command, config: AppConfig, config_path: PathBuf) -> Result<()> {
    let engine = Engine::from_config(&config);
    match command {
        Command::Playlists => {
            for playlist in block_in_place(|| engine.with_db(|db| db.get_playlists()))? {
                let marker = if playlist.is_folder {
                    "/"
                } else if playlist.is_smart {
                    " (smart)"
                } else {
                    ""
                };
                println!("{:>10}  {}{}", playlist.id, playlist.path, marker);
            }
        }
        Command::Tracks(args) => {
            let source = args.source();
            for track in block_in_place(|| engine.with_db(|db| source.load(db)))? {
                println!(
                    "{:>10}  {:>2}  {}",
                    track.id,
                    track.file_type,
                    track.disk_path().display()
                );
            }
        }
        Command::Cues { track_id } => {
            let cues = block_in_place(|| engine.with_db(|db| db.get_track_hot_cues(&track_id)))?;
            if cues.is_empty() {
                println!("No hot cues on track {track_id}");
            }
            for cue in cues {
                println!("{}", describe_cue(&cue));
            }
        }
        Command::DateSync { mode } => {
            let config = match mode {
                DateSyncCommand::Standard { excluded } => DateSyncConfig {
                    mode: DateSyncMode::Standard,
                    excluded_folders: excluded,
                    ..DateSyncConfig::default()
                },
                DateSyncCommand::Custom { date, folders } => DateSyncConfig {
                    mode: DateSyncMode::Custom,
                    custom_date: Some(date),
                    custom_folders: folders,
                    ..DateSyncConfig::default()
                },
            };
            run_operation(&engine, DateSync::new(config)).await?;
        }
        Command::CopyCues(pair) => {
            let (source, target) = pair.sources();
            run_operation(&engine, HotCueSync::new(HotCueSyncConfig { source, target })).await?;
        }
        Command::CopyMetadata { pair, fields } => {
            let (source, target) = pair.sources();
            let fields = if fields.is_empty() { MetadataField::ALL.to_vec() } else { fields };
            let config = MetadataSyncConfig { source, target, fields };
            run_operation(&engine, MetadataSync::new(config)).await?;
        }
        Command::FixFlac { folder } => {
            run_operation(&engine, FlacFixer::new(FlacFixerConfig { folder })).await?;
        }
        Command::UpdateFormats { playlist, folder } => {
            let config = TracksUpdaterConfig {
                playlist_id: Some(playlist),
                new_folder: Some(folder),
            };
            run_operation(&engine, TracksUpdater::new(config)).await?;
        }
        Command::Convert { playlist, output, format, overwrite, ffmpeg } => {
            let config = ConvertConfig {
                playlist_id: Some(playlist),
                output_folder: Some(output),
                format,
                overwrite,
            };
            let transcoder = Arc::new(CommandTranscoder::ffmpeg().with_program(ffmpeg));
            run_operation(&engine, Convert::new(config, transcoder)).await?;
        }
        Command::Logs { tail } => show_logs(tail)?,
        Command::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save(&config_path)?;
                println!("Saved to {}", config_path.display());
            }
        }
    }
    Ok(())
}

async fn run_operation<O: BatchOperation + 'static>(engine: &Engine, op: O) -> Result<()> {
    let handle = engine.start(op, Arc::new(ConsoleReporter::default()))?;

    let token = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling after the current row");
            token.cancel();
        }
    });

    let result = handle.join().await;
    interrupt.abort();
    result?;
    Ok(())
}

fn describe_cue(cue: &CueRow) -> String {
    let text = |column: &str| match cue.get(column) {
        Some(Value::Integer(i)) => i.to_string(),
        Some(Value::Real(f)) => f.to_string(),
        Some(Value::Text(t)) => t.clone(),
        _ => "-".to_string(),
    };
    format!(
        "kind {:>2}  in {:>8} ms  out {:>8} ms  id {}  {}",
        text("Kind"),
        text("InMsec"),
        text("OutMsec"),
        text("ID"),
        text("Comment")
    )
}

fn show_logs(tail: usize) -> Result<()> {
    let Some(path) = logging::current_log_path() else {
        println!("Logging to file is not enabled");
        return Ok(());
    };
    let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let lines: Vec<&str> = text.lines().collect();
    for line in &lines[lines.len().saturating_sub(tail)..] {
        println!("{line}");
    }
    if let Some(stats) = logging::log_stats() {
        println!(
            "\n{} ({} files, {} bytes total)",
            stats.log_dir, stats.file_count, stats.total_size_bytes
        );
    }
    Ok(())
}
