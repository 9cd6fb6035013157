use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use moodreel::results::{guess_mime_type, CatalogEvent, ResultDir, ResultId, ResultKey};
use moodreel::telemetry::Interpolation;
use moodreel::{Config, MediaKind, MediaSource, ResultStore, UploadPipeline};

/// Capture media, send it for emotion analysis, replay the results.
#[derive(Parser, Debug)]
#[command(name = "moodreel", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the results directory
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// Override the analysis server base URL
    #[arg(long, global = true)]
    server: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List results and their upload status
    List {
        #[arg(long)]
        json: bool,
    },
    /// Import a photo or video and upload it for analysis
    Add {
        file: PathBuf,
        #[arg(short, long)]
        title: String,
        /// Image or Video; guessed from the file extension when omitted
        #[arg(long)]
        kind: Option<MediaKind>,
        /// Move the file into the results directory instead of copying it
        #[arg(long = "move")]
        move_file: bool,
    },
    /// Upload a failed result again
    Retry { id: ResultId },
    /// Delete results with all their files
    Delete {
        #[arg(required = true)]
        ids: Vec<ResultId>,
    },
    /// Emotion values of a ready result at a playback position
    Emotions {
        id: ResultId,
        /// Playback position in milliseconds
        #[arg(long, default_value_t = 0)]
        at: u64,
        /// Show the covering frame without interpolation
        #[arg(long)]
        nearest: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print shell completions
    Completions { shell: Shell },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "moodreel", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.results_dir {
        config.storage.results_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(server) = cli.server {
        config.upload.base_url = server;
    }
    config.validate()?;

    let store = Arc::new(ResultStore::new(config.storage.results_dir()));
    store
        .initialize()
        .await
        .with_context(|| format!("Failed to load results from {}", store.root().display()))?;

    match cli.command {
        Command::List { json } => list(&store, json),
        Command::Add {
            file,
            title,
            kind,
            move_file,
        } => {
            let kind = match kind {
                Some(kind) => kind,
                None => kind_from_path(&file)?,
            };
            let source = if move_file {
                MediaSource::Move(file)
            } else {
                MediaSource::Copy(file)
            };
            let (id, dir) = store.create(&title, kind, source).await?;
            println!("Created result {id}");

            let pipeline = UploadPipeline::from_config(Arc::clone(&store), &config.upload)?;
            let events = store.subscribe();
            let handle = pipeline.upload(id, ResultDir::new(&dir).media(), kind);
            follow(&store, id, handle, events).await
        }
        Command::Retry { id } => {
            let pipeline = UploadPipeline::from_config(Arc::clone(&store), &config.upload)?;
            let events = store.subscribe();
            let Some(handle) = pipeline.retry(id) else {
                bail!("Result {id} does not exist or has not failed");
            };
            follow(&store, id, handle, events).await
        }
        Command::Delete { ids } => {
            for id in ids {
                if store.get(id).is_none() {
                    warn!("No result with id {}", id);
                }
                store.set_selected(id, true);
            }
            for key in store.delete_selected().await {
                println!("Deleted {key}");
            }
            Ok(())
        }
        Command::Emotions {
            id,
            at,
            nearest,
            json,
        } => {
            let decoder = store.load_telemetry(id, &config.telemetry).await?;
            let policy = if nearest {
                Interpolation::Nearest
            } else {
                config.telemetry.interpolation
            };
            let values = decoder.value_at_with(at, policy);
            if json {
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                for (emotion, value) in values.iter() {
                    println!("{:<10} {:>8.4}", emotion.label(), value);
                }
                let (top, _) = values.dominant();
                println!(
                    "-- {} at {} ms of {} ms ({} frames)",
                    top,
                    at,
                    decoder.duration_ms(),
                    decoder.frame_count()
                );
            }
            Ok(())
        }
        Command::Completions { .. } => Ok(()),
    }
}

fn kind_from_path(file: &Path) -> Result<MediaKind> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("Media file has no usable name")?;
    let mime = guess_mime_type(name);
    MediaKind::from_mime(&mime)
        .with_context(|| format!("Cannot tell whether {name} is an image or a video; pass --kind"))
}

fn list(store: &ResultStore, json: bool) -> Result<()> {
    let catalog = store.list();
    if json {
        let entries: Vec<_> = catalog.iter().collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if catalog.is_empty() {
        println!("No results yet.");
        return Ok(());
    }
    for entry in catalog.iter() {
        let created = chrono::DateTime::from_timestamp_millis(entry.created_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| entry.created_at.to_string());
        println!(
            "{:>3}  {:<5}  {:<14}  {}  {}",
            entry.id,
            entry.media_kind.to_string(),
            entry.upload_status.to_string(),
            created,
            entry.title
        );
    }
    Ok(())
}

/// Print status changes of one upload until its task ends.
async fn follow(
    store: &ResultStore,
    id: ResultId,
    mut handle: JoinHandle<()>,
    mut events: tokio::sync::broadcast::Receiver<CatalogEvent>,
) -> Result<()> {
    let key: Option<ResultKey> = store.key_of(id);
    loop {
        tokio::select! {
            joined = &mut handle => {
                joined.context("Upload task panicked")?;
                break;
            }
            event = events.recv() => match event {
                Ok(CatalogEvent::StatusChanged { key: changed, status }) if Some(&changed) == key.as_ref() => {
                    eprintln!("{status}");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    (&mut handle).await.context("Upload task panicked")?;
                    break;
                }
            },
        }
    }

    match store.get(id).map(|e| e.upload_status) {
        Some(status) if status.is_ready() => {
            println!("Result {id} is ready");
            Ok(())
        }
        Some(status) => bail!("Result {id} ended as {status}"),
        None => bail!("Result {id} was deleted during upload"),
    }
}
