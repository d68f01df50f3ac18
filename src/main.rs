//! # chapmap CLI
//!
//! ## Usage
//!
//! ```bash
//! chapmap --config ./config/chapmap.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chapmap init` | Create the SQLite database and schema |
//! | `chapmap detect <file>` | Show detected chapters without storing anything |
//! | `chapmap normalize <id> --book <file>` | Detect, normalize and store chapters |
//! | `chapmap status <id>` | Show the latest run and its chapter map |
//! | `chapmap chapters <id>` | List stored chapters |
//! | `chapmap delete <id>` | Remove an adaptation's chapters and runs |
//! | `chapmap serve` | Start the HTTP server |
//!
//! Set `RUST_LOG` (e.g. `RUST_LOG=chapmap=debug`) for diagnostic logs on
//! stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chapmap::config::{self, Config};
use chapmap::core::detect::{analyze, detect};
use chapmap::core::models::{Mode, ReadingAge};
use chapmap::orchestrator::{
    NormalizationRequest, Orchestrator, Page, RunResult, TargetCountSource,
};
use chapmap::sqlite_store::SqliteStore;
use chapmap::{db, migrate, server};

/// chapmap: chapter detection and normalization for book adaptations.
#[derive(Parser)]
#[command(name = "chapmap", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chapmap.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Detect chapters in a book file and print them. Writes nothing.
    Detect {
        /// Plain-text book file.
        file: PathBuf,

        /// keep-original or auto-wordcount.
        #[arg(long, default_value = "keep-original")]
        mode: String,

        /// Reading-age band for auto-wordcount (3-5, 6-8, 9-12).
        #[arg(long, default_value = "6-8")]
        age: String,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Normalize a book into an adaptation's chapters.
    Normalize {
        adaptation_id: i64,

        /// Plain-text book file.
        #[arg(long)]
        book: PathBuf,

        /// keep-original or auto-wordcount.
        #[arg(long, default_value = "keep-original")]
        mode: String,

        /// Trusted chapter count.
        #[arg(long)]
        chapters: Option<usize>,

        /// Reading-age band for auto-wordcount (3-5, 6-8, 9-12).
        #[arg(long)]
        age: Option<String>,
    },

    /// Show the latest run for an adaptation.
    Status {
        adaptation_id: i64,

        #[arg(long)]
        offset: Option<i64>,

        /// Page size, 1 to 1000.
        #[arg(long)]
        limit: Option<i64>,

        #[arg(long)]
        json: bool,
    },

    /// List an adaptation's stored chapters.
    Chapters { adaptation_id: i64 },

    /// Delete an adaptation's chapters, runs and lock.
    Delete { adaptation_id: i64 },

    /// Start the HTTP server.
    Serve,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chapmap=info,chapmap_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_orchestrator(cfg: &Config) -> Result<Orchestrator> {
    let pool = db::connect(cfg).await?;
    migrate::apply_schema(&pool).await?;
    Ok(Orchestrator::from_config(
        Arc::new(SqliteStore::new(pool)),
        cfg,
    ))
}

fn read_book(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read book file: {}", path.display()))
}

fn first_line(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut short: String = line.trim().chars().take(60).collect();
    if line.trim().chars().count() > 60 {
        short.push('…');
    }
    short
}

fn run_detect(cfg: &Config, file: &Path, mode: &str, age: &str, json: bool) -> Result<()> {
    let text = read_book(file)?;
    let mode: Mode = mode.parse().map_err(anyhow::Error::msg)?;
    let opts = cfg.detection.options(mode, ReadingAge::from_band(age));
    let detection = detect(&text, &opts);
    let analysis = analyze(&text, &opts);

    if json {
        let segments: Vec<serde_json::Value> = detection
            .segments
            .iter()
            .map(|s| {
                serde_json::json!({
                    "index": s.index,
                    "word_count": s.word_count,
                    "first_line": first_line(&s.text),
                })
            })
            .collect();
        let out = serde_json::json!({
            "method": detection.method,
            "pattern": detection.pattern,
            "segments": segments,
            "analysis": analysis,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "method: {}{}",
        detection.method,
        detection
            .pattern
            .map(|p| format!(" ({})", p))
            .unwrap_or_default()
    );
    println!("segments: {}", detection.len());
    for s in &detection.segments {
        println!("  {:>4}  {:>7} words  {}", s.index, s.word_count, first_line(&s.text));
    }
    println!(
        "recommendation: {} ({} original chapters, avg {} words)",
        analysis.recommendation, analysis.chapter_count, analysis.average_words
    );
    Ok(())
}

async fn run_normalize(
    cfg: &Config,
    adaptation_id: i64,
    book: &Path,
    mode: &str,
    chapters: Option<usize>,
    age: Option<String>,
) -> Result<()> {
    let text = read_book(book)?;
    let mode: Mode = mode.parse().map_err(anyhow::Error::msg)?;
    let target = match (chapters, age) {
        (Some(n), _) => TargetCountSource::ChapterCount(n),
        (None, Some(band)) => TargetCountSource::WordBudget(ReadingAge::from_band(&band)),
        (None, None) => TargetCountSource::Unspecified,
    };

    let orchestrator = open_orchestrator(cfg).await?;
    let result = orchestrator
        .start_normalization(NormalizationRequest {
            adaptation_id,
            mode,
            target,
            text,
        })
        .await;

    match result {
        RunResult::Succeeded {
            run_id,
            detector,
            detected_count,
            target_count,
        } => {
            println!("run {} succeeded", run_id);
            println!("  detector: {}", detector);
            println!("  detected: {}", detected_count);
            println!("  chapters: {}", target_count);
            Ok(())
        }
        RunResult::Failed { run_id, error } => {
            anyhow::bail!("run {} failed: {}", run_id, error.code())
        }
        RunResult::Rejected { error } => anyhow::bail!("rejected: {}", error.code()),
    }
}

async fn run_status(
    cfg: &Config,
    adaptation_id: i64,
    offset: Option<i64>,
    limit: Option<i64>,
    json: bool,
) -> Result<()> {
    let orchestrator = open_orchestrator(cfg).await?;
    let Some(view) = orchestrator
        .run_status(adaptation_id, Page::new(offset, limit))
        .await?
    else {
        anyhow::bail!("No runs found for adaptation {}", adaptation_id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("run: {}", view.run_id);
    println!("status: {}", view.status);
    if let Some(error) = &view.error {
        println!("error: {}", error);
    }
    if let Some(detector) = view.detector {
        println!("detector: {}", detector);
    }
    println!("detected: {}  target: {}", view.detected_count, view.target_count);
    println!("started: {}", view.started_at.to_rfc3339());
    if let Some(stage) = view.active_stage {
        println!("active stage: {}", stage.as_str());
    }
    println!(
        "chapter map ({} of {} from {}):",
        view.final_map.len(),
        view.final_map_total,
        view.offset
    );
    for entry in &view.final_map {
        let sources: Vec<String> = entry.source_indices.iter().map(|i| i.to_string()).collect();
        println!("  {:>4} <- [{}]", entry.final_index, sources.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Detection needs no database; fall back to defaults without a config.
    if let Commands::Detect {
        file,
        mode,
        age,
        json,
    } = &cli.command
    {
        let cfg = config::load_config(&cli.config)
            .unwrap_or_else(|_| Config::minimal("./data/chapmap.sqlite"));
        return run_detect(&cfg, file, mode, age, *json);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Detect { .. } => unreachable!(),
        Commands::Normalize {
            adaptation_id,
            book,
            mode,
            chapters,
            age,
        } => {
            run_normalize(&cfg, adaptation_id, &book, &mode, chapters, age).await?;
        }
        Commands::Status {
            adaptation_id,
            offset,
            limit,
            json,
        } => {
            run_status(&cfg, adaptation_id, offset, limit, json).await?;
        }
        Commands::Chapters { adaptation_id } => {
            let orchestrator = open_orchestrator(&cfg).await?;
            let chapters = orchestrator.chapters(adaptation_id).await?;
            println!("{} chapters", chapters.len());
            for c in &chapters {
                println!(
                    "  {:>4}  {:>7} words  {}",
                    c.chapter_number,
                    chapmap::core::text::word_count(&c.text),
                    first_line(&c.text)
                );
            }
        }
        Commands::Delete { adaptation_id } => {
            let orchestrator = open_orchestrator(&cfg).await?;
            if !orchestrator.delete_adaptation(adaptation_id).await? {
                anyhow::bail!("adaptation {} has a run in progress", adaptation_id);
            }
            println!("Deleted adaptation {}.", adaptation_id);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
