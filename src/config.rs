//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/chapmap.sqlite"
//!
//! [runs]
//! max_ops = 2000
//! stale_run_timeout_secs = 1800
//! reprocess_cooldown_secs = 60
//!
//! [detection]
//! html_paragraph_breaks = true
//! min_header_gap_lines = 30
//! toc_scan_lines = 300
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```
//!
//! Only `[db]` is required. `CHAPMAP_MAX_OPS`, `STALE_RUN_TIMEOUT_SECONDS`
//! and `REPROCESS_COOLDOWN_SECONDS` override the `[runs]` values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use chapmap_core::detect::DetectOptions;
use chapmap_core::models::{Mode, ReadingAge};
use chapmap_core::text::ParagraphPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub runs: RunsConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunsConfig {
    /// Maximum persisted operation-log length, summary included.
    #[serde(default = "default_max_ops")]
    pub max_ops: usize,
    #[serde(default = "default_stale_run_timeout")]
    pub stale_run_timeout_secs: u64,
    /// 0 disables the cooldown.
    #[serde(default = "default_reprocess_cooldown")]
    pub reprocess_cooldown_secs: u64,
}

/// Upper bound for `stale_run_timeout_secs` and `reprocess_cooldown_secs`
/// (one year).
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

fn default_max_ops() -> usize {
    2000
}
fn default_stale_run_timeout() -> u64 {
    1800
}
fn default_reprocess_cooldown() -> u64 {
    60
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            max_ops: default_max_ops(),
            stale_run_timeout_secs: default_stale_run_timeout(),
            reprocess_cooldown_secs: default_reprocess_cooldown(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    /// Treat `</p>` and `<br>` tags as paragraph boundaries.
    #[serde(default = "default_true")]
    pub html_paragraph_breaks: bool,
    #[serde(default = "default_min_header_gap")]
    pub min_header_gap_lines: usize,
    #[serde(default = "default_toc_scan_lines")]
    pub toc_scan_lines: usize,
}

fn default_true() -> bool {
    true
}
fn default_min_header_gap() -> usize {
    30
}
fn default_toc_scan_lines() -> usize {
    300
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            html_paragraph_breaks: true,
            min_header_gap_lines: default_min_header_gap(),
            toc_scan_lines: default_toc_scan_lines(),
        }
    }
}

impl DetectionConfig {
    pub fn paragraph_policy(&self) -> ParagraphPolicy {
        ParagraphPolicy {
            html_breaks: self.html_paragraph_breaks,
        }
    }

    /// Detection options for one run.
    pub fn options(&self, mode: Mode, age: ReadingAge) -> DetectOptions {
        DetectOptions {
            mode,
            words_per_segment: age.words_per_chapter(),
            paragraphs: self.paragraph_policy(),
            min_header_gap: self.min_header_gap_lines,
            toc_scan_lines: self.toc_scan_lines,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Config {
    /// Defaults everywhere except the database path.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            runs: RunsConfig::default(),
            detection: DetectionConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CHAPMAP_MAX_OPS") {
            self.runs.max_ops = v
                .trim()
                .parse()
                .with_context(|| format!("CHAPMAP_MAX_OPS must be an integer, got '{}'", v))?;
        }
        if let Some(v) = lookup("STALE_RUN_TIMEOUT_SECONDS") {
            self.runs.stale_run_timeout_secs = v.trim().parse().with_context(|| {
                format!("STALE_RUN_TIMEOUT_SECONDS must be an integer, got '{}'", v)
            })?;
        }
        if let Some(v) = lookup("REPROCESS_COOLDOWN_SECONDS") {
            self.runs.reprocess_cooldown_secs = v.trim().parse().with_context(|| {
                format!("REPROCESS_COOLDOWN_SECONDS must be an integer, got '{}'", v)
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.runs.max_ops < 1 {
            anyhow::bail!("runs.max_ops must be >= 1");
        }
        if self.runs.stale_run_timeout_secs == 0 {
            anyhow::bail!("runs.stale_run_timeout_secs must be > 0");
        }
        if self.runs.stale_run_timeout_secs > MAX_WINDOW_SECS {
            anyhow::bail!(
                "runs.stale_run_timeout_secs must be <= {}, got {}",
                MAX_WINDOW_SECS,
                self.runs.stale_run_timeout_secs
            );
        }
        if self.runs.reprocess_cooldown_secs > MAX_WINDOW_SECS {
            anyhow::bail!(
                "runs.reprocess_cooldown_secs must be <= {}, got {}",
                MAX_WINDOW_SECS,
                self.runs.reprocess_cooldown_secs
            );
        }
        if self.detection.toc_scan_lines == 0 {
            anyhow::bail!("detection.toc_scan_lines must be > 0");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;

    Ok(config)
}
