//! Core data models used throughout chapmap.
//!
//! Detected segments, normalization operations and lineage entries are
//! transient values produced inside one run. [`Run`], [`ActiveRunPointer`]
//! and [`LockRow`] are the durable records kept by a
//! [`Store`](crate::store::Store).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RunError;
use crate::text::word_count;

/// A raw chapter candidate produced by detection, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedSegment {
    /// Position in detection order, starting at 0.
    pub index: usize,
    pub text: String,
    pub word_count: usize,
}

impl DetectedSegment {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        let word_count = word_count(&text);
        Self {
            index,
            text,
            word_count,
        }
    }

    /// Build an indexed segment list from plain texts.
    pub fn from_texts<I, S>(texts: I) -> Vec<DetectedSegment>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .enumerate()
            .map(|(i, t)| DetectedSegment::new(i, t))
            .collect()
    }
}

/// One step of the normalization audit log.
///
/// Indices in `from`/`to` refer to positions in the working segment list
/// at the time the step was taken, not to detected indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Merge {
        from: [usize; 2],
        to: usize,
        lengths_before: [usize; 2],
        lengths_after: [usize; 1],
    },
    Split {
        from: [usize; 1],
        to: usize,
        lengths_before: [usize; 1],
        lengths_after: [usize; 2],
    },
    Summary {
        detector: DetectionMethod,
        rule: Rule,
        detected_count: usize,
        target_count: usize,
        merge_ops: usize,
        split_ops: usize,
    },
}

impl Operation {
    pub fn is_summary(&self) -> bool {
        matches!(self, Operation::Summary { .. })
    }
}

/// Lineage of one final segment back to detected segment indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapEntry {
    pub final_index: usize,
    pub source_indices: Vec<usize>,
}

/// How segments were detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Table of contents entries located in the body.
    Toc,
    /// Direct header pattern matching.
    Regex,
    /// Paragraph accumulation by word budget.
    AutoWordcount,
    /// Nothing matched.
    None,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::Toc => "toc",
            DetectionMethod::Regex => "regex",
            DetectionMethod::AutoWordcount => "auto_wordcount",
            DetectionMethod::None => "none",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Segmentation strategy requested for an adaptation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Structural detection of the book's own chapters.
    KeepOriginal,
    /// Word-count segmentation sized for a reading-age band.
    AutoWordcount,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::KeepOriginal => "keep-original",
            Mode::AutoWordcount => "auto-wordcount",
        }
    }

    /// The rule name recorded in run metadata for this mode.
    pub fn rule(&self) -> Rule {
        match self {
            Mode::KeepOriginal => Rule::StrictKeepOriginal,
            Mode::AutoWordcount => Rule::AutoWordcount,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    /// Accepts the canonical names as well as UI labels such as
    /// "Keep original" or "Auto-segment by word count".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lc = s.trim().to_lowercase();
        if lc.contains("keep") {
            Ok(Mode::KeepOriginal)
        } else if lc.contains("auto") || lc.contains("word") {
            Ok(Mode::AutoWordcount)
        } else {
            Err(format!(
                "unknown chapter mode '{}': expected keep-original or auto-wordcount",
                s
            ))
        }
    }
}

/// Rule name recorded in run metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    StrictKeepOriginal,
    AutoWordcount,
}

/// Target reader age band; drives the word budget per chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadingAge {
    #[serde(rename = "3-5")]
    Preschool,
    #[default]
    #[serde(rename = "6-8")]
    EarlyReader,
    #[serde(rename = "9-12")]
    MiddleGrade,
}

impl ReadingAge {
    /// Parse a band label; unknown labels fall back to the default band.
    pub fn from_band(band: &str) -> Self {
        match band.trim() {
            "3-5" => ReadingAge::Preschool,
            "6-8" => ReadingAge::EarlyReader,
            "9-12" => ReadingAge::MiddleGrade,
            _ => ReadingAge::default(),
        }
    }

    pub fn words_per_chapter(&self) -> usize {
        match self {
            ReadingAge::Preschool => 500,
            ReadingAge::EarlyReader => 1500,
            ReadingAge::MiddleGrade => 2500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingAge::Preschool => "3-5",
            ReadingAge::EarlyReader => "6-8",
            ReadingAge::MiddleGrade => "9-12",
        }
    }
}

/// Lifecycle state of a [`Run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// Run-level metadata recorded at completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunMeta {
    pub rule: Option<Rule>,
    pub detector: Option<DetectionMethod>,
    /// Name of the winning header pattern, for regex detection.
    pub pattern: Option<String>,
    pub detected_count: usize,
    pub target_count: usize,
    pub merge_ops: usize,
    pub split_ops: usize,
}

/// Fields written when a run is created.
///
/// The orchestrator creates the row as soon as it holds the lock, before
/// anything is detected, so its counts start at 0 and are set by
/// [`RunCompletion`].
#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_id: String,
    pub adaptation_id: i64,
    pub detected_count: usize,
    pub target_count: usize,
    pub started_at: DateTime<Utc>,
}

/// Fields written by the single terminal update of a run.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub finished_at: DateTime<Utc>,
    pub detected_count: usize,
    pub target_count: usize,
    pub duration_ms: i64,
    /// Already capped by the caller; stores persist it as given.
    pub operations: Vec<Operation>,
    pub final_map: Vec<SourceMapEntry>,
    pub status: RunStatus,
    pub error: Option<RunError>,
    pub meta: RunMeta,
}

/// A durable normalization attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Run {
    pub run_id: String,
    pub adaptation_id: i64,
    pub detected_count: usize,
    pub target_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub operations: Vec<Operation>,
    pub final_map: Vec<SourceMapEntry>,
    pub status: RunStatus,
    /// Error code, see [`RunError::code`].
    pub error: Option<String>,
    pub meta: RunMeta,
}

impl Run {
    /// Detector named by the summary operation at the head of the log.
    pub fn detector(&self) -> Option<DetectionMethod> {
        match self.operations.first() {
            Some(Operation::Summary { detector, .. }) => Some(*detector),
            _ => self.meta.detector,
        }
    }
}

/// Stage of an in-flight run, as recorded on the active pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Starting,
    Normalizing,
    Persisting,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Starting => "starting",
            RunStage::Normalizing => "normalizing",
            RunStage::Persisting => "persisting",
        }
    }
}

impl FromStr for RunStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(RunStage::Starting),
            "normalizing" => Ok(RunStage::Normalizing),
            "persisting" => Ok(RunStage::Persisting),
            other => Err(format!("unknown run stage '{}'", other)),
        }
    }
}

/// Durable marker that a run is in flight for an adaptation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveRunPointer {
    pub adaptation_id: i64,
    pub run_id: String,
    pub stage: RunStage,
    pub updated_at: DateTime<Utc>,
}

/// An adaptation lock row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRow {
    pub adaptation_id: i64,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

/// A persisted chapter of an adaptation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chapter {
    /// 1-based.
    pub chapter_number: i64,
    pub text: String,
    pub hash: String,
}
