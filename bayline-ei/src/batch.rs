//! Concurrent file import
//!
//! Drives a set of estimate files through detection, parsing, and merge
//! with a bounded number of files in flight. Failures are isolated per
//! file so one bad export cannot sink the batch. A retryable database
//! failure, such as two files racing the same claim number into the
//! unique index, gets a short backoff and another attempt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::detect::{detect_format, FileFormat};
use crate::error::ImportError;
use crate::merge::{ImportAction, MergeEngine, MergeOutcome};
use crate::parsers::{bms, ems};

/// Tunables for one batch run
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Files in flight at once
    pub concurrency: usize,
    /// Attempts per file before a retryable failure becomes terminal
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles per attempt
    pub retry_backoff_ms: u64,
    /// Caller-supplied format override applied to every file
    pub format_hint: Option<FileFormat>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            retry_backoff_ms: 250,
            format_hint: None,
        }
    }
}

impl From<&bayline_common::config::ImportConfig> for BatchConfig {
    fn from(config: &bayline_common::config::ImportConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            max_attempts: config.retry_attempts,
            retry_backoff_ms: config.retry_backoff_ms,
            format_hint: None,
        }
    }
}

/// Per-file import result
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<MergeOutcome, ImportError>,
}

/// Batch roll-up for reporting
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn tally(outcomes: &[FileOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match &outcome.result {
                Ok(merge) => match merge.action {
                    ImportAction::Created => summary.created += 1,
                    ImportAction::Updated => summary.updated += 1,
                    ImportAction::Skipped => summary.skipped += 1,
                },
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed
    }
}

/// Runs batches of estimate files against one merge engine.
pub struct BatchRunner {
    engine: MergeEngine,
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(engine: MergeEngine, config: BatchConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &MergeEngine {
        &self.engine
    }

    /// Import every path with per-file error isolation. Outcomes come back
    /// in input order regardless of completion order.
    pub async fn run(&self, paths: Vec<PathBuf>) -> Vec<FileOutcome> {
        let concurrency = self.config.concurrency.max(1);
        info!(files = paths.len(), concurrency, "starting import batch");

        let mut outcomes: Vec<(usize, FileOutcome)> = stream::iter(paths.into_iter().enumerate())
            .map(|(index, path)| {
                let engine = self.engine.clone();
                let config = self.config.clone();

                async move {
                    let result = import_path(&engine, &path, &config).await;
                    if let Err(err) = &result {
                        warn!(file = %path.display(), error = %err, "import failed");
                    }
                    (index, FileOutcome { path, result })
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

/// Read, detect, parse, and merge one file.
async fn import_path(
    engine: &MergeEngine,
    path: &Path,
    config: &BatchConfig,
) -> Result<MergeOutcome, ImportError> {
    let bytes = tokio::fs::read(path).await?;
    // Estimate exports are ASCII-adjacent; lossy decoding keeps odd vendor
    // encodings from aborting the whole file
    let content = String::from_utf8_lossy(&bytes);
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    import_content(engine, filename, &content, config).await
}

/// Merge already-loaded content. Entry point for callers that bypass the
/// filesystem, such as an upload handler.
pub async fn import_content(
    engine: &MergeEngine,
    filename: &str,
    content: &str,
    config: &BatchConfig,
) -> Result<MergeOutcome, ImportError> {
    let format = detect_format(filename, content, config.format_hint);
    let payload = match format {
        FileFormat::Bms => bms::parse_bms(content)?,
        FileFormat::Ems => ems::parse_ems(content)?,
    };
    info!(
        file = filename,
        format = %format,
        source = payload.meta.source_system.as_str(),
        lines = payload.lines.len(),
        "parsed estimate"
    );
    if !payload.meta.unknown_tags.is_empty() {
        warn!(
            file = filename,
            count = payload.meta.unknown_tags.len(),
            tags = ?payload.meta.unknown_tags,
            retained = ?payload.meta.unknown_records,
            "estimate parsed with unrecognized structure"
        );
    }

    let mut attempt: u32 = 1;
    loop {
        match engine.upsert_job(&payload).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                let backoff = Duration::from_millis(config.retry_backoff_ms << (attempt - 1));
                warn!(
                    file = filename,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retryable merge failure, backing off"
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bayline_common::db::memory_pool;
    use uuid::Uuid;

    const EMS_FILE: &str = "HDR|Mitchell|7.1|20240816\n\
        CLM|CLM-9021|Pacific Mutual|POL-443|500.00\n\
        CST|Reyes|Carmen||carmen.reyes@example.com|(604) 555-0188\n\
        VEH|2T1BURHE5JC014482|2018|Toyota|Corolla\n\
        EST|RO-2288|20240816|1450.00|1390.00\n";

    #[tokio::test]
    async fn import_content_detects_parses_and_merges() {
        let pool = memory_pool().await.unwrap();
        let engine = MergeEngine::new(pool, "Bayline Collision");

        let first = import_content(&engine, "export.ems", EMS_FILE, &BatchConfig::default())
            .await
            .unwrap();
        assert_eq!(first.action, ImportAction::Created);

        // Same file again converges on the same job
        let second = import_content(&engine, "export.ems", EMS_FILE, &BatchConfig::default())
            .await
            .unwrap();
        assert_eq!(second.action, ImportAction::Updated);
        assert_eq!(second.job_id, first.job_id);
        assert_eq!(second.job_number, first.job_number);
    }

    #[tokio::test]
    async fn unparseable_content_is_a_terminal_error() {
        let pool = memory_pool().await.unwrap();
        let engine = MergeEngine::new(pool, "Bayline Collision");

        let result =
            import_content(&engine, "junk.txt", "not an estimate", &BatchConfig::default()).await;
        assert!(matches!(result, Err(ImportError::Parse(_))));
    }

    #[test]
    fn summary_tallies_every_outcome_kind() {
        let ok = |action| FileOutcome {
            path: PathBuf::from("a"),
            result: Ok(MergeOutcome {
                action,
                job_id: Uuid::new_v4(),
                job_number: "J20240816-001".to_string(),
            }),
        };
        let outcomes = vec![
            ok(ImportAction::Created),
            ok(ImportAction::Created),
            ok(ImportAction::Updated),
            ok(ImportAction::Skipped),
            FileOutcome {
                path: PathBuf::from("b"),
                result: Err(ImportError::Parse(crate::error::ParseError::NoRecognizedRecords)),
            },
        ];

        let summary = BatchSummary::tally(&outcomes);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 5);
    }
}
