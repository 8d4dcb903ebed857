use crate::config::{ConflictPolicy, IngestConfig, ReconcileStrategy};
use crate::db::models::{ReconcileCounts, CROP_INGEST_ACTOR, WEATHER_INGEST_ACTOR};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::parser::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Summed result of one ingestion run across all files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files: usize,
    pub counts: ReconcileCounts,
}

#[derive(Debug, Clone, Copy)]
enum FileKind {
    Weather,
    Crop,
}

/// Fans per-file ingestion work out across a bounded pool of workers.
///
/// Each worker runs parse-then-reconcile for one file against the shared
/// connection pool; the store's unique constraints are the only coordination
/// between workers. Dispatched work always runs to completion; the first
/// error encountered is propagated after all in-flight files settle.
pub struct Coordinator {
    repository: Arc<Repository>,
    config: IngestConfig,
}

impl Coordinator {
    pub fn new(repository: Arc<Repository>, config: IngestConfig) -> Self {
        Self { repository, config }
    }

    /// Ingest every weather file in the configured weather directory.
    pub async fn ingest_weather(&self) -> Result<IngestReport> {
        self.run(Path::new(&self.config.weather_dir), FileKind::Weather)
            .await
    }

    /// Ingest every crop yield file in the configured crop directory.
    pub async fn ingest_crops(&self) -> Result<IngestReport> {
        self.run(Path::new(&self.config.crop_dir), FileKind::Crop)
            .await
    }

    async fn run(&self, dir: &Path, kind: FileKind) -> Result<IngestReport> {
        let files = discover_files(dir, self.config.file_pattern.as_deref())?;

        if files.is_empty() {
            info!("No files found in {}", dir.display());
            return Ok(IngestReport::default());
        }

        info!(
            "Ingesting {} files from {} with {} workers",
            files.len(),
            dir.display(),
            self.config.workers
        );

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut join_set: JoinSet<Result<(PathBuf, ReconcileCounts)>> = JoinSet::new();

        for path in files {
            let semaphore = semaphore.clone();
            let repository = self.repository.clone();
            let strategy = self.config.strategy;
            let policy = self.config.on_conflict;

            join_set.spawn(async move {
                // Never closed while workers are running.
                let _permit = semaphore.acquire_owned().await.expect("worker pool closed");

                let counts = match kind {
                    FileKind::Weather => {
                        process_weather_file(&repository, &path, strategy, policy).await?
                    }
                    FileKind::Crop => {
                        process_crop_file(&repository, &path, strategy, policy).await?
                    }
                };

                Ok((path, counts))
            });
        }

        // Let every dispatched file settle before reporting or failing.
        let mut report = IngestReport::default();
        let mut first_error: Option<AppError> = None;

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok((path, counts))) => {
                    info!(
                        "Processed {}: {} created, {} updated, {} skipped",
                        path.display(),
                        counts.created,
                        counts.updated,
                        counts.skipped
                    );
                    report.files += 1;
                    report.counts.merge(counts);
                }
                Ok(Err(e)) => {
                    error!("File ingestion failed: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(join_error) => {
                    error!("Ingestion worker panicked: {}", join_error);
                    first_error.get_or_insert(join_error.into());
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            "Ingestion complete: {} files, {} created, {} updated, {} skipped",
            report.files, report.counts.created, report.counts.updated, report.counts.skipped
        );

        Ok(report)
    }
}

async fn process_weather_file(
    repository: &Repository,
    path: &Path,
    strategy: ReconcileStrategy,
    policy: ConflictPolicy,
) -> Result<ReconcileCounts> {
    let (station_id, readings) = Parser::parse_weather_file(path)?;

    // Get-or-create once per file, not per record.
    repository
        .ensure_station(&station_id, WEATHER_INGEST_ACTOR)
        .await?;

    repository
        .write_weather_readings(&station_id, &readings, strategy, policy, WEATHER_INGEST_ACTOR)
        .await
}

async fn process_crop_file(
    repository: &Repository,
    path: &Path,
    strategy: ReconcileStrategy,
    policy: ConflictPolicy,
) -> Result<ReconcileCounts> {
    let readings = Parser::parse_crop_file(path)?;

    repository
        .write_crop_readings(&readings, strategy, policy, CROP_INGEST_ACTOR)
        .await
}

/// Enumerate regular files directly under `dir`, optionally filtered by a
/// glob pattern on the file name, sorted for a deterministic dispatch order.
fn discover_files(dir: &Path, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let pattern = pattern
        .map(glob::Pattern::new)
        .transpose()
        .map_err(|e| AppError::Config(format!("Invalid file pattern: {}", e)))?;

    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        if let Some(pattern) = &pattern {
            let name = entry.file_name();
            let matches = name
                .to_str()
                .map(|n| pattern.matches(n))
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }

        files.push(entry.path());
    }

    files.sort();
    Ok(files)
}
