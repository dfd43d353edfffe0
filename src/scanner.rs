use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::decoder::{Decoder, SymphoniaDecoder, TimeoutDecoder};
use crate::fingerprint::fingerprint;
use crate::meter::compute_dr;
use crate::models::{BatchResult, ScanEvent, ScanRecord, TrackReport};
use crate::track::FormatCode;

#[derive(Debug, Error)]
pub enum ScanError {
    /// A worker lost or duplicated results; the batch cannot be trusted.
    #[error("collected {collected} results for {dispatched} dispatched files")]
    ResultCountMismatch { dispatched: usize, collected: usize },
    #[error("failed to read directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Library-side scan settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub jobs: usize,
    /// Per-file decode timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            timeout: None,
        }
    }
}

impl ScanConfig {
    /// The symphonia decoder, bounded by the per-file timeout when one is set.
    pub fn decoder(&self) -> Box<dyn Decoder> {
        match self.timeout {
            Some(timeout) => Box::new(TimeoutDecoder::new(SymphoniaDecoder, timeout)),
            None => Box::new(SymphoniaDecoder),
        }
    }
}

/// Default worker count: half the CPUs, at least two, leaving room for
/// the decoding work each task does.
pub fn default_jobs() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    jobs_for_cpus(cpus)
}

fn jobs_for_cpus(cpus: usize) -> usize {
    ((cpus as f64 / 2.0).round_ties_even() as usize).max(2)
}

/// Check if a path has a recognized audio file extension.
pub fn is_audio_file(path: &Path) -> bool {
    FormatCode::from_path(path).is_some()
}

/// List the audio files directly inside `dir`, sorted by path.
pub fn audio_files_in_dir(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let io_error = |source| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() && is_audio_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Keep only recognized audio files from an explicit list, sorted by path.
pub fn filter_audio_files<I, P>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let mut files: Vec<PathBuf> = paths
        .into_iter()
        .map(Into::into)
        .filter(|p| is_audio_file(p))
        .collect();
    files.sort();
    files
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Decode and measure a single file. Never fails: decode errors become a
/// failure record and are logged.
pub fn scan_one<D: Decoder + ?Sized>(decoder: &D, path: &Path) -> ScanRecord {
    let file_name = file_name_of(path);
    let start = Instant::now();

    let buffer = match decoder.decode(path) {
        Ok(buffer) => buffer,
        Err(e) => {
            tracing::debug!(file = %file_name, error = %e, "- fail -");
            return ScanRecord::failure(file_name);
        }
    };

    let measurement = compute_dr(&buffer);
    let report = TrackReport::new(measurement, buffer.duration(), fingerprint(&buffer));

    tracing::debug!(
        file = %file_name,
        dr = report.dr_value,
        frames = buffer.frames(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "scanned"
    );

    ScanRecord::success(file_name, report)
}

/// Order worker output by enumeration index and verify that every
/// dispatched file produced exactly one record.
pub fn collect_ordered(
    dispatched: usize,
    mut indexed: Vec<(usize, ScanRecord)>,
) -> Result<Vec<ScanRecord>, ScanError> {
    let mismatch = ScanError::ResultCountMismatch {
        dispatched,
        collected: indexed.len(),
    };
    if indexed.len() != dispatched {
        return Err(mismatch);
    }

    indexed.sort_by_key(|(idx, _)| *idx);
    if indexed.iter().enumerate().any(|(i, (idx, _))| i != *idx) {
        return Err(mismatch);
    }

    Ok(indexed.into_iter().map(|(_, record)| record).collect())
}

/// Scan `files` on a pool of `jobs` worker threads.
pub fn scan_batch<D: Decoder + ?Sized>(
    files: &[PathBuf],
    decoder: &D,
    jobs: usize,
) -> Result<BatchResult, ScanError> {
    scan_batch_with_events(files, decoder, jobs, None)
}

/// Scan `files` on a pool of `jobs` worker threads, reporting progress
/// through `events` when given.
///
/// Records come back in the order of `files`, whatever order the workers
/// finish in. A worker that panics takes its records with it, which
/// surfaces as [`ScanError::ResultCountMismatch`].
pub fn scan_batch_with_events<D: Decoder + ?Sized>(
    files: &[PathBuf],
    decoder: &D,
    jobs: usize,
    events: Option<Sender<ScanEvent>>,
) -> Result<BatchResult, ScanError> {
    if files.is_empty() {
        return Ok(BatchResult::from_records(Vec::new()));
    }

    let jobs = jobs.max(1).min(files.len());
    let next_index = AtomicUsize::new(0);
    let start = Instant::now();

    let indexed_results: Vec<(usize, ScanRecord)> = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(jobs);
        for worker in 0..jobs {
            let next_index = &next_index;
            let events = events.clone();
            handles.push(scope.spawn(move || {
                let mut results = Vec::new();
                loop {
                    let index = next_index.fetch_add(1, Ordering::SeqCst);
                    if index >= files.len() {
                        break;
                    }
                    let path = &files[index];
                    if let Some(tx) = &events {
                        let _ = tx.send(ScanEvent::FileStarted {
                            index,
                            file_name: file_name_of(path),
                        });
                    }
                    let record = scan_one(decoder, path);
                    if let Some(tx) = &events {
                        let _ = tx.send(ScanEvent::FileCompleted {
                            index,
                            record: record.clone(),
                        });
                    }
                    results.push((index, record));
                }
                tracing::debug!(worker, files = results.len(), "worker finished");
                results
            }));
        }

        let mut collected = Vec::with_capacity(files.len());
        for handle in handles {
            match handle.join() {
                Ok(results) => collected.extend(results),
                Err(_) => tracing::error!("scan worker panicked; its results are lost"),
            }
        }
        collected
    });

    let records = collect_ordered(files.len(), indexed_results)?;
    let result = BatchResult::from_records(records);

    tracing::info!(
        files = files.len(),
        qualifying = result.successful_count(),
        failed = result.failure_count(),
        dr = result.aggregate_dr(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "batch complete"
    );

    Ok(result)
}

/// List `dir` and scan its audio files as one batch.
pub fn scan_directory<D: Decoder + ?Sized>(
    dir: &Path,
    decoder: &D,
    jobs: usize,
    events: Option<Sender<ScanEvent>>,
) -> Result<BatchResult, ScanError> {
    let files = audio_files_in_dir(dir)?;
    scan_batch_with_events(&files, decoder, jobs, events)
}
