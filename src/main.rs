use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use dr14::decoder::Decoder;
use dr14::format;
use dr14::logging::{self, Verbosity};
use dr14::models::{BatchResult, Outcome, ScanEvent};
use dr14::scanner::{self, ScanConfig};

#[derive(Parser)]
#[command(name = "dr14", about = "Compute the DR14 dynamic range of audio files")]
struct Cli {
    /// Audio file or directory (default: current directory)
    path: Option<PathBuf>,

    /// Read newline-separated file paths from FILE, or "-" for STDIN
    #[arg(long, value_name = "FILE", conflicts_with = "path")]
    files_list: Option<String>,

    /// Also scan every subdirectory, each as its own batch
    #[arg(short, long)]
    recursive: bool,

    /// Number of parallel scan jobs (default: half the CPU cores, at least 2)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Scan one file at a time
    #[arg(short = '1', long, conflicts_with = "jobs")]
    single_thread: bool,

    /// Give up decoding a file after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Output as JSON instead of table
    #[arg(long)]
    json: bool,

    /// Only print warnings and results
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Print debug output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    fn scan_config(&self) -> ScanConfig {
        let defaults = ScanConfig::default();
        let jobs = if self.single_thread {
            1
        } else {
            self.jobs.unwrap_or(defaults.jobs)
        };
        ScanConfig {
            jobs,
            timeout: self.timeout.map(Duration::from_secs),
        }
    }
}

#[derive(Serialize)]
struct DirectoryReport<'a> {
    directory: &'a Path,
    #[serde(flatten)]
    result: &'a BatchResult,
}

/// Run one batch, printing a progress line per file as it completes.
fn run_batch(files: &[PathBuf], decoder: &dyn Decoder, jobs: usize, quiet: bool) -> Result<BatchResult> {
    let (tx, rx) = mpsc::channel::<ScanEvent>();
    let printer = std::thread::spawn(move || {
        for event in rx {
            if let ScanEvent::FileCompleted { record, .. } = event {
                if quiet {
                    continue;
                }
                match &record.outcome {
                    Outcome::Success(report) => {
                        eprintln!("{}: \t DR {}", record.file_name, report.dr_value)
                    }
                    Outcome::Failure => eprintln!("- fail - {}", record.file_name),
                }
            }
        }
    });

    let result = scanner::scan_batch_with_events(files, decoder, jobs, Some(tx));
    if printer.join().is_err() {
        tracing::warn!("progress printer panicked; some progress lines may be missing");
    }
    Ok(result?)
}

fn read_files_list(source: &str) -> Result<Vec<PathBuf>> {
    let mut data = String::new();
    if source == "-" {
        std::io::stdin()
            .read_to_string(&mut data)
            .context("Failed to read file list from STDIN")?;
    } else {
        data = std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read file list: {}", source))?;
    }
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Walk `dir` depth-first in sorted order. Symlinked directories are not
/// followed, so link cycles cannot repeat a batch.
fn collect_subdirectories(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            entry.file_type().ok()?.is_dir().then(|| entry.path())
        })
        .collect();
    subdirs.sort();

    for subdir in subdirs {
        out.push(subdir.clone());
        collect_subdirectories(&subdir, out)?;
    }
    Ok(())
}

fn print_batch(result: &BatchResult, json: bool) {
    if json {
        println!("{}", format::format_json(result));
    } else {
        println!("{}", format::format_table(result));
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbosity()).context("Failed to initialize logging")?;

    let config = cli.scan_config();
    let decoder = config.decoder();

    // Explicit file list mode
    if let Some(source) = cli.files_list.as_deref() {
        let files = scanner::filter_audio_files(read_files_list(source)?);
        if files.is_empty() {
            eprintln!("No audio files found");
            return Ok(());
        }
        let result = run_batch(&files, decoder.as_ref(), config.jobs, cli.quiet)?;
        print_batch(&result, cli.json);
        return Ok(());
    }

    let path = cli.path.clone().unwrap_or_else(|| PathBuf::from("."));

    // Single file mode
    if path.is_file() {
        let record = scanner::scan_one(decoder.as_ref(), &path);
        if cli.json {
            println!("{}", format::format_json(&record));
        } else {
            println!("{}", format::format_single(&record));
        }
        if record.is_failure() {
            anyhow::bail!("Invalid audio file: {}", path.display());
        }
        return Ok(());
    }

    // Directory mode
    if path.is_dir() {
        let mut dirs = vec![path.clone()];
        if cli.recursive {
            collect_subdirectories(&path, &mut dirs)?;
        }

        let start = Instant::now();
        let mut batches: Vec<(PathBuf, BatchResult)> = Vec::new();

        for dir in dirs {
            let files = scanner::audio_files_in_dir(&dir)?;
            if files.is_empty() {
                tracing::debug!(dir = %dir.display(), "no audio files");
                continue;
            }
            if !cli.quiet {
                eprintln!("> Scan Dir: {}", dir.display());
            }
            let result = run_batch(&files, decoder.as_ref(), config.jobs, cli.quiet)?;
            if !cli.json {
                print_batch(&result, false);
            }
            batches.push((dir, result));
        }

        if batches.is_empty() {
            eprintln!("No audio files found in {}", path.display());
            return Ok(());
        }

        if cli.json {
            if let (false, [(_, only)]) = (cli.recursive, batches.as_slice()) {
                print_batch(only, true);
            } else {
                let reports: Vec<DirectoryReport> = batches
                    .iter()
                    .map(|(dir, result)| DirectoryReport {
                        directory: dir,
                        result,
                    })
                    .collect();
                println!("{}", format::format_json(&reports));
            }
        }

        if !cli.quiet {
            eprintln!("Elapsed time: {:.2} sec", start.elapsed().as_secs_f64());
        }
        return Ok(());
    }

    anyhow::bail!("Path '{}' is not a file or directory", path.display());
}
