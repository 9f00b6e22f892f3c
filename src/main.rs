use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use bytesize::ByteSize;
use clap::{ArgGroup, Parser, ValueEnum};

use phrase_sort::{Cancellation, ChunkBudget, ExternalSorter, ExternalSorterBuilder, SortStrategy};

#[derive(Parser)]
#[command(name = "phrase-sort", about = "external sorter of numbered phrase files")]
#[command(group(ArgGroup::new("source").required(true).args(["input", "stdin"])))]
#[command(group(ArgGroup::new("target").required(true).args(["output", "stdout"])))]
struct Args {
    /// file to be sorted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// read data from standard input
    #[arg(long)]
    stdin: bool,

    /// result file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// write result to standard output
    #[arg(long)]
    stdout: bool,

    /// memory budget of a single sorted run
    #[arg(short, long, default_value = "16MiB")]
    chunk_size: ByteSize,

    /// spill file to store sorted runs in (created and removed by the sorter)
    #[arg(long)]
    temporary_file: Option<PathBuf>,

    /// directory to be used to store temporary data
    #[arg(short = 'd', long)]
    tmp_dir: Option<PathBuf>,

    /// number of threads to use for parallel sorting
    #[arg(short = 'j', long = "parallel-jobs-count")]
    jobs: Option<usize>,

    /// sorted runs generation strategy
    #[arg(short, long, value_enum, default_value_t = Strategy::Replacement)]
    strategy: Strategy,

    /// logging level
    #[arg(short = 'l', long = "loglevel", value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(Copy, Clone, ValueEnum)]
enum Strategy {
    Replacement,
    Parallel,
}

#[derive(Copy, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn main() {
    let args = Args::parse();
    init_logger(args.log_level);

    let cancellation = Cancellation::new();
    let interrupted = cancellation.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        log::warn!("interrupt received, cancelling");
        interrupted.cancel();
    }) {
        log::warn!("interrupt handler not installed: {}", err);
    }

    let sorter = match build_sorter(&args, cancellation) {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let input_stream: Box<dyn Read> = match &args.input {
        Some(input) => match fs::File::open(input) {
            Ok(file) => Box::new(file),
            Err(err) => {
                log::error!("input file opening error: {}", err);
                process::exit(1);
            }
        },
        None => Box::new(io::stdin().lock()),
    };

    let output_stream: Box<dyn Write> = match &args.output {
        Some(output) => match fs::File::create(output) {
            Ok(file) => Box::new(io::BufWriter::new(file)),
            Err(err) => {
                log::error!("output file creation error: {}", err);
                process::exit(1);
            }
        },
        None => Box::new(io::BufWriter::new(io::stdout().lock())),
    };

    let started = Instant::now();
    match sorter.sort_to(input_stream, output_stream) {
        Ok(stats) => {
            log::info!(
                "{} entries sorted in {} runs ({:.2?})",
                stats.entries,
                stats.runs,
                started.elapsed()
            );
        }
        Err(err) => {
            if err.is_cancelled() {
                log::error!("sorting cancelled");
            } else {
                log::error!("data sorting error: {}", err);
            }

            if let Some(output) = &args.output {
                remove_partial_output(output);
            }
            process::exit(1);
        }
    }
}

fn build_sorter(args: &Args, cancellation: Cancellation) -> Result<ExternalSorter, phrase_sort::SortError> {
    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_budget(ChunkBudget::Bytes(args.chunk_size.as_u64()))
        .with_cancellation(cancellation)
        .with_strategy(match args.strategy {
            Strategy::Replacement => SortStrategy::ReplacementSelection,
            Strategy::Parallel => SortStrategy::ParallelBatch,
        });

    if let Some(jobs) = args.jobs {
        sorter_builder = sorter_builder.with_threads_number(jobs);
    }

    if let Some(temporary_file) = &args.temporary_file {
        sorter_builder = sorter_builder.with_spill_path(temporary_file);
    }

    if let Some(tmp_dir) = &args.tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(tmp_dir);
    }

    sorter_builder.build()
}

/// Partial output is never valid.
fn remove_partial_output(output: &Path) -> bool {
    match fs::remove_file(output) {
        Ok(()) => true,
        Err(err) => {
            log::warn!("partial output {} not removed: {}", output.display(), err);
            false
        }
    }
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}

#[cfg(test)]
mod test {
    use super::remove_partial_output;

    #[test]
    fn test_remove_partial_output() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let output = tmp_dir.path().join("output");
        std::fs::write(&output, b"1. partial").unwrap();

        assert!(remove_partial_output(&output));
        assert!(!output.exists());
        assert!(!remove_partial_output(&output));
    }
}
