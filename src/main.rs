use activation_reconciler::runner::{RunArgs, run_reconcile};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Clone)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Compute every key's reconciled activation date
    Reconcile {
        /// Source CSV: a header line, then key,start[,end] rows
        #[arg(short, long)]
        input: PathBuf,

        /// Line count including the header (default: counted from the file)
        #[arg(short, long)]
        total_lines: Option<u64>,

        /// Result CSV (default: <tmp>/Result_<millis>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Lines per chunk
        #[arg(short, long, default_value = "2")]
        chunk_size: u64,

        /// Number of concurrent tasks in the worker pool
        #[arg(short, long, default_value = "10")]
        workers: usize,

        /// Chunks submitted per wave
        #[arg(long, default_value = "3")]
        wave_size: usize,

        /// Directory for key stores and manifest files (default: system temp directory)
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Keep key stores and the work directory after the run (for debugging)
        #[arg(long)]
        keep_work_dir: bool,

        /// Quiet mode - minimal output, only show summary
        #[arg(short, long)]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Reconcile {
            input,
            total_lines,
            output,
            chunk_size,
            workers,
            wave_size,
            work_dir,
            keep_work_dir,
            quiet,
        } => {
            let run_args = RunArgs {
                input,
                total_lines,
                output,
                chunk_size,
                worker_count: workers,
                wave_size,
                work_dir,
                keep_work_dir,
                quiet,
            };
            run_reconciler(run_args).await?;
        }
    }
    Ok(())
}

async fn run_reconciler(args: RunArgs) -> anyhow::Result<()> {
    // Initialize tracing based on quiet mode
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = if args.quiet {
        EnvFilter::new("activation_reconciler=warn")
    } else {
        EnvFilter::new("activation_reconciler=info")
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    cli::check_input(&args.input)?;

    if !args.quiet {
        println!("Activation Reconciler");
        println!("=====================");
        println!("Input: {}", args.input.display());
        println!("Chunk size: {} lines", args.chunk_size);
        println!("Workers: {}", args.worker_count);
        println!("Wave size: {}", args.wave_size);
        println!();
    }

    let keep_requested = args.keep_work_dir;
    let explicit_work_dir = args.work_dir.clone();

    let result = run_reconcile(args).await?;

    println!();
    println!("Reconcile Summary");
    println!("=================");
    println!("Job ID: {}", result.job_id);
    println!("Result file: {}", result.result_path.display());
    println!("Chunks processed: {}", result.chunks_processed);
    println!("Waves: {}", result.waves);
    println!("Records read: {}", result.records_read);
    println!("Keys reconciled: {}", result.keys_reconciled);
    println!("Duration: {:.2}s", result.duration.as_secs_f64());
    println!(
        "Throughput: {}",
        cli::throughput(result.records_read, result.duration)
    );

    if let Some(ref preserved) = result.preserved_work_dir {
        println!();
        println!("Work directory has been preserved:");
        println!("  {}", preserved.display());
        println!();
        println!("To inspect it:");
        println!("  # Per-key accumulation files");
        println!("  ls {}/keys/", preserved.display());
        println!("  # Chunk results of this job");
        println!("  ls {}/jobs/{}/chunks/", preserved.display(), result.job_id);
    } else if keep_requested && let Some(dir) = explicit_work_dir {
        println!();
        println!("Key stores kept under {}/keys/", dir.display());
    }

    Ok(())
}

/// CLI utility functions for checking arguments and formatting output
mod cli {
    use std::path::Path;
    use std::time::Duration;

    /// Fail early, before any work directory is created, if the input is unusable
    pub fn check_input(path: &Path) -> anyhow::Result<()> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| anyhow::anyhow!("Cannot read input '{}': {}", path.display(), e))?;

        if !metadata.is_file() {
            return Err(anyhow::anyhow!(
                "Input '{}' is not a regular file",
                path.display()
            ));
        }
        Ok(())
    }

    /// Human-readable records/sec
    pub fn throughput(records: u64, duration: Duration) -> String {
        let secs = duration.as_secs_f64();
        if secs <= f64::EPSILON {
            return "n/a".to_string();
        }
        format!("{:.2} records/sec", records as f64 / secs)
    }
}
