//! hepconv CLI

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hc_root::StoreBackend;
use hc_translate::MergeSummary;

mod args;

use args::{ParquetArgs, RunArgs};

#[derive(Parser)]
#[command(name = "hepconv")]
#[command(about = "hepconv - copy, merge and convert columnar event stores")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy one store, optionally selecting tables, columns and rows
    Copy {
        /// Output store
        output: PathBuf,
        /// Input store
        input: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Concatenate the tables and add the histograms of several stores
    Merge {
        /// Output store
        output: PathBuf,
        /// Input stores, in order
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Add the histograms of several stores (tables are ignored)
    Add {
        /// Output store
        output: PathBuf,
        /// Input stores
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Export one table to Parquet
    ToParquet {
        /// Output Parquet file
        output: PathBuf,
        /// Input store
        input: PathBuf,
        /// Table to export; may be omitted when the store has only one
        #[arg(long)]
        table: Option<String>,
        #[command(flatten)]
        run: RunArgs,
        #[command(flatten)]
        parquet: ParquetArgs,
    },

    /// Import a Parquet file as a table
    FromParquet {
        /// Output store
        output: PathBuf,
        /// Input Parquet file
        input: PathBuf,
        /// Name of the created table
        #[arg(long, default_value = "tree")]
        name: String,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Merge Parquet files, uniting their columns
    MergeParquet {
        /// Output Parquet file
        output: PathBuf,
        /// Input Parquet files, in order
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        /// Replace an existing output
        #[arg(long)]
        force: bool,
        /// Skip inputs that cannot be opened
        #[arg(long)]
        skip_bad_files: bool,
        #[command(flatten)]
        parquet: ParquetArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Copy { output, input, run } => cmd_copy(&output, &input, &run),
        Commands::Merge { output, inputs, run } => cmd_merge(&output, &inputs, &run),
        Commands::Add { output, inputs, run } => cmd_add(&output, &inputs, &run),
        Commands::ToParquet { output, input, table, run, parquet } => {
            cmd_to_parquet(&output, &input, table.as_deref(), &run, &parquet)
        }
        Commands::FromParquet { output, input, name, run } => {
            cmd_from_parquet(&output, &input, &name, &run)
        }
        Commands::MergeParquet { output, inputs, force, skip_bad_files, parquet } => {
            cmd_merge_parquet(&output, &inputs, force, skip_bad_files, &parquet)
        }
    }
}

fn cmd_copy(output: &Path, input: &Path, run: &RunArgs) -> Result<()> {
    let merger = run.merger()?;
    let summary = merger
        .copy(&StoreBackend::new(), input, output)
        .with_context(|| format!("copying {} to {}", input.display(), output.display()))?;
    print_summary(&summary)
}

fn cmd_merge(output: &Path, inputs: &[PathBuf], run: &RunArgs) -> Result<()> {
    let merger = run.merger()?;
    tracing::info!(inputs = inputs.len(), path = %output.display(), "merging");
    let summary = merger
        .merge(&StoreBackend::new(), inputs, output)
        .with_context(|| format!("merging into {}", output.display()))?;
    print_summary(&summary)
}

fn cmd_add(output: &Path, inputs: &[PathBuf], run: &RunArgs) -> Result<()> {
    let merger = run.merger()?;
    let summary = merger
        .add_histograms(&StoreBackend::new(), inputs, output)
        .with_context(|| format!("adding histograms into {}", output.display()))?;
    print_summary(&summary)
}

fn cmd_to_parquet(
    output: &Path,
    input: &Path,
    table: Option<&str>,
    run: &RunArgs,
    parquet: &ParquetArgs,
) -> Result<()> {
    let merger = run.merger()?;
    let options = parquet.options(merger.options().force);
    let summary = merger
        .table_to_parquet(&StoreBackend::new(), input, table, output, &options)
        .with_context(|| format!("exporting {} to {}", input.display(), output.display()))?;
    print_summary(&summary)
}

fn cmd_from_parquet(output: &Path, input: &Path, name: &str, run: &RunArgs) -> Result<()> {
    let merger = run.merger()?;
    let summary = merger
        .parquet_to_table(&StoreBackend::new(), input, output, Some(name))
        .with_context(|| format!("importing {} into {}", input.display(), output.display()))?;
    print_summary(&summary)
}

fn cmd_merge_parquet(
    output: &Path,
    inputs: &[PathBuf],
    force: bool,
    skip_bad_files: bool,
    parquet: &ParquetArgs,
) -> Result<()> {
    let summary = hc_translate::merge_parquet(inputs, output, &parquet.options(force), skip_bad_files)
        .with_context(|| format!("merging Parquet files into {}", output.display()))?;
    print_summary(&summary)
}

fn print_summary(summary: &MergeSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
