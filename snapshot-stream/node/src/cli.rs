use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Streaming word count with consistent checkpoints
#[derive(Parser, Debug)]
#[command(name = "snapshot-stream")]
#[command(about = "Streaming word count with marker-based consistent checkpoints", long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Pipeline configuration; defaults are used when the file does not exist
    #[arg(short, long, default_value = "config.json", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one reducer of the configured pipeline
    Reducer {
        /// Position of the reducer in the configuration
        #[arg(short, long)]
        index: usize,

        /// Stop once every upstream mapper has closed its channel
        #[arg(long)]
        exit_when_drained: bool,
    },
    /// Run one mapper of the configured pipeline
    Mapper {
        /// Position of the mapper in the configuration
        #[arg(short, long)]
        index: usize,

        /// Input files; the mapper takes every Nth match, N being the mapper count
        #[arg(long, default_value = "csv_files/*.csv")]
        inputs: String,
    },
    /// Run every reducer and mapper of the configuration in this process
    Local {
        #[arg(long, default_value = "csv_files/*.csv")]
        inputs: String,

        /// Number of most frequent words to print
        #[arg(long, default_value = "10")]
        top: usize,

        /// How long reducers may take to drain after the mappers are done
        #[arg(long, default_value = "5000")]
        drain_timeout_ms: u64,
    },
    /// Write CSV input files of random sentences
    Generate {
        #[arg(long, default_value = "csv_files")]
        dir: PathBuf,

        #[arg(short = 'n', long, default_value = "20")]
        files: usize,

        #[arg(long, default_value = "1024")]
        rows: usize,

        #[arg(long, default_value = "10")]
        words_per_row: usize,
    },
    /// Inspect stored checkpoints
    Checkpoints {
        /// Reducer id; every configured reducer when omitted
        #[arg(short, long)]
        reducer: Option<String>,

        /// Print the full contents of one checkpoint
        #[arg(short, long, requires = "reducer")]
        sequence: Option<u64>,
    },
}
