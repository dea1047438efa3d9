//! A5: the `clap`-derived CLI surface for the three subcommands.

use clap::{Parser, Subcommand};
use clap_verbosity_flag::Verbosity;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hostcall", version, about = "Probabilistic read classifier over a pre-built membership index")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a `.idx` archive from a TSV of `path<TAB>category` rows.
    Index(IndexArgs),
    /// Classify reads against a two-category index.
    Classify(ClassifyArgs),
    /// Classify reads as host/other against a two-category index.
    Dehost(DehostArgs),
}

#[derive(Parser, Debug)]
pub struct IndexArgs {
    /// TSV file listing `path<TAB>category` per row.
    pub input: PathBuf,

    /// Minimizer window size.
    #[arg(short = 'w', long = "window-size", default_value_t = 41)]
    pub window_size: u8,

    /// Minimizer (k-mer) size.
    #[arg(short = 'k', long = "kmer-size", default_value_t = 19)]
    pub kmer_size: u8,

    /// Output prefix; the archive is written to `<prefix>.idx`.
    #[arg(short = 'p', long = "prefix")]
    pub prefix: PathBuf,

    /// Temp directory for spilled hashes during construction.
    #[arg(long = "temp")]
    pub temp_dir: Option<PathBuf>,

    /// Worker thread count.
    #[arg(short = 't', long = "threads", default_value_t = num_cpus::get())]
    pub threads: usize,

    /// Engage the greedy bin-packing optimizer.
    #[arg(long = "optimize", action)]
    pub optimize: bool,

    #[command(flatten)]
    pub verbosity: Verbosity,
}

#[derive(Parser, Debug)]
pub struct ClassifyArgs {
    /// Input FASTA/FASTQ (optionally gzip-compressed).
    pub fastaq: PathBuf,

    /// Second mate for paired-end input.
    pub fastaq_mate2: Option<PathBuf>,

    /// Path to the `.idx` archive (`.idx` appended if missing).
    #[arg(long = "db")]
    pub db: PathBuf,

    /// Records processed per parallel chunk.
    #[arg(long = "chunk_size", default_value_t = 100)]
    pub chunk_size: usize,

    /// Category to extract (`all` or a specific category name).
    #[arg(short = 'e', long = "extract")]
    pub extract: Option<String>,

    /// Output prefix for extraction sinks.
    #[arg(short = 'p', long = "prefix")]
    pub prefix: Option<PathBuf>,

    /// Distribution kind fit per category: `gamma` or `beta`.
    #[arg(short = 'd', long = "distribution", default_value = "beta")]
    pub distribution: String,

    /// Confidence threshold (unique-hit-count gap) required for a call.
    #[arg(long = "confidence", default_value_t = 0)]
    pub confidence: u8,

    /// Minimum count gap (`counts[winner] - counts[loser]`) required for a call.
    #[arg(long = "min_hits", default_value_t = 0)]
    pub min_hits: u32,

    /// Minimum read length gate.
    #[arg(long = "min_length", default_value_t = 0)]
    pub min_length: u32,

    /// Minimum proportion-difference gate between winner and loser.
    #[arg(long = "min_diff", default_value_t = 0.0)]
    pub min_proportion_difference: f32,

    /// Worker thread count.
    #[arg(short = 't', long = "threads", default_value_t = num_cpus::get())]
    pub threads: usize,

    #[command(flatten)]
    pub verbosity: Verbosity,
}

#[derive(Parser, Debug)]
pub struct DehostArgs {
    /// Input FASTA/FASTQ (optionally gzip-compressed).
    pub fastaq: PathBuf,

    /// Second mate for paired-end input.
    pub fastaq_mate2: Option<PathBuf>,

    /// Path to the `.idx` archive (`.idx` appended if missing).
    #[arg(long = "db")]
    pub db: PathBuf,

    /// Category name of the index's host bin.
    #[arg(long = "host")]
    pub host_category: String,

    /// Records processed per parallel chunk.
    #[arg(long = "chunk_size", default_value_t = 100)]
    pub chunk_size: usize,

    /// Category to extract (`all` or a specific category name).
    #[arg(short = 'e', long = "extract")]
    pub extract: Option<String>,

    /// Output prefix for extraction sinks.
    #[arg(short = 'p', long = "prefix")]
    pub prefix: Option<PathBuf>,

    /// Distribution kind fit per category: `gamma`, `beta`, or `kde` (treated as `beta`).
    #[arg(short = 'd', long = "distribution", default_value = "beta")]
    pub distribution: String,

    /// Confidence threshold (unique-hit-count gap) required for a call.
    #[arg(long = "confidence", default_value_t = 0)]
    pub confidence: u8,

    /// Minimum read length gate.
    #[arg(long = "min_length", default_value_t = 0)]
    pub min_length: u32,

    /// Minimum unique-proportion difference gate.
    #[arg(long = "min_probability_diff", default_value_t = 0.0)]
    pub min_proportion_difference: f32,

    /// Upper bound on host unique-proportion below which the "other" call
    /// is permitted.
    #[arg(long = "host_unique_prop_lo_threshold", default_value_t = 0.0)]
    pub host_unique_prop_lo_threshold: f32,

    /// Worker thread count.
    #[arg(short = 't', long = "threads", default_value_t = num_cpus::get())]
    pub threads: usize,

    #[command(flatten)]
    pub verbosity: Verbosity,
}
