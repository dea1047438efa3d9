//! `hostcall index` subcommand driver.

use crate::args::IndexArgs;
use crate::error::Result;
use crate::index_builder::{build_index, IndexBuildOptions, DEFAULT_FPR_MAX, DEFAULT_K_HASH};
use crate::filter::DEFAULT_BITS_CAP;
use std::time::Instant;

pub fn run(args: IndexArgs) -> Result<()> {
    let temp_dir = args
        .temp_dir
        .clone()
        .unwrap_or_else(|| {
            let mut name = args.input.clone().into_os_string();
            name.push(".tmp_idx");
            name.into()
        });

    let opts = IndexBuildOptions {
        window_size: args.window_size,
        kmer_size: args.kmer_size,
        threads: args.threads,
        optimize: args.optimize,
        temp_dir,
        fpr_max: DEFAULT_FPR_MAX,
        k_hash: DEFAULT_K_HASH,
        bits_cap: DEFAULT_BITS_CAP,
    };

    log::info!("building index from {}", args.input.display());
    let start = Instant::now();
    let index = build_index(&args.input, &opts)?;

    let out_path = args.prefix.with_extension("idx");
    index.save(&out_path)?;
    log::info!(
        "wrote {} ({} bins, {} categories) in {:?}",
        out_path.display(),
        index.summary.num_bins(),
        index.summary.num_categories(),
        start.elapsed()
    );
    Ok(())
}
