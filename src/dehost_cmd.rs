//! `hostcall dehost` subcommand driver.

use crate::args::DehostArgs;
use crate::error::{HostCallError, Result};
use crate::index_builder::Index;
use crate::io::FastxReader;
use crate::model::{DistributionKind, Thresholds};
use crate::pipeline::{ExtractTarget, Mode, Pipeline, PipelineOptions};
use std::io::{self, BufWriter};
use std::path::PathBuf;

fn resolve_db_path(db: &PathBuf) -> PathBuf {
    if db.extension().is_some() {
        db.clone()
    } else {
        db.with_extension("idx")
    }
}

fn parse_extract(extract: &Option<String>) -> Option<ExtractTarget> {
    extract.as_ref().map(|name| {
        if name.eq_ignore_ascii_case("all") {
            ExtractTarget::All
        } else {
            ExtractTarget::Category(name.clone())
        }
    })
}

pub fn run(args: DehostArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.db);
    let index = Index::load(&db_path)?;

    let host_index = index.summary.category_index_of(&args.host_category).ok_or_else(|| {
        HostCallError::InvalidConfig(format!(
            "{:?} is not a category in {}",
            args.host_category,
            db_path.display()
        ))
    })?;

    let distribution = DistributionKind::parse(&args.distribution).ok_or_else(|| {
        HostCallError::InvalidConfig(format!("unknown distribution kind {:?}", args.distribution))
    })?;

    let thresholds = Thresholds {
        min_quality: 0.0,
        min_length: args.min_length,
        min_compression: 0.0,
        confidence_threshold: args.confidence,
        min_hits: 0,
        min_proportion_difference: args.min_proportion_difference,
        host_unique_prop_lo_threshold: args.host_unique_prop_lo_threshold,
    };

    let extract = match (parse_extract(&args.extract), &args.prefix) {
        (Some(target), Some(prefix)) => Some((target, prefix.clone())),
        (Some(_), None) => {
            return Err(HostCallError::InvalidConfig(
                "-e/--extract requires -p/--prefix".into(),
            ))
        }
        (None, _) => None,
    };

    let mut reader1 = FastxReader::from_path(&args.fastaq)?;
    let paired = args.fastaq_mate2.is_some();
    let is_fastq = reader1.is_fastq();

    let opts = PipelineOptions {
        mode: Mode::Dehost { host_index },
        threads: args.threads,
        chunk_size: args.chunk_size,
        n_fit: 50,
        lo_hi_threshold: 0.1,
        distribution,
        thresholds,
        extract,
    };

    let sink = Box::new(BufWriter::new(io::stdout()));
    let pipeline = Pipeline::new(
        index.minimizer_config()?,
        index.filter,
        index.summary,
        opts,
        sink,
        paired,
        is_fastq,
    )?;

    if let Some(mate2) = &args.fastaq_mate2 {
        let mut reader2 = FastxReader::from_path(mate2)?;
        pipeline.run_paired(&mut reader1, &mut reader2)?;
    } else {
        pipeline.run_single(&mut reader1)?;
    }

    pipeline.complete()
}
