//! End-to-end scenario tests (S1-S6) driving the library API the way the
//! `hostcall` binary's subcommands do, over small fixture files built with
//! `tempfile`.

use flate2::read::GzDecoder;
use hostcall::filter::{Filter, DEFAULT_BITS_CAP};
use hostcall::hashing::MinimizerConfig;
use hostcall::index_builder::{build_index, Index, IndexBuildOptions, DEFAULT_FPR_MAX, DEFAULT_K_HASH};
use hostcall::io::{FastxReader, Record};
use hostcall::model::{DistributionKind, Thresholds};
use hostcall::pipeline::{ExtractTarget, Mode, Pipeline, PipelineOptions};
use hostcall::summary::InputSummary;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

fn write_fasta(path: &Path, records: &[(&str, &str)]) {
    let mut f = File::create(path).unwrap();
    for (id, seq) in records {
        writeln!(f, ">{id}\n{seq}").unwrap();
    }
}

fn read_all(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

fn lenient_thresholds() -> Thresholds {
    Thresholds {
        min_quality: 0.0,
        min_length: 0,
        min_compression: 0.0,
        confidence_threshold: 5,
        min_hits: 1,
        min_proportion_difference: 0.05,
        host_unique_prop_lo_threshold: 0.0,
    }
}

/// Builds a 2-bin filter by hand: every hash of `host_seq` lands only in
/// bin 0, every hash of `viral_seq` only in bin 1. Lets a scenario fully
/// control which category a constructed read belongs to without going
/// through `build_index`.
fn manual_two_bin(minimizer: &MinimizerConfig, host_seq: &[u8], viral_seq: &[u8]) -> (InputSummary, hostcall::filter::CompressedFilter) {
    let mut summary = InputSummary::new();
    summary.add_bin("host").unwrap();
    summary.add_bin("viral").unwrap();

    let host_hashes = minimizer.hashes(host_seq);
    let viral_hashes = minimizer.hashes(viral_seq);
    let worst = host_hashes.len().max(viral_hashes.len()).max(1) as u64;
    let filter = Filter::size_for(2, 2, 0.01, worst, DEFAULT_BITS_CAP).unwrap();
    for h in &host_hashes {
        filter.emplace(*h, 0);
    }
    for h in &viral_hashes {
        filter.emplace(*h, 1);
    }
    (summary, filter.build())
}

const HOST_SEQ: &str = "ACGTGGACTTCAGGTCAATGGCATTGACCTGAAGTCCTGGACATCGGTAATCCGGATTACCGTAGCATGCATGGTACA";
const VIRAL_SEQ: &str = "TTAGGCCATGGTTAACCCGGTAAGCTTGGCCAATTGGCCTTAAGGCATTCCGGAATCCTTGGAACCGGTTAACCGGTT";

#[test]
fn s1_simple_two_bin_index_and_classify() {
    let dir = tempfile::tempdir().unwrap();
    let host_seq = "ACGT".repeat(250); // exactly 1000 bp
    let viral_pattern = "TTTTGGGGCCCCAAAA".repeat(32);
    let viral_seq = &viral_pattern[..500]; // exactly 500 bp

    let host_path = dir.path().join("host.fa");
    let viral_path = dir.path().join("viral.fa");
    write_fasta(&host_path, &[("h1", &host_seq)]);
    write_fasta(&viral_path, &[("v1", viral_seq)]);

    let tsv_path = dir.path().join("input.tsv");
    let mut tsv = File::create(&tsv_path).unwrap();
    writeln!(tsv, "{}\thost", host_path.display()).unwrap();
    writeln!(tsv, "{}\tviral", viral_path.display()).unwrap();
    drop(tsv);

    let opts = IndexBuildOptions {
        window_size: 41,
        kmer_size: 19,
        threads: 1,
        optimize: false,
        temp_dir: dir.path().join("tmp_idx"),
        fpr_max: DEFAULT_FPR_MAX,
        k_hash: DEFAULT_K_HASH,
        bits_cap: DEFAULT_BITS_CAP,
    };
    let index = build_index(&tsv_path, &opts).unwrap();
    assert_eq!(index.summary.num_bins(), 2);
    assert_eq!(index.summary.num_categories(), 2);
    let mut categories = index.summary.categories().to_vec();
    categories.sort();
    assert_eq!(categories, vec!["host".to_string(), "viral".to_string()]);

    let idx_path = dir.path().join("out.idx");
    index.save(&idx_path).unwrap();
    assert!(idx_path.exists());
    let loaded = Index::load(&idx_path).unwrap();
    assert_eq!(loaded.summary.num_bins(), 2);

    // StatsModel built at classify time has one entry per category.
    let model = hostcall::model::StatsModel::new(loaded.summary.num_categories(), DistributionKind::Beta, 50, 0.1);
    assert!(!model.ready());
}

#[test]
fn s2_perfect_host_read() {
    let minimizer = MinimizerConfig::new(11, 11).unwrap();
    let (summary, filter) = manual_two_bin(&minimizer, HOST_SEQ.as_bytes(), VIRAL_SEQ.as_bytes());

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("assignments.tsv");
    let sink = Box::new(File::create(&out_path).unwrap());

    let opts = PipelineOptions {
        mode: Mode::Classify,
        threads: 1,
        chunk_size: 10,
        n_fit: 1,
        lo_hi_threshold: 0.1,
        distribution: DistributionKind::Beta,
        thresholds: lenient_thresholds(),
        extract: None,
    };
    let pipeline = Pipeline::new(minimizer, filter, summary, opts, sink, false, false).unwrap();

    // A read drawn verbatim from the host source, quality Phred 30 throughout.
    let qual = vec![30u8 + 33; HOST_SEQ.len()];
    let record = Record {
        id: "perfect_host".into(),
        seq: HOST_SEQ.as_bytes().to_vec(),
        qual: Some(qual),
    };
    pipeline.add_read(record).unwrap();
    pipeline.complete().unwrap();

    let output = read_all(&out_path);
    let line = output.lines().find(|l| l.contains("perfect_host")).expect("assignment line present");
    let fields: Vec<&str> = line.split('\t').collect();
    assert_eq!(fields[0], "C");
    assert_eq!(fields[2], "host");
    // fields: status, id, call_name, length, n_hashes, mean_quality, confidence, (compression + category blocks)
    let confidence: u32 = fields[6].parse().unwrap();
    assert!(confidence > lenient_thresholds().confidence_threshold as u32);

    let host_block = line.split_whitespace().find(|s| s.starts_with("host:")).unwrap();
    let viral_block = line.split_whitespace().find(|s| s.starts_with("viral:")).unwrap();
    let host_unique_prop: f32 = host_block.split(':').nth(3).unwrap().parse().unwrap();
    let viral_unique_prop: f32 = viral_block.split(':').nth(3).unwrap().parse().unwrap();
    assert!(host_unique_prop > 0.0);
    assert_eq!(viral_unique_prop, 0.0);
}

#[test]
fn s3_ambiguous_read() {
    let minimizer = MinimizerConfig::new(11, 11).unwrap();
    let (summary, filter) = manual_two_bin(&minimizer, HOST_SEQ.as_bytes(), VIRAL_SEQ.as_bytes());

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("assignments.tsv");
    let sink = Box::new(File::create(&out_path).unwrap());

    let opts = PipelineOptions {
        mode: Mode::Classify,
        threads: 1,
        chunk_size: 10,
        n_fit: 1,
        lo_hi_threshold: 0.1,
        distribution: DistributionKind::Beta,
        thresholds: lenient_thresholds(),
        extract: None,
    };
    let pipeline = Pipeline::new(minimizer, filter, summary, opts, sink, false, false).unwrap();

    // Half the hashes come from the host source, half from the viral
    // source: a synthetic read straddling both bins roughly evenly.
    let mut seq = HOST_SEQ.as_bytes()[..40].to_vec();
    seq.extend_from_slice(&VIRAL_SEQ.as_bytes()[..40]);
    let record = Record {
        id: "ambiguous".into(),
        seq,
        qual: None,
    };
    pipeline.add_read(record).unwrap();
    pipeline.complete().unwrap();

    let output = read_all(&out_path);
    let line = output.lines().find(|l| l.contains("ambiguous")).expect("assignment line present");
    let fields: Vec<&str> = line.split('\t').collect();
    assert_eq!(fields[0], "U");

    let host_block = line.split_whitespace().find(|s| s.starts_with("host:")).unwrap();
    let viral_block = line.split_whitespace().find(|s| s.starts_with("viral:")).unwrap();
    let host_prop: f32 = host_block.split(':').nth(2).unwrap().parse().unwrap();
    let viral_prop: f32 = viral_block.split(':').nth(2).unwrap().parse().unwrap();
    assert!((host_prop - viral_prop).abs() <= 0.2);
}

#[test]
fn s4_training_cohort_exhaustion() {
    let filter = Filter::size_for(2, 2, 0.01, 10, DEFAULT_BITS_CAP).unwrap();
    filter.emplace(7, 0);
    let filter = filter.build();
    let mut summary = InputSummary::new();
    summary.add_bin("host").unwrap();
    summary.add_bin("viral").unwrap();
    let minimizer = MinimizerConfig::new(15, 11).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("assignments.tsv");
    let sink = Box::new(File::create(&out_path).unwrap());

    let n_fit = 3;
    let opts = PipelineOptions {
        mode: Mode::Classify,
        threads: 1,
        chunk_size: 10,
        n_fit,
        lo_hi_threshold: 0.1,
        distribution: DistributionKind::Beta,
        thresholds: Thresholds::default(),
        extract: None,
    };
    let pipeline = Pipeline::new(minimizer, filter, summary, opts, sink, false, false).unwrap();

    // Stream N_fit - 1 reads: too few to reach natural readiness.
    for i in 0..(n_fit - 1) {
        let record = Record {
            id: format!("r{i}"),
            seq: b"ACGTACGTACGTACGTACGTACGT".to_vec(),
            qual: None,
        };
        pipeline.add_read(record).unwrap();
    }

    // Nothing has been emitted yet: every read is still cached.
    assert!(read_all(&out_path).is_empty());

    pipeline.complete().unwrap();

    // `complete` forces the model ready and drains the cache exactly once
    // per streamed read.
    let output = read_all(&out_path);
    assert_eq!(output.lines().count(), n_fit - 1);
}

#[test]
fn s5_paired_id_mismatch_is_fatal() {
    let minimizer = MinimizerConfig::new(11, 11).unwrap();
    let (summary, filter) = manual_two_bin(&minimizer, HOST_SEQ.as_bytes(), VIRAL_SEQ.as_bytes());

    let dir = tempfile::tempdir().unwrap();
    let mate1_path = dir.path().join("mate1.fa");
    let mate2_path = dir.path().join("mate2.fa");

    let mut good_pairs: Vec<(String, String)> = Vec::new();
    for i in 0..6 {
        good_pairs.push((format!("r{i}/1"), format!("r{i}/2")));
    }
    let mate1_records: Vec<(&str, &str)> = good_pairs
        .iter()
        .map(|(a, _)| (a.as_str(), &HOST_SEQ[..40]))
        .chain(std::iter::once(("r6/1", &HOST_SEQ[..40])))
        .collect();
    let mate2_records: Vec<(&str, &str)> = good_pairs
        .iter()
        .map(|(_, b)| (b.as_str(), &HOST_SEQ[..40]))
        .chain(std::iter::once(("other6/2", &HOST_SEQ[..40])))
        .collect();
    write_fasta(&mate1_path, &mate1_records);
    write_fasta(&mate2_path, &mate2_records);

    let out_path = dir.path().join("assignments.tsv");
    let sink = Box::new(File::create(&out_path).unwrap());
    let opts = PipelineOptions {
        mode: Mode::Classify,
        threads: 1,
        chunk_size: 1, // one record per chunk: deterministic, sequential failure point
        n_fit: 1,
        lo_hi_threshold: 0.1,
        distribution: DistributionKind::Beta,
        thresholds: lenient_thresholds(),
        extract: None,
    };
    let pipeline = Pipeline::new(minimizer, filter, summary, opts, sink, true, false).unwrap();

    let mut reader1 = FastxReader::from_path(&mate1_path).unwrap();
    let mut reader2 = FastxReader::from_path(&mate2_path).unwrap();
    let result = pipeline.run_paired(&mut reader1, &mut reader2);
    assert!(result.is_err());

    // Records up to the 7th (the mismatched one) may have been emitted.
    let output = read_all(&out_path);
    assert!(output.lines().count() <= 6);
}

#[test]
fn s6_extract_all() {
    let minimizer = MinimizerConfig::new(11, 11).unwrap();
    let (summary, filter) = manual_two_bin(&minimizer, HOST_SEQ.as_bytes(), VIRAL_SEQ.as_bytes());

    let dir = tempfile::tempdir().unwrap();
    let mate1_path = dir.path().join("mate1.fa");
    let mate2_path = dir.path().join("mate2.fa");

    let mut ambiguous_seq = HOST_SEQ.as_bytes()[..40].to_vec();
    ambiguous_seq.extend_from_slice(&VIRAL_SEQ.as_bytes()[..40]);
    let ambiguous_seq = String::from_utf8(ambiguous_seq).unwrap();

    write_fasta(
        &mate1_path,
        &[("host_r/1", HOST_SEQ), ("viral_r/1", VIRAL_SEQ), ("amb_r/1", &ambiguous_seq)],
    );
    write_fasta(&mate2_path, &[("host_r/2", "AC"), ("viral_r/2", "AC"), ("amb_r/2", "AC")]);

    let prefix = dir.path().join("out");
    let out_path = dir.path().join("assignments.tsv");
    let sink = Box::new(File::create(&out_path).unwrap());
    let opts = PipelineOptions {
        mode: Mode::Classify,
        threads: 1,
        chunk_size: 10,
        n_fit: 1,
        lo_hi_threshold: 0.1,
        distribution: DistributionKind::Beta,
        thresholds: lenient_thresholds(),
        extract: Some((ExtractTarget::All, prefix.clone())),
    };
    let pipeline = Pipeline::new(minimizer, filter, summary, opts, sink, true, false).unwrap();

    let mut reader1 = FastxReader::from_path(&mate1_path).unwrap();
    let mut reader2 = FastxReader::from_path(&mate2_path).unwrap();
    pipeline.run_paired(&mut reader1, &mut reader2).unwrap();
    pipeline.complete().unwrap();

    let mut total_records = 0;
    for cat in ["host", "viral"] {
        for mate in [1, 2] {
            let path = dir.path().join(format!("out_{cat}_{mate}.fasta.gz"));
            assert!(path.exists(), "{path:?} should exist");
            let mut decoder = GzDecoder::new(File::open(&path).unwrap());
            let mut contents = String::new();
            decoder.read_to_string(&mut contents).unwrap();
            assert!(!contents.contains("amb_r"), "ambiguous read leaked into {path:?}");
            total_records += contents.matches('>').count();
        }
    }

    let assignments = read_all(&out_path);
    let classified = assignments.lines().filter(|l| l.starts_with('C')).count();
    assert_eq!(total_records, classified * 2); // each classified pair appears in both mate sinks
    assert!(assignments.lines().any(|l| l.starts_with('U')), "expected the ambiguous pair to be unclassified");
}
