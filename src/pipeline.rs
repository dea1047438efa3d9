//! C9: the chunked, thread-parallel classification driver. `seqkmer`'s own
//! `read_parallel` cannot be reused here — its signature is built around
//! `seqkmer::mmscanner::MinimizerIterator`, a type the crate never exports —
//! so this is a from-scratch chunk-then-fan-out driver over the bespoke
//! readers in `io` and the bespoke scanner in `hashing`.

use crate::error::{HostCallError, Result};
use crate::filter::CompressedFilter;
use crate::hashing::MinimizerConfig;
use crate::io::{FastxReader, Record};
use crate::model::StatsModel;
use crate::read_entry::ReadEntry;
use crate::summary::{InputSummary, NONE_CATEGORY};
use flate2::write::GzEncoder;
use flate2::Compression;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

pub enum Mode {
    Classify,
    Dehost { host_index: u8 },
}

/// What `-e` requested: every category, or exactly one.
pub enum ExtractTarget {
    All,
    Category(String),
}

enum PendingInput {
    Single(Record),
    Paired(Record, Record),
}

struct PendingRead {
    entry: ReadEntry,
    input: PendingInput,
}

fn compression_ratio(seq: &[u8]) -> f32 {
    if seq.is_empty() {
        return 1.0;
    }
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    if enc.write_all(seq).is_err() {
        return 1.0;
    }
    match enc.finish() {
        Ok(compressed) => compressed.len() as f32 / seq.len() as f32,
        Err(_) => 1.0,
    }
}

fn mean_quality_bytes(qual: &[u8]) -> f32 {
    if qual.is_empty() {
        return f32::MAX;
    }
    let sum: u64 = qual.iter().map(|&b| b.saturating_sub(33) as u64).sum();
    sum as f32 / qual.len() as f32
}

fn trimmed_pair_id(id: &str) -> &str {
    if id.len() > 1 {
        &id[..id.len() - 1]
    } else {
        id
    }
}

/// One mutex-guarded gzip sink, keyed by category and mate index.
struct ExtractSinks {
    target: ExtractTarget,
    sinks: HashMap<(String, u8), Mutex<GzEncoder<File>>>,
}

impl ExtractSinks {
    fn open(
        target: ExtractTarget,
        prefix: &Path,
        summary: &InputSummary,
        paired: bool,
        is_fastq: bool,
    ) -> Result<Self> {
        let ext = if is_fastq { "fastq" } else { "fasta" };
        let categories: Vec<String> = match &target {
            ExtractTarget::All => summary.categories().to_vec(),
            ExtractTarget::Category(name) => {
                if summary.category_index_of(name).is_none() {
                    return Err(HostCallError::InvalidConfig(format!(
                        "unknown extraction category {name:?}"
                    )));
                }
                vec![name.clone()]
            }
        };
        let mates: &[u8] = if paired { &[1, 2] } else { &[1] };
        let mut sinks = HashMap::new();
        for cat in &categories {
            for &mate in mates {
                let suffix = if paired {
                    format!("_{mate}")
                } else {
                    String::new()
                };
                let path = prefix
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(format!(
                        "{}_{cat}{suffix}.{ext}.gz",
                        prefix.file_name().and_then(|n| n.to_str()).unwrap_or("out")
                    ));
                let file = File::create(&path)?;
                sinks.insert(
                    (cat.clone(), mate),
                    Mutex::new(GzEncoder::new(file, Compression::default())),
                );
            }
        }
        Ok(Self { target, sinks })
    }

    fn wants(&self, category: &str) -> bool {
        match &self.target {
            ExtractTarget::All => true,
            ExtractTarget::Category(name) => name == category,
        }
    }

    fn push(&self, category: &str, mate: u8, record: &Record) -> Result<()> {
        let Some(sink) = self.sinks.get(&(category.to_string(), mate)) else {
            return Ok(());
        };
        let mut guard = sink.lock().expect("extraction sink mutex poisoned");
        match &record.qual {
            Some(qual) => {
                writeln!(guard, "@{}\n{}\n+\n{}", record.id, String::from_utf8_lossy(&record.seq), String::from_utf8_lossy(qual))?;
            }
            None => {
                writeln!(guard, ">{}\n{}", record.id, String::from_utf8_lossy(&record.seq))?;
            }
        }
        Ok(())
    }

    /// Writes the gzip trailer on every sink. Without this, a sink's footer
    /// is only written on `Drop`, which silently discards I/O errors and
    /// only fires once the whole pipeline is torn down.
    fn close(&self) -> Result<()> {
        for sink in self.sinks.values() {
            let mut guard = sink.lock().expect("extraction sink mutex poisoned");
            guard.try_finish()?;
        }
        Ok(())
    }
}

struct Counters {
    total: AtomicU64,
    classified: Vec<AtomicU64>,
    unclassified: AtomicU64,
}

impl Counters {
    fn new(num_categories: usize) -> Self {
        Self {
            total: AtomicU64::new(0),
            classified: (0..num_categories).map(|_| AtomicU64::new(0)).collect(),
            unclassified: AtomicU64::new(0),
        }
    }

    fn record(&self, call: u8) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if call == NONE_CATEGORY {
            self.unclassified.fetch_add(1, Ordering::Relaxed);
        } else {
            self.classified[call as usize].fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub struct Pipeline {
    minimizer: MinimizerConfig,
    filter: CompressedFilter,
    summary: InputSummary,
    model: StatsModel,
    mode: Mode,
    pool: rayon::ThreadPool,
    chunk_size: usize,
    training_cache: Mutex<Vec<PendingRead>>,
    training_cache_cap: usize,
    extract: Option<ExtractSinks>,
    counters: Counters,
    assignment_sink: Mutex<Box<dyn Write + Send>>,
    natural_ready: AtomicBool,
    forced_ready: AtomicBool,
}

pub struct PipelineOptions {
    pub mode: Mode,
    pub threads: usize,
    pub chunk_size: usize,
    pub n_fit: usize,
    pub lo_hi_threshold: f32,
    pub distribution: crate::model::DistributionKind,
    pub thresholds: crate::model::Thresholds,
    pub extract: Option<(ExtractTarget, PathBuf)>,
}

impl Pipeline {
    pub fn new(
        minimizer: MinimizerConfig,
        filter: CompressedFilter,
        summary: InputSummary,
        opts: PipelineOptions,
        assignment_sink: Box<dyn Write + Send>,
        paired: bool,
        is_fastq: bool,
    ) -> Result<Self> {
        if summary.num_categories() != 2 {
            return Err(HostCallError::InvalidConfig(format!(
                "classify/dehost require exactly two categories, found {}",
                summary.num_categories()
            )));
        }
        let num_categories = summary.num_categories();
        let mut model = StatsModel::new(num_categories, opts.distribution, opts.n_fit, opts.lo_hi_threshold);
        model.thresholds = opts.thresholds;

        let extract = match opts.extract {
            Some((target, prefix)) => {
                Some(ExtractSinks::open(target, &prefix, &summary, paired, is_fastq)?)
            }
            None => None,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.threads.max(1))
            .build()
            .map_err(|e| HostCallError::Internal(format!("failed to build thread pool: {e}")))?;

        Ok(Self {
            minimizer,
            filter,
            counters: Counters::new(num_categories),
            training_cache_cap: opts.n_fit * num_categories * 4,
            model,
            mode: opts.mode,
            pool,
            chunk_size: opts.chunk_size.max(1),
            training_cache: Mutex::new(Vec::new()),
            extract,
            assignment_sink: Mutex::new(assignment_sink),
            summary,
            natural_ready: AtomicBool::new(false),
            forced_ready: AtomicBool::new(false),
        })
    }

    fn build_entry_single(&self, record: &Record) -> Result<Option<ReadEntry>> {
        let length = record.seq.len();
        if length == 0 || length > u32::MAX as usize {
            log::warn!("skipping read {} with invalid length {length}", record.id);
            return Ok(None);
        }
        let mean_quality = record.mean_quality();
        let compression = compression_ratio(&record.seq);
        let mut entry = ReadEntry::new(record.id.clone(), length as u32, mean_quality, compression, &self.summary);
        let agent = self.filter.agent();
        let hashes: HashSet<u64> = self.minimizer.hashes(&record.seq).into_iter().collect();
        for h in hashes {
            entry.update(agent.bulk_contains(h));
        }
        entry.post_process(&self.summary)?;
        Ok(Some(entry))
    }

    fn build_entry_paired(&self, r1: &Record, r2: &Record) -> Result<Option<ReadEntry>> {
        let id1 = trimmed_pair_id(&r1.id);
        let id2 = trimmed_pair_id(&r2.id);
        if id1 != id2 {
            return Err(HostCallError::InputFormat(format!(
                "paired read id mismatch: {:?} vs {:?}",
                r1.id, r2.id
            )));
        }
        let length = r1.seq.len() + r2.seq.len();
        if length == 0 || length > u32::MAX as usize {
            log::warn!("skipping paired read {} with invalid combined length {length}", r1.id);
            return Ok(None);
        }
        let mean_quality = match (&r1.qual, &r2.qual) {
            (None, None) => f32::MAX,
            (q1, q2) => {
                let mut all = Vec::new();
                if let Some(q) = q1 {
                    all.extend_from_slice(q);
                }
                if let Some(q) = q2 {
                    all.extend_from_slice(q);
                }
                mean_quality_bytes(&all)
            }
        };
        let mut combined_seq = r1.seq.clone();
        combined_seq.extend_from_slice(&r2.seq);
        let compression = compression_ratio(&combined_seq);

        let mut entry = ReadEntry::new(r1.id.clone(), length as u32, mean_quality, compression, &self.summary);
        let agent = self.filter.agent();
        let mut hashes: HashSet<u64> = self.minimizer.hashes(&r1.seq).into_iter().collect();
        hashes.extend(self.minimizer.hashes(&r2.seq));
        for h in hashes {
            entry.update(agent.bulk_contains(h));
        }
        entry.post_process(&self.summary)?;
        Ok(Some(entry))
    }

    fn decide(&self, entry: &mut ReadEntry) -> Result<()> {
        match self.mode {
            Mode::Classify => entry.classify(&self.model),
            Mode::Dehost { host_index } => entry.dehost(&self.model, host_index),
        }
    }

    fn emit(&self, entry: &ReadEntry, input: &PendingInput) -> Result<()> {
        {
            let mut sink = self.assignment_sink.lock().expect("assignment sink mutex poisoned");
            entry.print_assignment(&self.summary, &mut *sink)?;
        }
        self.counters.record(entry.call());
        if entry.call() != NONE_CATEGORY {
            if let Some(extract) = &self.extract {
                let category = self.summary.category_name(entry.call()).unwrap_or("");
                if extract.wants(category) {
                    match input {
                        PendingInput::Single(r) => extract.push(category, 1, r)?,
                        PendingInput::Paired(r1, r2) => {
                            extract.push(category, 1, r1)?;
                            extract.push(category, 2, r2)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// §4.7 `classify_cache`: replays every cached read through the now-ready model.
    fn drain_cache_locked(&self, cache: &mut Vec<PendingRead>) -> Result<()> {
        for mut pending in cache.drain(..) {
            self.decide(&mut pending.entry)?;
            self.emit(&pending.entry, &pending.input)?;
        }
        Ok(())
    }

    /// §4.7 `add_read`, routed for a single cached-or-live entry plus its
    /// source record(s) (kept around for extraction once a call is made).
    fn route(&self, mut entry: ReadEntry, input: PendingInput) -> Result<()> {
        if self.model.ready() {
            self.decide(&mut entry)?;
            return self.emit(&entry, &input);
        }

        let mut cache = self.training_cache.lock().expect("training cache mutex poisoned");
        if self.model.ready() {
            drop(cache);
            self.decide(&mut entry)?;
            return self.emit(&entry, &input);
        }

        let became_ready = self.model.add_read_to_training_data(entry.unique_proportions());
        if became_ready {
            self.natural_ready.store(true, Ordering::Relaxed);
        }
        if cache.len() < self.training_cache_cap {
            cache.push(PendingRead { entry, input });
        } else {
            log::info!(
                "training cache reached capacity ({}), forcing the model ready",
                self.training_cache_cap
            );
            self.model.force_ready();
            self.forced_ready.store(true, Ordering::Relaxed);
            cache.push(PendingRead { entry, input });
        }
        if self.model.ready() {
            self.drain_cache_locked(&mut cache)?;
        }
        Ok(())
    }

    pub fn add_read(&self, record: Record) -> Result<()> {
        match self.build_entry_single(&record)? {
            Some(entry) => self.route(entry, PendingInput::Single(record)),
            None => Ok(()),
        }
    }

    pub fn add_paired_read(&self, r1: Record, r2: Record) -> Result<()> {
        match self.build_entry_paired(&r1, &r2)? {
            Some(entry) => self.route(entry, PendingInput::Paired(r1, r2)),
            None => Ok(()),
        }
    }

    pub fn run_single(&self, reader: &mut FastxReader) -> Result<()> {
        loop {
            let chunk = reader.next_chunk(self.chunk_size)?;
            if chunk.is_empty() {
                break;
            }
            self.pool.install(|| {
                chunk
                    .into_par_iter()
                    .try_for_each(|record| self.add_read(record))
            })?;
        }
        Ok(())
    }

    pub fn run_paired(&self, reader1: &mut FastxReader, reader2: &mut FastxReader) -> Result<()> {
        loop {
            let chunk1 = reader1.next_chunk(self.chunk_size)?;
            let chunk2 = reader2.next_chunk(self.chunk_size)?;
            if chunk1.is_empty() && chunk2.is_empty() {
                break;
            }
            if chunk1.len() != chunk2.len() {
                return Err(HostCallError::InputFormat(
                    "paired input files have a differing number of records".into(),
                ));
            }
            let pairs: Vec<(Record, Record)> = chunk1.into_iter().zip(chunk2).collect();
            self.pool.install(|| {
                pairs
                    .into_par_iter()
                    .try_for_each(|(r1, r2)| self.add_paired_read(r1, r2))
            })?;
        }
        Ok(())
    }

    /// Drains any still-cached reads (forcing the model ready if it never
    /// reached the natural threshold) and logs the final run summary.
    pub fn complete(&self) -> Result<()> {
        {
            let mut cache = self.training_cache.lock().expect("training cache mutex poisoned");
            if !self.model.ready() {
                self.model.force_ready();
                self.forced_ready.store(true, Ordering::Relaxed);
            }
            self.drain_cache_locked(&mut cache)?;
        }
        if let Some(extract) = &self.extract {
            extract.close()?;
        }
        self.print_summary();
        Ok(())
    }

    fn print_summary(&self) {
        let total = self.counters.total.load(Ordering::Relaxed);
        let unclassified = self.counters.unclassified.load(Ordering::Relaxed);
        let readiness = if self.forced_ready.load(Ordering::Relaxed) {
            "forced"
        } else if self.natural_ready.load(Ordering::Relaxed) {
            "natural"
        } else {
            "n/a"
        };
        log::info!(
            "processed {total} reads, {unclassified} unclassified, model readiness: {readiness}"
        );
        for (i, name) in self.summary.categories().iter().enumerate() {
            let n = self.counters.classified[i].load(Ordering::Relaxed);
            log::info!("  {name}: {n} classified");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, DEFAULT_BITS_CAP};
    use crate::model::{DistributionKind, Thresholds};

    fn tiny_pipeline(chunk_size: usize) -> Pipeline {
        let mut summary = InputSummary::new();
        summary.add_bin("host").unwrap();
        summary.add_bin("viral").unwrap();
        let filter = Filter::size_for(2, 2, 0.01, 10, DEFAULT_BITS_CAP).unwrap();
        filter.emplace(7, 0);
        let filter = filter.build();
        let minimizer = MinimizerConfig::new(15, 11).unwrap();
        let opts = PipelineOptions {
            mode: Mode::Classify,
            threads: 1,
            chunk_size,
            n_fit: 2,
            lo_hi_threshold: 0.1,
            distribution: DistributionKind::Beta,
            thresholds: Thresholds::default(),
            extract: None,
        };
        Pipeline::new(minimizer, filter, summary, opts, Box::new(Vec::new()), false, false).unwrap()
    }

    #[test]
    fn rejects_non_two_category_summary() {
        let mut summary = InputSummary::new();
        summary.add_bin("only_one").unwrap();
        let filter = Filter::size_for(1, 1, 0.01, 1, DEFAULT_BITS_CAP).unwrap().build();
        let minimizer = MinimizerConfig::new(15, 11).unwrap();
        let opts = PipelineOptions {
            mode: Mode::Classify,
            threads: 1,
            chunk_size: 10,
            n_fit: 2,
            lo_hi_threshold: 0.1,
            distribution: DistributionKind::Beta,
            thresholds: Thresholds::default(),
            extract: None,
        };
        assert!(Pipeline::new(minimizer, filter, summary, opts, Box::new(Vec::new()), false, false).is_err());
    }

    #[test]
    fn short_input_drains_via_force_ready_on_complete() {
        let pipeline = tiny_pipeline(10);
        let record = Record {
            id: "r1".into(),
            seq: b"ACGTACGTACGTACGTACGT".to_vec(),
            qual: None,
        };
        pipeline.add_read(record).unwrap();
        pipeline.complete().unwrap();
        assert_eq!(pipeline.counters.total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn paired_id_mismatch_is_fatal() {
        let pipeline = tiny_pipeline(10);
        let r1 = Record { id: "read/1".into(), seq: b"ACGTACGTACGTACGT".to_vec(), qual: None };
        let r2 = Record { id: "other/2".into(), seq: b"ACGTACGTACGTACGT".to_vec(), qual: None };
        assert!(pipeline.add_paired_read(r1, r2).is_err());
    }
}
