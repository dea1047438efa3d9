//! C6: IndexBuilder — orchestrates C1–C5 into a persisted `Index`.

use crate::error::{HostCallError, Result};
use crate::filter::{CompressedFilter, Filter, DEFAULT_BITS_CAP};
use crate::hash_store::HashStore;
use crate::hashing::MinimizerConfig;
use crate::input_stats::InputStats;
use crate::io::FastxReader;
use crate::packer;
use crate::summary::{InputSummary, MAX_BINS};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"HCIX";
const FORMAT_VERSION: u8 = 1;
pub const DEFAULT_FPR_MAX: f64 = 0.001;
pub const DEFAULT_K_HASH: usize = 3;

pub struct Index {
    pub window_size: u8,
    pub kmer_size: u8,
    pub max_fpr: f64,
    pub summary: InputSummary,
    pub stats: InputStats,
    pub filter: CompressedFilter,
}

impl Index {
    pub fn minimizer_config(&self) -> Result<MinimizerConfig> {
        MinimizerConfig::new(self.window_size, self.kmer_size)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut w = BufWriter::new(File::create(path.as_ref())?);
        w.write_all(MAGIC)?;
        w.write_u8(FORMAT_VERSION)?;
        w.write_u8(self.window_size)?;
        w.write_u8(self.kmer_size)?;
        w.write_f64::<LittleEndian>(self.max_fpr)?;
        self.summary.write_to(&mut w)?;
        self.stats.write_to(&mut w)?;
        self.filter.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut r = BufReader::new(File::open(path).map_err(|e| {
            HostCallError::Io(std::io::Error::new(
                e.kind(),
                format!("cannot open index {}: {e}", path.display()),
            ))
        })?);
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(HostCallError::Internal(format!(
                "{} is not a hostcall index (bad magic)",
                path.display()
            )));
        }
        let version = r.read_u8()?;
        if version != FORMAT_VERSION {
            return Err(HostCallError::Internal(format!(
                "unsupported index format version {version}"
            )));
        }
        let window_size = r.read_u8()?;
        let kmer_size = r.read_u8()?;
        let max_fpr = r.read_f64::<LittleEndian>()?;
        let summary = InputSummary::read_from(&mut r)?;
        let stats = InputStats::read_from(&mut r)?;
        let filter = CompressedFilter::read_from(&mut r)?;
        Ok(Self {
            window_size,
            kmer_size,
            max_fpr,
            summary,
            stats,
            filter,
        })
    }
}

struct TsvRow {
    path: PathBuf,
    category: String,
}

/// Parses `path<TAB>category` rows; lines with fewer than 2 fields are
/// skipped (logged), rows past the 255-bin cap are dropped with a warning.
fn parse_tsv(input: &Path) -> Result<Vec<TsvRow>> {
    let text = std::fs::read_to_string(input)?;
    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.splitn(2, '\t');
        let path = fields.next();
        let category = fields.next();
        match (path, category) {
            (Some(p), Some(c)) if !p.is_empty() && !c.is_empty() => {
                let resolved = std::fs::canonicalize(p).unwrap_or_else(|_| PathBuf::from(p));
                rows.push(TsvRow {
                    path: resolved,
                    category: c.trim().to_string(),
                });
            }
            _ => {
                log::warn!("skipping malformed TSV row {}: {line:?}", lineno + 1);
            }
        }
    }
    if rows.len() > MAX_BINS {
        log::warn!(
            "input TSV has {} rows, dropping rows past the {}-bin cap",
            rows.len(),
            MAX_BINS
        );
        rows.truncate(MAX_BINS);
    }
    Ok(rows)
}

pub struct IndexBuildOptions {
    pub window_size: u8,
    pub kmer_size: u8,
    pub threads: usize,
    pub optimize: bool,
    pub temp_dir: PathBuf,
    pub fpr_max: f64,
    pub k_hash: usize,
    pub bits_cap: u64,
}

pub fn build_index(input: &Path, opts: &IndexBuildOptions) -> Result<Index> {
    let minimizer = MinimizerConfig::new(opts.window_size, opts.kmer_size)?;
    let rows = parse_tsv(input)?;
    if rows.is_empty() {
        return Err(HostCallError::InputFormat(format!(
            "no usable rows in {}",
            input.display()
        )));
    }

    let mut summary = InputSummary::new();
    for row in &rows {
        summary.add_bin(&row.category)?;
    }

    let store = HashStore::new(&opts.temp_dir)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.threads.max(1))
        .build()
        .map_err(|e| HostCallError::Internal(format!("failed to build thread pool: {e}")))?;

    let per_bin: Vec<(u64, u64)> = pool.install(|| {
        rows.par_iter()
            .enumerate()
            .map(|(bin, row)| -> Result<(u64, u64)> {
                let mut reader = FastxReader::from_path(&row.path)?;
                let mut hashes: HashSet<u64> = HashSet::new();
                let mut record_count: u64 = 0;
                while let Some(record) = reader.next_record()? {
                    record_count += 1;
                    hashes.extend(minimizer.hashes(&record.seq));
                }
                let hashes: Vec<u64> = hashes.into_iter().collect();
                let hash_count = hashes.len() as u64;
                store.spill(bin as u8, &hashes)?;
                Ok((hash_count, record_count))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let mut stats = InputStats::with_bins(rows.len());
    for (bin, (hash_count, record_count)) in per_bin.into_iter().enumerate() {
        stats.set(bin as u8, hash_count, record_count);
    }

    let packed = packer::pack(&summary, &stats, opts.optimize);
    let worst_bucket_hashes = packed.stats.max_hash_count();

    let filter = Filter::size_for(
        packed.summary.num_bins(),
        opts.k_hash,
        opts.fpr_max,
        worst_bucket_hashes,
        opts.bits_cap,
    )?;

    pool.install(|| -> Result<()> {
        packed
            .bucket_to_bins
            .par_iter()
            .enumerate()
            .try_for_each(|(bucket, members)| -> Result<()> {
                for &bin in members {
                    let hashes = store.take(bin)?;
                    for h in hashes {
                        filter.emplace(h, bucket as u8);
                    }
                }
                Ok(())
            })
    })?;

    Ok(Index {
        window_size: opts.window_size,
        kmer_size: opts.kmer_size,
        max_fpr: opts.fpr_max,
        summary: packed.summary,
        stats: packed.stats,
        filter: filter.build(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_fasta(dir: &Path, name: &str, records: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        for (id, seq) in records {
            writeln!(f, ">{id}\n{seq}").unwrap();
        }
        path
    }

    #[test]
    fn builds_two_bin_index_from_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let host_seq = "ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT".repeat(10);
        let viral_seq = "TTTTGGGGCCCCAAAATTTTGGGGCCCCAAAATTTTGGGGCCCCAAAA".repeat(5);
        let host = write_fasta(dir.path(), "host.fa", &[("h1", &host_seq)]);
        let viral = write_fasta(dir.path(), "viral.fa", &[("v1", &viral_seq)]);

        let tsv_path = dir.path().join("input.tsv");
        let mut tsv = File::create(&tsv_path).unwrap();
        writeln!(tsv, "{}\thost", host.display()).unwrap();
        writeln!(tsv, "{}\tviral", viral.display()).unwrap();
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

        let out_path = dir.path().join("out.idx");
        index.save(&out_path).unwrap();
        assert!(out_path.exists());
        let loaded = Index::load(&out_path).unwrap();
        assert_eq!(loaded.summary.num_bins(), 2);
        assert_eq!(loaded.window_size, 41);
    }

    #[test]
    fn drops_rows_past_bin_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut tsv = File::create(dir.path().join("big.tsv")).unwrap();
        let seq = write_fasta(dir.path(), "a.fa", &[("a", "ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT")]);
        for _ in 0..260 {
            writeln!(tsv, "{}\tcat", seq.display()).unwrap();
        }
        drop(tsv);
        let rows = parse_tsv(&dir.path().join("big.tsv")).unwrap();
        assert_eq!(rows.len(), MAX_BINS);
    }
}
