//! C4: the Interleaved Membership Filter — a bin-partitioned Bloom filter
//! whose bits are interleaved by bin so that one query over `k_hash`
//! positions yields the whole `B`-bit membership row in one pass.

use crate::error::{HostCallError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use seqkmer::fmix64;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

/// A fixed-width bitmap of `num_bins` bits, one per bin, returned by a
/// membership query. Backed by a small `Vec<u64>` rather than a `Vec<bool>`
/// to avoid a heap allocation per bit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitRow {
    words: Vec<u64>,
    num_bins: usize,
}

impl BitRow {
    fn new(num_bins: usize) -> Self {
        Self {
            words: vec![0u64; num_bins.div_ceil(64)],
            num_bins,
        }
    }

    fn ones(num_bins: usize) -> Self {
        let mut row = Self::new(num_bins);
        for w in row.words.iter_mut() {
            *w = u64::MAX;
        }
        row.mask_tail();
        row
    }

    fn mask_tail(&mut self) {
        let rem = self.num_bins % 64;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }

    #[inline]
    pub fn get(&self, bin: u8) -> bool {
        let bin = bin as usize;
        (self.words[bin / 64] >> (bin % 64)) & 1 == 1
    }

    #[inline]
    fn set(&mut self, bin: u8) {
        let bin = bin as usize;
        self.words[bin / 64] |= 1u64 << (bin % 64);
    }

    #[inline]
    fn and_assign(&mut self, other: &BitRow) {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a &= b;
        }
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    pub fn popcount(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

/// Mutable builder: the filter during construction, shared across worker
/// threads via atomic OR on the backing words. Never queried directly —
/// call `build()` to obtain the immutable, query-only `CompressedFilter`.
pub struct Filter {
    num_bins: usize,
    k_hash: usize,
    m_bits: usize,
    bits: Vec<AtomicU64>,
}

/// Upper bound on `m_bits`; sizing clamps to this and the caller is warned.
pub const DEFAULT_BITS_CAP: u64 = 1 << 34;

impl Filter {
    pub fn new(num_bins: usize, k_hash: usize, fpr_max: f64, bits_cap: u64) -> Result<Self> {
        if !(fpr_max > 0.0 && fpr_max < 1.0) {
            return Err(HostCallError::InvalidConfig(format!(
                "fpr_max must be in (0,1), got {fpr_max}"
            )));
        }
        if k_hash == 0 {
            return Err(HostCallError::InvalidConfig(
                "k_hash must be nonzero".into(),
            ));
        }
        Ok(Self {
            num_bins,
            k_hash,
            m_bits: 0,
            bits: Vec::new(),
        })
    }

    /// Sizes `m_bits` from the worst-case bucket hash count per §4.1's
    /// formula, clamping to `bits_cap` and logging a warning if clamped.
    pub fn size_for(
        num_bins: usize,
        k_hash: usize,
        fpr_max: f64,
        worst_bucket_hashes: u64,
        bits_cap: u64,
    ) -> Result<Self> {
        let mut filter = Self::new(num_bins, k_hash, fpr_max, bits_cap)?;
        let n = worst_bucket_hashes.max(1) as f64;
        let k = k_hash as f64;
        let denom = (1.0 - (fpr_max.ln() / k).exp()).ln();
        let computed = (-n * k / denom).ceil();
        let mut m_bits = computed as u64;
        if m_bits == 0 {
            m_bits = 1;
        }
        if m_bits > bits_cap {
            log::warn!(
                "computed m_bits={m_bits} exceeds cap={bits_cap}, clamping (see FilterSizing)"
            );
            m_bits = bits_cap;
        }
        filter.m_bits = m_bits as usize;
        let total_bits = filter.m_bits * filter.num_bins;
        filter.bits = (0..total_bits.div_ceil(64))
            .map(|_| AtomicU64::new(0))
            .collect();
        Ok(filter)
    }

    pub fn m_bits(&self) -> usize {
        self.m_bits
    }

    pub fn k_hash(&self) -> usize {
        self.k_hash
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    fn row_index(&self, hash: u64, seed: usize) -> usize {
        let mixed = fmix64(hash ^ (seed as u64).wrapping_mul(0x9e3779b97f4a7c15));
        (mixed % self.m_bits as u64) as usize
    }

    #[inline]
    fn bit_set(&self, abs_bit: usize) {
        let word = abs_bit / 64;
        let mask = 1u64 << (abs_bit % 64);
        self.bits[word].fetch_or(mask, Ordering::Relaxed);
    }

    #[inline]
    fn bit_get(&self, abs_bit: usize) -> bool {
        let word = abs_bit / 64;
        let mask = 1u64 << (abs_bit % 64);
        (self.bits[word].load(Ordering::Relaxed) & mask) != 0
    }

    /// Adds `hash` to `bin`'s filter row. Idempotent: setting an
    /// already-set bit is a no-op at the bit level.
    pub fn emplace(&self, hash: u64, bin: u8) {
        for seed in 0..self.k_hash {
            let row = self.row_index(hash, seed);
            self.bit_set(row * self.num_bins + bin as usize);
        }
    }

    pub fn build(self) -> CompressedFilter {
        let words: Vec<u64> = self.bits.iter().map(|w| w.load(Ordering::Relaxed)).collect();
        CompressedFilter {
            num_bins: self.num_bins,
            k_hash: self.k_hash,
            m_bits: self.m_bits,
            words,
        }
    }
}

/// The immutable, read-only filter shared by all query threads after
/// construction. `Agent` is a zero-copy, per-thread cursor over a
/// reference to this — never a clone of the bit data.
#[derive(Clone, Debug)]
pub struct CompressedFilter {
    num_bins: usize,
    k_hash: usize,
    m_bits: usize,
    words: Vec<u64>,
}

impl CompressedFilter {
    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    pub fn m_bits(&self) -> usize {
        self.m_bits
    }

    pub fn k_hash(&self) -> usize {
        self.k_hash
    }

    /// A cheap per-thread query handle. Cloning `Agent` never copies filter
    /// data, only the shared reference.
    pub fn agent(&self) -> Agent<'_> {
        Agent { filter: self }
    }

    fn row_index(&self, hash: u64, seed: usize) -> usize {
        let mixed = fmix64(hash ^ (seed as u64).wrapping_mul(0x9e3779b97f4a7c15));
        (mixed % self.m_bits as u64) as usize
    }

    fn row_slice(&self, row: usize) -> BitRow {
        let mut out = BitRow::new(self.num_bins);
        let base = row * self.num_bins;
        for bin in 0..self.num_bins {
            let abs = base + bin;
            let word = abs / 64;
            let bit = abs % 64;
            if (self.words[word] >> bit) & 1 == 1 {
                out.set(bin as u8);
            }
        }
        out
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<LittleEndian>(self.num_bins as u32)?;
        w.write_u32::<LittleEndian>(self.k_hash as u32)?;
        w.write_u64::<LittleEndian>(self.m_bits as u64)?;
        w.write_u64::<LittleEndian>(self.words.len() as u64)?;
        for &word in &self.words {
            w.write_u64::<LittleEndian>(word)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let num_bins = r.read_u32::<LittleEndian>()? as usize;
        let k_hash = r.read_u32::<LittleEndian>()? as usize;
        let m_bits = r.read_u64::<LittleEndian>()? as usize;
        let n_words = r.read_u64::<LittleEndian>()? as usize;
        let mut words = Vec::with_capacity(n_words);
        for _ in 0..n_words {
            words.push(r.read_u64::<LittleEndian>()?);
        }
        Ok(Self {
            num_bins,
            k_hash,
            m_bits,
            words,
        })
    }
}

/// Per-thread query cursor. Holds only a reference to the shared filter;
/// safe to clone and hand to each worker thread.
pub struct Agent<'a> {
    filter: &'a CompressedFilter,
}

impl<'a> Agent<'a> {
    /// Returns the `B`-bit membership row for `hash`: bit `b` is set iff
    /// `hash` hashed to a set bit in every one of `k_hash` rows for bin
    /// `b`. False positives only; a true member is never reported absent.
    pub fn bulk_contains(&self, hash: u64) -> BitRow {
        let mut result = BitRow::ones(self.filter.num_bins);
        for seed in 0..self.filter.k_hash {
            let row = self.filter.row_index(hash, seed);
            let slice = self.filter.row_slice(row);
            result.and_assign(&slice);
        }
        result
    }
}

impl<'a> Clone for Agent<'a> {
    fn clone(&self) -> Self {
        Agent {
            filter: self.filter,
        }
    }
}
