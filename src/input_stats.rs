//! C2: InputStats — per-bin hash and record counts gathered while spilling
//! hashes to disk, and the size-sorted view BinPacker needs.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Result as IoResult, Write};

#[derive(Clone, Debug, Default)]
pub struct InputStats {
    hash_counts: Vec<u64>,
    record_counts: Vec<u64>,
}

impl InputStats {
    pub fn with_bins(num_bins: usize) -> Self {
        Self {
            hash_counts: vec![0; num_bins],
            record_counts: vec![0; num_bins],
        }
    }

    pub fn set(&mut self, bin: u8, hash_count: u64, record_count: u64) {
        self.hash_counts[bin as usize] = hash_count;
        self.record_counts[bin as usize] = record_count;
    }

    pub fn hash_count(&self, bin: u8) -> u64 {
        self.hash_counts[bin as usize]
    }

    pub fn record_count(&self, bin: u8) -> u64 {
        self.record_counts[bin as usize]
    }

    pub fn num_bins(&self) -> usize {
        self.hash_counts.len()
    }

    /// Bin indices sorted by ascending hash count, the order BinPacker
    /// processes bins in.
    pub fn bins_by_hash_count_ascending(&self) -> Vec<u8> {
        let mut bins: Vec<u8> = (0..self.hash_counts.len() as u8).collect();
        bins.sort_by_key(|&b| self.hash_counts[b as usize]);
        bins
    }

    pub fn max_hash_count(&self) -> u64 {
        self.hash_counts.iter().copied().max().unwrap_or(0)
    }

    /// Rewrites per-bin stats into per-bucket stats given a bucket
    /// membership list, summing hashes and records across member bins.
    pub fn into_buckets(&self, bucket_members: &[Vec<u8>]) -> Self {
        let mut out = InputStats::with_bins(bucket_members.len());
        for (bucket, members) in bucket_members.iter().enumerate() {
            let h: u64 = members.iter().map(|&b| self.hash_count(b)).sum();
            let r: u64 = members.iter().map(|&b| self.record_count(b)).sum();
            out.set(bucket as u8, h, r);
        }
        out
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> IoResult<()> {
        w.write_u32::<LittleEndian>(self.hash_counts.len() as u32)?;
        for &h in &self.hash_counts {
            w.write_u64::<LittleEndian>(h)?;
        }
        for &r in &self.record_counts {
            w.write_u64::<LittleEndian>(r)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> IoResult<Self> {
        let n = r.read_u32::<LittleEndian>()? as usize;
        let mut hash_counts = Vec::with_capacity(n);
        for _ in 0..n {
            hash_counts.push(r.read_u64::<LittleEndian>()?);
        }
        let mut record_counts = Vec::with_capacity(n);
        for _ in 0..n {
            record_counts.push(r.read_u64::<LittleEndian>()?);
        }
        Ok(Self {
            hash_counts,
            record_counts,
        })
    }
}
