//! C5: BinPacker — an optional greedy optimizer that merges small
//! same-category bins into buckets, cutting the filter's bin width `B`
//! without mixing categories within a bucket.

use crate::input_stats::InputStats;
use crate::summary::InputSummary;
use std::collections::HashMap;

pub struct PackResult {
    pub summary: InputSummary,
    pub stats: InputStats,
    /// `bucket_to_bins[bucket]` lists the original bin indices merged into it.
    pub bucket_to_bins: Vec<Vec<u8>>,
}

/// Identity packing: bucket `i` contains exactly original bin `i`.
fn identity_pack(summary: &InputSummary, stats: &InputStats) -> PackResult {
    let bucket_to_bins: Vec<Vec<u8>> = (0..summary.num_bins() as u8).map(|b| vec![b]).collect();
    PackResult {
        summary: summary.clone(),
        stats: stats.clone(),
        bucket_to_bins,
    }
}

/// Greedy same-category bin merging per §4.2.
fn greedy_pack(summary: &InputSummary, stats: &InputStats) -> PackResult {
    let cap = (stats.max_hash_count() / 2).max(1);
    let sorted = stats.bins_by_hash_count_ascending();

    // Per-category list of (bucket index, bytes used so far).
    let mut open_bucket: HashMap<u8, usize> = HashMap::new();
    let mut bucket_load: Vec<u64> = Vec::new();
    let mut bucket_category: Vec<u8> = Vec::new();
    let mut bucket_to_bins: Vec<Vec<u8>> = Vec::new();

    for bin in sorted {
        let cat = summary.category_of_bin(bin);
        let n = stats.hash_count(bin);
        let fits_open = open_bucket
            .get(&cat)
            .map(|&b| bucket_load[b] + n <= cap)
            .unwrap_or(false);

        let bucket = if fits_open {
            *open_bucket.get(&cat).unwrap()
        } else {
            let b = bucket_load.len();
            bucket_load.push(0);
            bucket_category.push(cat);
            bucket_to_bins.push(Vec::new());
            open_bucket.insert(cat, b);
            b
        };
        bucket_load[bucket] += n;
        bucket_to_bins[bucket].push(bin);
    }

    let categories = summary.categories().to_vec();
    let new_summary = InputSummary::with_buckets(categories, bucket_category);
    let new_stats = stats.into_buckets(&bucket_to_bins);

    PackResult {
        summary: new_summary,
        stats: new_stats,
        bucket_to_bins,
    }
}

pub fn pack(summary: &InputSummary, stats: &InputStats, optimize: bool) -> PackResult {
    if optimize {
        greedy_pack(summary, stats)
    } else {
        identity_pack(summary, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(cats: &[&str], hashes: &[u64]) -> (InputSummary, InputStats) {
        let mut summary = InputSummary::new();
        for c in cats {
            summary.add_bin(c).unwrap();
        }
        let mut stats = InputStats::with_bins(cats.len());
        for (i, &h) in hashes.iter().enumerate() {
            stats.set(i as u8, h, 1);
        }
        (summary, stats)
    }

    #[test]
    fn identity_pack_is_one_to_one() {
        let (summary, stats) = build(&["host", "viral"], &[100, 50]);
        let result = pack(&summary, &stats, false);
        assert_eq!(result.summary.num_bins(), 2);
        assert_eq!(result.bucket_to_bins, vec![vec![0], vec![1]]);
    }

    #[test]
    fn greedy_pack_merges_same_category_small_bins() {
        // max = 100 -> cap = 50. Two small host bins (10, 10) should merge;
        // the big host bin (100) gets its own bucket; viral stays separate.
        let (summary, stats) = build(&["host", "host", "host", "viral"], &[10, 10, 100, 5]);
        let result = pack(&summary, &stats, true);
        // Every bucket must be single-category.
        for bins in &result.bucket_to_bins {
            let cats: Vec<u8> = bins.iter().map(|&b| summary.category_of_bin(b)).collect();
            assert!(cats.windows(2).all(|w| w[0] == w[1]));
        }
        // The two size-10 host bins should have landed in the same bucket.
        let bucket_of = |bin: u8| {
            result
                .bucket_to_bins
                .iter()
                .position(|members| members.contains(&bin))
                .unwrap()
        };
        assert_eq!(bucket_of(0), bucket_of(1));
    }

    #[test]
    fn greedy_pack_no_optimize_bound_holds() {
        let (summary, stats) = build(&["host", "host"], &[10, 10]);
        let result = pack(&summary, &stats, true);
        let max_single = stats.max_hash_count();
        for bins in &result.bucket_to_bins {
            let total: u64 = bins.iter().map(|&b| stats.hash_count(b)).sum();
            assert!(total as f64 <= (max_single as f64 / 2.0) * 2.0);
        }
    }
}
