//! C7 (ReadEntry) and C10 (DecisionEngine, embedded here rather than as a
//! separate type, per the source's structure): per-read feature vector,
//! bit-row accumulation, and the classify/dehost call logic.

use crate::error::{HostCallError, Result};
use crate::filter::BitRow;
use crate::model::StatsModel;
use crate::summary::{InputSummary, NONE_CATEGORY};
use std::io::Write;

pub struct ReadEntry {
    pub read_id: String,
    pub length: u32,
    pub mean_quality: f32,
    pub compression_ratio: f32,

    bits: Vec<BitRow>,
    max_bits: Vec<Vec<bool>>,
    counts: Vec<u32>,
    unique_counts: Vec<u32>,
    proportions: Vec<f32>,
    unique_proportions: Vec<f32>,
    probabilities: Vec<f64>,
    call: u8,
    confidence_score: u8,
}

impl ReadEntry {
    pub fn new(
        read_id: String,
        length: u32,
        mean_quality: f32,
        compression_ratio: f32,
        summary: &InputSummary,
    ) -> Self {
        let c = summary.num_categories();
        Self {
            read_id,
            length,
            mean_quality,
            compression_ratio,
            bits: Vec::new(),
            max_bits: vec![Vec::new(); c],
            counts: vec![0; c],
            unique_counts: vec![0; c],
            proportions: vec![0.0; c],
            unique_proportions: vec![0.0; c],
            probabilities: vec![1.0; c],
            call: NONE_CATEGORY,
            confidence_score: 0,
        }
    }

    pub fn update(&mut self, row: BitRow) {
        self.bits.push(row);
    }

    pub fn n_hashes(&self) -> usize {
        self.bits.len()
    }

    pub fn call(&self) -> u8 {
        self.call
    }

    pub fn confidence_score(&self) -> u8 {
        self.confidence_score
    }

    pub fn proportions(&self) -> &[f32] {
        &self.proportions
    }

    pub fn unique_proportions(&self) -> &[f32] {
        &self.unique_proportions
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn unique_counts(&self) -> &[u32] {
        &self.unique_counts
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// §4.4 `compute_counts_and_max_bits` followed by `compute_proportions`.
    /// A zero-hash read (B1) is left fully zeroed rather than dividing.
    pub fn post_process(&mut self, summary: &InputSummary) -> Result<()> {
        let n_hashes = self.bits.len();
        let num_bins = summary.num_bins();
        for row in &self.bits {
            if row.num_bins() != num_bins {
                return Err(HostCallError::Internal(format!(
                    "bit row width {} does not match {num_bins} bins",
                    row.num_bins()
                )));
            }
        }
        if n_hashes == 0 {
            return Ok(());
        }

        let mut total_bits_per_bin = vec![0u32; num_bins];
        for row in &self.bits {
            for bin in 0..num_bins {
                if row.get(bin as u8) {
                    total_bits_per_bin[bin] += 1;
                }
            }
        }

        let num_categories = self.counts.len();
        let mut index_per_category: Vec<Option<u8>> = vec![None; num_categories];
        for bin in 0..num_bins {
            let cat = summary.category_of_bin(bin as u8) as usize;
            let total = total_bits_per_bin[bin];
            let better = match index_per_category[cat] {
                None => true,
                Some(cur) => total > total_bits_per_bin[cur as usize],
            };
            if better {
                index_per_category[cat] = Some(bin as u8);
                self.counts[cat] = total;
            }
        }

        for cat in 0..num_categories {
            self.max_bits[cat] = Vec::with_capacity(n_hashes);
        }
        for row in &self.bits {
            let mut found: Vec<usize> = Vec::new();
            for cat in 0..num_categories {
                let bit = match index_per_category[cat] {
                    Some(bin) => row.get(bin),
                    None => false,
                };
                self.max_bits[cat].push(bit);
                if bit {
                    found.push(cat);
                }
            }
            if found.len() == 1 {
                self.unique_counts[found[0]] += 1;
            }
        }

        for cat in 0..num_categories {
            self.proportions[cat] = self.counts[cat] as f32 / n_hashes as f32;
            self.unique_proportions[cat] = self.unique_counts[cat] as f32 / n_hashes as f32;
        }
        Ok(())
    }

    /// §4.4 `apply_model`: multiplies only the positive-density ratio into
    /// `probabilities[c]`; the result is never renormalized.
    fn apply_model(&mut self, stats_model: &StatsModel) {
        for c in 0..self.probabilities.len() {
            let ratio = stats_model.density_ratio(c, self.unique_proportions[c]);
            self.probabilities[c] *= ratio.pos;
        }
    }

    fn require_two_categories(&self) -> Result<()> {
        if self.counts.len() != 2 {
            return Err(HostCallError::InvalidConfig(
                "the decision engine supports exactly two categories".into(),
            ));
        }
        Ok(())
    }

    fn gates_pass(&self, stats_model: &StatsModel) -> bool {
        let t = &stats_model.thresholds;
        self.mean_quality >= t.min_quality
            && self.length >= t.min_length
            && self.compression_ratio >= t.min_compression
    }

    fn saturating_confidence(winner: u32, loser: u32) -> u8 {
        winner.saturating_sub(loser).min(u8::MAX as u32) as u8
    }

    /// Classify mode (two categories), §4.5.
    pub fn classify(&mut self, stats_model: &StatsModel) -> Result<()> {
        self.require_two_categories()?;
        self.call = NONE_CATEGORY;
        self.confidence_score = 0;
        if self.n_hashes() == 0 {
            return Ok(());
        }
        self.apply_model(stats_model);

        let (mut winner, mut loser) = (0usize, 1usize);
        if self.unique_counts[1] > self.unique_counts[0] {
            std::mem::swap(&mut winner, &mut loser);
        }

        self.confidence_score =
            Self::saturating_confidence(self.unique_counts[winner], self.unique_counts[loser]);

        if !self.gates_pass(stats_model) {
            return Ok(());
        }

        let t = &stats_model.thresholds;
        let mut call = NONE_CATEGORY;
        if self.probabilities[loser] == 0.0 && self.probabilities[winner] > 0.0 {
            call = winner as u8;
        } else if self.confidence_score > t.confidence_threshold
            && self.probabilities[winner] > self.probabilities[loser]
        {
            call = winner as u8;
        }

        if self.counts[loser] > self.counts[winner]
            || self.counts[winner].saturating_sub(self.counts[loser]) < t.min_hits
        {
            call = NONE_CATEGORY;
        }
        if self.proportions[loser] > self.proportions[winner]
            || self.proportions[winner] - self.proportions[loser] < t.min_proportion_difference
        {
            call = NONE_CATEGORY;
        }

        self.call = call;
        Ok(())
    }

    /// Dehost mode (two categories; `host_index` known), §4.5.
    pub fn dehost(&mut self, stats_model: &StatsModel, host_index: u8) -> Result<()> {
        self.require_two_categories()?;
        self.call = NONE_CATEGORY;
        self.confidence_score = 0;
        if self.n_hashes() == 0 {
            return Ok(());
        }
        self.apply_model(stats_model);

        let host = host_index as usize;
        let other = 1 - host;
        let winner = if self.unique_proportions[host] >= self.unique_proportions[other] {
            host
        } else {
            other
        };
        let loser = 1 - winner;

        self.confidence_score =
            Self::saturating_confidence(self.unique_counts[winner], self.unique_counts[loser]);

        let t = &stats_model.thresholds;
        if self.confidence_score < t.confidence_threshold || !self.gates_pass(stats_model) {
            return Ok(());
        }

        let gap = self.unique_proportions[winner] - self.unique_proportions[loser];
        self.call = if winner == host && gap > t.min_proportion_difference {
            host as u8
        } else if winner == other
            && self.unique_proportions[host] < t.host_unique_prop_lo_threshold
            && gap > t.min_proportion_difference
        {
            other as u8
        } else {
            NONE_CATEGORY
        };
        Ok(())
    }

    /// Emits one TAB-separated assignment line per §6.
    pub fn print_assignment<W: Write>(&self, summary: &InputSummary, sink: &mut W) -> Result<()> {
        let status = if self.call == NONE_CATEGORY { "U" } else { "C" };
        let call_name = if self.call == NONE_CATEGORY {
            ""
        } else {
            summary.category_name(self.call).unwrap_or("")
        };
        write!(
            sink,
            "{status}\t{}\t{call_name}\t{}\t{}\t{:.6}\t{}\t{:.6}",
            self.read_id,
            self.length,
            self.n_hashes(),
            self.mean_quality,
            self.confidence_score,
            self.compression_ratio
        )?;
        for (c, name) in summary.categories().iter().enumerate() {
            write!(
                sink,
                " {name}:{}:{:.6}:{:.6}:{:.6}",
                self.counts[c], self.proportions[c], self.unique_proportions[c], self.probabilities[c]
            )?;
        }
        writeln!(sink)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, DEFAULT_BITS_CAP};
    use crate::model::DistributionKind;

    fn two_category_summary() -> InputSummary {
        let mut s = InputSummary::new();
        s.add_bin("host").unwrap();
        s.add_bin("viral").unwrap();
        s
    }

    /// Builds a fresh single-query filter and emplaces every `true` bin
    /// under the *same* hash, so one `bulk_contains` call on that hash
    /// reproduces exactly the requested bit pattern (k_hash=1, so each
    /// bin's bit depends only on whether that bin was emplaced with `h`).
    fn row(bits: &[bool]) -> BitRow {
        let h = 42u64;
        let filter = Filter::size_for(bits.len(), 1, 0.01, 10, DEFAULT_BITS_CAP).unwrap();
        for (bin, &b) in bits.iter().enumerate() {
            if b {
                filter.emplace(h, bin as u8);
            }
        }
        filter.build().agent().bulk_contains(h)
    }

    #[test]
    fn zero_hashes_rejected_without_panic() {
        let summary = two_category_summary();
        let mut entry = ReadEntry::new("r1".into(), 10, 30.0, 1.0, &summary);
        entry.post_process(&summary).unwrap();
        assert_eq!(entry.proportions(), &[0.0, 0.0]);
        let model = StatsModel::new(2, DistributionKind::Beta, 5, 0.1);
        model.force_ready();
        entry.classify(&model).unwrap();
        assert_eq!(entry.call(), NONE_CATEGORY);
    }

    #[test]
    fn proportions_within_unit_interval() {
        let summary = two_category_summary();
        let mut entry = ReadEntry::new("r1".into(), 100, 30.0, 1.0, &summary);
        entry.update(row(&[true, false]));
        entry.update(row(&[true, false]));
        entry.update(row(&[false, true]));
        entry.post_process(&summary).unwrap();
        for &p in entry.proportions() {
            assert!((0.0..=1.0).contains(&p));
        }
        for &p in entry.unique_proportions() {
            assert!((0.0..=1.0).contains(&p));
        }
        let sum_unique: u32 = entry.unique_counts().iter().sum();
        assert!(sum_unique as usize <= entry.n_hashes());
    }

    #[test]
    fn post_process_is_idempotent() {
        let summary = two_category_summary();
        let mut entry = ReadEntry::new("r1".into(), 100, 30.0, 1.0, &summary);
        entry.update(row(&[true, false]));
        entry.update(row(&[false, true]));
        entry.post_process(&summary).unwrap();
        let before = (entry.counts().to_vec(), entry.unique_counts().to_vec());
        entry.post_process(&summary).unwrap();
        let after = (entry.counts().to_vec(), entry.unique_counts().to_vec());
        assert_eq!(before, after);
    }
}
