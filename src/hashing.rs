//! Minimizer hashing: the `hash(sequence) -> iterator<u64>` contract the
//! filter and pipeline consume. `seqkmer` supplies the finalizer and the
//! canonicalization primitives; the sliding-window scan itself is not part
//! of that crate's public surface, so it is reimplemented here against the
//! same `Meros` configuration.

use seqkmer::{canonical_representation, char_to_value, fmix64, Meros, BITS_PER_CHAR};
use std::collections::VecDeque;

/// `(window_size w, kmer_size k)` as the CLI names them; `w` is the number
/// of consecutive candidate k-mers compared to pick a minimizer, `k` is the
/// minimizer length itself. `w >= k > 0` is enforced at construction.
#[derive(Clone, Debug)]
pub struct MinimizerConfig {
    meros: Meros,
}

impl MinimizerConfig {
    pub fn new(window_size: u8, kmer_size: u8) -> crate::error::Result<Self> {
        if kmer_size == 0 || window_size < kmer_size {
            return Err(crate::error::HostCallError::InvalidConfig(format!(
                "window size {window_size} must be >= kmer size {kmer_size} > 0"
            )));
        }
        let meros = Meros::new(window_size as usize, kmer_size as usize, None, None, None);
        Ok(Self { meros })
    }

    pub fn window_size(&self) -> u8 {
        self.meros.k_mer as u8
    }

    pub fn kmer_size(&self) -> u8 {
        self.meros.l_mer as u8
    }

    /// Deterministic, order-insensitive hash stream for a sequence. Bytes
    /// that aren't valid bases reset the sliding window, matching the
    /// upstream scanner's treatment of ambiguity codes and line breaks.
    pub fn hashes(&self, sequence: &[u8]) -> Vec<u64> {
        let mut out = Vec::new();
        let mut scanner = Scanner::new(&self.meros);
        for &base in sequence {
            if let Some(h) = scanner.push(base) {
                out.push(h);
            }
        }
        out
    }
}

struct Candidate {
    pos: usize,
    value: u64,
}

/// Sliding window over candidate l-mers, tracking the running minimum.
struct Window {
    queue: VecDeque<Candidate>,
    capacity: usize,
    count: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity.max(1)),
            capacity,
            count: 0,
        }
    }

    fn push(&mut self, value: u64) -> Option<u64> {
        if self.capacity == 0 {
            self.count += 1;
            return Some(value);
        }
        while let Some(back) = self.queue.back() {
            if back.value > value {
                self.queue.pop_back();
            } else {
                break;
            }
        }
        let emit = (self.queue.is_empty() && self.count >= self.capacity)
            || self.count == self.capacity;
        self.queue.push_back(Candidate {
            pos: self.count,
            value,
        });
        while let Some(front) = self.queue.front() {
            if self.count >= self.capacity && front.pos < self.count + 1 - self.capacity {
                self.queue.pop_front();
            } else {
                break;
            }
        }
        self.count += 1;
        if emit {
            self.queue.front().map(|c| c.value)
        } else {
            None
        }
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.count = 0;
    }
}

struct Scanner<'a> {
    meros: &'a Meros,
    window: Window,
    value: u64,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(meros: &'a Meros) -> Self {
        let window_len = meros.k_mer.saturating_sub(meros.l_mer) + 1;
        Self {
            meros,
            window: Window::new(window_len),
            value: 0,
            pos: 0,
        }
    }

    fn push(&mut self, base: u8) -> Option<u64> {
        let code = match char_to_value(base) {
            Some(c) => c,
            None => {
                self.value = 0;
                self.pos = 0;
                self.window.clear();
                return None;
            }
        };
        self.value = ((self.value << BITS_PER_CHAR) | code) & self.meros.mask;
        self.pos += 1;
        if self.pos < self.meros.l_mer {
            return None;
        }
        let mut candidate = canonical_representation(self.value, self.meros.l_mer);
        if self.meros.spaced_seed_mask > 0 {
            candidate &= self.meros.spaced_seed_mask;
        }
        candidate ^= self.meros.toggle_mask;
        self.window
            .push(candidate)
            .map(|minimizer| fmix64(minimizer ^ self.meros.toggle_mask))
    }
}
