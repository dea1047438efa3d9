//! C1: InputSummary — the bin↔category mapping built once at index time and
//! carried immutably through classification.

use crate::error::{HostCallError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Read, Write};

pub const NONE_CATEGORY: u8 = u8::MAX;
pub const MAX_BINS: usize = 255;

/// Bin-to-category mapping plus the ordered category name list. Built once
/// by `IndexBuilder`, rewritten in place by `BinPacker`, then frozen.
#[derive(Clone, Debug, Default)]
pub struct InputSummary {
    categories: Vec<String>,
    bin_to_category: Vec<u8>,
    category_index: HashMap<String, u8>,
}

impl InputSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `bin` as belonging to `category`, creating a new category
    /// index the first time `category` is seen. Bins must be assigned in
    /// increasing order starting from 0; returns `Internal` otherwise.
    pub fn add_bin(&mut self, category: &str) -> Result<u8> {
        if self.bin_to_category.len() >= MAX_BINS {
            return Err(HostCallError::Internal(
                "attempted to add a bin past the 255-bin cap".into(),
            ));
        }
        let cat_idx = match self.category_index.get(category) {
            Some(&idx) => idx,
            None => {
                let idx = self.categories.len() as u8;
                self.categories.push(category.to_string());
                self.category_index.insert(category.to_string(), idx);
                idx
            }
        };
        let bin = self.bin_to_category.len() as u8;
        self.bin_to_category.push(cat_idx);
        Ok(bin)
    }

    pub fn num_bins(&self) -> usize {
        self.bin_to_category.len()
    }

    pub fn num_categories(&self) -> usize {
        self.categories.len()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn category_of_bin(&self, bin: u8) -> u8 {
        self.bin_to_category[bin as usize]
    }

    pub fn category_name(&self, index: u8) -> Option<&str> {
        self.categories.get(index as usize).map(|s| s.as_str())
    }

    pub fn category_index_of(&self, name: &str) -> Option<u8> {
        self.category_index.get(name).copied()
    }

    /// Rebuilds the bin→category mapping from a bucket layout produced by
    /// the bin packer; `bucket_category[bucket] = category index`.
    pub fn with_buckets(categories: Vec<String>, bucket_category: Vec<u8>) -> Self {
        let category_index = categories
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i as u8))
            .collect();
        Self {
            categories,
            bin_to_category: bucket_category,
            category_index,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(self.categories.len() as u8)?;
        for name in &self.categories {
            let bytes = name.as_bytes();
            w.write_u16::<LittleEndian>(bytes.len() as u16)?;
            w.write_all(bytes)?;
        }
        w.write_u32::<LittleEndian>(self.bin_to_category.len() as u32)?;
        for &c in &self.bin_to_category {
            w.write_u8(c)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let num_cats = r.read_u8()?;
        let mut categories = Vec::with_capacity(num_cats as usize);
        let mut category_index = HashMap::new();
        for i in 0..num_cats {
            let len = r.read_u16::<LittleEndian>()? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            let name = String::from_utf8(buf)
                .map_err(|e| HostCallError::Internal(format!("non-utf8 category name: {e}")))?;
            category_index.insert(name.clone(), i);
            categories.push(name);
        }
        let num_bins = r.read_u32::<LittleEndian>()? as usize;
        let mut bin_to_category = Vec::with_capacity(num_bins);
        for _ in 0..num_bins {
            bin_to_category.push(r.read_u8()?);
        }
        Ok(Self {
            categories,
            bin_to_category,
            category_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_bins_and_dedupes_categories() {
        let mut s = InputSummary::new();
        let b0 = s.add_bin("host").unwrap();
        let b1 = s.add_bin("viral").unwrap();
        let b2 = s.add_bin("host").unwrap();
        assert_eq!((b0, b1, b2), (0, 1, 2));
        assert_eq!(s.num_bins(), 3);
        assert_eq!(s.num_categories(), 2);
        assert_eq!(s.category_of_bin(b2), s.category_of_bin(b0));
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut s = InputSummary::new();
        s.add_bin("host").unwrap();
        s.add_bin("viral").unwrap();
        let mut buf = Vec::new();
        s.write_to(&mut buf).unwrap();
        let back = InputSummary::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.categories(), s.categories());
        assert_eq!(back.num_bins(), s.num_bins());
    }
}
