//! C3: HashStore — disk-backed per-bin hash spills under a temp directory.
//! Each bin's hashes are written as raw back-to-back `u64` with no header
//! and read back (then deleted) when the filter is built.

use crate::error::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct HashStore {
    temp_dir: PathBuf,
}

impl HashStore {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Result<Self> {
        let temp_dir = temp_dir.into();
        fs::create_dir_all(&temp_dir)?;
        Ok(Self { temp_dir })
    }

    fn path_for(&self, bin: u8) -> PathBuf {
        self.temp_dir.join(format!("{bin}.min"))
    }

    pub fn spill(&self, bin: u8, hashes: &[u64]) -> Result<()> {
        let mut w = BufWriter::new(File::create(self.path_for(bin))?);
        for &h in hashes {
            w.write_u64::<LittleEndian>(h)?;
        }
        w.flush()?;
        Ok(())
    }

    /// Loads a bin's spilled hashes and deletes the temp file, per §4.3
    /// step 5. Removes the temp directory afterward if it is now empty.
    pub fn take(&self, bin: u8) -> Result<Vec<u64>> {
        let path = self.path_for(bin);
        let mut r = BufReader::new(File::open(&path)?);
        let mut out = Vec::new();
        loop {
            match r.read_u64::<LittleEndian>() {
                Ok(v) => out.push(v),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
        }
        drop(r);
        fs::remove_file(&path)?;
        self.remove_dir_if_empty();
        Ok(out)
    }

    fn remove_dir_if_empty(&self) {
        if let Ok(mut entries) = fs::read_dir(&self.temp_dir) {
            if entries.next().is_none() {
                if let Err(e) = fs::remove_dir(&self.temp_dir) {
                    debug!("not removing temp dir {:?}: {e}", self.temp_dir);
                }
            }
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spills_and_reloads_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = HashStore::new(dir.path().join("spill")).unwrap();
        store.spill(0, &[1, 2, 3]).unwrap();
        let back = store.take(0).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn removes_temp_dir_once_drained() {
        let dir = tempfile::tempdir().unwrap();
        let spill_dir = dir.path().join("spill");
        let store = HashStore::new(&spill_dir).unwrap();
        store.spill(0, &[42]).unwrap();
        store.take(0).unwrap();
        assert!(!spill_dir.exists());
    }
}
