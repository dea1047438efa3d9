//! A2: FASTA/FASTQ record I/O. Grounded in the same gzip-sniffing,
//! `read_until`-based line reading the published `seqkmer` readers use, but
//! kept distinct from them because `seqkmer`'s own readers discard quality
//! bytes after base-masking and this system needs `mean_quality` per read.

use crate::error::{HostCallError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

pub const BUFSIZE: usize = 8 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Record {
    pub id: String,
    pub seq: Vec<u8>,
    /// Phred quality bytes (FASTQ `+` line), `None` for FASTA records.
    pub qual: Option<Vec<u8>>,
}

impl Record {
    /// Mean Phred quality (`qual byte - 33`), or `f32::MAX` for FASTA
    /// records — reference sequences carry no quality track and should
    /// never be rejected by the quality gate.
    pub fn mean_quality(&self) -> f32 {
        match &self.qual {
            None => f32::MAX,
            Some(q) if q.is_empty() => f32::MAX,
            Some(q) => {
                let sum: u64 = q.iter().map(|&b| (b.saturating_sub(33)) as u64).sum();
                sum as f32 / q.len() as f32
            }
        }
    }
}

fn is_gzipped(file: &mut File) -> std::io::Result<bool> {
    let mut buf = [0u8; 2];
    let n = file.read(&mut buf)?;
    use std::io::Seek;
    file.rewind()?;
    Ok(n == 2 && buf == [0x1F, 0x8B])
}

fn open_dyn_reader(path: impl AsRef<Path>) -> Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| {
        HostCallError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {e}", path.display()),
        ))
    })?;
    if is_gzipped(&mut file)? {
        Ok(Box::new(BufReader::with_capacity(
            BUFSIZE,
            GzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(BUFSIZE, file)))
    }
}

fn trim_end(buf: &mut Vec<u8>) {
    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
        buf.pop();
    }
}

fn first_token(header: &[u8]) -> String {
    let body = &header[1..];
    let end = body.iter().position(|&c| c == b' ' || c == b'\t').unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}

enum Format {
    Fasta,
    Fastq,
}

/// A single-mate FASTA/FASTQ record reader, auto-detecting format from the
/// leading `>` or `@` byte.
pub struct FastxReader {
    reader: Box<dyn BufRead + Send>,
    format: Format,
    line: Vec<u8>,
    pending_header: Option<Vec<u8>>,
}

impl FastxReader {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = open_dyn_reader(path)?;
        let mut first = Vec::new();
        reader.read_until(b'\n', &mut first)?;
        let format = match first.first() {
            Some(b'>') => Format::Fasta,
            Some(b'@') => Format::Fastq,
            _ => {
                return Err(HostCallError::InputFormat(
                    "input is neither FASTA (>) nor FASTQ (@)".into(),
                ))
            }
        };
        trim_end(&mut first);
        Ok(Self {
            reader,
            format,
            line: Vec::new(),
            pending_header: Some(first),
        })
    }

    pub fn next_record(&mut self) -> Result<Option<Record>> {
        match self.format {
            Format::Fasta => self.next_fasta(),
            Format::Fastq => self.next_fastq(),
        }
    }

    /// Whether this file was detected as FASTQ (vs. FASTA) — used to pick
    /// the matching format for extraction sinks.
    pub fn is_fastq(&self) -> bool {
        matches!(self.format, Format::Fastq)
    }

    fn take_header(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(h) = self.pending_header.take() {
            return Ok(Some(h));
        }
        self.line.clear();
        if self.reader.read_until(b'\n', &mut self.line)? == 0 {
            return Ok(None);
        }
        let mut h = std::mem::take(&mut self.line);
        trim_end(&mut h);
        Ok(Some(h))
    }

    fn next_fasta(&mut self) -> Result<Option<Record>> {
        let header = match self.take_header()? {
            Some(h) => h,
            None => return Ok(None),
        };
        let id = first_token(&header);
        let mut seq = Vec::new();
        loop {
            let start = seq.len();
            self.line.clear();
            let n = self.reader.read_until(b'\n', &mut self.line)?;
            if n == 0 {
                break;
            }
            if self.line.first() == Some(&b'>') {
                let mut next_header = std::mem::take(&mut self.line);
                trim_end(&mut next_header);
                self.pending_header = Some(next_header);
                break;
            }
            seq.extend_from_slice(&self.line);
            trim_end(&mut seq);
            let _ = start;
        }
        Ok(Some(Record { id, seq, qual: None }))
    }

    fn next_fastq(&mut self) -> Result<Option<Record>> {
        let header = match self.take_header()? {
            Some(h) => h,
            None => return Ok(None),
        };
        let id = first_token(&header);

        let mut seq = Vec::new();
        if self.reader.read_until(b'\n', &mut seq)? == 0 {
            return Err(HostCallError::InputFormat(format!(
                "truncated FASTQ record for {id}"
            )));
        }
        trim_end(&mut seq);

        let mut plus = Vec::new();
        if self.reader.read_until(b'\n', &mut plus)? == 0 {
            return Err(HostCallError::InputFormat(format!(
                "truncated FASTQ record for {id}"
            )));
        }

        let mut qual = Vec::new();
        if self.reader.read_until(b'\n', &mut qual)? == 0 {
            return Err(HostCallError::InputFormat(format!(
                "truncated FASTQ record for {id}"
            )));
        }
        trim_end(&mut qual);

        Ok(Some(Record {
            id,
            seq,
            qual: Some(qual),
        }))
    }

    pub fn next_chunk(&mut self, chunk_size: usize) -> Result<Vec<Record>> {
        let mut out = Vec::with_capacity(chunk_size);
        for _ in 0..chunk_size {
            match self.next_record()? {
                Some(r) => out.push(r),
                None => break,
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_fasta_multiline_sequence() {
        let f = write_tmp(">read1 desc\nACGT\nACGT\n>read2\nTTTT\n");
        let mut r = FastxReader::from_path(f.path()).unwrap();
        let rec1 = r.next_record().unwrap().unwrap();
        assert_eq!(rec1.id, "read1");
        assert_eq!(rec1.seq, b"ACGTACGT");
        assert!(rec1.qual.is_none());
        assert_eq!(rec1.mean_quality(), f32::MAX);
        let rec2 = r.next_record().unwrap().unwrap();
        assert_eq!(rec2.id, "read2");
        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn parses_fastq_and_mean_quality() {
        let f = write_tmp("@r1\nACGT\n+\nIIII\n");
        let mut r = FastxReader::from_path(f.path()).unwrap();
        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.id, "r1");
        assert_eq!(rec.seq, b"ACGT");
        // 'I' = ASCII 73, Phred = 73-33 = 40
        assert!((rec.mean_quality() - 40.0).abs() < 1e-6);
    }

    #[test]
    fn next_chunk_stops_at_eof() {
        let f = write_tmp("@r1\nAC\n+\nII\n@r2\nGT\n+\nII\n");
        let mut r = FastxReader::from_path(f.path()).unwrap();
        let chunk = r.next_chunk(10).unwrap();
        assert_eq!(chunk.len(), 2);
    }
}
