//! Persisted artifacts: the append-only edge store and its checkpoint
//! watermark.
//!
//! Edges are fixed-width little-endian records appended by a single writer
//! in WorkUnit commit order. The watermark file names the next unit to
//! process together with the exact record count it corresponds to, and is
//! replaced atomically (temp file + rename) only after the edge data for
//! its unit is flushed. Resuming therefore neither reprocesses nor skips a
//! unit, and a crash between flush and rename simply replays the last
//! unit's append onto a store the watermark already describes — the store
//! is truncated back to the watermark on open, so replay cannot duplicate.
//!
//! A watermark that disagrees with the store length in the other direction
//! (more units claimed than records present) is fatal: that store needs
//! explicit repair, not guessing.

use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// One scored pair above the reporting threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimilarityEdge {
    pub a: u32,
    pub b: u32,
    /// Biased fixed-width fast-pass score.
    pub raw: u16,
    /// Raw score hit the saturation ceiling.
    pub saturated: bool,
    /// Wide-integer exact score from the rescorer.
    pub exact: i64,
}

const EDGE_MAGIC: &[u8; 4] = b"SGED";
const MARK_MAGIC: &[u8; 4] = b"SGWM";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;
const RECORD_LEN: u64 = 20;

impl SimilarityEdge {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.a.to_le_bytes());
        buf.extend_from_slice(&self.b.to_le_bytes());
        buf.extend_from_slice(&self.raw.to_le_bytes());
        buf.push(self.saturated as u8);
        buf.push(0); // reserved
        buf.extend_from_slice(&self.exact.to_le_bytes());
    }

    fn read_from(rec: &[u8; RECORD_LEN as usize]) -> Self {
        SimilarityEdge {
            a: u32::from_le_bytes(rec[0..4].try_into().unwrap()),
            b: u32::from_le_bytes(rec[4..8].try_into().unwrap()),
            raw: u16::from_le_bytes(rec[8..10].try_into().unwrap()),
            saturated: rec[10] != 0,
            exact: i64::from_le_bytes(rec[12..20].try_into().unwrap()),
        }
    }
}

/// Checkpoint state persisted alongside the edge data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Watermark {
    /// First unit id not yet committed.
    pub next_unit: u64,
    /// Edge records present at this watermark.
    pub edges: u64,
    /// Cumulative query residues processed (progress signal).
    pub residues: u64,
}

impl Watermark {
    fn encode(&self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        buf[0..4].copy_from_slice(MARK_MAGIC);
        buf[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.next_unit.to_le_bytes());
        buf[16..24].copy_from_slice(&self.edges.to_le_bytes());
        buf[24..32].copy_from_slice(&self.residues.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; 32]) -> Result<Self> {
        if &buf[0..4] != MARK_MAGIC {
            bail!("not a watermark file");
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != FORMAT_VERSION {
            bail!("unsupported watermark version {version}");
        }
        Ok(Watermark {
            next_unit: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            edges: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            residues: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut buf = [0u8; 32];
        File::open(path)
            .with_context(|| format!("opening watermark {}", path.display()))?
            .read_exact(&mut buf)
            .context("watermark file truncated")?;
        Self::decode(&buf)
    }
}

/// Append-only edge store with a single writer at a time.
pub struct EdgeStore {
    file: BufWriter<File>,
    edges_path: PathBuf,
    mark_path: PathBuf,
    watermark: Watermark,
}

impl EdgeStore {
    pub fn edges_path(dir: &Path) -> PathBuf {
        dir.join("edges.bin")
    }

    pub fn watermark_path(dir: &Path) -> PathBuf {
        dir.join("edges.watermark")
    }

    /// Create a fresh store in `dir`, truncating any previous run.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
        let edges_path = Self::edges_path(dir);
        let mark_path = Self::watermark_path(dir);
        let mut file = File::create(&edges_path)
            .with_context(|| format!("creating edge store {}", edges_path.display()))?;
        file.write_all(EDGE_MAGIC)?;
        file.write_all(&FORMAT_VERSION.to_le_bytes())?;
        let mut store = EdgeStore {
            file: BufWriter::new(file),
            edges_path,
            mark_path,
            watermark: Watermark::default(),
        };
        store.persist_watermark()?;
        Ok(store)
    }

    /// Reopen a store to resume from its watermark.
    ///
    /// A store longer than the watermark claims is truncated back to the
    /// watermark (interrupted append of the in-flight unit). A store
    /// *shorter* than the watermark claims is inconsistent beyond
    /// self-repair and is a fatal error.
    pub fn resume(dir: &Path) -> Result<Self> {
        let edges_path = Self::edges_path(dir);
        let mark_path = Self::watermark_path(dir);
        let watermark = Watermark::load(&mark_path)?;
        let expected_len = HEADER_LEN + watermark.edges * RECORD_LEN;
        let file_len = std::fs::metadata(&edges_path)
            .with_context(|| format!("opening edge store {}", edges_path.display()))?
            .len();
        if file_len < expected_len {
            bail!(
                "edge store {} is shorter ({file_len} bytes) than its watermark claims \
                 ({expected_len} bytes); refusing to guess — repair or restart the run",
                edges_path.display()
            );
        }
        let mut file = OpenOptions::new().read(true).write(true).open(&edges_path)?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != EDGE_MAGIC {
            bail!("{} is not an edge store", edges_path.display());
        }
        if file_len > expected_len {
            // Partial append of the unit that was in flight when the run
            // stopped; its watermark never landed, so it will be redone.
            file.set_len(expected_len)?;
        }
        file.seek(SeekFrom::End(0))?;
        Ok(EdgeStore {
            file: BufWriter::new(file),
            edges_path,
            mark_path,
            watermark,
        })
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Durably commit one unit's edges and advance the watermark.
    /// `unit_id` must be the watermark's next unit — commits happen in
    /// submission order.
    pub fn commit_unit(&mut self, unit_id: u64, edges: &[SimilarityEdge], residues: u64) -> Result<()> {
        if unit_id != self.watermark.next_unit {
            bail!(
                "out-of-order commit: unit {unit_id} while watermark expects {}",
                self.watermark.next_unit
            );
        }
        let mut buf = Vec::with_capacity(edges.len() * RECORD_LEN as usize);
        for edge in edges {
            debug_assert_ne!(edge.a, edge.b, "self-pairs are not edges");
            edge.write_to(&mut buf);
        }
        self.file.write_all(&buf)?;
        self.file.flush()?;
        self.file.get_ref().sync_data().context("syncing edge store")?;

        self.watermark.next_unit = unit_id + 1;
        self.watermark.edges += edges.len() as u64;
        self.watermark.residues += residues;
        self.persist_watermark()
    }

    /// Write the watermark atomically: temp file, sync, rename.
    fn persist_watermark(&mut self) -> Result<()> {
        let tmp = self.mark_path.with_extension("watermark.tmp");
        let mut f = File::create(&tmp)
            .with_context(|| format!("creating watermark temp {}", tmp.display()))?;
        f.write_all(&self.watermark.encode())?;
        f.sync_all()?;
        std::fs::rename(&tmp, &self.mark_path).context("publishing watermark")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.edges_path
    }
}

/// Read every edge record from a finished store.
pub fn read_edges(path: &Path) -> Result<Vec<SimilarityEdge>> {
    let file =
        File::open(path).with_context(|| format!("opening edge store {}", path.display()))?;
    let len = file.metadata()?.len();
    if len < HEADER_LEN || (len - HEADER_LEN) % RECORD_LEN != 0 {
        bail!("edge store {} has a malformed length {len}", path.display());
    }
    let mut reader = BufReader::new(file);
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != EDGE_MAGIC {
        bail!("{} is not an edge store", path.display());
    }
    let mut version = [0u8; 4];
    reader.read_exact(&mut version)?;
    let count = (len - HEADER_LEN) / RECORD_LEN;
    let mut edges = Vec::with_capacity(count as usize);
    let mut rec = [0u8; RECORD_LEN as usize];
    for _ in 0..count {
        reader.read_exact(&mut rec)?;
        edges.push(SimilarityEdge::read_from(&rec));
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn edge(a: u32, b: u32, exact: i64) -> SimilarityEdge {
        SimilarityEdge {
            a,
            b,
            raw: (exact as i32 + 32768) as u16,
            saturated: false,
            exact,
        }
    }

    #[test]
    fn test_roundtrip_and_watermark() {
        let dir = tempdir().unwrap();
        let mut store = EdgeStore::create(dir.path()).unwrap();
        store.commit_unit(0, &[edge(0, 1, 75), edge(0, 2, 60)], 100).unwrap();
        store.commit_unit(1, &[edge(1, 2, 80)], 50).unwrap();
        let mark = store.watermark();
        assert_eq!(mark.next_unit, 2);
        assert_eq!(mark.edges, 3);
        assert_eq!(mark.residues, 150);
        drop(store);

        let edges = read_edges(&EdgeStore::edges_path(dir.path())).unwrap();
        assert_eq!(edges, vec![edge(0, 1, 75), edge(0, 2, 60), edge(1, 2, 80)]);
    }

    #[test]
    fn test_out_of_order_commit_rejected() {
        let dir = tempdir().unwrap();
        let mut store = EdgeStore::create(dir.path()).unwrap();
        assert!(store.commit_unit(3, &[], 0).is_err());
    }

    #[test]
    fn test_resume_truncates_uncommitted_tail() {
        let dir = tempdir().unwrap();
        let mut store = EdgeStore::create(dir.path()).unwrap();
        store.commit_unit(0, &[edge(0, 1, 75)], 10).unwrap();
        drop(store);

        // Simulate a crash mid-append: extra bytes past the watermark.
        let path = EdgeStore::edges_path(dir.path());
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[0xAB; 13]).unwrap();
        drop(f);

        let store = EdgeStore::resume(dir.path()).unwrap();
        assert_eq!(store.watermark().next_unit, 1);
        drop(store);
        let edges = read_edges(&path).unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_resume_fails_on_short_store() {
        let dir = tempdir().unwrap();
        let mut store = EdgeStore::create(dir.path()).unwrap();
        store.commit_unit(0, &[edge(0, 1, 75), edge(0, 2, 60)], 10).unwrap();
        drop(store);

        let path = EdgeStore::edges_path(dir.path());
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(HEADER_LEN + RECORD_LEN).unwrap(); // one record missing
        drop(f);

        assert!(EdgeStore::resume(dir.path()).is_err());
    }
}
