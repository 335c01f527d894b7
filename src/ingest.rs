//! FASTA ingestion for the command-line entry point.
//!
//! The library proper never parses database file formats — it takes
//! validated [`ProteinRecord`]s. This module is the thin CLI-side
//! collaborator that produces them from a FASTA file.

use crate::db::{PackOptions, ProteinRecord};
use anyhow::{Context, Result};
use bio::io::fasta;
use rustc_hash::FxHashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStats {
    pub read: usize,
    pub malformed: usize,
    pub duplicate_ids: usize,
}

/// Read protein records from a FASTA file. Malformed records and duplicate
/// ids are skipped and counted, never fatal.
pub fn read_fasta(path: &Path, opts: &PackOptions) -> Result<(Vec<ProteinRecord>, IngestStats)> {
    let reader = fasta::Reader::from_file(path)
        .with_context(|| format!("opening FASTA {}", path.display()))?;
    let mut stats = IngestStats::default();
    let mut seen: FxHashMap<String, ()> = FxHashMap::default();
    let mut records = Vec::new();
    for record in reader.records().filter_map(|r| r.ok()) {
        stats.read += 1;
        let id = record
            .id()
            .split_whitespace()
            .next()
            .unwrap_or("unknown")
            .to_string();
        if seen.insert(id.clone(), ()).is_some() {
            stats.duplicate_ids += 1;
            continue;
        }
        match ProteinRecord::from_ascii(&id, record.seq(), opts) {
            Some(rec) => records.push(rec),
            None => stats.malformed += 1,
        }
    }
    Ok((records, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_fasta_skips_bad_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ">p1 first protein").unwrap();
        writeln!(file, "MKVLAAGH").unwrap();
        writeln!(file, ">p2").unwrap();
        writeln!(file, "MK8LA").unwrap(); // malformed residue
        writeln!(file, ">p1 duplicate id").unwrap();
        writeln!(file, "MKVL").unwrap();
        file.flush().unwrap();

        let (records, stats) = read_fasta(file.path(), &PackOptions::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "p1");
        assert_eq!(stats.read, 3);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.duplicate_ids, 1);
    }
}
