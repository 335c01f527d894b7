//! Packed protein database.
//!
//! The packer takes validated protein records from the ingestion layer,
//! encodes them into the compact residue alphabet and orders them by
//! descending length. That order is the canonical addressing scheme: every
//! downstream component refers to a protein by its packed index and never
//! copies sequence data.
//!
//! Longest-first ordering is load-bearing for the scheduler — long-running
//! work is always dispatched first, so a few oversized records cannot stall
//! the tail of a run.

pub mod encoding;

use encoding::{encode_residue, INVALID, UNKNOWN};

/// One validated protein, residues already in alphabet codes.
#[derive(Debug, Clone)]
pub struct ProteinRecord {
    pub id: String,
    pub residues: Vec<u8>,
}

impl ProteinRecord {
    /// Encode an ASCII amino-acid string. Returns `None` if the sequence is
    /// empty, contains a non-residue byte, or exceeds the tolerated fraction
    /// of unknown residues.
    pub fn from_ascii(id: &str, seq: &[u8], opts: &PackOptions) -> Option<Self> {
        if seq.is_empty() {
            return None;
        }
        let mut residues = Vec::with_capacity(seq.len());
        let mut unknown = 0usize;
        for &aa in seq {
            let c = encode_residue(aa);
            if c == INVALID {
                return None;
            }
            if c == UNKNOWN {
                unknown += 1;
            }
            residues.push(c);
        }
        if unknown as f64 > opts.max_unknown_fraction * seq.len() as f64 {
            return None;
        }
        Some(ProteinRecord {
            id: id.to_string(),
            residues,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.residues.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }
}

/// Packing configuration.
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Records longer than this are skipped (0 = no cutoff).
    pub max_length: usize,
    /// Tolerated fraction of `X` residues before a record counts as malformed.
    pub max_unknown_fraction: f64,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            max_length: 0,
            max_unknown_fraction: 0.5,
        }
    }
}

/// Counters reported after packing. Malformed records are non-fatal: they
/// are skipped and surface only here.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackStats {
    pub packed: usize,
    pub skipped_malformed: usize,
    pub skipped_overlong: usize,
    pub total_residues: u64,
}

/// Immutable, length-sorted protein database.
///
/// Built once, read-only thereafter; shared lock-free across the scheduler,
/// the kernel backend and the rescorer.
#[derive(Debug)]
pub struct PackedDatabase {
    records: Vec<ProteinRecord>,
    total_residues: u64,
}

impl PackedDatabase {
    /// Pack records: skip malformed/overlong entries, then sort by
    /// descending length with ties broken by input order (stable sort, so
    /// the result is deterministic for a given input sequence).
    pub fn pack(records: Vec<ProteinRecord>, opts: &PackOptions) -> (Self, PackStats) {
        let mut stats = PackStats::default();
        let mut kept: Vec<ProteinRecord> = Vec::with_capacity(records.len());
        for rec in records {
            if rec.is_empty() {
                stats.skipped_malformed += 1;
                continue;
            }
            if opts.max_length > 0 && rec.len() > opts.max_length {
                stats.skipped_overlong += 1;
                continue;
            }
            kept.push(rec);
        }
        kept.sort_by(|a, b| b.len().cmp(&a.len()));
        stats.packed = kept.len();
        stats.total_residues = kept.iter().map(|r| r.len() as u64).sum();
        (
            PackedDatabase {
                total_residues: stats.total_residues,
                records: kept,
            },
            stats,
        )
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn record(&self, index: usize) -> &ProteinRecord {
        &self.records[index]
    }

    #[inline]
    pub fn residues(&self, index: usize) -> &[u8] {
        &self.records[index].residues
    }

    #[inline]
    pub fn seq_len(&self, index: usize) -> usize {
        self.records[index].residues.len()
    }

    pub fn total_residues(&self) -> u64 {
        self.total_residues
    }

    /// Longest record length, 0 for an empty database.
    pub fn max_len(&self) -> usize {
        self.records.first().map_or(0, |r| r.len())
    }
}
