//! Reference lockstep backend.
//!
//! Models the device kernel faithfully enough to share its numeric design:
//! every lane runs the local-alignment recurrence (gap-extension penalty
//! only) over strips of `W` columns and rows equal to the query length,
//! exchanging only the strip-boundary column with its neighbor. The only
//! data-dependent operation in the inner loop is the max/select chain,
//! which lowers to branchless selects; there is no per-cell branching on
//! scores.
//!
//! Cell values are clamped to the saturation ceiling as they are produced,
//! mirroring the device's saturating unsigned arithmetic: a score that
//! reaches the ceiling stays there and cannot wrap into a neighboring
//! value. Completed scores are written through [`BatchResult::store`], so
//! the destination slot depends on the protein pair alone.

use super::{BackendLimits, BatchResult, DispatchHandle, KernelBackend, ScoreDomain};
use crate::db::PackedDatabase;
use crate::schedule::{DispatchPlan, PairTask};
use crate::scoring::SubstitutionTable;
use anyhow::{bail, Result};
use rayon::prelude::*;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;

/// Register-file-driven bound on the strip width; past this the sweet spot
/// is gone and real devices spill.
pub const MAX_STRIP_WIDTH: usize = 512;

/// Upper bound on concurrently scheduled lane groups.
pub const MAX_LANES: usize = 65_536;

pub struct LockstepBackend {
    db: Arc<PackedDatabase>,
    table: Arc<SubstitutionTable>,
    domain: ScoreDomain,
}

impl LockstepBackend {
    pub fn new(db: Arc<PackedDatabase>, table: Arc<SubstitutionTable>, domain: ScoreDomain) -> Self {
        LockstepBackend { db, table, domain }
    }

    pub fn domain(&self) -> ScoreDomain {
        self.domain
    }
}

impl KernelBackend for LockstepBackend {
    fn limits(&self) -> BackendLimits {
        BackendLimits {
            max_strip_width: MAX_STRIP_WIDTH,
            max_lanes: MAX_LANES,
        }
    }

    fn submit(&self, plan: DispatchPlan) -> Result<DispatchHandle> {
        if plan.unit.strip_width == 0 || plan.unit.strip_width > MAX_STRIP_WIDTH {
            bail!(
                "dispatch rejected: strip width {} outside backend limits",
                plan.unit.strip_width
            );
        }
        let db = Arc::clone(&self.db);
        let table = Arc::clone(&self.table);
        let domain = self.domain;
        let (tx, rx) = channel();
        thread::spawn(move || {
            let result = run_dispatch(&db, &table, domain, plan);
            // Receiver gone means the job was torn down; nothing to signal.
            let _ = tx.send(result);
        });
        Ok(DispatchHandle::new(rx))
    }
}

fn run_dispatch(
    db: &PackedDatabase,
    table: &SubstitutionTable,
    domain: ScoreDomain,
    plan: DispatchPlan,
) -> Result<BatchResult> {
    let strip_width = plan.unit.strip_width;
    let mut result = BatchResult::new(&plan.unit, domain, plan.cells, plan.residues);

    // Each lane group runs independently; a lane works through its queue of
    // pairs back to back. Scores come back as (pair, raw) and are merged
    // into index-addressed slots afterwards, so no lane ever holds a
    // pointer into the output buffer.
    let scored: Vec<(PairTask, u16)> = plan
        .groups
        .par_iter()
        .flat_map_iter(|group| {
            group.iter().map(|&task| {
                let q = db.residues(task.a as usize);
                let d = db.residues(task.b as usize);
                (task, lockstep_score(q, d, table, domain, strip_width))
            })
        })
        .collect();

    for (task, raw) in scored {
        result.store(task.a as usize, task.b as usize, raw);
    }
    Ok(result)
}

/// Score one (query, database) pair with the strip-of-W recurrence.
///
/// `h_bound[i]` carries `H[i][last column of previous strip]` across the
/// strip boundary; it is the only value neighboring lanes exchange. Only
/// the running best is retained — no back-pointers, no coordinates.
pub fn lockstep_score(
    query: &[u8],
    dbseq: &[u8],
    table: &SubstitutionTable,
    domain: ScoreDomain,
    strip_width: usize,
) -> u16 {
    let rows = query.len();
    let cols = dbseq.len();
    let gap = table.gap_extend();
    let ceiling = domain.ceiling();

    let mut best = 0i32;
    // Boundary column exchanged between strips; index by DP row (0 = the
    // virtual all-zero top row).
    let mut h_bound = vec![0i32; rows + 1];
    let mut next_bound = vec![0i32; rows + 1];
    let mut h_row = vec![0i32; strip_width];

    let mut strip_start = 0;
    while strip_start < cols {
        let strip_end = (strip_start + strip_width).min(cols);
        let width = strip_end - strip_start;
        h_row[..width].fill(0);

        for i in 1..=rows {
            let qc = query[i - 1];
            let mut diag = h_bound[i - 1];
            let mut left = h_bound[i];
            for (k, &dc) in dbseq[strip_start..strip_end].iter().enumerate() {
                let up = h_row[k];
                // Branchless select chain; clamp models saturating device
                // arithmetic.
                let h = (diag + table.score(qc, dc))
                    .max(up - gap)
                    .max(left - gap)
                    .max(0)
                    .min(ceiling);
                best = best.max(h);
                diag = up;
                left = h;
                h_row[k] = h;
            }
            next_bound[i] = left;
        }

        std::mem::swap(&mut h_bound, &mut next_bound);
        strip_start = strip_end;
    }

    domain.encode(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{PackOptions, PackedDatabase, ProteinRecord};
    use crate::schedule::{Comparison, Scheduler, SchedulerConfig};
    use crate::scoring::SubstitutionMatrix;

    fn table() -> SubstitutionTable {
        SubstitutionTable::compile(SubstitutionMatrix::Blosum62, 2).unwrap()
    }

    fn encode(seq: &[u8]) -> Vec<u8> {
        seq.iter().map(|&c| crate::db::encoding::encode_residue(c)).collect()
    }

    /// Plain full-matrix reference recurrence, no strips, no clamping.
    fn naive_score(query: &[u8], dbseq: &[u8], table: &SubstitutionTable) -> i32 {
        let gap = table.gap_extend();
        let mut prev = vec![0i32; dbseq.len() + 1];
        let mut curr = vec![0i32; dbseq.len() + 1];
        let mut best = 0;
        for &qc in query {
            for (j, &dc) in dbseq.iter().enumerate() {
                curr[j + 1] = (prev[j] + table.score(qc, dc))
                    .max(prev[j + 1] - gap)
                    .max(curr[j] - gap)
                    .max(0);
                best = best.max(curr[j + 1]);
            }
            std::mem::swap(&mut prev, &mut curr);
            curr[0] = 0;
        }
        best
    }

    #[test]
    fn test_strip_recurrence_matches_naive() {
        let table = table();
        let domain = ScoreDomain::default();
        let q = encode(b"MKVLAAGHWRTEEYNNPQD");
        let d = encode(b"MKVLGAGHWKTEYNNPRQD");
        let expected = naive_score(&q, &d, &table);
        for w in [1, 2, 3, 7, 16, 64] {
            let raw = lockstep_score(&q, &d, &table, domain, w);
            assert_eq!(domain.decode(raw), expected, "strip width {w}");
        }
    }

    #[test]
    fn test_strip_width_spanning_sequence_boundaries() {
        // Lengths engineered to land exactly on and around strip edges.
        let table = table();
        let domain = ScoreDomain::default();
        let base: Vec<u8> = encode(b"ACDEFGHIKLMNPQRSTVWY");
        for len in [15, 16, 17, 31, 32, 33] {
            let d: Vec<u8> = base.iter().cycle().take(len).copied().collect();
            let expected = naive_score(&base, &d, &table);
            let raw = lockstep_score(&base, &d, &table, domain, 16);
            assert_eq!(domain.decode(raw), expected, "db length {len}");
        }
    }

    #[test]
    fn test_score_saturates_at_ceiling() {
        let table = table();
        let domain = ScoreDomain::new(100).unwrap();
        // 50 tryptophans self-aligned: true score 550, well past 100.
        let q = vec![crate::db::encoding::code::W; 50];
        let raw = lockstep_score(&q, &q, &table, domain, 16);
        assert!(domain.is_saturated(raw));
        assert_eq!(domain.decode(raw), 100);
    }

    fn db_with_lengths(lengths: &[usize]) -> Arc<PackedDatabase> {
        let opts = PackOptions::default();
        let residues = b"ACDEFGHIKLMNPQRSTVWY";
        let records = lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| {
                let seq: Vec<u8> = residues.iter().cycle().take(len).copied().collect();
                ProteinRecord::from_ascii(&format!("p{i}"), &seq, &opts).unwrap()
            })
            .collect();
        Arc::new(PackedDatabase::pack(records, &opts).0)
    }

    /// Regression for the historical boundary-overwrite defects: lengths
    /// coinciding with strip/unroll edges must never let one pair's write
    /// touch an adjacent pair's slot.
    #[test]
    fn test_boundary_lengths_never_overwrite_neighbor_slots() {
        let table = Arc::new(table());
        let domain = ScoreDomain::default();
        // Lengths sitting exactly on multiples of the strip width and one
        // off either side.
        let db = db_with_lengths(&[64, 64, 63, 33, 32, 31, 16, 1]);
        let backend = LockstepBackend::new(Arc::clone(&db), Arc::clone(&table), domain);
        let config = SchedulerConfig {
            tile: 8,
            strip_width: 32,
            lanes: 3,
            comparison: Comparison::AllPairs,
        };
        let mut sched = Scheduler::new(&db, config, 0);
        let plan = sched.plan_next().unwrap();
        let result = backend.submit(plan).unwrap().wait().unwrap();

        // Every slot must hold exactly the independently computed score for
        // its own pair.
        for a in 0..db.len() {
            for b in 0..db.len() {
                let expected = lockstep_score(db.residues(a), db.residues(b), &table, domain, 32);
                assert_eq!(result.raw_score(a, b), Some(expected), "pair ({a},{b})");
            }
        }
    }

    /// A saturated score must clamp in place, not bleed into the next
    /// record's slot.
    #[test]
    fn test_saturation_does_not_bleed_into_next_slot() {
        let opts = PackOptions::default();
        let records = vec![
            // Identical long tryptophan runs: self and cross scores saturate.
            ProteinRecord::from_ascii("w1", &vec![b'W'; 64], &opts).unwrap(),
            ProteinRecord::from_ascii("w2", &vec![b'W'; 64], &opts).unwrap(),
            // A neighbor whose scores stay tiny.
            ProteinRecord::from_ascii("tiny", b"AC", &opts).unwrap(),
        ];
        let db = Arc::new(PackedDatabase::pack(records, &opts).0);
        let table = Arc::new(table());
        let domain = ScoreDomain::new(50).unwrap();
        let backend = LockstepBackend::new(Arc::clone(&db), Arc::clone(&table), domain);
        let config = SchedulerConfig {
            tile: 3,
            strip_width: 32,
            lanes: 2,
            comparison: Comparison::AllPairs,
        };
        let mut sched = Scheduler::new(&db, config, 0);
        let result = backend
            .submit(sched.plan_next().unwrap())
            .unwrap()
            .wait()
            .unwrap();

        assert!(domain.is_saturated(result.raw_score(0, 1).unwrap()));
        // The tiny neighbor's scores are untouched by the saturation next
        // door.
        let tiny_self = result.raw_score(2, 2).unwrap();
        assert!(!domain.is_saturated(tiny_self));
        assert_eq!(
            domain.decode(tiny_self),
            naive_score(db.residues(2), db.residues(2), &table)
        );
    }

    #[test]
    fn test_successors_only_masks_subdiagonal_slots() {
        let db = db_with_lengths(&[20, 10, 5]);
        let table = Arc::new(table());
        let domain = ScoreDomain::default();
        let backend = LockstepBackend::new(Arc::clone(&db), table, domain);
        let config = SchedulerConfig {
            tile: 3,
            strip_width: 16,
            lanes: 2,
            comparison: Comparison::SuccessorsOnly,
        };
        let mut sched = Scheduler::new(&db, config, 0);
        let result = backend
            .submit(sched.plan_next().unwrap())
            .unwrap()
            .wait()
            .unwrap();
        for a in 0..3 {
            for b in 0..3 {
                if b >= a {
                    assert!(result.raw_score(a, b).is_some());
                } else {
                    assert_eq!(result.raw_score(a, b), None);
                }
            }
        }
    }

    #[test]
    fn test_submit_rejects_bad_strip_width() {
        let db = db_with_lengths(&[4]);
        let backend =
            LockstepBackend::new(Arc::clone(&db), Arc::new(table()), ScoreDomain::default());
        let config = SchedulerConfig {
            tile: 1,
            strip_width: MAX_STRIP_WIDTH + 1,
            lanes: 1,
            comparison: Comparison::AllPairs,
        };
        let mut sched = Scheduler::new(&db, config, 0);
        assert!(backend.submit(sched.plan_next().unwrap()).is_err());
    }
}
