//! Saturation-safe rescoring.
//!
//! The fast pass trades precision for throughput: scores clamp at the
//! saturation ceiling and carry no coordinates. For the small flagged
//! subset — saturated pairs plus anything at or above the reporting
//! threshold, expected well under 1% of all pairs — the exact score is
//! recomputed here in a wide integer domain sized to the true bound
//! (`min(len_a, len_b) * max substitution value` fits comfortably in i64),
//! so a rescore can never saturate again.
//!
//! Location recovery is a separate, slower entry point and is only ever
//! run for flagged pairs; bulk scoring never attempts it.

use crate::db::PackedDatabase;
use crate::kernel::BatchResult;
use crate::scoring::SubstitutionTable;
use crate::store::SimilarityEdge;
use rayon::prelude::*;

/// Exact local-alignment score for one pair, same recurrence as the fast
/// pass but unclamped.
pub fn exact_score(query: &[u8], dbseq: &[u8], table: &SubstitutionTable) -> i64 {
    let gap = table.gap_extend() as i64;
    let mut prev = vec![0i64; dbseq.len() + 1];
    let mut curr = vec![0i64; dbseq.len() + 1];
    let mut best = 0i64;
    for &qc in query {
        for (j, &dc) in dbseq.iter().enumerate() {
            let h = (prev[j] + table.score(qc, dc) as i64)
                .max(prev[j + 1] - gap)
                .max(curr[j] - gap)
                .max(0);
            best = best.max(h);
            curr[j + 1] = h;
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    best
}

/// Best-scoring alignment endpoint, recovered for a flagged pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentLocation {
    /// 0-based exclusive end row in the query.
    pub query_end: usize,
    /// 0-based exclusive end column in the database sequence.
    pub db_end: usize,
}

/// Exact score plus the location of its best cell. Ties resolve to the
/// first best cell in row-major order, so the result is deterministic.
pub fn exact_score_with_location(
    query: &[u8],
    dbseq: &[u8],
    table: &SubstitutionTable,
) -> (i64, AlignmentLocation) {
    let gap = table.gap_extend() as i64;
    let mut prev = vec![0i64; dbseq.len() + 1];
    let mut curr = vec![0i64; dbseq.len() + 1];
    let mut best = 0i64;
    let mut loc = AlignmentLocation {
        query_end: 0,
        db_end: 0,
    };
    for (i, &qc) in query.iter().enumerate() {
        for (j, &dc) in dbseq.iter().enumerate() {
            let h = (prev[j] + table.score(qc, dc) as i64)
                .max(prev[j + 1] - gap)
                .max(curr[j] - gap)
                .max(0);
            if h > best {
                best = h;
                loc = AlignmentLocation {
                    query_end: i + 1,
                    db_end: j + 1,
                };
            }
            curr[j + 1] = h;
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    (best, loc)
}

/// Turn a completed batch into reportable edges.
///
/// Every computed pair at or above `report_threshold` (true-score terms)
/// becomes an edge; those edges are exactly rescored in parallel. Pairs
/// below the threshold are dropped — this is what keeps the O(N²) score
/// matrix from becoming an O(N²) artifact. Edge order is (a, b) ascending,
/// independent of lane completion order, so the store is reproducible.
pub fn collect_edges(
    result: &BatchResult,
    db: &PackedDatabase,
    table: &SubstitutionTable,
    report_threshold: i32,
) -> Vec<SimilarityEdge> {
    let domain = result.domain;
    let mut flagged: Vec<SimilarityEdge> = Vec::new();
    for a in result.query_range.clone() {
        for b in result.db_range.clone() {
            if a == b {
                // An edge references two distinct proteins; the diagonal is
                // computed (it keeps lane groups dense) but never reported.
                continue;
            }
            let Some(raw) = result.raw_score(a, b) else {
                continue;
            };
            let saturated = domain.is_saturated(raw);
            if saturated || domain.decode(raw) >= report_threshold {
                flagged.push(SimilarityEdge {
                    a: a as u32,
                    b: b as u32,
                    raw,
                    saturated,
                    exact: 0, // filled below
                });
            }
        }
    }
    flagged.par_iter_mut().for_each(|edge| {
        edge.exact = exact_score(
            db.residues(edge.a as usize),
            db.residues(edge.b as usize),
            table,
        );
    });
    flagged
}
