//! Similarity reducer: single-linkage clustering over scored edges.
//!
//! Edges are processed in descending score order; each one that joins two
//! previously unconnected components is retained as the best connection
//! between them. The result is a forest — at most N−1 edges standing in
//! for the O(N²) score matrix — that preserves exactly which proteins are
//! transitively linked. This is a connectivity-compressing transform, not
//! a phylogenetic reconstruction.
//!
//! Because the sweep is a maximum-spanning-forest construction, filtering
//! the retained edges by a secondary score floor afterwards yields the
//! same components as thresholding the full edge set at that floor — the
//! connectivity guarantee survives pruning, whichever equal-score edges
//! the tie-break picked.

use crate::store::{read_edges, SimilarityEdge};
use anyhow::{bail, Context, Result};
use clap::Args;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Union-find over packed protein indices. Path halving on find, union by
/// rank; one parent per node at any time, acyclic by construction.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n as u32).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    /// Union two nodes; false if they were already connected.
    pub fn union(&mut self, a: u32, b: u32) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        match self.rank[ra as usize].cmp(&self.rank[rb as usize]) {
            std::cmp::Ordering::Less => self.parent[ra as usize] = rb,
            std::cmp::Ordering::Greater => self.parent[rb as usize] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb as usize] = ra;
                self.rank[ra as usize] += 1;
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

/// Injectable informativeness heuristic for pruning retained edges. The
/// project history documents this only qualitatively ("uninteresting"
/// links), so no formula is assumed beyond the trait seam.
pub trait EdgeInformativeness {
    fn informative(&self, edge: &SimilarityEdge) -> bool;
}

/// Default heuristic: keep edges at or above a score floor.
#[derive(Debug, Clone, Copy)]
pub struct ScoreFloor(pub i64);

impl EdgeInformativeness for ScoreFloor {
    fn informative(&self, edge: &SimilarityEdge) -> bool {
        edge.exact >= self.0
    }
}

/// The finished single-linkage forest. Built once after all inputs are
/// final; immutable afterwards.
#[derive(Debug)]
pub struct ClusterForest {
    roots: Vec<u32>,
    retained: Vec<SimilarityEdge>,
}

impl ClusterForest {
    /// Reduce an edge set over `n` proteins.
    ///
    /// Ordering is fully deterministic: descending exact score, ties by
    /// (min index, max index), remaining ties by discovery order (stable
    /// sort). Self-edges and out-of-range indices are configuration errors.
    pub fn reduce(n: usize, mut edges: Vec<SimilarityEdge>) -> Result<Self> {
        for edge in &edges {
            if edge.a == edge.b {
                bail!("self-edge on protein {}", edge.a);
            }
            if edge.a as usize >= n || edge.b as usize >= n {
                bail!("edge ({}, {}) outside database of {n} proteins", edge.a, edge.b);
            }
        }
        edges.sort_by(|x, y| {
            y.exact
                .cmp(&x.exact)
                .then_with(|| (x.a.min(x.b)).cmp(&(y.a.min(y.b))))
                .then_with(|| (x.a.max(x.b)).cmp(&(y.a.max(y.b))))
        });

        let mut uf = UnionFind::new(n);
        let mut retained = Vec::new();
        for edge in edges {
            if uf.union(edge.a, edge.b) {
                retained.push(edge);
            }
        }
        let roots = (0..n as u32).map(|i| uf.find(i)).collect();
        Ok(ClusterForest { roots, retained })
    }

    /// Representative protein index for a node's component.
    #[inline]
    pub fn root(&self, index: usize) -> u32 {
        self.roots[index]
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Retained best-connection edges, in reduction order.
    pub fn edges(&self) -> &[SimilarityEdge] {
        &self.retained
    }

    /// Number of connected components.
    pub fn cluster_count(&self) -> usize {
        let mut seen: FxHashMap<u32, ()> = FxHashMap::default();
        for &r in &self.roots {
            seen.insert(r, ());
        }
        seen.len()
    }

    /// Retained edges surviving the informativeness filter.
    pub fn prune<F: EdgeInformativeness>(&self, filter: &F) -> Vec<SimilarityEdge> {
        self.retained
            .iter()
            .copied()
            .filter(|e| filter.informative(e))
            .collect()
    }
}

#[derive(Args, Debug)]
pub struct ClusterArgs {
    /// Edge store produced by `scan` (edges.bin)
    #[arg(short, long)]
    pub edges: PathBuf,
    /// Output path for the forest edge list
    #[arg(short, long)]
    pub out: PathBuf,
    /// Optional output path for per-protein cluster membership
    #[arg(long)]
    pub members: Option<PathBuf>,
    /// Secondary informativeness floor: retained edges below this exact
    /// score are pruned from the forest artifact
    #[arg(long, default_value_t = 0)]
    pub min_score: i64,
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,
}

/// CLI entry: reduce a persisted edge store into the graph artifact.
pub fn run(args: ClusterArgs) -> Result<()> {
    let edges = read_edges(&args.edges)?;
    let n = edges
        .iter()
        .map(|e| e.a.max(e.b) as usize + 1)
        .max()
        .unwrap_or(0);
    if args.verbose {
        eprintln!("[INFO] {} edges over {} proteins", edges.len(), n);
    }

    let forest = ClusterForest::reduce(n, edges)?;
    let pruned = forest.prune(&ScoreFloor(args.min_score));
    if args.verbose {
        eprintln!(
            "[INFO] forest: {} retained edges, {} after pruning, {} clusters",
            forest.edges().len(),
            pruned.len(),
            forest.cluster_count()
        );
    }

    let mut writer = BufWriter::new(
        File::create(&args.out)
            .with_context(|| format!("creating forest output {}", args.out.display()))?,
    );
    for edge in &pruned {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            edge.a,
            edge.b,
            edge.exact,
            if edge.saturated { 1 } else { 0 }
        )?;
    }
    writer.flush()?;

    if let Some(members_path) = &args.members {
        let mut writer = BufWriter::new(
            File::create(members_path)
                .with_context(|| format!("creating membership output {}", members_path.display()))?,
        );
        for i in 0..forest.len() {
            writeln!(writer, "{}\t{}", i, forest.root(i))?;
        }
        writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(a: u32, b: u32, exact: i64) -> SimilarityEdge {
        SimilarityEdge {
            a,
            b,
            raw: (exact as i32 + 32768) as u16,
            saturated: false,
            exact,
        }
    }

    /// Connected components of the raw edge set at a score threshold, for
    /// comparing against the forest.
    fn thresholded_components(n: usize, edges: &[SimilarityEdge], floor: i64) -> Vec<u32> {
        let mut uf = UnionFind::new(n);
        for e in edges {
            if e.exact >= floor {
                uf.union(e.a, e.b);
            }
        }
        (0..n as u32).map(|i| uf.find(i)).collect()
    }

    fn same_partition(a: &[u32], b: &[u32]) -> bool {
        assert_eq!(a.len(), b.len());
        for i in 0..a.len() {
            for j in (i + 1)..a.len() {
                if (a[i] == a[j]) != (b[i] == b[j]) {
                    return false;
                }
            }
        }
        true
    }

    /// The spec scenario: 5 proteins, a hand-specified score matrix, and a
    /// threshold must give exactly 2 clusters with an enumerable edge set.
    ///
    /// Scores (successors-only):
    ///   (0,1)=90  (0,2)=80  (1,2)=85  (3,4)=70
    ///   (0,3)=10  (0,4)=5   (1,3)=12  (1,4)=8  (2,3)=11  (2,4)=9
    /// Floor 50 -> clusters {0,1,2} and {3,4}.
    #[test]
    fn test_five_protein_two_cluster_scenario() {
        let edges = vec![
            edge(0, 1, 90),
            edge(0, 2, 80),
            edge(1, 2, 85),
            edge(3, 4, 70),
            edge(0, 3, 10),
            edge(0, 4, 5),
            edge(1, 3, 12),
            edge(1, 4, 8),
            edge(2, 3, 11),
            edge(2, 4, 9),
        ];
        // Reduce only what the reporting threshold admitted.
        let reported: Vec<_> = edges.iter().copied().filter(|e| e.exact >= 50).collect();
        let forest = ClusterForest::reduce(5, reported).unwrap();

        assert_eq!(forest.cluster_count(), 2);
        assert_eq!(forest.root(0), forest.root(1));
        assert_eq!(forest.root(0), forest.root(2));
        assert_eq!(forest.root(3), forest.root(4));
        assert_ne!(forest.root(0), forest.root(3));

        // Exactly the enumerable retained set: the two best links of the
        // triangle plus the (3,4) bridge.
        let retained: Vec<(u32, u32, i64)> =
            forest.edges().iter().map(|e| (e.a, e.b, e.exact)).collect();
        assert_eq!(retained, vec![(0, 1, 90), (1, 2, 85), (3, 4, 70)]);
    }

    #[test]
    fn test_forest_is_acyclic_and_bounded() {
        let edges = vec![
            edge(0, 1, 50),
            edge(1, 2, 50),
            edge(2, 0, 50),
            edge(2, 3, 40),
        ];
        let forest = ClusterForest::reduce(4, edges).unwrap();
        // 4 connected nodes -> exactly 3 retained edges, the cycle edge
        // dropped.
        assert_eq!(forest.edges().len(), 3);
        assert_eq!(forest.cluster_count(), 1);
    }

    #[test]
    fn test_connectivity_independent_of_tie_order() {
        // Many equal-score edges in two discovery orders.
        let mut edges = vec![
            edge(0, 1, 60),
            edge(1, 2, 60),
            edge(0, 2, 60),
            edge(3, 4, 60),
            edge(4, 5, 60),
            edge(2, 3, 20),
        ];
        let forest_a = ClusterForest::reduce(6, edges.clone()).unwrap();
        edges.reverse();
        let forest_b = ClusterForest::reduce(6, edges.clone()).unwrap();

        // Deterministic: identical retained sets for identical edge sets,
        // whatever order they were discovered in.
        assert_eq!(forest_a.edges(), forest_b.edges());

        // And connectivity equals the thresholded component structure.
        let roots_a: Vec<u32> = (0..6).map(|i| forest_a.root(i)).collect();
        let expected = thresholded_components(6, &edges, i64::MIN);
        assert!(same_partition(&roots_a, &expected));
    }

    #[test]
    fn test_prune_preserves_thresholded_connectivity() {
        let edges = vec![
            edge(0, 1, 90),
            edge(1, 2, 30), // below the floor; bridges 2 only weakly
            edge(2, 3, 80),
            edge(0, 3, 25),
        ];
        let forest = ClusterForest::reduce(4, edges.clone()).unwrap();
        let floor = 50;
        let pruned = forest.prune(&ScoreFloor(floor));

        let mut uf = UnionFind::new(4);
        for e in &pruned {
            uf.union(e.a, e.b);
        }
        let got: Vec<u32> = (0..4).map(|i| uf.find(i)).collect();
        let expected = thresholded_components(4, &edges, floor);
        assert!(same_partition(&got, &expected));
    }

    #[test]
    fn test_reduce_rejects_bad_edges() {
        assert!(ClusterForest::reduce(3, vec![edge(1, 1, 10)]).is_err());
        assert!(ClusterForest::reduce(3, vec![edge(0, 7, 10)]).is_err());
    }
}
