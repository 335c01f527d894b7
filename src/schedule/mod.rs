//! Batch scheduler.
//!
//! Tiles the query×database comparison space into [`WorkUnit`]s and turns
//! each unit into a [`DispatchPlan`]: the unit's protein pairs packed into
//! lane groups for one kernel dispatch.
//!
//! Units are enumerated in a fixed order that is a pure function of the
//! unit id, so a resumed run schedules exactly the same units as the run it
//! continues. Lane packing is deterministic for the same reason: the
//! longest tasks (the database is length-sorted, so these come first) are
//! spread across groups before short proteins fill the remaining capacity,
//! keeping lanes busy instead of idling behind one oversized record.

use crate::db::PackedDatabase;
use std::ops::Range;

/// Which ordered pairs of a unit are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Comparison {
    /// Every ordered pair (a, b).
    AllPairs,
    /// Only pairs with b >= a; halves the work at the cost of directional
    /// information.
    #[default]
    SuccessorsOnly,
}

/// One scheduled (query range × database range) batch, dispatched as a
/// single kernel invocation.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub unit_id: u64,
    pub query_range: Range<usize>,
    pub db_range: Range<usize>,
    pub strip_width: usize,
    pub lanes: usize,
}

/// One (query, database) pairing to be scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairTask {
    pub a: u32,
    pub b: u32,
}

/// A unit's pairs packed into lane groups, ready to dispatch.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub unit: WorkUnit,
    /// One entry per lane; a lane processes its tasks back to back.
    pub groups: Vec<Vec<PairTask>>,
    pub pair_count: usize,
    /// Total DP cells in this unit (throughput accounting).
    pub cells: u64,
    /// Query residues processed by this unit (progress accounting).
    pub residues: u64,
}

/// Scheduler configuration, validated against the kernel backend at
/// startup.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Proteins per tile side.
    pub tile: usize,
    pub strip_width: usize,
    pub lanes: usize,
    pub comparison: Comparison,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tile: 256,
            strip_width: 64,
            lanes: 64,
            comparison: Comparison::SuccessorsOnly,
        }
    }
}

/// Enumerates WorkUnits over a packed database and plans their dispatches.
pub struct Scheduler<'a> {
    db: &'a PackedDatabase,
    config: SchedulerConfig,
    blocks: usize,
    next_unit: u64,
    total_units: u64,
}

impl<'a> Scheduler<'a> {
    /// `start_unit` is the resume point: the first unit id this scheduler
    /// will emit (0 for a fresh run).
    pub fn new(db: &'a PackedDatabase, config: SchedulerConfig, start_unit: u64) -> Self {
        let blocks = db.len().div_ceil(config.tile.max(1));
        let total_units = match config.comparison {
            Comparison::AllPairs => (blocks * blocks) as u64,
            // Upper triangle including the diagonal.
            Comparison::SuccessorsOnly => (blocks * (blocks + 1) / 2) as u64,
        };
        Scheduler {
            db,
            config,
            blocks,
            next_unit: start_unit,
            total_units,
        }
    }

    pub fn total_units(&self) -> u64 {
        self.total_units
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Tile coordinates for a unit id. Pure function: unit ids map to the
    /// same (query block, db block) on every run.
    fn tile_of(&self, unit_id: u64) -> Option<(usize, usize)> {
        if unit_id >= self.total_units {
            return None;
        }
        let id = unit_id as usize;
        match self.config.comparison {
            Comparison::AllPairs => Some((id / self.blocks, id % self.blocks)),
            Comparison::SuccessorsOnly => {
                // Row qb holds (blocks - qb) tiles starting at db block qb.
                let mut id = id;
                for qb in 0..self.blocks {
                    let row = self.blocks - qb;
                    if id < row {
                        return Some((qb, qb + id));
                    }
                    id -= row;
                }
                None
            }
        }
    }

    /// The WorkUnit for an id, without planning its pairs.
    pub fn unit(&self, unit_id: u64) -> Option<WorkUnit> {
        let (qb, dbb) = self.tile_of(unit_id)?;
        let n = self.db.len();
        let tile = self.config.tile;
        Some(WorkUnit {
            unit_id,
            query_range: (qb * tile)..((qb + 1) * tile).min(n),
            db_range: (dbb * tile)..((dbb + 1) * tile).min(n),
            strip_width: self.config.strip_width,
            lanes: self.config.lanes,
        })
    }

    /// Plan the next unit, or `None` when the comparison space is
    /// exhausted. This is host-side work and runs while the device is busy
    /// with the previous dispatch.
    pub fn plan_next(&mut self) -> Option<DispatchPlan> {
        let unit = self.unit(self.next_unit)?;
        self.next_unit += 1;
        Some(self.plan(unit))
    }

    /// Pack a unit's pairs into lane groups.
    pub fn plan(&self, unit: WorkUnit) -> DispatchPlan {
        let mut tasks: Vec<PairTask> = Vec::new();
        let mut cells = 0u64;
        let mut residues = 0u64;
        for a in unit.query_range.clone() {
            let qlen = self.db.seq_len(a) as u64;
            for b in unit.db_range.clone() {
                if self.config.comparison == Comparison::SuccessorsOnly && b < a {
                    continue;
                }
                tasks.push(PairTask {
                    a: a as u32,
                    b: b as u32,
                });
                cells += qlen * self.db.seq_len(b) as u64;
                residues += qlen;
            }
        }
        let pair_count = tasks.len();
        let groups = self.pack_lanes(tasks, unit.lanes);
        DispatchPlan {
            unit,
            groups,
            pair_count,
            cells,
            residues,
        }
    }

    /// Longest-processing-time-first packing: sort tasks by descending cell
    /// count (ties by index pair, so packing is deterministic) and assign
    /// each to the least-loaded lane group. Short proteins end up sharing
    /// groups behind longer ones, so a lane freed early picks up queued
    /// work instead of idling.
    fn pack_lanes(&self, mut tasks: Vec<PairTask>, lanes: usize) -> Vec<Vec<PairTask>> {
        let cost = |t: &PairTask| self.db.seq_len(t.a as usize) as u64 * self.db.seq_len(t.b as usize) as u64;
        tasks.sort_by(|x, y| {
            cost(y)
                .cmp(&cost(x))
                .then(x.a.cmp(&y.a))
                .then(x.b.cmp(&y.b))
        });
        let lanes = lanes.max(1);
        let mut groups: Vec<Vec<PairTask>> = vec![Vec::new(); lanes];
        let mut load = vec![0u64; lanes];
        for task in tasks {
            let mut slot = 0;
            for i in 1..lanes {
                if load[i] < load[slot] {
                    slot = i;
                }
            }
            load[slot] += cost(&task).max(1);
            groups[slot].push(task);
        }
        groups.retain(|g| !g.is_empty());
        groups
    }
}
