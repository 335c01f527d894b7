//! Kernel dispatch seam.
//!
//! The alignment kernel runs on a massively parallel lockstep compute
//! domain. The host talks to it only through [`KernelBackend`]:
//! `submit(plan)` starts a dispatch asynchronously and returns a
//! [`DispatchHandle`] that yields the [`BatchResult`] when the device
//! signals completion. Any backend offering lockstep execution with
//! branchless select can sit behind the trait; [`lockstep::LockstepBackend`]
//! is the reference implementation.
//!
//! Output addressing is the part of this interface with history: a score
//! for pair (a, b) lives at a slot computed from the protein indices alone
//! ([`BatchResult::slot`]), never from lane, strip or unroll state. Two
//! past defect classes — an unrolled block's final write landing on the
//! next record's first slot, and a near-ceiling score wrapping into the
//! adjacent slot — are both excluded by that rule plus saturating
//! arithmetic, and are pinned down by regression tests in `lockstep`.

pub mod lockstep;

use crate::schedule::{DispatchPlan, WorkUnit};
use anyhow::{bail, Context, Result};
use std::ops::Range;
use std::sync::mpsc::Receiver;

/// Biased fixed-width score representation.
///
/// A true (possibly negative) score `s` is stored as the unsigned
/// `clamp(s, -bias, ceiling) + bias`, so the raw domain is
/// `0 ..= ceiling + bias`. A raw value at the top of that range means the
/// true score reached the saturation ceiling; it clamps there and never
/// misrepresents a lower value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreDomain {
    bias: i32,
    ceiling: i32,
}

/// Raw slot value meaning "pair not computed" (sub-diagonal slot of a
/// successors-only tile). Local-alignment scores are non-negative, so a
/// genuine raw value is always >= bias and can never collide with this.
pub const RAW_EMPTY: u16 = 0;

impl ScoreDomain {
    pub const DEFAULT_BIAS: i32 = 32768;
    pub const DEFAULT_CEILING: i32 = 32767;

    pub fn new(ceiling: i32) -> Result<Self> {
        let bias = Self::DEFAULT_BIAS;
        if ceiling < 1 || ceiling > u16::MAX as i32 - bias {
            bail!(
                "saturation ceiling {ceiling} outside representable range 1..={}",
                u16::MAX as i32 - bias
            );
        }
        Ok(ScoreDomain { bias, ceiling })
    }

    #[inline]
    pub fn ceiling(&self) -> i32 {
        self.ceiling
    }

    #[inline]
    pub fn bias(&self) -> i32 {
        self.bias
    }

    /// Encode a true score, clamping at the ceiling.
    #[inline(always)]
    pub fn encode(&self, true_score: i32) -> u16 {
        (true_score.clamp(-self.bias, self.ceiling) + self.bias) as u16
    }

    /// Remove the bias. Below the ceiling this equals the exact score.
    #[inline(always)]
    pub fn decode(&self, raw: u16) -> i32 {
        raw as i32 - self.bias
    }

    #[inline(always)]
    pub fn is_saturated(&self, raw: u16) -> bool {
        raw as i32 >= self.ceiling + self.bias
    }
}

impl Default for ScoreDomain {
    fn default() -> Self {
        ScoreDomain {
            bias: Self::DEFAULT_BIAS,
            ceiling: Self::DEFAULT_CEILING,
        }
    }
}

/// Completed dispatch: the raw score matrix for one WorkUnit.
#[derive(Debug)]
pub struct BatchResult {
    pub unit_id: u64,
    pub query_range: Range<usize>,
    pub db_range: Range<usize>,
    pub domain: ScoreDomain,
    /// `query_range.len() * db_range.len()` slots, row-major by query.
    raw: Vec<u16>,
    pub cells: u64,
    pub residues: u64,
}

impl BatchResult {
    pub fn new(unit: &WorkUnit, domain: ScoreDomain, cells: u64, residues: u64) -> Self {
        let slots = unit.query_range.len() * unit.db_range.len();
        BatchResult {
            unit_id: unit.unit_id,
            query_range: unit.query_range.clone(),
            db_range: unit.db_range.clone(),
            domain,
            raw: vec![RAW_EMPTY; slots],
            cells,
            residues,
        }
    }

    /// Slot index for a pair — a pure function of the protein indices and
    /// the unit's ranges. Nothing about lane layout, strip width or loop
    /// unrolling can move a pair's slot.
    #[inline(always)]
    pub fn slot(&self, a: usize, b: usize) -> usize {
        debug_assert!(self.query_range.contains(&a) && self.db_range.contains(&b));
        (a - self.query_range.start) * self.db_range.len() + (b - self.db_range.start)
    }

    #[inline]
    pub fn store(&mut self, a: usize, b: usize, raw: u16) {
        let slot = self.slot(a, b);
        self.raw[slot] = raw;
    }

    /// Raw score for a pair, `None` if the pair was masked out of this
    /// unit.
    #[inline]
    pub fn raw_score(&self, a: usize, b: usize) -> Option<u16> {
        let raw = self.raw[self.slot(a, b)];
        (raw != RAW_EMPTY).then_some(raw)
    }

    pub fn raw_slots(&self) -> &[u16] {
        &self.raw
    }
}

/// Compiled-in limits of a backend, checked against the configuration
/// before any dispatch.
#[derive(Debug, Clone, Copy)]
pub struct BackendLimits {
    pub max_strip_width: usize,
    pub max_lanes: usize,
}

/// Future-like handle for an in-flight dispatch.
pub struct DispatchHandle {
    rx: Receiver<Result<BatchResult>>,
}

impl DispatchHandle {
    pub fn new(rx: Receiver<Result<BatchResult>>) -> Self {
        DispatchHandle { rx }
    }

    /// Block until the dispatch signals completion. A dispatch failure is a
    /// WorkUnit failure: it is surfaced, never retried here (a retry after
    /// a partial commit risks duplicate output).
    pub fn wait(self) -> Result<BatchResult> {
        self.rx
            .recv()
            .context("kernel dispatch dropped without signalling completion")?
    }
}

/// A compute backend accepting lockstep alignment dispatches.
pub trait KernelBackend {
    fn limits(&self) -> BackendLimits;

    /// Start a dispatch. Returns immediately; completion is signalled
    /// through the handle.
    fn submit(&self, plan: DispatchPlan) -> Result<DispatchHandle>;
}

/// Validate host configuration against a backend's compiled limits.
/// A mismatch is fatal at startup, before any dispatch.
pub fn validate_config(
    backend: &dyn KernelBackend,
    strip_width: usize,
    lanes: usize,
) -> Result<()> {
    let limits = backend.limits();
    if strip_width == 0 || strip_width > limits.max_strip_width {
        bail!(
            "strip width {strip_width} incompatible with backend (max {})",
            limits.max_strip_width
        );
    }
    if lanes == 0 || lanes > limits.max_lanes {
        bail!("lane count {lanes} incompatible with backend (max {})", limits.max_lanes);
    }
    Ok(())
}
