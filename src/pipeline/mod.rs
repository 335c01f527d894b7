//! Scan driver: double-buffered dispatch of WorkUnits over a kernel
//! backend.
//!
//! Two execution domains cooperate. The compute domain runs one dispatched
//! batch at a time; the host domain overlaps with it by committing the
//! previous batch (rescoring flagged pairs, appending edges, advancing the
//! watermark) and preparing the next batch's lane plan. One in-flight
//! buffer pair, no deeper pipelining: the host blocks only when it has
//! nothing buffered and the current dispatch is still running.
//!
//! Units commit in submission order, so the watermark advances
//! monotonically; pausing, cancelling and resuming all happen at WorkUnit
//! granularity through the persisted watermark.

use crate::db::{PackOptions, PackedDatabase};
use crate::ingest::read_fasta;
use crate::kernel::lockstep::LockstepBackend;
use crate::kernel::{validate_config, BatchResult, KernelBackend, ScoreDomain};
use crate::rescore::collect_edges;
use crate::schedule::{Comparison, DispatchPlan, Scheduler, SchedulerConfig};
use crate::scoring::{SubstitutionMatrix, SubstitutionTable};
use crate::store::{EdgeStore, Watermark};
use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Protein database in FASTA format
    #[arg(short, long)]
    pub input: PathBuf,
    /// Output directory for the edge store and watermark
    #[arg(short, long)]
    pub out: PathBuf,
    /// Substitution matrix selection
    #[arg(long, default_value = "BLOSUM62")]
    pub matrix: SubstitutionMatrix,
    /// Gap extension penalty (no separate gap-open cost)
    #[arg(long, default_value_t = 2)]
    pub gap_extend: i32,
    /// Strip width W; register-driven, not freely tunable past its sweet spot
    #[arg(long, default_value_t = 64)]
    pub strip_width: usize,
    /// Lane groups per dispatch
    #[arg(long, default_value_t = 256)]
    pub lanes: usize,
    /// Proteins per WorkUnit tile side
    #[arg(long, default_value_t = 256)]
    pub tile: usize,
    /// Saturation ceiling in true-score terms
    #[arg(long, default_value_t = 32767)]
    pub ceiling: i32,
    /// Minimum true score for a pair to be reported as an edge
    #[arg(long, default_value_t = 50)]
    pub report_threshold: i32,
    /// Compare every ordered pair instead of successors-only (b >= a)
    #[arg(long, default_value_t = false)]
    pub all_pairs: bool,
    /// Skip proteins longer than this many residues (0 = no cutoff)
    #[arg(long, default_value_t = 0)]
    pub max_length: usize,
    /// Pause after committing this many units (job slicing; resume later)
    #[arg(long)]
    pub limit_units: Option<u64>,
    /// Resume from the persisted watermark instead of starting fresh
    #[arg(long, default_value_t = false)]
    pub resume: bool,
    #[arg(short = 'n', long, default_value_t = 0)]
    pub num_threads: usize,
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,
}

/// Cooperative stop flag shared with the orchestration layer. Checked at
/// WorkUnit granularity; the watermark stays valid whenever the scan
/// stops.
#[derive(Debug, Default)]
pub struct ScanControl {
    stop: AtomicBool,
}

impl ScanControl {
    pub fn new() -> Arc<Self> {
        Arc::new(ScanControl::default())
    }

    /// Request a pause (or cancel — both stop after the current unit
    /// commits; resume picks up from the watermark).
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// Library-level scan configuration (the CLI args flatten into this).
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub scheduler: SchedulerConfig,
    pub domain: ScoreDomain,
    pub report_threshold: i32,
    pub limit_units: Option<u64>,
    pub verbose: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            scheduler: SchedulerConfig::default(),
            domain: ScoreDomain::default(),
            report_threshold: 50,
            limit_units: None,
            verbose: false,
        }
    }
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed,
    /// Stopped at a unit boundary; the watermark names the resume point.
    Paused(Watermark),
}

/// Final counters for the orchestration layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanSummary {
    pub outcome_watermark: Watermark,
    pub units_committed: u64,
    pub edges_written: u64,
    /// Cumulative amino acids processed — the progress signal. Protein
    /// count would be a poor proxy: the database is length-sorted and
    /// processing is highly skewed.
    pub residues_processed: u64,
    pub cells_processed: u64,
    pub elapsed_secs: f64,
}

/// Run the scan loop over an already-constructed database, table, backend
/// and store. This is the in-process entry point; `run` is the CLI shim
/// over it.
pub fn scan(
    db: &PackedDatabase,
    table: &SubstitutionTable,
    backend: &dyn KernelBackend,
    store: &mut EdgeStore,
    opts: &ScanOptions,
    control: &ScanControl,
) -> Result<(ScanOutcome, ScanSummary)> {
    // Host/device configuration mismatch is fatal before any dispatch.
    validate_config(backend, opts.scheduler.strip_width, opts.scheduler.lanes)?;

    let start_unit = store.watermark().next_unit;
    let mut scheduler = Scheduler::new(db, opts.scheduler.clone(), start_unit);
    let total_units = scheduler.total_units();

    let bar = if opts.verbose {
        let bar = ProgressBar::new(total_units);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap(),
        );
        bar.set_position(start_unit);
        bar
    } else {
        ProgressBar::hidden()
    };

    let started = Instant::now();
    let mut summary = ScanSummary::default();
    let mut submitted = 0u64;

    let commit = |result: BatchResult,
                      store: &mut EdgeStore,
                      summary: &mut ScanSummary|
     -> Result<()> {
        let edges = collect_edges(&result, db, table, opts.report_threshold);
        store.commit_unit(result.unit_id, &edges, result.residues)?;
        summary.units_committed += 1;
        summary.edges_written += edges.len() as u64;
        summary.residues_processed += result.residues;
        summary.cells_processed += result.cells;
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            bar.set_message(format!(
                "{} aa, {:.2e} cells/s",
                store.watermark().residues,
                summary.cells_processed as f64 / elapsed
            ));
        }
        bar.inc(1);
        Ok(())
    };

    // Prime the pipeline, then keep exactly one dispatch in flight: while
    // the device runs batch N, the host prepares batch N+1 and commits
    // batch N-1.
    let mut prepared: Option<DispatchPlan> = scheduler.plan_next();
    let mut completed: Option<BatchResult> = None;

    while let Some(plan) = prepared.take() {
        if control.stop_requested() || opts.limit_units.is_some_and(|n| submitted >= n) {
            break;
        }
        let handle = backend.submit(plan)?;
        submitted += 1;
        prepared = scheduler.plan_next();
        if let Some(result) = completed.take() {
            commit(result, store, &mut summary)?;
        }
        // The only blocking point: the current dispatch, with nothing
        // further buffered.
        completed = Some(handle.wait()?);
    }
    if let Some(result) = completed.take() {
        commit(result, store, &mut summary)?;
    }
    bar.finish_and_clear();

    summary.elapsed_secs = started.elapsed().as_secs_f64();
    summary.outcome_watermark = store.watermark();
    let outcome = if store.watermark().next_unit >= total_units {
        ScanOutcome::Completed
    } else {
        ScanOutcome::Paused(store.watermark())
    };
    Ok((outcome, summary))
}

/// CLI entry point for `simgraph scan`.
pub fn run(args: ScanArgs) -> Result<()> {
    let num_threads = if args.num_threads == 0 {
        num_cpus::get()
    } else {
        args.num_threads
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .context("Failed to build thread pool")?;

    let pack_opts = PackOptions {
        max_length: args.max_length,
        ..Default::default()
    };
    let (records, ingest_stats) = read_fasta(&args.input, &pack_opts)?;
    let (db, pack_stats) = PackedDatabase::pack(records, &pack_opts);
    if args.verbose {
        eprintln!(
            "[INFO] ingested {} records ({} malformed, {} duplicate ids)",
            ingest_stats.read, ingest_stats.malformed, ingest_stats.duplicate_ids
        );
        eprintln!(
            "[INFO] packed {} proteins, {} residues ({} skipped malformed, {} over length cutoff)",
            pack_stats.packed,
            pack_stats.total_residues,
            pack_stats.skipped_malformed,
            pack_stats.skipped_overlong
        );
    }
    if db.is_empty() {
        return Ok(());
    }

    let table = Arc::new(SubstitutionTable::compile(args.matrix, args.gap_extend)?);
    let domain = ScoreDomain::new(args.ceiling)?;
    let db = Arc::new(db);
    let backend = LockstepBackend::new(Arc::clone(&db), Arc::clone(&table), domain);

    let opts = ScanOptions {
        scheduler: SchedulerConfig {
            tile: args.tile,
            strip_width: args.strip_width,
            lanes: args.lanes,
            comparison: if args.all_pairs {
                Comparison::AllPairs
            } else {
                Comparison::SuccessorsOnly
            },
        },
        domain,
        report_threshold: args.report_threshold,
        limit_units: args.limit_units,
        verbose: args.verbose,
    };

    let mut store = if args.resume {
        EdgeStore::resume(&args.out)?
    } else {
        EdgeStore::create(&args.out)?
    };

    let control = ScanControl::new();
    let (outcome, summary) = scan(&db, &table, &backend, &mut store, &opts, &control)?;

    if args.verbose {
        eprintln!(
            "[INFO] {} units committed, {} edges, {} aa processed, {:.2e} cells in {:.1}s",
            summary.units_committed,
            summary.edges_written,
            summary.residues_processed,
            summary.cells_processed as f64,
            summary.elapsed_secs
        );
        match outcome {
            ScanOutcome::Completed => eprintln!("[INFO] scan complete"),
            ScanOutcome::Paused(mark) => {
                eprintln!("[INFO] scan paused at unit {} — resume with --resume", mark.next_unit)
            }
        }
    }
    Ok(())
}
