use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use super::config::Config;
use super::constants::{MEDIUM_GROUP_LIMIT, SMALL_GROUP_LIMIT};
use super::error::{ProcessorError, SchemaError, StackWriterError};
use super::error_log::{ErrorLog, ErrorRecord};
use super::optics::OpticsRecord;
use super::particle::{FrozenGroups, GroupSizeBuckets};
use super::particle_aggregator::ParticleAggregator;
use super::schema_adapter::SchemaAdapter;
use super::stack_writer::{GroupOutcome, StackWriter};
use super::star_writer::StarWriter;
use super::worker_status::{BarColor, WorkerStatus};

/// Shared flag asking every worker to stop
pub type CancelToken = Arc<AtomicBool>;

pub fn new_cancel_token() -> CancelToken {
    Arc::new(AtomicBool::new(false))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    Aggregating,
    Writing,
    /// Writing finished but some groups or particles failed
    FailedPartial,
    Done,
}

/// Statistics reported by a dry run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DryRunReport {
    pub total_groups: usize,
    pub total_particles: usize,
    pub buckets: GroupSizeBuckets,
}

impl DryRunReport {
    fn new(groups: &FrozenGroups) -> Self {
        Self {
            total_groups: groups.len(),
            total_particles: groups.n_particles(),
            buckets: groups.size_buckets(),
        }
    }
}

/// Statistics reported by a full export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub total_groups: usize,
    pub total_particles: usize,
    /// Groups whose stack could not be written at all; they are left out of the STAR file
    pub groups_skipped: usize,
    pub groups_with_particle_errors: usize,
    pub error_log_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportReport {
    DryRun(DryRunReport),
    Export(ExportSummary),
}

/// What one worker did with its shard
#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    pub skipped: Vec<usize>,
    pub partial: Vec<usize>,
    pub cancelled: bool,
}

impl WorkerReport {
    fn merge(&mut self, other: WorkerReport) {
        self.skipped.extend(other.skipped);
        self.partial.extend(other.partial);
        self.cancelled |= other.cancelled;
    }
}

/// Everything a worker needs besides the shared config and groups
#[derive(Debug)]
pub struct WorkerContext {
    pub writer: StackWriter,
    pub tx: Sender<WorkerStatus>,
    pub cancel: CancelToken,
    /// Parallel workers abandon a stack mid-way when cancelled
    pub parallel: bool,
}

/// Write the stacks of a subset of groups
pub fn process_subset(
    config: &Config,
    groups: &FrozenGroups,
    subset: &[usize],
    ctx: WorkerContext,
) -> Result<WorkerReport, ProcessorError> {
    let worker_id = ctx.writer.worker_id();
    let mut report = WorkerReport::default();
    let mut color = BarColor::CYAN;
    let mut groups_done = 0;
    ctx.tx
        .send(WorkerStatus::new(0.0, 0, worker_id, color.clone()))?;

    for (done, idx) in subset.iter().enumerate() {
        if ctx.cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            break;
        }
        let Some(group) = groups.get(*idx) else {
            continue;
        };
        let path = config.get_stack_file_name(group.name());
        let cancel = ctx.parallel.then_some(&*ctx.cancel);
        match ctx.writer.write_group(group, &path, cancel) {
            Ok(GroupOutcome::Complete) => (),
            Ok(GroupOutcome::Partial { failed }) => {
                spdlog::warn!(
                    "{failed} of {} particles in {} could not be copied",
                    group.len(),
                    group.name()
                );
                report.partial.push(*idx);
                color = BarColor::RED;
            }
            Err(StackWriterError::Cancelled(name)) => {
                spdlog::warn!("Abandoned {name} after cancellation");
                report.cancelled = true;
                break;
            }
            Err(e) => {
                spdlog::error!("Skipping group {}: {e}", group.name());
                ctx.writer
                    .report(ErrorRecord::group(worker_id, group.name(), e.to_string()));
                remove_stale_stack(&path);
                report.skipped.push(*idx);
                color = BarColor::RED;
            }
        }
        groups_done = done + 1;
        ctx.tx.send(WorkerStatus::new(
            groups_done as f32 / subset.len() as f32,
            groups_done,
            worker_id,
            color.clone(),
        ))?;
    }

    if report.cancelled {
        ctx.tx.send(WorkerStatus::new(
            groups_done as f32 / subset.len() as f32,
            groups_done,
            worker_id,
            BarColor::MAGENTA,
        ))?;
    } else {
        ctx.tx.send(WorkerStatus::new(
            1.0,
            subset.len(),
            worker_id,
            BarColor::GREEN,
        ))?;
    }
    Ok(report)
}

fn remove_stale_stack(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            spdlog::warn!("Could not remove incomplete stack {}: {e}", path.display());
        }
    }
}

/// Divide the group indices into per-worker shards, round-robin.
///
/// Only shards which received work are returned, so there are never more workers than
/// groups.
pub fn create_subsets(n_groups: usize, n_threads: i32) -> Vec<Vec<usize>> {
    let n_subsets = (n_threads.max(1) as usize).min(n_groups.max(1));
    let mut subsets: Vec<Vec<usize>> = vec![Vec::new(); n_subsets];

    for idx in 0..n_groups {
        subsets[idx % n_subsets].push(idx)
    }

    subsets.retain(|subset| !subset.is_empty());
    subsets
}

/// ExportOrchestrator drives one export: aggregation, stack writing (sequential or over
/// a pool of worker threads) and the final STAR file.
#[derive(Debug)]
pub struct ExportOrchestrator {
    config: Arc<Config>,
    cancel: CancelToken,
    state: ExportState,
}

impl ExportOrchestrator {
    pub fn new(config: Config, cancel: CancelToken) -> Self {
        Self {
            config: Arc::new(config),
            cancel,
            state: ExportState::Idle,
        }
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    fn transition(&mut self, next: ExportState) {
        spdlog::info!("Export state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Read the CS data and group the particles. Nothing is written.
    pub fn aggregate(&mut self) -> Result<(Arc<FrozenGroups>, OpticsRecord), ProcessorError> {
        self.transition(ExportState::Aggregating);
        let adapter = SchemaAdapter::from_config(&self.config)?;
        if adapter.is_empty() {
            return Err(SchemaError::EmptyDataset.into());
        }
        let groups = ParticleAggregator::new(&adapter, &self.config)?.aggregate()?;
        let optics = OpticsRecord::from_groups(&adapter, &groups)?;
        Ok((Arc::new(groups), optics))
    }

    /// Run the export described by the configuration
    pub fn run(&mut self, tx: Sender<WorkerStatus>) -> Result<ExportReport, ProcessorError> {
        self.config.validate()?;
        let (groups, optics) = self.aggregate()?;

        if self.config.dry_run {
            let report = DryRunReport::new(&groups);
            spdlog::info!(
                "Dry run: {} particles, {} groups; {} with one particle, {} under {}, {} under {}",
                report.total_particles,
                report.total_groups,
                report.buckets.exactly_one,
                report.buckets.under_five,
                SMALL_GROUP_LIMIT,
                report.buckets.under_ten,
                MEDIUM_GROUP_LIMIT,
            );
            self.transition(ExportState::Done);
            return Ok(ExportReport::DryRun(report));
        }

        self.transition(ExportState::Writing);
        std::fs::create_dir_all(self.config.get_stack_directory())?;
        let error_log = ErrorLog::spawn(&self.config.get_error_log_name());
        let written = self.write_stacks(&groups, &optics, &error_log, tx);
        let n_entries = match error_log.finish() {
            Some(result) => result?,
            None => return Err(ProcessorError::ErrorLogPanic),
        };
        let report = written?;
        if report.cancelled {
            spdlog::warn!("Export cancelled; no STAR file written");
            return Err(ProcessorError::Cancelled);
        }

        let kept = groups.select(|idx| !report.skipped.contains(&idx));
        StarWriter::new(&self.config.get_star_file_name()).write(&optics, &kept, &self.config)?;

        let summary = ExportSummary {
            total_groups: groups.len(),
            total_particles: groups.n_particles(),
            groups_skipped: report.skipped.len(),
            groups_with_particle_errors: report.partial.len(),
            error_log_entries: n_entries,
        };
        if summary.groups_skipped > 0 || summary.groups_with_particle_errors > 0 {
            self.transition(ExportState::FailedPartial);
            spdlog::warn!(
                "{} entries written to {}",
                n_entries,
                self.config.get_error_log_name().display()
            );
        }
        self.transition(ExportState::Done);
        Ok(ExportReport::Export(summary))
    }

    fn write_stacks(
        &self,
        groups: &Arc<FrozenGroups>,
        optics: &OpticsRecord,
        error_log: &ErrorLog,
        tx: Sender<WorkerStatus>,
    ) -> Result<WorkerReport, ProcessorError> {
        let box_size = optics.box_size();
        let pixel_size = optics.pixel_size() as f32;
        let parallel = self.config.is_parallel();
        let make_context = |worker_id: usize| WorkerContext {
            writer: StackWriter::new(box_size, pixel_size, worker_id, error_log.sender()),
            tx: tx.clone(),
            cancel: self.cancel.clone(),
            parallel,
        };

        if !parallel {
            let subset: Vec<usize> = (0..groups.len()).collect();
            return process_subset(&self.config, groups, &subset, make_context(0));
        }

        let subsets = create_subsets(groups.len(), self.config.n_threads);
        spdlog::info!("Writing stacks with {} workers", subsets.len());
        let mut handles = vec![];
        for (worker_id, subset) in subsets.into_iter().enumerate() {
            let config = self.config.clone();
            let groups = groups.clone();
            let ctx = make_context(worker_id);
            handles.push(std::thread::spawn(move || {
                process_subset(&config, &groups, &subset, ctx)
            }));
        }

        let mut report = WorkerReport::default();
        let mut failure = None;
        for (worker_id, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(worker)) => report.merge(worker),
                Ok(Err(e)) => {
                    spdlog::error!("Worker {worker_id} failed: {e}");
                    failure.get_or_insert(e);
                }
                Err(_) => {
                    failure.get_or_insert(ProcessorError::WorkerPanic(worker_id));
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Run a complete export with a fresh orchestrator
pub fn run_export(
    config: Config,
    tx: Sender<WorkerStatus>,
    cancel: CancelToken,
) -> Result<ExportReport, ProcessorError> {
    ExportOrchestrator::new(config, cancel).run(tx)
}
