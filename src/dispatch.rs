//! Fan-out of render work.
//!
//! The plan is split round-robin into one chunk per worker. Each chunk runs
//! as a job on a dedicated `rayon` pool with an owned [`WorkerPayload`] and
//! its own processor, and reports back over an mpsc channel:
//!
//! ```text
//!              ┌─ worker 0: entries 0, 3, 6 … ─┐
//! coordinator ─┼─ worker 1: entries 1, 4, 7 … ─┼─► rendered/{index}.json
//!   ▲          └─ worker 2: entries 2, 5, 8 … ─┘
//!   └──── Log / Timing / Done / Failed ────────┘
//! ```
//!
//! The calling thread acts as coordinator. It never waits on one worker in
//! particular: it polls the channel with a short timeout and checks the
//! caller's [`CancelToken`] in between. The first failure (or a caller
//! cancel) raises a shared flag that workers check before every entry. The
//! coordinator then keeps draining the channel until every worker has
//! reported back, so once it returns no worker is still writing into the
//! staging area. Snapshots already written stay on disk.
//!
//! Worker log lines carry a `tracing` level. Warnings and errors are also
//! collected into the [`DispatchReport`].
//!
//! Rendering falls back to a single in-thread worker when a custom fetch
//! strategy is configured (it cannot be rebuilt inside each worker) or when
//! the pool cannot be built.

use crate::plan::{PlanEntry, RenderPlan};
use crate::processor::{ProcessError, ProcessorFactory};
use crate::publish::work_dir;
use crate::render::{RenderError, RenderOptions, render_entry, write_snapshot};
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::Level;

/// How long the coordinator blocks on the channel before re-checking
/// cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Rendering cancelled")]
    Cancelled,
    #[error("Worker {worker} failed to start: {source}")]
    Processor { worker: usize, source: ProcessError },
    #[error("Worker {worker} failed on {relative_path}: {source}")]
    Render {
        worker: usize,
        relative_path: String,
        source: RenderError,
    },
    #[error("Worker {worker} panicked: {message}")]
    Panicked { worker: usize, message: String },
    #[error("Worker {worker} exited unexpectedly")]
    Exited { worker: usize },
}

/// Cooperative cancellation handle shared between a caller and a build.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Messages from workers to the coordinator.
#[derive(Debug)]
pub enum WorkerMessage {
    Log {
        worker: usize,
        level: Level,
        message: String,
    },
    Timing {
        worker: usize,
        index: usize,
        elapsed: Duration,
    },
    Done { worker: usize, rendered: usize },
    Failed { worker: usize, error: DispatchError },
}

/// Everything one execution unit needs, owned.
#[derive(Debug, Clone)]
pub struct WorkerPayload {
    pub worker: usize,
    pub content_root: PathBuf,
    pub staging_dir: PathBuf,
    pub entries: Vec<PlanEntry>,
    pub options: RenderOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchMode {
    Parallel { workers: usize },
    Sequential { reason: String },
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parallel { workers } => write!(f, "parallel ({workers} workers)"),
            Self::Sequential { reason } => write!(f, "sequential ({reason})"),
        }
    }
}

/// Per-entry render time summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderTimings {
    pub count: usize,
    pub max: Duration,
    pub avg: Duration,
    pub total: Duration,
}

impl RenderTimings {
    pub fn from_samples(samples: &[Duration]) -> Self {
        let count = samples.len();
        let total: Duration = samples.iter().sum();
        let max = samples.iter().copied().max().unwrap_or_default();
        let avg = if count == 0 {
            Duration::ZERO
        } else {
            total / count as u32
        };
        Self {
            count,
            max,
            avg,
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub mode: DispatchMode,
    pub timings: RenderTimings,
    /// Wall-clock time of the whole dispatch.
    pub elapsed: Duration,
    /// Warning and error lines logged by workers, in arrival order.
    pub warnings: Vec<String>,
}

/// What the coordinator gathered from worker messages.
#[derive(Debug, Default)]
struct Collected {
    samples: Vec<Duration>,
    warnings: Vec<String>,
}

impl Collected {
    /// Log `message` and keep what the report needs.
    fn record(&mut self, message: &WorkerMessage) {
        log_message(message);
        match message {
            WorkerMessage::Timing { elapsed, .. } => self.samples.push(*elapsed),
            WorkerMessage::Log {
                level, message, ..
            } if matches!(*level, Level::WARN | Level::ERROR) => {
                self.warnings.push(message.clone())
            }
            _ => {}
        }
    }
}

/// Split `entries` round-robin into at most `workers` non-empty chunks.
pub fn partition<T: Clone>(entries: &[T], workers: usize) -> Vec<Vec<T>> {
    let n = workers.max(1).min(entries.len().max(1));
    let mut chunks: Vec<Vec<T>> = vec![Vec::new(); n];
    for (i, entry) in entries.iter().enumerate() {
        chunks[i % n].push(entry.clone());
    }
    chunks.retain(|c| !c.is_empty());
    chunks
}

/// Render every entry of `plan` into `<staging>/.stagepress/rendered/`.
///
/// The work dir must already exist. `parallelism` is the effective worker
/// count.
pub fn run_render_workers(
    plan: &RenderPlan,
    staging_dir: &Path,
    options: &RenderOptions,
    factory: Arc<dyn ProcessorFactory>,
    parallelism: usize,
    cancel: &CancelToken,
) -> Result<DispatchReport, DispatchError> {
    let started = Instant::now();
    if cancel.is_cancelled() {
        return Err(DispatchError::Cancelled);
    }

    let pool = if options.fetcher.is_custom() {
        Err("a custom fetch strategy cannot be shared with parallel workers".to_string())
    } else {
        rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism.max(1))
            .thread_name(|i| format!("stagepress-render-{i}"))
            .build()
            .map_err(|e| format!("worker pool unavailable: {e}"))
    };

    let (mode, collected) = match pool {
        Ok(pool) => {
            let chunks = partition(&plan.entries, parallelism);
            let workers = chunks.len();
            tracing::info!(entries = plan.len(), workers, "Rendering in parallel");
            let collected =
                run_parallel(&pool, plan, staging_dir, options, factory, chunks, cancel)?;
            (DispatchMode::Parallel { workers }, collected)
        }
        Err(reason) => {
            tracing::info!(entries = plan.len(), reason = %reason, "Rendering sequentially");
            let collected = run_sequential(plan, staging_dir, options, factory.as_ref(), cancel)?;
            (DispatchMode::Sequential { reason }, collected)
        }
    };

    let timings = RenderTimings::from_samples(&collected.samples);
    let elapsed = started.elapsed();
    tracing::info!(
        count = timings.count,
        max_ms = timings.max.as_millis() as u64,
        avg_ms = timings.avg.as_millis() as u64,
        "Entry render times"
    );
    tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Rendering finished");

    Ok(DispatchReport {
        mode,
        timings,
        elapsed,
        warnings: collected.warnings,
    })
}

fn run_parallel(
    pool: &rayon::ThreadPool,
    plan: &RenderPlan,
    staging_dir: &Path,
    options: &RenderOptions,
    factory: Arc<dyn ProcessorFactory>,
    chunks: Vec<Vec<PlanEntry>>,
    cancel: &CancelToken,
) -> Result<Collected, DispatchError> {
    let (tx, rx) = mpsc::channel();
    let abort = Arc::new(AtomicBool::new(false));
    let mut outstanding = BTreeSet::new();

    for (worker, entries) in chunks.into_iter().enumerate() {
        outstanding.insert(worker);
        let payload = WorkerPayload {
            worker,
            content_root: plan.content_root.clone(),
            staging_dir: staging_dir.to_path_buf(),
            entries,
            options: options.clone(),
        };
        let tx: Sender<WorkerMessage> = tx.clone();
        let abort = Arc::clone(&abort);
        let factory = Arc::clone(&factory);
        pool.spawn(move || {
            // Send failures mean the coordinator already returned.
            let mut send = |message: WorkerMessage| {
                let _ = tx.send(message);
            };
            let outcome = run_isolated(payload, factory.as_ref(), &abort, &mut send);
            send(outcome);
        });
    }
    drop(tx);

    coordinate(&rx, outstanding, cancel, &abort)
}

fn run_sequential(
    plan: &RenderPlan,
    staging_dir: &Path,
    options: &RenderOptions,
    factory: &dyn ProcessorFactory,
    cancel: &CancelToken,
) -> Result<Collected, DispatchError> {
    let payload = WorkerPayload {
        worker: 0,
        content_root: plan.content_root.clone(),
        staging_dir: staging_dir.to_path_buf(),
        entries: plan.entries.clone(),
        options: options.clone(),
    };
    let mut collected = Collected::default();
    let mut report = |message: WorkerMessage| collected.record(&message);
    match run_isolated(payload, factory, &cancel.0, &mut report) {
        WorkerMessage::Failed { error, .. } => Err(error),
        _ => Ok(collected),
    }
}

/// Receive worker messages until every worker in `outstanding` is done.
///
/// The first failure or a caller cancel raises `abort`; the loop then keeps
/// receiving until the remaining workers stop, and returns that first error.
fn coordinate(
    rx: &Receiver<WorkerMessage>,
    mut outstanding: BTreeSet<usize>,
    cancel: &CancelToken,
    abort: &AtomicBool,
) -> Result<Collected, DispatchError> {
    let mut collected = Collected::default();
    let mut first_error: Option<DispatchError> = None;

    while !outstanding.is_empty() {
        if first_error.is_none() && cancel.is_cancelled() {
            abort_with(abort, &mut first_error, DispatchError::Cancelled);
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(WorkerMessage::Failed { worker, error }) => {
                outstanding.remove(&worker);
                abort_with(abort, &mut first_error, error);
            }
            Ok(message) => {
                collected.record(&message);
                if let WorkerMessage::Done { worker, .. } = message {
                    outstanding.remove(&worker);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                let worker = outstanding.first().copied().unwrap_or_default();
                abort_with(abort, &mut first_error, DispatchError::Exited { worker });
                break;
            }
        }
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(collected),
    }
}

/// Stop the remaining workers, keeping only the first error.
fn abort_with(abort: &AtomicBool, first_error: &mut Option<DispatchError>, error: DispatchError) {
    abort.store(true, Ordering::SeqCst);
    if first_error.is_none() {
        *first_error = Some(error);
    } else {
        tracing::debug!(error = %error, "Ignoring error after abort");
    }
}

fn log_message(message: &WorkerMessage) {
    match message {
        WorkerMessage::Log {
            worker,
            level,
            message,
        } => match *level {
            Level::ERROR => tracing::error!(worker, "{message}"),
            Level::WARN => tracing::warn!(worker, "{message}"),
            Level::INFO => tracing::info!(worker, "{message}"),
            Level::DEBUG => tracing::debug!(worker, "{message}"),
            _ => tracing::trace!(worker, "{message}"),
        },
        WorkerMessage::Timing {
            worker,
            index,
            elapsed,
        } => tracing::debug!(
            worker,
            index,
            elapsed_ms = elapsed.as_millis() as u64,
            "Rendered entry"
        ),
        WorkerMessage::Done { worker, rendered } => {
            tracing::debug!(worker, rendered, "Worker finished")
        }
        WorkerMessage::Failed { worker, error } => {
            tracing::debug!(worker, error = %error, "Worker failed")
        }
    }
}

/// Run one worker, turning its result or panic into a final message.
fn run_isolated(
    payload: WorkerPayload,
    factory: &dyn ProcessorFactory,
    abort: &AtomicBool,
    report: &mut dyn FnMut(WorkerMessage),
) -> WorkerMessage {
    let worker = payload.worker;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        run_worker(payload, factory, abort, report)
    }));
    match outcome {
        Ok(Ok(rendered)) => WorkerMessage::Done { worker, rendered },
        Ok(Err(error)) => WorkerMessage::Failed { worker, error },
        Err(panic) => WorkerMessage::Failed {
            worker,
            error: DispatchError::Panicked {
                worker,
                message: panic_message(panic.as_ref()),
            },
        },
    }
}

fn run_worker(
    payload: WorkerPayload,
    factory: &dyn ProcessorFactory,
    abort: &AtomicBool,
    report: &mut dyn FnMut(WorkerMessage),
) -> Result<usize, DispatchError> {
    let WorkerPayload {
        worker,
        content_root,
        staging_dir,
        entries,
        options,
    } = payload;
    let processor = factory
        .create(&options)
        .map_err(|source| DispatchError::Processor { worker, source })?;
    let work = work_dir(&staging_dir);

    for entry in &entries {
        if abort.load(Ordering::SeqCst) {
            return Err(DispatchError::Cancelled);
        }
        let started = Instant::now();
        let failed = |source| DispatchError::Render {
            worker,
            relative_path: entry.relative_path.clone(),
            source,
        };
        let (snapshot, warnings) =
            render_entry(entry, &content_root, processor.as_ref(), &options).map_err(failed)?;
        write_snapshot(&work, &snapshot).map_err(failed)?;
        for warning in warnings {
            report(WorkerMessage::Log {
                worker,
                level: Level::WARN,
                message: format!("{}: {warning}", entry.relative_path),
            });
        }
        report(WorkerMessage::Timing {
            worker,
            index: entry.index,
            elapsed: started.elapsed(),
        });
    }

    if let Some(summary) = processor.summary() {
        report(WorkerMessage::Log {
            worker,
            level: Level::INFO,
            message: summary,
        });
    }
    Ok(entries.len())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{Fetch, FetchError, Fetcher};
    use crate::plan::build_render_plan;
    use crate::processor::{ContentProcessor, MarkdownProcessorFactory};
    use crate::render::snapshot_path;
    use crate::test_helpers::{content_tree, units_for};
    use tempfile::TempDir;

    fn plan_for(root: &Path) -> RenderPlan {
        build_render_plan(&units_for(root), root).unwrap()
    }

    fn site(n: usize) -> TempDir {
        let docs: Vec<(String, String)> = (0..n)
            .map(|i| (format!("doc{i:02}.md"), format!("# Doc {i}\n\nBody {i}\n")))
            .collect();
        let refs: Vec<(&str, &str)> = docs.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
        content_tree(&refs)
    }

    #[derive(Debug)]
    struct NoFetch;

    impl Fetch for NoFetch {
        fn post_text(&self, url: &str, _body: &str, _ua: &str) -> Result<String, FetchError> {
            Err(FetchError::Transport {
                url: url.to_string(),
                message: "offline".into(),
            })
        }
    }

    struct PanicFactory;

    impl ProcessorFactory for PanicFactory {
        fn create(&self, _: &RenderOptions) -> Result<Box<dyn ContentProcessor>, ProcessError> {
            panic!("processor exploded")
        }
    }

    struct BrokenFactory;

    impl ProcessorFactory for BrokenFactory {
        fn create(&self, _: &RenderOptions) -> Result<Box<dyn ContentProcessor>, ProcessError> {
            Err(ProcessError::Cache(std::io::Error::other("read-only")))
        }
    }

    /// Staging dir whose work dir exists, as after `write_plan`.
    fn staging_area() -> TempDir {
        let staging = TempDir::new().unwrap();
        std::fs::create_dir(work_dir(staging.path())).unwrap();
        staging
    }

    #[test]
    fn partition_is_round_robin() {
        let chunks = partition(&[0, 1, 2, 3, 4, 5, 6], 3);
        assert_eq!(chunks, vec![vec![0, 3, 6], vec![1, 4], vec![2, 5]]);
    }

    #[test]
    fn partition_caps_chunks_at_entry_count() {
        let chunks = partition(&["a", "b"], 8);
        assert_eq!(chunks, vec![vec!["a"], vec!["b"]]);
        assert!(partition::<u8>(&[], 4).is_empty());
    }

    #[test]
    fn partition_covers_every_entry_without_empty_chunks() {
        for len in 0..20usize {
            for workers in 1..6 {
                let entries: Vec<usize> = (0..len).collect();
                let chunks = partition(&entries, workers);
                assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), len);
                assert!(chunks.iter().all(|c| !c.is_empty()));
                if len >= workers {
                    assert_eq!(chunks.len(), workers);
                }
            }
        }
    }

    #[test]
    fn timings_summary() {
        let t = RenderTimings::from_samples(&[
            Duration::from_millis(10),
            Duration::from_millis(30),
            Duration::from_millis(20),
        ]);
        assert_eq!(t.count, 3);
        assert_eq!(t.max, Duration::from_millis(30));
        assert_eq!(t.avg, Duration::from_millis(20));
        assert_eq!(t.total, Duration::from_millis(60));
        assert_eq!(RenderTimings::from_samples(&[]), RenderTimings::default());
    }

    #[test]
    fn parallel_renders_every_entry() {
        let content = site(5);
        let staging = staging_area();
        let plan = plan_for(content.path());
        let options = RenderOptions::for_tests(content.path());

        let report = run_render_workers(
            &plan,
            staging.path(),
            &options,
            Arc::new(MarkdownProcessorFactory),
            2,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(report.mode, DispatchMode::Parallel { workers: 2 });
        assert_eq!(report.timings.count, 5);
        for entry in &plan.entries {
            assert!(snapshot_path(&work_dir(staging.path()), entry.index).exists());
        }
    }

    #[test]
    fn custom_fetcher_forces_sequential() {
        let content = site(3);
        let staging = staging_area();
        let plan = plan_for(content.path());
        let options =
            RenderOptions::for_tests(content.path()).with_fetcher(Fetcher::Custom(Arc::new(NoFetch)));

        let report = run_render_workers(
            &plan,
            staging.path(),
            &options,
            Arc::new(MarkdownProcessorFactory),
            4,
            &CancelToken::new(),
        )
        .unwrap();

        assert!(matches!(report.mode, DispatchMode::Sequential { .. }));
        assert_eq!(report.timings.count, 3);
    }

    #[test]
    fn render_failure_names_worker_and_path() {
        let content = site(2);
        let staging = staging_area();
        let plan = plan_for(content.path());
        std::fs::remove_file(content.path().join("doc01.md")).unwrap();

        let err = run_render_workers(
            &plan,
            staging.path(),
            &RenderOptions::for_tests(content.path()),
            Arc::new(MarkdownProcessorFactory),
            2,
            &CancelToken::new(),
        )
        .unwrap_err();

        match err {
            DispatchError::Render {
                worker,
                relative_path,
                ..
            } => {
                assert_eq!(worker, 1);
                assert_eq!(relative_path, "doc01.md");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn panicking_worker_is_reported() {
        let content = site(2);
        let staging = staging_area();
        let err = run_render_workers(
            &plan_for(content.path()),
            staging.path(),
            &RenderOptions::for_tests(content.path()),
            Arc::new(PanicFactory),
            2,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(
            matches!(err, DispatchError::Panicked { ref message, .. } if message == "processor exploded"),
            "{err}"
        );
    }

    #[test]
    fn processor_creation_failure_is_reported() {
        let content = site(1);
        let staging = staging_area();
        let err = run_render_workers(
            &plan_for(content.path()),
            staging.path(),
            &RenderOptions::for_tests(content.path()),
            Arc::new(BrokenFactory),
            1,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::Processor { worker: 0, .. }));
    }

    #[test]
    fn cancelled_token_stops_both_modes() {
        let content = site(3);
        let plan = plan_for(content.path());
        let cancel = CancelToken::new();
        cancel.cancel();

        let staging = staging_area();
        let parallel = run_render_workers(
            &plan,
            staging.path(),
            &RenderOptions::for_tests(content.path()),
            Arc::new(MarkdownProcessorFactory),
            2,
            &cancel,
        );
        assert!(matches!(parallel, Err(DispatchError::Cancelled)));

        let staging = staging_area();
        let options =
            RenderOptions::for_tests(content.path()).with_fetcher(Fetcher::Custom(Arc::new(NoFetch)));
        let sequential = run_render_workers(
            &plan,
            staging.path(),
            &options,
            Arc::new(MarkdownProcessorFactory),
            2,
            &cancel,
        );
        assert!(matches!(sequential, Err(DispatchError::Cancelled)));
        assert!(!snapshot_path(&work_dir(staging.path()), 0).exists());
    }

    #[test]
    fn coordinator_collects_until_all_done() {
        let (tx, rx) = mpsc::channel();
        tx.send(WorkerMessage::Log {
            worker: 0,
            level: Level::INFO,
            message: "hello".into(),
        })
        .unwrap();
        tx.send(WorkerMessage::Timing {
            worker: 0,
            index: 0,
            elapsed: Duration::from_millis(5),
        })
        .unwrap();
        tx.send(WorkerMessage::Done {
            worker: 0,
            rendered: 1,
        })
        .unwrap();

        let abort = AtomicBool::new(false);
        let collected = coordinate(&rx, BTreeSet::from([0]), &CancelToken::new(), &abort).unwrap();
        assert_eq!(collected.samples, vec![Duration::from_millis(5)]);
        assert!(collected.warnings.is_empty());
        assert!(!abort.load(Ordering::SeqCst));
    }

    #[test]
    fn coordinator_keeps_worker_warnings() {
        let (tx, rx) = mpsc::channel();
        for (level, message) in [
            (Level::DEBUG, "noise"),
            (Level::WARN, "careful"),
            (Level::ERROR, "broken"),
        ] {
            tx.send(WorkerMessage::Log {
                worker: 1,
                level,
                message: message.into(),
            })
            .unwrap();
        }
        tx.send(WorkerMessage::Done {
            worker: 1,
            rendered: 0,
        })
        .unwrap();

        let collected =
            coordinate(&rx, BTreeSet::from([1]), &CancelToken::new(), &AtomicBool::new(false))
                .unwrap();
        assert_eq!(collected.warnings, vec!["careful", "broken"]);
    }

    #[test]
    fn coordinator_reports_vanished_worker() {
        let (tx, rx) = mpsc::channel();
        tx.send(WorkerMessage::Done {
            worker: 0,
            rendered: 0,
        })
        .unwrap();
        drop(tx);

        let abort = AtomicBool::new(false);
        let err = coordinate(&rx, BTreeSet::from([0, 1]), &CancelToken::new(), &abort).unwrap_err();
        assert!(matches!(err, DispatchError::Exited { worker: 1 }));
        assert_eq!(err.to_string(), "Worker 1 exited unexpectedly");
        assert!(abort.load(Ordering::SeqCst));
    }

    #[test]
    fn coordinator_waits_for_running_workers_after_failure() {
        let (tx, rx) = mpsc::channel();
        tx.send(WorkerMessage::Failed {
            worker: 0,
            error: DispatchError::Panicked {
                worker: 0,
                message: "boom".into(),
            },
        })
        .unwrap();

        let finished = Arc::new(AtomicBool::new(false));
        let straggler = {
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(150));
                finished.store(true, Ordering::SeqCst);
                tx.send(WorkerMessage::Failed {
                    worker: 1,
                    error: DispatchError::Cancelled,
                })
                .unwrap();
            })
        };

        let abort = AtomicBool::new(false);
        let err = coordinate(&rx, BTreeSet::from([0, 1]), &CancelToken::new(), &abort).unwrap_err();
        assert!(finished.load(Ordering::SeqCst));
        assert!(abort.load(Ordering::SeqCst));
        assert!(matches!(err, DispatchError::Panicked { worker: 0, .. }), "{err}");
        straggler.join().unwrap();
    }

    #[test]
    fn cancel_waits_for_workers_to_stop() {
        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken::new();
        cancel.cancel();
        tx.send(WorkerMessage::Failed {
            worker: 0,
            error: DispatchError::Cancelled,
        })
        .unwrap();

        let abort = AtomicBool::new(false);
        let err = coordinate(&rx, BTreeSet::from([0]), &cancel, &abort).unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));
        assert!(abort.load(Ordering::SeqCst));
    }

    #[test]
    fn worker_warnings_reach_the_report() {
        let content = content_tree(&[
            ("a.md", "# A\n\n```klingon\nqapla'\n```\n"),
            ("b.md", "# B\n\nplain\n"),
        ]);
        let staging = staging_area();

        let report = run_render_workers(
            &plan_for(content.path()),
            staging.path(),
            &RenderOptions::for_tests(content.path()),
            Arc::new(MarkdownProcessorFactory),
            2,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(
            report.warnings,
            vec!["a.md: no syntax for `klingon` code, rendered as plain text"]
        );
    }

    #[test]
    fn sequential_worker_warnings_reach_the_report() {
        let content = content_tree(&[("a.md", "```klingon\nqapla'\n```\n")]);
        let staging = staging_area();
        let options =
            RenderOptions::for_tests(content.path()).with_fetcher(Fetcher::Custom(Arc::new(NoFetch)));

        let report = run_render_workers(
            &plan_for(content.path()),
            staging.path(),
            &options,
            Arc::new(MarkdownProcessorFactory),
            1,
            &CancelToken::new(),
        )
        .unwrap();

        assert!(matches!(report.mode, DispatchMode::Sequential { .. }));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("a.md: no syntax for `klingon`"));
    }

    #[test]
    fn panic_message_extracts_strings() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
