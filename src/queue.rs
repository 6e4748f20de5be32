//! Job Queue & Worker Pool.
//!
//! A single FIFO queue feeds `max_workers` dispatcher tasks. Dispatchers pop
//! one item, spawn its execution, and immediately return to the queue —
//! `max_workers` is dispatch fan-out, not an execution cap. Two semaphores
//! gate the actual work: a 5-permit I/O pool for blocking network and
//! filesystem stages, and a CPU pool sized to the host for the scan+classify
//! stage. Back-pressure is enforced at ingress by a synchronous depth probe.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::classify::Classifier;
use crate::config::Config;
use crate::courier::Courier;
use crate::detect::{detect_frameworks, language_histogram, FrameworkRule};
use crate::error::ScanServerError;
use crate::fetch::{delete_dir, safe_extract, Fetcher};
use crate::rules::RuleCatalog;
use crate::scanner::scan_tree;
use crate::types::{Finding, QueueItem, ScanJob, ScanOutcome, ScanReport, ScanTask, Severity};

/// Blocking network / filesystem operations run under this many permits.
const IO_POOL_SIZE: usize = 5;

/// Grace window for in-flight jobs at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const SHUTDOWN_EXTRA_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

pub struct JobQueue {
    items: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
    depth: AtomicUsize,
    limit: usize,
    active: AtomicUsize,
}

impl JobQueue {
    pub fn new(max_workers: usize) -> Arc<JobQueue> {
        Arc::new(JobQueue {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            depth: AtomicUsize::new(0),
            limit: 2 * max_workers,
            active: AtomicUsize::new(0),
        })
    }

    /// Synchronous ingress probe: reject once the queue holds
    /// `2 * max_workers` items, leaving the queue untouched.
    pub fn try_enqueue(&self, item: QueueItem) -> Result<(), ScanServerError> {
        let mut items = self.items.lock().expect("queue lock poisoned");
        if items.len() >= self.limit {
            return Err(ScanServerError::Capacity);
        }
        items.push_back(item);
        self.depth.store(items.len(), Ordering::SeqCst);
        drop(items);
        self.notify.notify_one();
        Ok(())
    }

    /// Pop the oldest item, waiting for an arrival if the queue is empty.
    pub async fn pop(&self) -> QueueItem {
        loop {
            {
                let mut items = self.items.lock().expect("queue lock poisoned");
                if let Some(item) = items.pop_front() {
                    self.depth.store(items.len(), Ordering::SeqCst);
                    return item;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Decrements the active-job gauge when a job's task finishes on any path.
struct ActiveGuard(Arc<JobQueue>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Worker context
// ---------------------------------------------------------------------------

/// Everything a job execution needs; cloned into each spawned task.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<Config>,
    pub queue: Arc<JobQueue>,
    pub catalog: Arc<RuleCatalog>,
    pub classifier: Arc<Classifier>,
    pub fetcher: Arc<Fetcher>,
    pub courier: Arc<Courier>,
    pub frameworks: Arc<Vec<FrameworkRule>>,
    pub io_pool: Arc<Semaphore>,
    pub cpu_pool: Arc<Semaphore>,
}

impl WorkerContext {
    pub fn new(
        config: Arc<Config>,
        queue: Arc<JobQueue>,
        catalog: Arc<RuleCatalog>,
        classifier: Arc<Classifier>,
        fetcher: Arc<Fetcher>,
        courier: Arc<Courier>,
        frameworks: Arc<Vec<FrameworkRule>>,
    ) -> WorkerContext {
        let cpu_count =
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        WorkerContext {
            config,
            queue,
            catalog,
            classifier,
            fetcher,
            courier,
            frameworks,
            io_pool: Arc::new(Semaphore::new(IO_POOL_SIZE)),
            cpu_pool: Arc::new(Semaphore::new(cpu_count)),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

pub struct WorkerPool {
    dispatchers: Vec<JoinHandle<()>>,
    queue: Arc<JobQueue>,
}

impl WorkerPool {
    /// Spawn `max_workers` dispatcher tasks over the queue.
    pub fn start(ctx: WorkerContext) -> WorkerPool {
        let queue = ctx.queue.clone();
        let dispatchers = (0..ctx.config.max_workers)
            .map(|_| {
                let ctx = ctx.clone();
                tokio::spawn(dispatcher_loop(ctx))
            })
            .collect();
        info!(dispatchers = ctx.config.max_workers, "Worker pool started");
        WorkerPool { dispatchers, queue }
    }

    /// Cancel dispatchers and give in-flight jobs a bounded grace window.
    /// Cleanup reports but never propagates shutdown errors.
    pub async fn shutdown(self) {
        for d in &self.dispatchers {
            d.abort();
        }

        let drained = wait_for_drain(&self.queue, SHUTDOWN_GRACE).await;
        if !drained {
            warn!(
                active = self.queue.active(),
                "Jobs still running after grace window, extending for CPU stages"
            );
            if !wait_for_drain(&self.queue, SHUTDOWN_EXTRA_GRACE).await {
                warn!(active = self.queue.active(), "Abandoning unfinished jobs at shutdown");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn wait_for_drain(queue: &Arc<JobQueue>, budget: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + budget;
    while queue.active() > 0 {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    true
}

/// Pop one item and spawn its execution; the dispatcher itself never awaits
/// job completion.
async fn dispatcher_loop(ctx: WorkerContext) {
    loop {
        let item = ctx.queue.pop().await;
        ctx.queue.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(ctx.queue.clone());
        let ctx = ctx.clone();

        match item {
            QueueItem::Single { job, commit_id } => {
                tokio::spawn(async move {
                    let _guard = guard;
                    run_single(ctx, job, commit_id).await;
                });
            }
            QueueItem::Multi { jobs, commit_ids } => {
                tokio::spawn(async move {
                    let _guard = guard;
                    run_multi(ctx, jobs, commit_ids).await;
                });
            }
            QueueItem::Local { job, archive } => {
                tokio::spawn(async move {
                    let _guard = guard;
                    run_local(ctx, job, archive).await;
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Job execution
// ---------------------------------------------------------------------------

async fn run_single(ctx: WorkerContext, job: ScanJob, commit_id: String) {
    info!(project = job.project_name.as_str(), "Starting scan");
    match scan_pipeline(&ctx, &job, &commit_id, None, true).await {
        Ok(report) => {
            ctx.courier.deliver_report(&job.callback_url, &report).await;
            info!(project = job.project_name.as_str(), "Scan delivered");
        }
        Err(e) => {
            error!(project = job.project_name.as_str(), error = %e, "Scan failed");
            ctx.courier.deliver_error(&job.callback_url, &e.to_string()).await;
        }
    }
}

/// Strictly sequential within the batch; one failure does not stop the rest.
async fn run_multi(ctx: WorkerContext, jobs: Vec<ScanJob>, commit_ids: Vec<String>) {
    let total = jobs.len();
    info!(repositories = total, "Starting sequential multi-scan");
    for (index, (job, commit_id)) in jobs.into_iter().zip(commit_ids).enumerate() {
        info!(
            project = job.project_name.as_str(),
            position = index + 1,
            total,
            "Multi-scan item"
        );
        match scan_pipeline(&ctx, &job, &commit_id, None, false).await {
            Ok(report) => ctx.courier.deliver_report(&job.callback_url, &report).await,
            Err(e) => {
                error!(
                    project = job.project_name.as_str(),
                    error = %e,
                    "Multi-scan item failed"
                );
                ctx.courier.deliver_error(&job.callback_url, &e.to_string()).await;
            }
        }
    }
    info!(repositories = total, "Multi-scan complete");
}

async fn run_local(ctx: WorkerContext, job: ScanJob, archive: Arc<Vec<u8>>) {
    info!(project = job.project_name.as_str(), "Starting local scan");
    let commit_id = job.git_ref.clone();
    match scan_pipeline(&ctx, &job, &commit_id, Some(archive), true).await {
        Ok(report) => ctx.courier.deliver_report(&job.callback_url, &report).await,
        Err(e) => {
            error!(project = job.project_name.as_str(), error = %e, "Local scan failed");
            ctx.courier.deliver_error(&job.callback_url, &e.to_string()).await;
        }
    }
}

/// fetch → extract → scan+classify → report. The scratch directory is removed
/// on every exit path: explicitly through the I/O pool on completion, and by
/// the `TempDir` guard if the task is dropped mid-flight.
async fn scan_pipeline(
    ctx: &WorkerContext,
    job: &ScanJob,
    commit_id: &str,
    archive: Option<Arc<Vec<u8>>>,
    progress: bool,
) -> Result<ScanReport, ScanServerError> {
    std::fs::create_dir_all(&ctx.config.temp_dir)
        .map_err(|e| ScanServerError::Fetch(format!("creating scratch root: {e}")))?;
    let scratch = tempfile::Builder::new()
        .prefix("scan-")
        .tempdir_in(&ctx.config.temp_dir)
        .map_err(|e| ScanServerError::Fetch(format!("creating scratch directory: {e}")))?;
    let scratch_path = scratch.path().to_path_buf();

    let result =
        scan_pipeline_inner(ctx, job, commit_id, archive, progress, &scratch_path).await;

    // Directory removal is blocking; run it in the I/O pool.
    let permit = ctx.io_pool.clone().acquire_owned().await.ok();
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        delete_dir(scratch.path());
        // The guard's own Drop is now a no-op fallback.
        drop(scratch);
    })
    .await
    .ok();

    result
}

async fn scan_pipeline_inner(
    ctx: &WorkerContext,
    job: &ScanJob,
    commit_id: &str,
    archive: Option<Arc<Vec<u8>>>,
    progress: bool,
    scratch_path: &std::path::Path,
) -> Result<ScanReport, ScanServerError> {
    // Stage 1: acquire the archive (download, or write the uploaded bytes).
    let zip_path = {
        let _permit = ctx
            .io_pool
            .acquire()
            .await
            .map_err(|_| ScanServerError::Scan("I/O pool closed".to_string()))?;
        match archive {
            Some(bytes) => {
                let path = scratch_path.join("archive.zip");
                let write_path = path.clone();
                tokio::task::spawn_blocking(move || std::fs::write(&write_path, bytes.as_slice()))
                    .await
                    .map_err(|e| ScanServerError::Fetch(format!("archive write task failed: {e}")))?
                    .map_err(|e| {
                        ScanServerError::Fetch(format!("writing uploaded archive: {e}"))
                    })?;
                path
            }
            None => {
                ctx.fetcher.download_archive(&job.repo_url, commit_id, scratch_path).await?
            }
        }
    };
    info!(project = job.project_name.as_str(), "Archive acquired");

    // Stage 2: extract under the safety filter.
    let extracted_path = scratch_path.join("extracted");
    {
        let _permit = ctx
            .io_pool
            .acquire()
            .await
            .map_err(|_| ScanServerError::Scan("I/O pool closed".to_string()))?;
        let catalog = ctx.catalog.clone();
        let zip = zip_path.clone();
        let dest = extracted_path.clone();
        tokio::task::spawn_blocking(move || safe_extract(&zip, &dest, &catalog))
            .await
            .map_err(|e| ScanServerError::Fetch(format!("extraction task failed: {e}")))?
            .map_err(ScanServerError::Fetch)?;
    }
    info!(project = job.project_name.as_str(), "Archive extracted");

    // Stage 3: scan + classify in the CPU pool, with best-effort progress pings.
    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<usize>();
    let forwarder = if progress {
        let courier = ctx.courier.clone();
        let callback_url = job.callback_url.clone();
        Some(tokio::spawn(async move {
            while let Some(files_scanned) = progress_rx.recv().await {
                courier.post_partial(&callback_url, files_scanned).await;
            }
        }))
    } else {
        None
    };

    let outcome = {
        let _permit = ctx
            .cpu_pool
            .acquire()
            .await
            .map_err(|_| ScanServerError::Scan("CPU pool closed".to_string()))?;
        let task = ScanTask {
            project_name: job.project_name.clone(),
            extracted_path: extracted_path.clone(),
        };
        let catalog = ctx.catalog.clone();
        let classifier = ctx.classifier.clone();
        let frameworks = ctx.frameworks.clone();
        let sender = if progress { Some(progress_tx) } else { None };

        let handle = tokio::task::spawn_blocking(move || {
            run_cpu_stage(task, &catalog, &classifier, &frameworks, sender)
        });
        match handle.await {
            Ok(outcome) => outcome,
            // A panic in the CPU stage becomes a synthetic Process Error
            // finding so partial results still reach the caller.
            Err(join_error) => process_error_outcome(&join_error.to_string()),
        }
    };

    if let Some(forwarder) = forwarder {
        forwarder.await.ok();
    }

    info!(
        project = job.project_name.as_str(),
        files = outcome.files_scanned,
        findings = outcome.findings.len(),
        excluded = outcome.files_excluded,
        skipped = outcome.skipped_patterns,
        "Scan stage complete"
    );

    Ok(ScanReport {
        status: "completed".to_string(),
        message: "Scanned Successfully".to_string(),
        project_name: job.project_name.clone(),
        repo_url: job.repo_url.clone(),
        commit_id: commit_id.to_string(),
        findings: outcome.findings,
        files_scanned: outcome.files_scanned,
        languages: outcome.languages,
        frameworks: outcome.frameworks,
    })
}

/// The CPU-stage entry point. Takes the explicit wire task, returns the
/// explicit outcome; nothing else crosses the pool boundary.
fn run_cpu_stage(
    task: ScanTask,
    catalog: &RuleCatalog,
    classifier: &Classifier,
    frameworks: &[FrameworkRule],
    progress: Option<tokio::sync::mpsc::UnboundedSender<usize>>,
) -> ScanOutcome {
    let progress_fn = progress.map(|tx| {
        move |files_scanned: usize| {
            let _ = tx.send(files_scanned);
        }
    });
    let progress_ref: Option<&(dyn Fn(usize) + Sync)> =
        progress_fn.as_ref().map(|f| f as &(dyn Fn(usize) + Sync));

    let stats = scan_tree(&task.extracted_path, catalog, progress_ref);
    let findings = classifier.classify(stats.findings);

    let languages = language_histogram(&task.extracted_path);
    let frameworks = detect_frameworks(&task.extracted_path, frameworks);

    ScanOutcome {
        findings,
        files_scanned: stats.files_scanned,
        files_excluded: stats.files_excluded,
        skipped_patterns: stats.skipped_patterns,
        languages,
        frameworks,
    }
}

/// Outcome substituted when the CPU stage dies: one synthetic finding, zero
/// files, job still completes so the caller learns what happened.
fn process_error_outcome(error_text: &str) -> ScanOutcome {
    let mut finding = Finding::sentinel(
        "process_error".to_string(),
        0,
        String::new(),
        String::new(),
        Severity::High,
        "Process Error".to_string(),
    );
    finding.error = Some(error_text.to_string());
    ScanOutcome {
        findings: vec![finding],
        files_scanned: 0,
        files_excluded: 0,
        skipped_patterns: 0,
        languages: Default::default(),
        frameworks: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RefType;

    fn job(name: &str) -> ScanJob {
        ScanJob {
            project_name: name.to_string(),
            repo_url: "https://host/Col/Proj/_git/Repo".to_string(),
            ref_type: RefType::Branch,
            git_ref: "main".to_string(),
            callback_url: "http://127.0.0.1:1/cb".to_string(),
        }
    }

    fn single(name: &str) -> QueueItem {
        QueueItem::Single { job: job(name), commit_id: "a".repeat(40) }
    }

    #[test]
    fn backpressure_rejects_at_twice_max_workers() {
        let queue = JobQueue::new(2);
        for i in 0..4 {
            queue.try_enqueue(single(&format!("p{i}"))).unwrap();
        }
        assert_eq!(queue.depth(), 4);

        let rejected = queue.try_enqueue(single("p4"));
        assert!(matches!(rejected, Err(ScanServerError::Capacity)));
        assert_eq!(queue.depth(), 4);
    }

    #[tokio::test]
    async fn pop_preserves_fifo_order() {
        let queue = JobQueue::new(5);
        for name in ["first", "second", "third"] {
            queue.try_enqueue(single(name)).unwrap();
        }

        for expected in ["first", "second", "third"] {
            match queue.pop().await {
                QueueItem::Single { job, .. } => assert_eq!(job.project_name, expected),
                _ => panic!("expected single item"),
            }
        }
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn pop_wakes_on_enqueue() {
        let queue = JobQueue::new(5);
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.try_enqueue(single("late")).unwrap();

        let item = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .expect("pop should wake")
            .unwrap();
        match item {
            QueueItem::Single { job, .. } => assert_eq!(job.project_name, "late"),
            _ => panic!("expected single item"),
        }
    }

    #[test]
    fn process_error_outcome_is_a_completed_shape() {
        let outcome = process_error_outcome("worker died");
        assert_eq!(outcome.files_scanned, 0);
        assert_eq!(outcome.findings.len(), 1);
        let f = &outcome.findings[0];
        assert_eq!(f.path, "process_error");
        assert_eq!(f.severity, Severity::High);
        assert_eq!(f.rule_type, "Process Error");
        assert_eq!(f.error.as_deref(), Some("worker died"));
    }
}
