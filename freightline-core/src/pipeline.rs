//! Pipeline coordinator (C9): the fixed topology of stages spec.md §4.9 describes —
//! `scan-out → {fileStability, archiveStability} → hash → packaging → transport → done` — plus
//! the side retry queue that feeds failed-but-retryable items back to their origin stage.
//!
//! Grounded on `vsi::scan::artifacts`'s `tokio::sync::mpsc` channel + producer/consumer shape,
//! generalized from one producer/one consumer to the full multi-stage topology: the scanner is
//! the only external producer (so it is the only stage fed by a channel), every stage after it is
//! reached by a direct call once the previous stage's work item is in hand, gated by a
//! `tokio::sync::Semaphore` sized from [`crate::config::QueueConfig`]. This keeps worker-count
//! accounting in one place per stage without threading a `JoinSet` through every call site.
//!
//! The coordinator itself is the only thing that calls [`crate::events::EventSink`]'s
//! stage-transition methods — individual stage functions call them on its behalf, but always
//! paired (an `enqueue` is always followed by exactly one of `start_processing`'s continuations),
//! so [`EventSink::snapshot`] is always a faithful view of what spec.md §3 calls `QueueState`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};

use crate::config::PipelineConfig;
use crate::dedup::{CheckResult, Deduplicator, HistoryStore};
use crate::error::ConfigError;
use crate::events::{EventSink, Stage};
use crate::logfile::RunLog;
use crate::model::{Failure, FailureKind, FileRef};
use crate::package::{Package, Packager};
use crate::persist::write_atomic;
use crate::result::{result_file_path, ProcessedFile, ScanResult, TransportRecord};
use crate::retry::{RetryEntry, RetryQueue, RetryTarget};
use crate::rules::RuleSet;
use crate::scanner;
use crate::stability;

/// Run a complete scan-and-transport pipeline: discover matching files under `config.root_dirs`,
/// confirm each is stable, hash and deduplicate it, pack it into a sealed archive, and (if
/// transport is enabled) upload that archive — returning once every matched file has either made
/// it all the way through or terminally failed (spec.md §4.9's completion protocol).
pub async fn scan_and_transport(config: PipelineConfig) -> Result<ScanResult, ConfigError> {
    config.validate()?;
    let start_time = Utc::now();
    let scan_id = generate_scan_id();

    let log = Arc::new(RunLog::open(config.log_file_path.clone()).map_err(|source| ConfigError::LogFileUnusable {
        path: config.log_file_path.clone(),
        source,
    })?);
    log.line(format!("starting run task_id={} scan_id={scan_id}", config.task_id));

    let rules = Arc::new(RuleSet::compile(&config.rules)?);
    let config = Arc::new(config);
    let sink = Arc::new(EventSink::new(config.on_progress.clone(), config.on_failure.clone()));
    let history = Arc::new(HistoryStore::load(config.dedup.history_file_path.clone()).await);
    let dedup = Arc::new(Deduplicator::new(config.dedup.clone()));
    let retry = Arc::new(RetryQueue::new());
    let scratch_root = config.output_dir.join(format!(".scratch-{scan_id}"));

    let packager = Packager::new(
        config.task_id.clone(),
        config.output_dir.clone(),
        config.package_name_pattern.clone(),
        config.packaging_trigger,
        config.emit_manifest,
        sink.clone(),
    );

    const CHANNEL_CAPACITY: usize = 256;
    let (tx_fs, rx_fs) = mpsc::channel::<FileRef>(CHANNEL_CAPACITY);
    let (tx_archive, rx_archive) = mpsc::channel::<FileRef>(CHANNEL_CAPACITY);

    let shared = Arc::new(Shared {
        config: config.clone(),
        scan_id: scan_id.clone(),
        sink: sink.clone(),
        dedup,
        history: history.clone(),
        retry: retry.clone(),
        log: log.clone(),
        packager: AsyncMutex::new(packager),
        collected: AsyncMutex::new(Collected::default()),
        file_sem: Arc::new(Semaphore::new(config.queue.file_stability_concurrency)),
        archive_sem: Arc::new(Semaphore::new(config.queue.archive_stability_concurrency)),
        hash_sem: Arc::new(Semaphore::new(config.queue.hash_concurrency)),
        transport_sem: Arc::new(Semaphore::new(config.transport.concurrency)),
    });

    let fs_task = tokio::spawn(dispatch_file_stability(shared.clone(), rx_fs));
    let archive_task = tokio::spawn(dispatch_archive_stability(shared.clone(), rx_archive));
    let retry_task = tokio::spawn(retry_loop(shared.clone()));

    scanner::scan(config.clone(), rules, sink.clone(), scratch_root.clone(), tx_fs, tx_archive).await;

    // `tx_fs`/`tx_archive` were dropped when `scan` returned, so each dispatch loop's `rx.recv()`
    // terminates on its own once it has pulled every already-buffered file out of the channel and
    // enqueued it (incrementing the stage counters `wait_for_drain` trusts). Joining here, instead
    // of aborting later, is what guarantees no file is still sitting in the channel, invisible to
    // the drain gate, when we ask whether the run is idle.
    let _ = fs_task.await;
    let _ = archive_task.await;

    // Everything already discovered is now either in flight or waiting out a retry delay; let it
    // drain before giving the packager its one chance to flush members still below threshold.
    wait_for_drain(&shared).await;
    let trailing = {
        let mut packager = shared.packager.lock().await;
        packager.seal(&scan_id).await
    };
    match trailing {
        Ok(Some(package)) => dispatch_package(&shared, package).await,
        Ok(None) => {}
        Err(err) => log.line(format!("final packaging error: {err}")),
    }
    wait_for_drain(&shared).await;

    // The gate above already confirmed every stage is idle and the retry queue is empty, so
    // nothing meaningful is in flight; retry_loop just has no natural termination condition of
    // its own (it polls on a timer forever), so it is the one task still worth aborting.
    retry_task.abort();

    let scratch_cleanup = scratch_root.clone();
    let _ = tokio::task::spawn_blocking(move || std::fs::remove_dir_all(&scratch_cleanup)).await;
    let _ = history.flush_if_dirty().await;

    let collected = shared.collected.lock().await;
    let end_time = Utc::now();
    let failed_items = sink.failures();
    let elapsed_time_ms = (end_time - start_time).num_milliseconds().max(0) as u64;
    let mut stage_timings = HashMap::new();
    stage_timings.insert("total".to_owned(), elapsed_time_ms);

    let result_path = result_file_path(&config.results_dir, &config.task_id, &scan_id);
    let result = ScanResult {
        success: failed_items.is_empty(),
        processed_files: collected.processed_files.clone(),
        failed_items,
        package_paths: collected.package_paths.clone(),
        transport_summary: collected.transport_summary.clone(),
        skipped_historical_duplicates: dedup_unique(&collected.historical_duplicates),
        skipped_task_duplicates: dedup_unique(&collected.task_duplicates),
        log_file_path: log.path().to_string_lossy().into_owned(),
        task_id: config.task_id.clone(),
        scan_id: scan_id.clone(),
        result_file_path: result_path.to_string_lossy().into_owned(),
        start_time,
        end_time,
        elapsed_time_ms,
        stage_timings,
    };
    drop(collected);

    let body = result.to_json().expect("result document serializes infallibly");
    if let Err(err) = write_atomic(&result_path, &body).await {
        log.line(format!("failed to write result file: {err}"));
    }

    if config.transport.enabled {
        upload_run_artifacts(&config, &result, &log).await;
    }

    log.line(format!(
        "run finished success={} elapsed_ms={}",
        result.success, result.elapsed_time_ms
    ));
    Ok(result)
}

/// Everything the run accumulates as files and packages resolve, collected under one lock so the
/// final [`ScanResult`] can be assembled from a single snapshot.
#[derive(Default)]
struct Collected {
    processed_files: Vec<ProcessedFile>,
    historical_duplicates: Vec<String>,
    task_duplicates: Vec<String>,
    package_paths: Vec<String>,
    transport_summary: Vec<TransportRecord>,
}

/// State shared by every stage worker for the lifetime of one run.
struct Shared {
    config: Arc<PipelineConfig>,
    scan_id: String,
    sink: Arc<EventSink>,
    dedup: Arc<Deduplicator>,
    history: Arc<HistoryStore>,
    retry: Arc<RetryQueue>,
    log: Arc<RunLog>,
    packager: AsyncMutex<Packager>,
    collected: AsyncMutex<Collected>,
    file_sem: Arc<Semaphore>,
    archive_sem: Arc<Semaphore>,
    hash_sem: Arc<Semaphore>,
    transport_sem: Arc<Semaphore>,
}

/// Block until every stage's `waiting`, `processing`, and `retrying` buckets are empty and the
/// retry queue itself holds nothing (spec.md §4.9's completion gate, minus the packager's
/// trailing-seal step, which the caller performs itself once this returns).
async fn wait_for_drain(shared: &Arc<Shared>) {
    loop {
        let snap = shared.sink.snapshot();
        let idle = [
            snap.file_stability,
            snap.archive_stability,
            snap.hash,
            snap.packaging,
            snap.transport,
        ]
        .iter()
        .all(|s| s.waiting == 0 && s.processing == 0 && s.retrying == 0);

        if idle && shared.retry.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn dispatch_file_stability(shared: Arc<Shared>, mut rx: mpsc::Receiver<FileRef>) {
    while let Some(file) = rx.recv().await {
        shared.sink.enqueue(Stage::FileStability);
        let permit = shared
            .file_sem
            .clone()
            .acquire_owned()
            .await
            .expect("file-stability semaphore is never closed");
        let shared = shared.clone();
        tokio::spawn(async move {
            shared.sink.start_processing(Stage::FileStability);
            run_file_stability(shared.clone(), file, 1).await;
            drop(permit);
        });
    }
}

async fn dispatch_archive_stability(shared: Arc<Shared>, mut rx: mpsc::Receiver<FileRef>) {
    while let Some(file) = rx.recv().await {
        shared.sink.enqueue(Stage::ArchiveStability);
        let permit = shared
            .archive_sem
            .clone()
            .acquire_owned()
            .await
            .expect("archive-stability semaphore is never closed");
        let shared = shared.clone();
        tokio::spawn(async move {
            shared.sink.start_processing(Stage::ArchiveStability);
            run_archive_stability(shared.clone(), file, 1).await;
            drop(permit);
        });
    }
}

async fn run_file_stability(shared: Arc<Shared>, file: FileRef, attempt: usize) {
    let stable = stability::wait_for_stability(file.content_path(), &shared.config.stability).await;
    if stable {
        shared.sink.complete(Stage::FileStability);
        forward_to_hash(&shared, file).await;
    } else {
        fail_or_retry(
            &shared,
            Stage::FileStability,
            FailureKind::Stability,
            file,
            attempt,
            "file did not reach a stable state before the retry budget was exhausted",
        )
        .await;
    }
}

async fn run_archive_stability(shared: Arc<Shared>, file: FileRef, attempt: usize) {
    let stable = stability::wait_for_stability(file.content_path(), &shared.config.stability).await;
    if stable {
        shared.sink.complete(Stage::ArchiveStability);
        forward_to_hash(&shared, file).await;
    } else {
        fail_or_retry(
            &shared,
            Stage::ArchiveStability,
            FailureKind::ArchiveStability,
            file,
            attempt,
            "archive-extracted file did not reach a stable state before the retry budget was exhausted",
        )
        .await;
    }
}

/// Hand a stability-confirmed file to the hash stage, unless digest calculation is disabled
/// (`calculateMd5=false` in spec.md §6), in which case it bypasses C5/C6 entirely.
async fn forward_to_hash(shared: &Arc<Shared>, file: FileRef) {
    if !shared.config.calculate_digest {
        add_to_package(shared, file).await;
        return;
    }

    shared.sink.enqueue(Stage::Hash);
    let permit = shared
        .hash_sem
        .clone()
        .acquire_owned()
        .await
        .expect("hash semaphore is never closed");
    let shared = shared.clone();
    tokio::spawn(async move {
        shared.sink.start_processing(Stage::Hash);
        run_hash(shared.clone(), file, 1).await;
        drop(permit);
    });
}

async fn run_hash(shared: Arc<Shared>, mut file: FileRef, attempt: usize) {
    let path = file.content_path().to_owned();
    let digest = match tokio::task::spawn_blocking(move || freightline_fingerprint::hash(&path)).await {
        Ok(Ok(digest)) => digest,
        Ok(Err(err)) => {
            fail_or_retry(&shared, Stage::Hash, FailureKind::Hash, file, attempt, &err.to_string()).await;
            return;
        }
        Err(join_err) => {
            fail_or_retry(&shared, Stage::Hash, FailureKind::Hash, file, attempt, &join_err.to_string()).await;
            return;
        }
    };

    file.set_digest(digest.as_str().to_owned());
    shared.sink.complete(Stage::Hash);

    match shared.dedup.check_and_claim(digest.as_str(), &shared.history) {
        CheckResult::DuplicateInHistory => {
            shared
                .collected
                .lock()
                .await
                .historical_duplicates
                .push(file.identity_path().to_string_lossy().into_owned());
        }
        CheckResult::DuplicateInTask => {
            shared
                .collected
                .lock()
                .await
                .task_duplicates
                .push(file.identity_path().to_string_lossy().into_owned());
        }
        CheckResult::New => {
            add_to_package(&shared, file).await;
        }
    }
}

/// Add a file to the (single, mutex-serialized) packager, sealing and dispatching a package if
/// this addition crossed a sealing trigger.
async fn add_to_package(shared: &Arc<Shared>, file: FileRef) {
    shared.sink.enqueue(Stage::Packaging);
    shared.sink.start_processing(Stage::Packaging);

    let sealed = {
        let mut packager = shared.packager.lock().await;
        let triggered = packager.add(file);
        if triggered {
            packager.seal(&shared.scan_id).await
        } else {
            Ok(None)
        }
    };
    shared.sink.complete(Stage::Packaging);

    match sealed {
        Ok(Some(package)) => dispatch_package(shared, package).await,
        Ok(None) => {}
        Err(err) => shared.log.line(format!("packaging error: {err}")),
    }
}

async fn dispatch_package(shared: &Arc<Shared>, package: Package) {
    shared
        .collected
        .lock()
        .await
        .package_paths
        .push(package.path.to_string_lossy().into_owned());

    shared.sink.enqueue(Stage::Transport);
    let permit = shared
        .transport_sem
        .clone()
        .acquire_owned()
        .await
        .expect("transport semaphore is never closed");
    let shared = shared.clone();
    tokio::spawn(async move {
        shared.sink.start_processing(Stage::Transport);
        run_transport(shared.clone(), package, 1).await;
        drop(permit);
    });
}

async fn run_transport(shared: Arc<Shared>, package: Package, attempt: usize) {
    if !shared.config.transport.enabled {
        shared.sink.complete(Stage::Transport);
        finalize_package_success(&shared, &package).await;
        return;
    }

    let remote_name = package
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("package.zip")
        .to_owned();

    let mut transport = (shared.config.transport_factory)();
    let mut last_error = None;
    let mut success = false;

    match transport.connect().await {
        Ok(()) => {
            for attempt_no in 1..=shared.config.transport.retry_count {
                let outcome = tokio::time::timeout(
                    Duration::from_millis(shared.config.transport.timeout_ms),
                    transport.upload(&package.path, &remote_name),
                )
                .await;

                let message = match outcome {
                    Ok(Ok(result)) if result.success => {
                        success = true;
                        break;
                    }
                    Ok(Ok(result)) => result.error.unwrap_or_else(|| "upload reported failure".to_owned()),
                    Ok(Err(err)) => err.to_string(),
                    Err(_elapsed) => format!("upload timed out after {} ms", shared.config.transport.timeout_ms),
                };

                shared.log.line(format!(
                    "transport attempt {attempt_no}/{} for {:?} failed: {message}",
                    shared.config.transport.retry_count, package.path
                ));
                shared
                    .sink
                    .failure(Failure::new(FailureKind::Transport, package.path.clone(), None, message.clone(), None));
                last_error = Some(message);
            }
            let _ = transport.disconnect().await;
        }
        Err(err) => {
            let message = err.to_string();
            shared
                .sink
                .failure(Failure::new(FailureKind::Transport, package.path.clone(), None, message.clone(), None));
            last_error = Some(message);
        }
    }

    if success {
        shared.sink.complete(Stage::Transport);
        finalize_package_success(&shared, &package).await;
        return;
    }

    let message = last_error.unwrap_or_else(|| "upload failed".to_owned());
    if attempt < shared.config.queue.max_retries {
        shared.sink.defer_to_retry(Stage::Transport);
        shared.retry.push(RetryEntry {
            target: RetryTarget::Package(package),
            stage: Stage::Transport,
            attempt: attempt + 1,
            not_before: Instant::now() + Duration::from_millis(shared.config.queue.retry_delay_ms),
        });
    } else {
        shared.sink.fail(Stage::Transport);
        let mut collected = shared.collected.lock().await;
        collected.transport_summary.push(TransportRecord {
            package_path: package.path.to_string_lossy().into_owned(),
            success: false,
            member_count: package.member_refs.len(),
            error: Some(message),
        });
    }
}

/// Commit a successfully delivered (or, when transport is disabled, simply assembled) package's
/// members: record their digests in the cross-run history and mark each as processed.
async fn finalize_package_success(shared: &Arc<Shared>, package: &Package) {
    for member in &package.member_refs {
        if let Some(digest) = member.digest() {
            shared.history.insert(digest.to_owned());
        }
    }

    let mut collected = shared.collected.lock().await;
    for member in &package.member_refs {
        collected.processed_files.push(ProcessedFile {
            path: member.identity_path().to_string_lossy().into_owned(),
            digest: member.digest().map(ToOwned::to_owned),
            package_path: package.path.to_string_lossy().into_owned(),
        });
    }
    collected.transport_summary.push(TransportRecord {
        package_path: package.path.to_string_lossy().into_owned(),
        success: true,
        member_count: package.member_refs.len(),
        error: None,
    });
}

/// Record a failure and either push `file` to the retry queue (if it still has retries left per
/// spec.md §4.9/§7) or terminally fail it.
async fn fail_or_retry(
    shared: &Arc<Shared>,
    stage: Stage,
    kind: FailureKind,
    file: FileRef,
    attempt: usize,
    message: &str,
) {
    shared.log.line(format!("{} failed at stage {kind}: {message}", file.identity_path().display()));
    shared.sink.failure(Failure::new(
        kind,
        file.source_path().clone(),
        file.internal_path().map(Path::to_path_buf),
        message.to_owned(),
        Some(file.nesting_level()),
    ));

    if attempt < shared.config.queue.max_retries {
        shared.sink.defer_to_retry(stage);
        shared.retry.push(RetryEntry {
            target: RetryTarget::File(file),
            stage,
            attempt: attempt + 1,
            not_before: Instant::now() + Duration::from_millis(shared.config.queue.retry_delay_ms),
        });
    } else {
        shared.sink.fail(stage);
    }
}

async fn retry_loop(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(Duration::from_millis(shared.config.queue.retry_delay_ms.max(50)));
    loop {
        interval.tick().await;
        for entry in shared.retry.drain_ready() {
            let shared = shared.clone();
            tokio::spawn(async move { resubmit(shared, entry).await });
        }
    }
}

/// Resubmit a retry-queue entry directly to its origin stage's worker function, bypassing the
/// stage's input channel (only the scanner ever produces through a channel; every other handoff
/// in this module is a direct call, so a retry is just another caller).
async fn resubmit(shared: Arc<Shared>, entry: RetryEntry) {
    shared.sink.resume_from_retry(entry.stage);
    match (entry.stage, entry.target) {
        (Stage::FileStability, RetryTarget::File(file)) => {
            let permit = shared.file_sem.clone().acquire_owned().await.expect("semaphore is never closed");
            run_file_stability(shared.clone(), file, entry.attempt).await;
            drop(permit);
        }
        (Stage::ArchiveStability, RetryTarget::File(file)) => {
            let permit = shared.archive_sem.clone().acquire_owned().await.expect("semaphore is never closed");
            run_archive_stability(shared.clone(), file, entry.attempt).await;
            drop(permit);
        }
        (Stage::Hash, RetryTarget::File(file)) => {
            let permit = shared.hash_sem.clone().acquire_owned().await.expect("semaphore is never closed");
            run_hash(shared.clone(), file, entry.attempt).await;
            drop(permit);
        }
        (Stage::Transport, RetryTarget::Package(package)) => {
            let permit = shared.transport_sem.clone().acquire_owned().await.expect("semaphore is never closed");
            run_transport(shared.clone(), package, entry.attempt).await;
            drop(permit);
        }
        (stage, _) => unreachable!("retry target/stage combination never produced by this pipeline: {stage:?}"),
    }
}

/// Best-effort upload of the result document, the persisted dedup history, and the run's log
/// file, once the main package transports have settled (spec.md §4.10: "both are uploaded at
/// end-of-run if transport is enabled, log file is likewise uploaded"). Failures here are not
/// reflected in `result.success`; they are not part of the file-processing taxonomy spec.md §7
/// defines.
async fn upload_run_artifacts(config: &PipelineConfig, result: &ScanResult, log: &RunLog) {
    let mut transport = (config.transport_factory)();
    if transport.connect().await.is_err() {
        return;
    }

    let artifacts = [
        PathBuf::from(&result.result_file_path),
        config.dedup.history_file_path.clone(),
        log.path().to_owned(),
    ];
    for path in artifacts {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            let _ = transport.upload(&path, name).await;
        }
    }
    let _ = transport.disconnect().await;
}

fn generate_scan_id() -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("scan_{suffix:x}")
}

/// Deduplicate while preserving first-seen order (spec.md §4.6: "each path appears at most once").
fn dedup_unique(items: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.iter().filter(|p| seen.insert((*p).clone())).cloned().collect()
}
