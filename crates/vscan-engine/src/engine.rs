//! The scan coordinator and its worker pool.
//!
//! One coordinator runs on the invoking task and is the only mutator of
//! the cache and stats. Workers each own a resolver client and share
//! nothing but the job queue, the event channel, and the cancellation
//! flag. Successful verdicts are committed to the cache as they arrive,
//! before the corresponding progress event, so cancellation can never
//! lose an already-received result.

use crate::progress::{ProgressEvent, ProgressPort};
use crate::stats::{ScanStats, ScanStatsSnapshot};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use vscan_cache::VerdictCache;
use vscan_config::{ScanConfig, ScanFilters};
use vscan_resolver::clock::Clock;
use vscan_resolver::{RetryObserver, VerdictResolver};
use vscan_utils::cancel::CancelFlag;
use vscan_utils::types::{ExtensionRef, ExtensionVerdict, RiskLevel, SourceStatus, ids_equal};

/// Exit code for a clean scan with no findings.
pub const EXIT_CLEAN: i32 = 0;
/// Exit code for a completed scan with vulnerabilities or high-risk
/// findings.
pub const EXIT_FINDINGS: i32 = 1;
/// Exit code when the scan itself could not complete.
pub const EXIT_SCAN_FAILED: i32 = 2;

/// Engine construction errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("expected one resolver per worker: workers={workers}, resolvers={resolvers}")]
    ResolverCountMismatch { workers: usize, resolvers: usize },
}

/// Everything a presentation surface needs after a scan.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Verdicts in arrival order, post-filtered by `min_risk_level`.
    pub verdicts: Vec<ExtensionVerdict>,
    pub stats: ScanStatsSnapshot,
    pub cancelled: bool,
    /// 0/1 as defined by the findings policy; the CLI maps scan-fatal
    /// errors to 2 before the engine ever runs.
    pub exit_code: i32,
}

enum WorkerEvent {
    Retry {
        extension_id: String,
        attempt: u32,
        delay: std::time::Duration,
    },
    Resolved {
        verdict: ExtensionVerdict,
    },
}

struct ChannelRetryObserver {
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl RetryObserver for ChannelRetryObserver {
    fn on_retry(&self, extension_id: &str, attempt: u32, delay: std::time::Duration) {
        let _ = self.events.send(WorkerEvent::Retry {
            extension_id: extension_id.to_string(),
            attempt,
            delay,
        });
    }
}

/// Orchestrates discovery output through cache and resolvers into a
/// verdict stream. Owns the worker pool, the cache handle, and the stats.
pub struct ScanEngine {
    config: ScanConfig,
    cache: Box<dyn VerdictCache>,
    resolvers: Vec<Arc<dyn VerdictResolver>>,
    progress: Arc<dyn ProgressPort>,
    clock: Arc<dyn Clock>,
    cancel: CancelFlag,
    stats: ScanStats,
}

impl ScanEngine {
    /// # Errors
    ///
    /// Requires exactly one resolver per configured worker, since each
    /// worker owns its client (and with it the per-client request
    /// pacing).
    pub fn new(
        config: ScanConfig,
        cache: Box<dyn VerdictCache>,
        resolvers: Vec<Arc<dyn VerdictResolver>>,
        progress: Arc<dyn ProgressPort>,
        clock: Arc<dyn Clock>,
        cancel: CancelFlag,
    ) -> Result<Self, EngineError> {
        if resolvers.len() != config.workers() {
            return Err(EngineError::ResolverCountMismatch {
                workers: config.workers(),
                resolvers: resolvers.len(),
            });
        }
        Ok(Self {
            config,
            cache,
            resolvers,
            progress,
            clock,
            cancel,
            stats: ScanStats::new(),
        })
    }

    /// Run the scan over already-discovered extensions.
    pub async fn run(mut self, extensions: Vec<ExtensionRef>) -> ScanOutcome {
        self.stats.reset();
        self.stats.start(self.clock.now());

        let selected: Vec<ExtensionRef> = extensions
            .into_iter()
            .filter(|ext| pre_filter(self.config.filters(), ext))
            .collect();
        self.stats.add_discovered(selected.len() as u64);
        self.progress.emit(ProgressEvent::ScanStarted {
            total: selected.len(),
        });

        // Cache pass on the coordinator, before any dispatch.
        let mut verdicts: Vec<ExtensionVerdict> = Vec::new();
        let mut pending: Vec<ExtensionRef> = Vec::new();
        let max_age = self.config.cache_max_age();
        for ext in selected {
            if self.cancel.is_cancelled() {
                break;
            }
            let extension_id = ext.id();
            self.progress.emit(ProgressEvent::ExtensionStarted {
                extension_id: extension_id.clone(),
            });
            if self.config.use_cache()
                && !self.config.refresh_cache()
                && let Some(hit) =
                    self.cache
                        .lookup(&extension_id, &ext.version, self.clock.now(), max_age)
            {
                self.stats.record_cache_hit();
                self.progress.emit(ProgressEvent::CacheHit {
                    extension_id,
                    risk_level: hit.risk_level,
                });
                verdicts.push(hit);
                continue;
            }
            pending.push(ext);
        }

        if !pending.is_empty() && !self.cancel.is_cancelled() {
            self.dispatch(pending, &mut verdicts).await;
        }

        self.stats.finish(self.clock.now());
        let stats = self.stats.snapshot();
        debug_assert!(stats.is_consistent());
        self.progress.emit(ProgressEvent::ScanCompleted {
            stats: stats.clone(),
        });

        let exit_code = compute_exit_code(&verdicts, self.config.risk_exit_threshold());
        let verdicts = match self.config.filters().min_risk_level {
            Some(min) => verdicts.into_iter().filter(|v| v.risk_level >= min).collect(),
            None => verdicts,
        };

        ScanOutcome {
            verdicts,
            stats,
            cancelled: self.cancel.is_cancelled(),
            exit_code,
        }
    }

    /// Fan pending extensions out to the worker pool and drain results,
    /// committing each success to the cache as it arrives.
    async fn dispatch(
        &mut self,
        pending: Vec<ExtensionRef>,
        verdicts: &mut Vec<ExtensionVerdict>,
    ) {
        let (job_tx, job_rx) = mpsc::channel::<ExtensionRef>(pending.len());
        for ext in pending {
            // Queue is sized to fit every job up front.
            job_tx.try_send(ext).expect("job queue sized for all jobs");
        }
        drop(job_tx);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        // Total message volume is bounded by jobs * (max_retries + 1), so
        // the unbounded sender only exists to let the sync retry observer
        // publish without an executor handle.
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let mut handles = Vec::with_capacity(self.resolvers.len());
        for (worker_id, resolver) in self.resolvers.iter().cloned().enumerate() {
            let jobs = Arc::clone(&job_rx);
            let events = event_tx.clone();
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(worker_loop(
                worker_id, resolver, jobs, events, cancel,
            )));
        }
        drop(event_tx);

        // The channel closes when the last worker exits; on cancellation
        // this still drains results that finished in flight.
        while let Some(event) = event_rx.recv().await {
            match event {
                WorkerEvent::Retry {
                    extension_id,
                    attempt,
                    delay,
                } => {
                    self.stats.record_retry();
                    self.progress.emit(ProgressEvent::Retry {
                        extension_id,
                        attempt,
                        delay,
                    });
                }
                WorkerEvent::Resolved { verdict } => {
                    self.handle_resolved(verdict, verdicts);
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    fn handle_resolved(
        &mut self,
        verdict: ExtensionVerdict,
        verdicts: &mut Vec<ExtensionVerdict>,
    ) {
        match verdict.source_status {
            SourceStatus::Success => {
                self.stats.record_fresh_success();
                // Commit before emitting so a cancellation arriving now
                // cannot lose this verdict.
                if let Err(e) = self.cache.store(&verdict, self.clock.now()) {
                    warn!(
                        extension_id = %verdict.extension_id,
                        error = %e,
                        "failed to cache verdict; continuing"
                    );
                }
                self.progress.emit(ProgressEvent::FreshResult {
                    extension_id: verdict.extension_id.clone(),
                    risk_level: verdict.risk_level,
                    vuln_total: verdict.vuln_counts.total,
                });
            }
            SourceStatus::NotFound => {
                self.stats.record_fresh_not_found();
                self.progress.emit(ProgressEvent::ExtensionFailed {
                    extension_id: verdict.extension_id.clone(),
                    message: "not known to the analyzer".to_string(),
                });
            }
            SourceStatus::Error => {
                self.stats.record_fresh_failure();
                self.progress.emit(ProgressEvent::ExtensionFailed {
                    extension_id: verdict.extension_id.clone(),
                    message: verdict.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                });
            }
        }
        verdicts.push(verdict);
    }
}

async fn worker_loop(
    worker_id: usize,
    resolver: Arc<dyn VerdictResolver>,
    jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<ExtensionRef>>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    cancel: CancelFlag,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        // The queue was fully loaded before workers started and the
        // sender dropped, so recv() never blocks on a producer.
        let job = { jobs.lock().await.recv().await };
        let Some(ext) = job else { break };
        if cancel.is_cancelled() {
            break;
        }

        let observer = ChannelRetryObserver {
            events: events.clone(),
        };
        match resolver.resolve(&ext, &cancel, &observer).await {
            Some(verdict) => {
                let _ = events.send(WorkerEvent::Resolved { verdict });
            }
            // Cancelled mid-resolution; nothing to publish.
            None => break,
        }
    }
    info!(worker_id, "worker exited");
}

/// Pre-scan filters: include/exclude/publisher, AND semantics. The
/// min-risk filter applies after verdict acquisition instead.
fn pre_filter(filters: &ScanFilters, ext: &ExtensionRef) -> bool {
    let id = ext.id();
    if !filters.include_ids.is_empty()
        && !filters.include_ids.iter().any(|inc| ids_equal(inc, &id))
    {
        return false;
    }
    if filters.exclude_ids.iter().any(|exc| ids_equal(exc, &id)) {
        return false;
    }
    if let Some(publisher) = &filters.publisher
        && !publisher.eq_ignore_ascii_case(&ext.publisher)
    {
        return false;
    }
    true
}

/// Findings policy: a completed scan exits 1 when any successful verdict
/// reports vulnerabilities or reaches the risk threshold, else 0.
#[must_use]
pub fn compute_exit_code(verdicts: &[ExtensionVerdict], threshold: RiskLevel) -> i32 {
    let findings = verdicts
        .iter()
        .filter(|v| v.is_success())
        .any(|v| v.vuln_counts.total > 0 || v.risk_level >= threshold);
    if findings { EXIT_FINDINGS } else { EXIT_CLEAN }
}
