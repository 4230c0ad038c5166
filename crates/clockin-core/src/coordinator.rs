//! Tick coordinator
//!
//! Runs the session processor over every eligible session once per tick.
//! A tick that fires while the previous one is still running is skipped,
//! not queued. Within a tick, sessions are processed concurrently up to a
//! fixed bound.

use chrono::{DateTime, Utc};
use clockin_gateway::NotificationGateway;
use clockin_store::Store;
use clockin_util::{SessionId, TickId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, error, info, info_span};

use crate::{ProcessOutcome, SessionProcessor};

/// Default bound on sessions processed in parallel
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 4;

/// Counters for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick_id: TickId,
    /// The previous tick still held the lock; nothing ran
    pub skipped_tick: bool,
    /// The candidate query failed; nothing ran
    pub aborted: bool,
    pub candidates: usize,
    pub processed: usize,
    /// Candidates already being processed elsewhere
    pub skipped: usize,
    pub prompts_issued: usize,
    pub auto_ended: usize,
    pub lost_races: usize,
    /// Prompts due for users without a channel mapping
    pub no_channel: usize,
    pub failures: usize,
}

impl TickReport {
    fn new(tick_id: TickId) -> Self {
        Self {
            tick_id,
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: &ProcessOutcome) {
        self.processed += 1;
        match outcome {
            ProcessOutcome::PromptIssued { .. } => self.prompts_issued += 1,
            ProcessOutcome::AutoEnded { .. } => self.auto_ended += 1,
            ProcessOutcome::LostRace => self.lost_races += 1,
            ProcessOutcome::NoChannel => self.no_channel += 1,
            _ => {}
        }
    }
}

/// Removes its session from the in-flight set when dropped
struct InFlightGuard {
    set: Arc<Mutex<HashSet<SessionId>>>,
    session_id: SessionId,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<SessionId>>>, session_id: SessionId) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id);

        inserted.then(|| Self {
            set: Arc::clone(set),
            session_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}

/// Drives periodic evaluation of all active sessions
pub struct TickCoordinator {
    store: Arc<dyn Store>,
    processor: Arc<SessionProcessor>,
    tick_lock: tokio::sync::Mutex<()>,
    in_flight: Arc<Mutex<HashSet<SessionId>>>,
    max_concurrent: usize,
}

impl TickCoordinator {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn NotificationGateway>) -> Self {
        let processor = Arc::new(SessionProcessor::new(store.clone(), gateway));
        Self {
            store,
            processor,
            tick_lock: tokio::sync::Mutex::new(()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            max_concurrent: DEFAULT_MAX_CONCURRENT_SESSIONS,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Sessions currently being processed
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run one tick at the current time
    pub async fn run_tick(&self) -> TickReport {
        self.run_tick_at(clockin_util::now()).await
    }

    /// Run one tick with an explicit `now`
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let tick_id = TickId::new();

        let Ok(_lock) = self.tick_lock.try_lock() else {
            debug!(tick_id = %tick_id, "Previous tick still running; skipping");
            return TickReport {
                skipped_tick: true,
                ..TickReport::new(tick_id)
            };
        };

        let span = info_span!("tick", tick_id = %tick_id);
        self.run_locked(TickReport::new(tick_id), now)
            .instrument(span)
            .await
    }

    async fn run_locked(&self, mut report: TickReport, now: DateTime<Utc>) -> TickReport {
        let candidates = match self.store.get_active_sessions_requiring_confirmation() {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Failed to load active sessions; retrying next tick");
                report.aborted = true;
                return report;
            }
        };
        report.candidates = candidates.len();
        self.processor
            .retain_unreachable(&candidates.iter().map(|c| c.session_id).collect());

        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for candidate in candidates {
            let session_id = candidate.session_id;
            let Some(guard) = InFlightGuard::acquire(&self.in_flight, session_id) else {
                debug!(session_id = %session_id, "Session already in flight; skipping");
                report.skipped += 1;
                continue;
            };

            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };

            let processor = Arc::clone(&self.processor);
            tasks.spawn(
                async move {
                    let _permit = permit;
                    let _guard = guard;
                    (session_id, processor.process(&candidate, now).await)
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.record(&outcome),
                Ok((session_id, Err(e))) => {
                    error!(session_id = %session_id, error = %e, "Session processing failed");
                    report.failures += 1;
                }
                Err(e) => {
                    error!(error = %e, "Session task failed");
                    report.failures += 1;
                }
            }
        }

        if report.prompts_issued > 0 || report.auto_ended > 0 || report.failures > 0 {
            info!(
                candidates = report.candidates,
                prompts_issued = report.prompts_issued,
                auto_ended = report.auto_ended,
                no_channel = report.no_channel,
                failures = report.failures,
                "Tick complete"
            );
        } else {
            debug!(
                candidates = report.candidates,
                no_channel = report.no_channel,
                "Tick complete"
            );
        }

        report
    }

    /// Start ticking every `period` on the current runtime. The first tick
    /// fires one period from now.
    pub fn start(self: &Arc<Self>, period: Duration) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let coordinator = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(period_secs = period.as_secs(), "Scheduler started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        coordinator.run_tick().await;
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }

            info!("Scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running scheduler loop
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop. A tick in progress runs to completion first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Scheduler task failed");
        }
    }
}
