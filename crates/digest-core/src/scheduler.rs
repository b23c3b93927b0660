use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;

/// Work fired by the scheduler once per day at the target time.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Run one scheduled pass. Errors feed the consecutive-failure backoff;
    /// the job itself is expected to absorb per-item failures.
    async fn run(&self) -> anyhow::Result<()>;
}

/// Timing knobs for the scheduler loop. Defaults match production behavior;
/// tests compress them to keep runtimes in milliseconds.
#[derive(Debug, Clone)]
pub struct SchedulerTuning {
    /// Longest single sleep while far from the target. Bounds how stale one
    /// remaining-time computation can get and how long stop can take.
    pub max_sleep_chunk: Duration,
    /// Remaining seconds at or below which the loop sleeps the exact
    /// remainder and then fires.
    pub fire_threshold_secs: i64,
    /// Wait after a successful fire before recomputing the next target, so
    /// one calendar occurrence fires at most once.
    pub post_fire_cooldown: Duration,
    /// Sleep after a failed iteration.
    pub error_backoff: Duration,
    /// Consecutive failures after which the loop gives up.
    pub max_consecutive_errors: u32,
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        Self {
            max_sleep_chunk: Duration::from_secs(3600),
            fire_threshold_secs: 60,
            post_fire_cooldown: Duration::from_secs(60),
            error_backoff: Duration::from_secs(300),
            max_consecutive_errors: 5,
        }
    }
}

/// Errors surfaced by the scheduler loop.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler gave up after {consecutive} consecutive failing iterations")]
    Fatal { consecutive: u32 },
}

/// Observable scheduler state.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    pub running: bool,
    pub target: NaiveTime,
    pub last_fire_at: Option<DateTime<FixedOffset>>,
}

/// Drift-resistant daily scheduler.
///
/// Instead of sleeping a precomputed duration until the target, the loop
/// recomputes the remaining time on every iteration and sleeps in bounded
/// chunks. Clock adjustments and long-running fires therefore cannot
/// accumulate drift, and a stop request takes effect within one chunk.
pub struct DailyScheduler {
    clock: Arc<dyn Clock>,
    target: NaiveTime,
    tuning: SchedulerTuning,
}

impl DailyScheduler {
    pub fn new(clock: Arc<dyn Clock>, target: NaiveTime) -> Self {
        Self {
            clock,
            target,
            tuning: SchedulerTuning::default(),
        }
    }

    pub fn with_tuning(mut self, tuning: SchedulerTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Whole seconds until the next occurrence of the target time of day.
    pub fn seconds_until_target(&self) -> i64 {
        seconds_until_target(self.clock.as_ref(), self.target)
    }

    /// Spawn the scheduler loop, firing `job` at each daily target.
    ///
    /// The returned handle stops the loop cooperatively; dropping it closes
    /// the stop channel, which also stops the loop at its next wait point.
    pub fn start(self, job: Arc<dyn ScheduledJob>) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(ScheduleState {
            running: true,
            target: self.target,
            last_fire_at: None,
        }));
        let task = tokio::spawn(run_loop(
            self.clock,
            self.target,
            self.tuning,
            job,
            stop_rx,
            Arc::clone(&state),
        ));
        SchedulerHandle {
            stop_tx,
            task,
            state,
        }
    }
}

/// Whole seconds from `clock.now()` to the next occurrence of `target`.
///
/// If the target already passed today (or is exactly now), the next
/// occurrence is tomorrow. Sub-second remainders truncate toward zero.
pub fn seconds_until_target(clock: &dyn Clock, target: NaiveTime) -> i64 {
    let now = clock.now().naive_local();
    let mut next = now.date().and_time(target);
    if now >= next {
        next += chrono::Duration::days(1);
    }
    (next - now).num_seconds()
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Result<(), SchedulerError>>,
    state: Arc<Mutex<ScheduleState>>,
}

impl SchedulerHandle {
    /// Current state snapshot (for testing/observability).
    pub fn state(&self) -> ScheduleState {
        match self.state.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Ask the loop to stop without waiting for it.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Wait for the loop task to exit on its own.
    pub async fn wait(&mut self) -> Result<(), SchedulerError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => {
                error!("scheduler task panicked: {}", e);
                Ok(())
            }
        }
    }

    /// Cooperative stop: signal, then join with a bounded timeout.
    ///
    /// An in-flight fire is never interrupted; if it outlasts `timeout` the
    /// loop is left to finish in the background and a warning is logged.
    pub async fn stop(mut self, timeout: Duration) -> Result<(), SchedulerError> {
        self.signal_stop();
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("scheduler task panicked: {}", e);
                Ok(())
            }
            Err(_) => {
                warn!("scheduler did not stop within {:?}", timeout);
                Ok(())
            }
        }
    }
}

async fn run_loop(
    clock: Arc<dyn Clock>,
    target: NaiveTime,
    tuning: SchedulerTuning,
    job: Arc<dyn ScheduledJob>,
    mut stop_rx: watch::Receiver<bool>,
    state: Arc<Mutex<ScheduleState>>,
) -> Result<(), SchedulerError> {
    info!(
        "daily scheduler started, target {}",
        target.format("%H:%M")
    );
    let mut consecutive_errors: u32 = 0;

    let result = loop {
        if *stop_rx.borrow() {
            break Ok(());
        }

        let remaining = seconds_until_target(clock.as_ref(), target);
        debug!("next fire in {}s", remaining);

        if remaining > tuning.fire_threshold_secs {
            // Far out: sleep a bounded chunk, then recompute from scratch.
            let chunk = remaining.min(tuning.max_sleep_chunk.as_secs() as i64).max(1);
            if wait_or_stop(&mut stop_rx, Duration::from_secs(chunk as u64)).await {
                break Ok(());
            }
            continue;
        }

        // Close to the target: sleep the exact remainder, then fire once.
        if remaining > 0 {
            if wait_or_stop(&mut stop_rx, Duration::from_secs(remaining as u64)).await {
                break Ok(());
            }
        }

        match job.run().await {
            Ok(()) => {
                consecutive_errors = 0;
                let fired_at = clock.now();
                update_state(&state, |s| s.last_fire_at = Some(fired_at));
                info!("scheduled job '{}' completed", job.name());
                if wait_or_stop(&mut stop_rx, tuning.post_fire_cooldown).await {
                    break Ok(());
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    "scheduled job '{}' failed ({}/{}): {:#}",
                    job.name(),
                    consecutive_errors,
                    tuning.max_consecutive_errors,
                    e
                );
                if consecutive_errors >= tuning.max_consecutive_errors {
                    error!(
                        "scheduler giving up after {} consecutive failures",
                        consecutive_errors
                    );
                    break Err(SchedulerError::Fatal {
                        consecutive: consecutive_errors,
                    });
                }
                if wait_or_stop(&mut stop_rx, tuning.error_backoff).await {
                    break Ok(());
                }
            }
        }
    };

    update_state(&state, |s| {
        s.running = false;
        s.last_fire_at = None;
    });
    info!("daily scheduler stopped");
    result
}

/// Sleep for `duration` unless the stop signal lands first. Returns true
/// when the loop should exit. A closed channel counts as a stop request.
async fn wait_or_stop(stop_rx: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *stop_rx.borrow(),
        changed = stop_rx.changed() => match changed {
            Ok(()) => *stop_rx.borrow(),
            Err(_) => true,
        },
    }
}

fn update_state(state: &Arc<Mutex<ScheduleState>>, apply: impl FnOnce(&mut ScheduleState)) {
    let mut guard = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    apply(&mut guard);
}
