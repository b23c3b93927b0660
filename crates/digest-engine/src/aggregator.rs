use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use digest_ai::prompt::format_transcript;
use digest_ai::{Summarizer, SummaryOutcome};
use digest_core::clock::Clock;
use digest_core::config::SummaryConfig;
use digest_core::types::ChatEvent;
use digest_store::MessageStore;

use crate::report::{assemble_report_text, ExecutionReport, RunReport, RunStatus};
use crate::stats::DayStats;
use crate::windows::{cap_newest, filter_window, Window};

/// Per-chat advisory locks: at most one aggregation pass per chat at a
/// time. A second acquisition attempt fails fast instead of queueing.
#[derive(Default)]
struct KeyLocks {
    active: Mutex<HashSet<i64>>,
}

impl KeyLocks {
    fn try_acquire(self: &Arc<Self>, chat_id: i64) -> Option<KeyGuard> {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if active.insert(chat_id) {
            Some(KeyGuard {
                locks: Arc::clone(self),
                chat_id,
            })
        } else {
            None
        }
    }
}

struct KeyGuard {
    locks: Arc<KeyLocks>,
    chat_id: i64,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut active = match self.locks.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(&self.chat_id);
    }
}

/// Pacing and bounding knobs for aggregation passes.
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Newest events kept per window before summarization.
    pub max_events_per_window: usize,
    /// Pause after each summarizer call within one chat.
    pub inter_window_delay: Duration,
    /// Pause between chats in a multi-chat run.
    pub inter_chat_delay: Duration,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            max_events_per_window: 100,
            inter_window_delay: Duration::from_secs(1),
            inter_chat_delay: Duration::from_secs(1),
        }
    }
}

impl AggregatorOptions {
    pub fn from_config(config: &SummaryConfig) -> Self {
        Self {
            max_events_per_window: config.max_events_per_window,
            inter_window_delay: Duration::from_secs(config.inter_window_delay_secs),
            inter_chat_delay: Duration::from_secs(config.inter_chat_delay_secs),
        }
    }
}

/// Orchestrates aggregation passes: load a day of events, split them into
/// time-of-day windows, summarize each window, assemble the report.
///
/// Entry points never return errors. Whatever goes wrong is folded into
/// the returned `ExecutionReport`, so a caller holding several chats can
/// always continue with the next one.
pub struct Aggregator {
    store: Arc<MessageStore>,
    summarizer: Arc<dyn Summarizer>,
    clock: Arc<dyn Clock>,
    windows: Vec<Window>,
    options: AggregatorOptions,
    locks: Arc<KeyLocks>,
}

impl Aggregator {
    pub fn new(
        store: Arc<MessageStore>,
        summarizer: Arc<dyn Summarizer>,
        clock: Arc<dyn Clock>,
        windows: Vec<Window>,
        options: AggregatorOptions,
    ) -> Self {
        Self {
            store,
            summarizer,
            clock,
            windows,
            options,
            locks: Arc::new(KeyLocks::default()),
        }
    }

    /// Run one windowed daily pass for a chat.
    pub async fn run_daily(&self, chat_id: i64, date: NaiveDate) -> ExecutionReport {
        let _guard = match self.locks.try_acquire(chat_id) {
            Some(guard) => guard,
            None => {
                warn!("aggregation already running for chat {}", chat_id);
                return ExecutionReport::failed(
                    chat_id,
                    date,
                    "another aggregation pass is already running for this chat",
                );
            }
        };

        let run_id = Uuid::new_v4();
        let events = self.store.read_day(chat_id, date);
        if events.is_empty() {
            debug!("chat {} has no events for {}", chat_id, date);
            return ExecutionReport::empty(chat_id, date);
        }
        info!(
            "aggregating chat {} for {}: {} event(s), {} window(s)",
            chat_id,
            date,
            events.len(),
            self.windows.len()
        );

        let offset = self.clock.offset();
        let mut sections = Vec::new();
        let mut errors = Vec::new();
        let mut windows_processed = 0;

        for window in &self.windows {
            let selected = filter_window(&events, window, offset);
            if selected.is_empty() {
                debug!("window {} is empty", window.label());
                continue;
            }
            let capped = cap_newest(selected, self.options.max_events_per_window);
            let transcript = format_transcript(&capped, offset);

            match self.summarizer.summarize(&transcript, &window.label()).await {
                Ok(SummaryOutcome::Content(summary)) => {
                    sections.push((window.label(), summary));
                    windows_processed += 1;
                }
                Ok(SummaryOutcome::NoMessages) => {
                    debug!("window {} produced no summary", window.label());
                }
                Err(e) => {
                    warn!(
                        "window {} failed for chat {}: {}",
                        window.label(),
                        chat_id,
                        e
                    );
                    errors.push(format!("{}: {}", window.name, e));
                }
            }
            // Pace consecutive summarizer calls.
            tokio::time::sleep(self.options.inter_window_delay).await;
        }

        let status = if windows_processed > 0 && errors.is_empty() {
            RunStatus::Success
        } else if windows_processed > 0 {
            RunStatus::Partial
        } else if !errors.is_empty() {
            RunStatus::Failed
        } else {
            // Events existed but every window came back empty.
            RunStatus::Empty
        };

        let stats = DayStats::compute(date, &events);
        let report_text = assemble_report_text(&stats, &sections, &errors);
        info!(
            "chat {} digest for {}: {:?}, {} window(s) summarized, {} error(s)",
            chat_id,
            date,
            status,
            windows_processed,
            errors.len()
        );

        ExecutionReport {
            run_id,
            chat_id,
            date,
            status,
            total_events: events.len(),
            windows_processed,
            errors,
            report_text,
        }
    }

    /// Run the daily pass for every chat in `chat_ids`, pacing between
    /// chats. One chat's outcome never affects another's.
    pub async fn run_all(&self, chat_ids: &[i64], date: NaiveDate) -> RunReport {
        let mut run = RunReport::new(self.clock.now(), date);
        if chat_ids.is_empty() {
            warn!("no chats to aggregate");
            run.errors.push("no chats with stored messages".into());
            return run;
        }

        for (i, &chat_id) in chat_ids.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.options.inter_chat_delay).await;
            }
            let report = self.run_daily(chat_id, date).await;
            run.add(report);
        }
        info!("daily run {} finished: {}", run.run_id, run.summary_line());
        run
    }

    /// Summarize the newest `count` events within the trailing `hours` as
    /// one transcript, without window splitting.
    pub async fn run_recent(&self, chat_id: i64, count: usize, hours: i64) -> ExecutionReport {
        let now = self.clock.now();
        let date = now.date_naive();

        let _guard = match self.locks.try_acquire(chat_id) {
            Some(guard) => guard,
            None => {
                warn!("aggregation already running for chat {}", chat_id);
                return ExecutionReport::failed(
                    chat_id,
                    date,
                    "another aggregation pass is already running for this chat",
                );
            }
        };

        let offset = self.clock.offset();
        let cutoff = now - chrono::Duration::hours(hours);
        let latest = self.store.read_latest(chat_id, count);
        let mut recent: Vec<&ChatEvent> = latest
            .iter()
            .filter(|event| {
                event
                    .occurred_at_in(offset)
                    .map(|stamp| stamp >= cutoff)
                    .unwrap_or(false)
            })
            .collect();
        // read_latest returns newest first; transcripts read oldest first.
        recent.reverse();

        if recent.is_empty() {
            debug!("chat {} has no events in the last {}h", chat_id, hours);
            let mut report = ExecutionReport::empty(chat_id, date);
            report.report_text = format!("No messages in the last {hours} hours.");
            return report;
        }

        let transcript = format_transcript(&recent, offset);
        let label = format!("last {hours} hours");
        match self.summarizer.summarize(&transcript, &label).await {
            Ok(SummaryOutcome::Content(summary)) => ExecutionReport {
                run_id: Uuid::new_v4(),
                chat_id,
                date,
                status: RunStatus::Success,
                total_events: recent.len(),
                windows_processed: 1,
                errors: Vec::new(),
                report_text: summary,
            },
            Ok(SummaryOutcome::NoMessages) => {
                let mut report = ExecutionReport::empty(chat_id, date);
                report.total_events = recent.len();
                report.report_text =
                    format!("Nothing worth summarizing in the last {hours} hours.");
                report
            }
            Err(e) => {
                warn!("recent summary failed for chat {}: {}", chat_id, e);
                let mut report = ExecutionReport::failed(chat_id, date, e.to_string());
                report.total_events = recent.len();
                report
            }
        }
    }
}
