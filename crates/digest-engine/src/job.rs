use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use digest_core::clock::Clock;
use digest_core::scheduler::ScheduledJob;
use digest_store::MessageStore;

use crate::aggregator::Aggregator;
use crate::report::RunStatus;
use crate::sink::DeliverySink;

/// The once-a-day pass: digest every chat with stored messages, deliver
/// the finished reports, then prune expired partitions.
pub struct DigestJob {
    store: Arc<MessageStore>,
    aggregator: Arc<Aggregator>,
    sink: Arc<dyn DeliverySink>,
    clock: Arc<dyn Clock>,
    retention_days: u32,
}

impl DigestJob {
    pub fn new(
        store: Arc<MessageStore>,
        aggregator: Arc<Aggregator>,
        sink: Arc<dyn DeliverySink>,
        clock: Arc<dyn Clock>,
        retention_days: u32,
    ) -> Self {
        Self {
            store,
            aggregator,
            sink,
            clock,
            retention_days,
        }
    }
}

#[async_trait]
impl ScheduledJob for DigestJob {
    fn name(&self) -> &str {
        "daily-digest"
    }

    async fn run(&self) -> anyhow::Result<()> {
        // Failing to enumerate chats is the only error that escalates to
        // the scheduler. Everything per-chat is absorbed into the run report.
        let chats = self.store.list_chats()?;
        let date = self.clock.now().date_naive();
        info!(
            "daily digest firing for {} ({} chat(s))",
            date,
            chats.len()
        );

        let run = self.aggregator.run_all(&chats, date).await;

        for report in run.reports.values() {
            if report.status == RunStatus::Empty {
                continue;
            }
            if let Err(e) = self.sink.deliver(report.chat_id, &report.report_text).await {
                warn!("delivery failed for chat {}: {}", report.chat_id, e);
            }
        }

        for &chat_id in &chats {
            match self.store.prune(chat_id, self.retention_days) {
                Ok(0) => {}
                Ok(n) => info!("pruned {} expired partition(s) for chat {}", n, chat_id),
                Err(e) => warn!("prune failed for chat {}: {}", chat_id, e),
            }
        }

        Ok(())
    }
}
