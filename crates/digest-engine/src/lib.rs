//! Aggregation engine: time-of-day windows, statistics, report assembly,
//! and delivery of finished digests.

pub mod aggregator;
pub mod job;
pub mod report;
pub mod sink;
pub mod stats;
pub mod windows;

pub use aggregator::{Aggregator, AggregatorOptions};
pub use job::DigestJob;
pub use report::{ExecutionReport, RunReport, RunStatus};
pub use sink::{sink_from_config, ConsoleSink, DeliverySink, SinkError, WebhookSink};
pub use stats::DayStats;
pub use windows::{canonical_windows, windows_from_config, Window};
