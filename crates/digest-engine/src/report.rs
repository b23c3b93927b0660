use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stats::DayStats;

/// At most this many error lines are carried into a report body.
pub const MAX_REPORTED_ERRORS: usize = 5;

/// Outcome classification for one aggregation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every window that had content summarized cleanly.
    Success,
    /// Some windows summarized, at least one failed.
    Partial,
    /// Nothing summarized and at least one window failed.
    Failed,
    /// Nothing to summarize.
    Empty,
}

/// The always-present result of one aggregation pass for one chat.
///
/// A pass never "throws": whatever happened, callers get one of these with
/// the failure detail folded into `status` and `errors`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub chat_id: i64,
    pub date: NaiveDate,
    pub status: RunStatus,
    pub total_events: usize,
    pub windows_processed: usize,
    pub errors: Vec<String>,
    pub report_text: String,
}

impl ExecutionReport {
    /// Report for a day with no stored events.
    pub fn empty(chat_id: i64, date: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            chat_id,
            date,
            status: RunStatus::Empty,
            total_events: 0,
            windows_processed: 0,
            errors: Vec::new(),
            report_text: format!("No messages were recorded for {date}."),
        }
    }

    /// Report for a pass that could not run at all.
    pub fn failed(chat_id: i64, date: NaiveDate, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            run_id: Uuid::new_v4(),
            chat_id,
            date,
            status: RunStatus::Failed,
            total_events: 0,
            windows_processed: 0,
            report_text: format!("Digest for {date} could not be generated: {error}"),
            errors: vec![error],
        }
    }
}

/// Assemble the report body: header, participant ranking, window sections
/// in order, then a bounded list of problems.
pub fn assemble_report_text(
    stats: &DayStats,
    sections: &[(String, String)],
    errors: &[String],
) -> String {
    let mut text = String::new();
    text.push_str(&format!("# Daily digest ({})\n\n", stats.date));
    text.push_str(&format!(
        "{} messages from {} participants\n",
        stats.event_count, stats.participant_count
    ));

    if !stats.ranking.is_empty() {
        text.push_str("\n## Most active\n\n");
        for (i, (participant, count)) in stats.ranking.iter().enumerate() {
            text.push_str(&format!("{}. {}: {} messages\n", i + 1, participant, count));
        }
    }

    for (label, summary) in sections {
        text.push_str(&format!("\n## {}\n\n{}\n", label, summary));
    }

    if !errors.is_empty() {
        text.push_str("\n## Problems\n\n");
        for error in errors.iter().take(MAX_REPORTED_ERRORS) {
            text.push_str(&format!("- {}\n", error));
        }
        if errors.len() > MAX_REPORTED_ERRORS {
            text.push_str(&format!(
                "- and {} more\n",
                errors.len() - MAX_REPORTED_ERRORS
            ));
        }
    }

    text
}

/// Rollup of one multi-chat run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<FixedOffset>,
    pub date: NaiveDate,
    pub reports: BTreeMap<i64, ExecutionReport>,
    pub successful: usize,
    pub partial: usize,
    pub failed: usize,
    pub empty: usize,
    /// Run-level problems, e.g. an empty chat list.
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn new(started_at: DateTime<FixedOffset>, date: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            date,
            reports: BTreeMap::new(),
            successful: 0,
            partial: 0,
            failed: 0,
            empty: 0,
            errors: Vec::new(),
        }
    }

    /// Fold one chat's report into the rollup.
    pub fn add(&mut self, report: ExecutionReport) {
        match report.status {
            RunStatus::Success => self.successful += 1,
            RunStatus::Partial => self.partial += 1,
            RunStatus::Failed => self.failed += 1,
            RunStatus::Empty => self.empty += 1,
        }
        self.reports.insert(report.chat_id, report);
    }

    pub fn total(&self) -> usize {
        self.reports.len()
    }

    /// Fraction of chats that summarized cleanly. Zero when nothing ran.
    pub fn success_ratio(&self) -> f64 {
        if self.reports.is_empty() {
            0.0
        } else {
            self.successful as f64 / self.reports.len() as f64
        }
    }

    /// One-line rollup for logs.
    pub fn summary_line(&self) -> String {
        format!(
            "{} chat(s): {} success, {} partial, {} failed, {} empty",
            self.total(),
            self.successful,
            self.partial,
            self.failed,
            self.empty
        )
    }
}

/// Split `text` into chunks of at most `max_chars` characters. Counting is
/// by character, not byte, so multi-byte text never splits mid-character.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
