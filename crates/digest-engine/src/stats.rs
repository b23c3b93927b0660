use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use digest_core::types::ChatEvent;

/// Entries shown in participant rankings.
pub const RANKING_LIMIT: usize = 10;

/// Message counts for one chat-day.
#[derive(Debug, Clone, Serialize)]
pub struct DayStats {
    pub date: NaiveDate,
    pub event_count: usize,
    pub participant_count: usize,
    /// Top participants as (name, count), busiest first.
    pub ranking: Vec<(String, usize)>,
}

impl DayStats {
    pub fn compute(date: NaiveDate, events: &[ChatEvent]) -> Self {
        let full = participant_ranking(events, usize::MAX);
        let participant_count = full.len();
        let mut ranking = full;
        ranking.truncate(RANKING_LIMIT);
        Self {
            date,
            event_count: events.len(),
            participant_count,
            ranking,
        }
    }
}

/// Count messages per participant, busiest first, at most `limit` entries.
/// Ties keep first-seen order.
pub fn participant_ranking(events: &[ChatEvent], limit: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for event in events {
        let participant = event.participant.as_str();
        if !counts.contains_key(participant) {
            order.push(participant);
        }
        *counts.entry(participant).or_insert(0) += 1;
    }

    let mut ranking: Vec<(String, usize)> = order
        .into_iter()
        .map(|participant| (participant.to_string(), counts[participant]))
        .collect();
    // Stable sort keeps first-seen order among equal counts.
    ranking.sort_by(|a, b| b.1.cmp(&a.1));
    ranking.truncate(limit);
    ranking
}
