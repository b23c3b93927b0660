use chrono::FixedOffset;

use digest_core::types::ChatEvent;

/// System prompt for chat digests.
pub const SUMMARY_SYSTEM_PROMPT: &str = "You are an assistant that writes digests of group chat logs. \
Summarize the main topics of the conversation you are given. For each topic give a short title, \
the rough time range, who drove the discussion, two or three sentences of recap, and one \
representative quote. Order topics from most to least significant and keep the whole digest \
compact. Output only the digest itself, with no preamble.";

/// User message for one summarization call. `label` names the slice being
/// summarized, e.g. "Morning (06:00-12:00)" or "last 24 hours".
pub fn user_prompt(label: &str, transcript: &str) -> String {
    format!("Messages from the {label} period, one per line:\n\n{transcript}")
}

/// Render events one per line as `[HH:MM] participant: text`.
///
/// Events with unparsable stamps keep their text under `participant: text`;
/// events with empty text are dropped.
pub fn format_transcript(events: &[&ChatEvent], offset: FixedOffset) -> String {
    let mut lines = Vec::with_capacity(events.len());
    for event in events {
        if event.text.trim().is_empty() {
            continue;
        }
        match event.occurred_at_in(offset) {
            Some(stamp) => lines.push(format!(
                "[{}] {}: {}",
                stamp.format("%H:%M"),
                event.participant,
                event.text
            )),
            None => lines.push(format!("{}: {}", event.participant, event.text)),
        }
    }
    lines.join("\n")
}
