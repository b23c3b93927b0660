use chrono::{DateTime, FixedOffset, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// One chat message as stored in a day partition.
///
/// `occurred_at` holds the raw RFC 3339 string written at append time.
/// Parsing back to a typed timestamp happens per event at read time, so a
/// single malformed stamp can never poison a whole partition. Under one
/// fixed offset the strings sort chronologically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub chat_id: i64,
    pub participant: String,
    pub text: String,
    pub occurred_at: String,
}

impl ChatEvent {
    /// Create an event stamped with the clock's current local time.
    pub fn new(
        chat_id: i64,
        participant: impl Into<String>,
        text: impl Into<String>,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            chat_id,
            participant: participant.into(),
            text: text.into(),
            occurred_at: clock.now().to_rfc3339(),
        }
    }

    /// Parse the stored timestamp, converting into `offset` when the stamp
    /// carries a different one. Stamps without an offset are taken as wall
    /// time in `offset`. Returns `None` for unparsable stamps.
    pub fn occurred_at_in(&self, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
        let raw = self.occurred_at.trim();
        if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
            return Some(stamp.with_timezone(&offset));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .and_then(|naive| naive.and_local_timezone(offset).single())
    }

    /// Time of day of the event under `offset`, if the stamp parses.
    pub fn time_of_day(&self, offset: FixedOffset) -> Option<NaiveTime> {
        self.occurred_at_in(offset).map(|stamp| stamp.time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn offset_hours(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    #[test]
    fn test_new_stamps_from_clock() {
        let instant = DateTime::parse_from_rfc3339("2024-06-01T08:30:00+08:00").unwrap();
        let clock = FixedClock::at(instant);
        let event = ChatEvent::new(42, "alice", "hello", &clock);

        assert_eq!(event.chat_id, 42);
        assert_eq!(event.occurred_at, instant.to_rfc3339());
        assert_eq!(event.occurred_at_in(offset_hours(8)), Some(instant));
    }

    #[test]
    fn test_partition_record_field_names() {
        let instant = DateTime::parse_from_rfc3339("2024-06-01T08:30:00+08:00").unwrap();
        let event = ChatEvent::new(1, "bob", "hi", &FixedClock::at(instant));
        let value = serde_json::to_value(&event).unwrap();

        for field in ["chat_id", "participant", "text", "occurred_at"] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
    }

    #[test]
    fn test_foreign_offset_converts_to_requested_one() {
        let event = ChatEvent {
            chat_id: 1,
            participant: "alice".into(),
            text: "hi".into(),
            occurred_at: "2024-06-01T00:30:00Z".into(),
        };
        let local = event.occurred_at_in(offset_hours(8)).unwrap();
        assert_eq!(local.to_rfc3339(), "2024-06-01T08:30:00+08:00");
        assert_eq!(event.time_of_day(offset_hours(8)).unwrap(), NaiveTime::from_hms_opt(8, 30, 0).unwrap());
    }

    #[test]
    fn test_naive_stamp_is_wall_time_in_offset() {
        let event = ChatEvent {
            chat_id: 1,
            participant: "alice".into(),
            text: "hi".into(),
            occurred_at: "2024-06-01T14:05:09".into(),
        };
        let local = event.occurred_at_in(offset_hours(8)).unwrap();
        assert_eq!(local.to_rfc3339(), "2024-06-01T14:05:09+08:00");
    }

    #[test]
    fn test_garbage_stamp_is_none() {
        let event = ChatEvent {
            chat_id: 1,
            participant: "alice".into(),
            text: "hi".into(),
            occurred_at: "not a timestamp".into(),
        };
        assert_eq!(event.occurred_at_in(offset_hours(0)), None);
        assert_eq!(event.time_of_day(offset_hours(0)), None);
    }
}
