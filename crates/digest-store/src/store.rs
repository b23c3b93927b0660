use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use thiserror::Error;
use tracing::{debug, warn};

use digest_core::clock::Clock;
use digest_core::types::ChatEvent;

/// How many days back `read_latest` will scan.
const LATEST_LOOKBACK_DAYS: i64 = 30;

/// Errors from the message store.
///
/// Reads are deliberately tolerant: missing and corrupt partitions are
/// reported as empty rather than as errors, so one bad file can never take
/// a whole aggregation pass down. Writes and directory listings fail loudly.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt partition {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode partition: {0}")]
    Encode(serde_json::Error),
}

/// Append-only message store laid out as `<data_dir>/<chat_id>/<YYYY-MM-DD>.json`,
/// each file a JSON array of events in append order.
///
/// Appends rewrite the whole day file. Partitions hold one chat-day of
/// messages, so the rewrite stays cheap and the files stay greppable.
pub struct MessageStore {
    data_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl MessageStore {
    /// Create a store rooted at `data_dir`, creating the directory if needed.
    pub fn new(data_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir, clock })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn chat_dir(&self, chat_id: i64) -> PathBuf {
        self.data_dir.join(chat_id.to_string())
    }

    fn day_path(&self, chat_id: i64, day: NaiveDate) -> PathBuf {
        self.chat_dir(chat_id)
            .join(format!("{}.json", day.format("%Y-%m-%d")))
    }

    /// Append one event to today's partition, stamped from the clock.
    /// Returns the stored event.
    ///
    /// If today's partition is corrupt it is replaced; the unreadable
    /// contents were already lost to every reader.
    pub fn append(
        &self,
        chat_id: i64,
        participant: &str,
        text: &str,
    ) -> Result<ChatEvent, StoreError> {
        let event = ChatEvent::new(chat_id, participant, text, self.clock.as_ref());
        let day = self.clock.now().date_naive();
        let mut events = self.read_day(chat_id, day);
        events.push(event.clone());

        fs::create_dir_all(self.chat_dir(chat_id))?;
        let contents = serde_json::to_string_pretty(&events).map_err(StoreError::Encode)?;
        fs::write(self.day_path(chat_id, day), contents)?;
        debug!(
            "appended event to chat {} ({} in partition)",
            chat_id,
            events.len()
        );
        Ok(event)
    }

    /// All events for one chat-day, sorted by timestamp.
    ///
    /// Missing, unreadable, and corrupt partitions all read as empty.
    pub fn read_day(&self, chat_id: i64, day: NaiveDate) -> Vec<ChatEvent> {
        match self.read_day_strict(chat_id, day) {
            Ok(events) => events,
            Err(e) => {
                warn!("treating partition as empty: {}", e);
                Vec::new()
            }
        }
    }

    fn read_day_strict(&self, chat_id: i64, day: NaiveDate) -> Result<Vec<ChatEvent>, StoreError> {
        let path = self.day_path(chat_id, day);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path)?;
        let mut events: Vec<ChatEvent> = serde_json::from_str(&contents)
            .map_err(|source| StoreError::Corrupt { path, source })?;
        // RFC 3339 strings under one fixed offset sort chronologically.
        events.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        Ok(events)
    }

    /// The newest `count` events across the last 30 days, newest first.
    /// Callers re-order as needed.
    pub fn read_latest(&self, chat_id: i64, count: usize) -> Vec<ChatEvent> {
        let today = self.clock.now().date_naive();
        let mut events = Vec::new();
        for back in 0..LATEST_LOOKBACK_DAYS {
            events.extend(self.read_day(chat_id, today - Duration::days(back)));
            if events.len() >= count {
                break;
            }
        }
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        events.truncate(count);
        events
    }

    /// Count events recorded within the trailing `hours`, scanning only the
    /// partitions the range can overlap. Unparsable stamps don't count.
    pub fn count_since(&self, chat_id: i64, hours: i64) -> usize {
        let now = self.clock.now();
        let cutoff = now - Duration::hours(hours);
        let offset = self.clock.offset();
        let today = now.date_naive();
        let days_to_scan = hours / 24 + 1;

        let mut count = 0;
        for back in 0..=days_to_scan {
            for event in self.read_day(chat_id, today - Duration::days(back)) {
                if let Some(stamp) = event.occurred_at_in(offset) {
                    if stamp >= cutoff {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    /// Chats that have stored data: directory names that parse as i64,
    /// sorted. Junk entries are ignored.
    pub fn list_chats(&self) -> Result<Vec<i64>, StoreError> {
        let mut chats = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i64>().ok())
            {
                chats.push(id);
            }
        }
        chats.sort_unstable();
        Ok(chats)
    }

    /// Delete partitions strictly older than `retention_days`. Returns how
    /// many files were removed.
    ///
    /// Files that are not day partitions are left alone; files that fail to
    /// delete are logged and skipped.
    pub fn prune(&self, chat_id: i64, retention_days: u32) -> Result<usize, StoreError> {
        let dir = self.chat_dir(chat_id);
        if !dir.exists() {
            return Ok(0);
        }
        let cutoff = self.clock.now().date_naive() - Duration::days(retention_days as i64);

        let mut removed = 0;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let day = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok());
            let day = match day {
                Some(day) => day,
                None => continue,
            };
            if day < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("failed to delete {}: {}", path.display(), e),
                }
            }
        }
        if removed > 0 {
            debug!("pruned {} partition(s) for chat {}", removed, chat_id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use digest_core::clock::FixedClock;
    use serde_json::json;

    fn store_at(dir: &Path, rfc3339: &str) -> MessageStore {
        let clock = Arc::new(FixedClock::at(
            DateTime::parse_from_rfc3339(rfc3339).unwrap(),
        ));
        MessageStore::new(dir, clock).unwrap()
    }

    fn write_partition(dir: &Path, chat_id: i64, day: &str, contents: &str) {
        let chat_dir = dir.join(chat_id.to_string());
        fs::create_dir_all(&chat_dir).unwrap();
        fs::write(chat_dir.join(format!("{day}.json")), contents).unwrap();
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_append_then_read_day() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_at(tmp.path(), "2024-06-01T08:30:00+08:00");

        store.append(7, "alice", "first").unwrap();
        store.append(7, "bob", "second").unwrap();

        let events = store.read_day(7, day("2024-06-01"));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].participant, "alice");
        assert_eq!(events[1].text, "second");
        assert!(events.iter().all(|e| !e.occurred_at.is_empty()));

        // Other days stay empty.
        assert!(store.read_day(7, day("2024-06-02")).is_empty());
    }

    #[test]
    fn test_read_day_missing_partition_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_at(tmp.path(), "2024-06-01T08:30:00+00:00");
        assert!(store.read_day(999, day("2024-06-01")).is_empty());
    }

    #[test]
    fn test_read_day_corrupt_partition_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_at(tmp.path(), "2024-06-01T08:30:00+00:00");
        write_partition(tmp.path(), 7, "2024-06-01", "{{{ not json");

        assert!(store.read_day(7, day("2024-06-01")).is_empty());
        // Tolerance is stable across repeated reads.
        assert!(store.read_day(7, day("2024-06-01")).is_empty());
    }

    #[test]
    fn test_append_replaces_corrupt_partition() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_at(tmp.path(), "2024-06-01T08:30:00+00:00");
        write_partition(tmp.path(), 7, "2024-06-01", "[broken");

        store.append(7, "alice", "fresh start").unwrap();
        let events = store.read_day(7, day("2024-06-01"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "fresh start");
    }

    #[test]
    fn test_read_day_sorts_by_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_at(tmp.path(), "2024-06-01T12:00:00+00:00");
        let contents = json!([
            {"chat_id": 7, "participant": "b", "text": "later", "occurred_at": "2024-06-01T10:00:00+00:00"},
            {"chat_id": 7, "participant": "a", "text": "earlier", "occurred_at": "2024-06-01T08:00:00+00:00"},
        ]);
        write_partition(tmp.path(), 7, "2024-06-01", &contents.to_string());

        let events = store.read_day(7, day("2024-06-01"));
        assert_eq!(events[0].text, "earlier");
        assert_eq!(events[1].text, "later");
    }

    #[test]
    fn test_read_day_is_deterministic_across_reads() {
        let tmp = tempfile::tempdir().unwrap();
        // Appends under one frozen clock share a stamp; the sort is stable,
        // so equal stamps keep append order on every read.
        let store = store_at(tmp.path(), "2024-06-01T09:00:00+00:00");
        store.append(7, "alice", "one").unwrap();
        store.append(7, "bob", "two").unwrap();
        store.append(7, "alice", "three").unwrap();
        store_at(tmp.path(), "2024-06-01T14:00:00+00:00")
            .append(7, "carol", "four")
            .unwrap();

        let first = store.read_day(7, day("2024-06-01"));
        let second = store.read_day(7, day("2024-06-01"));

        assert_eq!(first, second);
        let texts: Vec<&str> = first.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn test_read_latest_spans_days_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        store_at(tmp.path(), "2024-06-01T10:00:00+00:00")
            .append(7, "alice", "day1-a")
            .unwrap();
        store_at(tmp.path(), "2024-06-01T10:05:00+00:00")
            .append(7, "alice", "day1-b")
            .unwrap();
        store_at(tmp.path(), "2024-06-02T10:00:00+00:00")
            .append(7, "bob", "day2-a")
            .unwrap();

        let store = store_at(tmp.path(), "2024-06-02T12:00:00+00:00");
        let latest = store.read_latest(7, 2);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].text, "day2-a");
        assert_eq!(latest[1].text, "day1-b");

        // Asking for more than exists returns everything.
        assert_eq!(store.read_latest(7, 50).len(), 3);
    }

    #[test]
    fn test_count_since_filters_by_cutoff() {
        let tmp = tempfile::tempdir().unwrap();
        // 07:00 yesterday is outside a 24h lookback from 08:00 today.
        store_at(tmp.path(), "2024-06-01T07:00:00+00:00")
            .append(7, "alice", "too old")
            .unwrap();
        store_at(tmp.path(), "2024-06-01T20:00:00+00:00")
            .append(7, "alice", "yesterday evening")
            .unwrap();
        store_at(tmp.path(), "2024-06-02T07:30:00+00:00")
            .append(7, "bob", "this morning")
            .unwrap();

        let store = store_at(tmp.path(), "2024-06-02T08:00:00+00:00");
        assert_eq!(store.count_since(7, 24), 2);
        assert_eq!(store.count_since(7, 1), 1);
    }

    #[test]
    fn test_count_since_skips_unparsable_stamps() {
        let tmp = tempfile::tempdir().unwrap();
        let contents = json!([
            {"chat_id": 7, "participant": "a", "text": "ok", "occurred_at": "2024-06-01T07:50:00+00:00"},
            {"chat_id": 7, "participant": "b", "text": "bad stamp", "occurred_at": "yesterday-ish"},
        ]);
        write_partition(tmp.path(), 7, "2024-06-01", &contents.to_string());

        let store = store_at(tmp.path(), "2024-06-01T08:00:00+00:00");
        assert_eq!(store.count_since(7, 24), 1);
    }

    #[test]
    fn test_list_chats_ignores_junk_entries() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["123", "-1009876543210", "not-a-chat"] {
            fs::create_dir_all(tmp.path().join(name)).unwrap();
        }
        fs::write(tmp.path().join("stray.txt"), "x").unwrap();

        let store = store_at(tmp.path(), "2024-06-01T08:00:00+00:00");
        assert_eq!(store.list_chats().unwrap(), vec![-1009876543210, 123]);
    }

    #[test]
    fn test_list_chats_empty_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_at(tmp.path(), "2024-06-01T08:00:00+00:00");
        assert!(store.list_chats().unwrap().is_empty());
    }

    #[test]
    fn test_prune_deletes_only_expired_partitions() {
        let tmp = tempfile::tempdir().unwrap();
        let record = json!([
            {"chat_id": 7, "participant": "a", "text": "x", "occurred_at": "2024-05-01T08:00:00+00:00"},
        ])
        .to_string();
        // Cutoff for 30 days of retention on 2024-06-30 is 2024-05-31.
        write_partition(tmp.path(), 7, "2024-05-30", &record);
        write_partition(tmp.path(), 7, "2024-05-31", &record);
        write_partition(tmp.path(), 7, "2024-06-29", &record);
        fs::write(tmp.path().join("7").join("notes.txt"), "keep me").unwrap();
        fs::write(tmp.path().join("7").join("junk.json"), "keep me too").unwrap();

        let store = store_at(tmp.path(), "2024-06-30T08:00:00+00:00");
        assert_eq!(store.prune(7, 30).unwrap(), 1);

        let chat_dir = tmp.path().join("7");
        assert!(!chat_dir.join("2024-05-30.json").exists());
        assert!(chat_dir.join("2024-05-31.json").exists());
        assert!(chat_dir.join("2024-06-29.json").exists());
        assert!(chat_dir.join("notes.txt").exists());
        assert!(chat_dir.join("junk.json").exists());
    }

    #[test]
    fn test_prune_missing_chat_dir_is_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_at(tmp.path(), "2024-06-30T08:00:00+00:00");
        assert_eq!(store.prune(404, 30).unwrap(), 0);
    }
}
