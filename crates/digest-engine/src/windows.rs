use chrono::{FixedOffset, NaiveTime};
use tracing::{debug, warn};

use digest_core::config::{parse_time_of_day, WindowConfig};
use digest_core::types::ChatEvent;

/// A named time-of-day window. `start > end` means the window wraps past
/// midnight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Window {
    pub fn new(name: impl Into<String>, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    pub fn wraps(&self) -> bool {
        self.start > self.end
    }

    /// Membership test for a time of day.
    ///
    /// Non-wrapping windows are inclusive on both ends, so an event at
    /// exactly 12:00 belongs to both Morning and Afternoon; that seam
    /// double-count is accepted. Wrapping windows run from `start` through
    /// midnight up to but not including `end`.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.wraps() {
            t >= self.start || t < self.end
        } else {
            self.start <= t && t <= self.end
        }
    }

    /// Display label, e.g. "Morning (06:00-12:00)".
    pub fn label(&self) -> String {
        format!(
            "{} ({}-{})",
            self.name,
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// The four canonical windows in report order. Evening ends at 23:59, so
/// times after 23:59:00 fall outside every canonical window.
pub fn canonical_windows() -> Vec<Window> {
    [
        ("Morning", (6, 0), (12, 0)),
        ("Afternoon", (12, 0), (18, 0)),
        ("Evening", (18, 0), (23, 59)),
        ("Late night", (0, 0), (6, 0)),
    ]
    .into_iter()
    .map(|(name, (start_h, start_m), (end_h, end_m))| {
        Window::new(
            name,
            NaiveTime::from_hms_opt(start_h, start_m, 0).unwrap(),
            NaiveTime::from_hms_opt(end_h, end_m, 0).unwrap(),
        )
    })
    .collect()
}

/// Build windows from config entries. Entries with unparsable times are
/// logged and skipped; if nothing valid remains, the canonical four apply.
pub fn windows_from_config(entries: &[WindowConfig]) -> Vec<Window> {
    let mut windows = Vec::new();
    for entry in entries {
        match (parse_time_of_day(&entry.start), parse_time_of_day(&entry.end)) {
            (Some(start), Some(end)) => windows.push(Window::new(entry.name.clone(), start, end)),
            _ => warn!(
                "skipping window '{}' with invalid times {}-{}",
                entry.name, entry.start, entry.end
            ),
        }
    }
    if windows.is_empty() {
        debug!("no usable window config, using canonical windows");
        canonical_windows()
    } else {
        windows
    }
}

/// Events whose time of day falls inside `window`, in input order. Events
/// with unparsable stamps are skipped.
pub fn filter_window<'a>(
    events: &'a [ChatEvent],
    window: &Window,
    offset: FixedOffset,
) -> Vec<&'a ChatEvent> {
    events
        .iter()
        .filter(|event| match event.time_of_day(offset) {
            Some(t) => window.contains(t),
            None => {
                debug!("skipping event with unparsable stamp: {}", event.occurred_at);
                false
            }
        })
        .collect()
}

/// Keep only the newest `max` events of a chronologically ordered slice.
pub fn cap_newest(mut events: Vec<&ChatEvent>, max: usize) -> Vec<&ChatEvent> {
    if events.len() > max {
        events.split_off(events.len() - max)
    } else {
        events
    }
}
