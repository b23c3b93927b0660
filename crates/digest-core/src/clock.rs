use chrono::{DateTime, FixedOffset, Offset, Utc};

/// Source of "now" under a single fixed local offset.
///
/// Every component that reads wall-clock time takes a `Clock` instead of
/// calling `Utc::now()` directly, so the configured offset is applied in
/// exactly one place and tests can pin time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    /// The fixed offset this clock reports times in.
    fn offset(&self) -> FixedOffset;
}

/// Production clock: system UTC time shifted by a fixed offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Build from whole hours east of UTC. Out-of-range values fall back to
    /// UTC with a warning rather than failing startup.
    pub fn with_offset_hours(hours: i32) -> Self {
        let offset = match FixedOffset::east_opt(hours * 3600) {
            Some(offset) => offset,
            None => {
                tracing::warn!("offset_hours {} out of range, using UTC", hours);
                Utc.fix()
            }
        };
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Deterministic clock that always reports the same instant. Used by tests
/// and anywhere a pass must be evaluated "as of" a known time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    instant: DateTime<FixedOffset>,
}

impl FixedClock {
    pub fn at(instant: DateTime<FixedOffset>) -> Self {
        Self { instant }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.instant
    }

    fn offset(&self) -> FixedOffset {
        *self.instant.offset()
    }
}
