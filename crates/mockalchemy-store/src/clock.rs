use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Millisecond clock that never hands out the same instant twice.
///
/// Consecutive stamps strictly increase even when the wall clock stalls or
/// steps backwards, so `updatedAt` always moves forward on mutation.
#[derive(Debug, Default)]
pub struct Clock {
    last_ms: AtomicI64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next instant in epoch milliseconds.
    pub fn tick(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_ms.load(Ordering::Acquire);
        loop {
            let next = now.max(last + 1);
            match self
                .last_ms
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Make later ticks land strictly after `ms`.
    pub fn observe(&self, ms: i64) {
        self.last_ms.fetch_max(ms, Ordering::AcqRel);
    }

    pub fn timestamp(&self) -> String {
        format_timestamp(self.tick())
    }
}

/// ISO-8601 UTC with millisecond precision (`2024-05-01T10:00:00.000Z`).
pub fn format_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|timestamp| timestamp.timestamp_millis())
}

/// Record id: hex timestamp plus a random suffix.
///
/// Uniqueness is best effort; stores regenerate on collision.
pub fn new_record_id(ms: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{ms:x}-{}", &suffix[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_strictly_increase() {
        let clock = Clock::new();
        let mut previous = clock.tick();
        for _ in 0..1000 {
            let next = clock.tick();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn observe_pushes_the_clock_forward() {
        let clock = Clock::new();
        let future = Utc::now().timestamp_millis() + 60_000;
        clock.observe(future);
        assert_eq!(clock.tick(), future + 1);
    }

    #[test]
    fn timestamps_round_trip_and_sort_as_strings() {
        let clock = Clock::new();
        let first = clock.timestamp();
        let second = clock.timestamp();
        assert!(second > first);
        assert!(first.ends_with('Z'));
        let ms = parse_timestamp(&first).expect("parse");
        assert_eq!(format_timestamp(ms), first);
    }

    #[test]
    fn ids_differ_for_the_same_instant() {
        assert_ne!(new_record_id(1), new_record_id(1));
    }
}
