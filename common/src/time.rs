//! Time utilities and constants for the wallet ledger.

use chrono::{DateTime, Duration, Utc};

/// Ledger timing constants.
pub mod constants {
    /// Default deadline for one ledger operation (5 seconds).
    pub fn default_operation_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(5)
    }

    /// Smallest step used to keep per-user timestamps strictly increasing.
    pub fn timestamp_tick() -> super::Duration {
        super::Duration::microseconds(1)
    }
}

/// A timestamp, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Next timestamp for a per-user sequence.
///
/// Returns the current time unless the clock has not moved past `previous`,
/// in which case `previous` is advanced by one tick.
pub fn next_after(previous: Option<Timestamp>) -> Timestamp {
    let current = now();
    match previous {
        Some(previous) if current <= previous => previous + constants::timestamp_tick(),
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_after_is_strictly_increasing() {
        let future = now() + Duration::seconds(10);
        let next = next_after(Some(future));
        assert!(next > future);
        assert_eq!(next - future, constants::timestamp_tick());
    }

    #[test]
    fn test_next_after_uses_clock() {
        let past = now() - Duration::seconds(10);
        let next = next_after(Some(past));
        assert!(next > past + Duration::seconds(5));
        assert!(next_after(None) <= now());
    }
}
