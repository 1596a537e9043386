//! Epoch timestamp helpers.
//!
//! Exchange event times are milliseconds since the Unix epoch; everything that
//! is compared against them (stream arrival stamps, transaction-log windows)
//! uses the same unit.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
}

/// Current time as **microseconds** since Unix epoch.
#[inline]
pub fn now_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u64).unwrap_or_default()
}

/// `ts_ms - margin_ms`, saturating at the epoch.
#[inline]
pub fn minus_ms(ts_ms: u64, margin_ms: u64) -> u64 {
    ts_ms.saturating_sub(margin_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_units_agree() {
        let ms = now_ms();
        let us = now_us();
        assert!(us / 1_000 >= ms);
        assert!(us / 1_000 - ms < 1_000);
    }

    #[test]
    fn minus_saturates() {
        assert_eq!(minus_ms(100, 30), 70);
        assert_eq!(minus_ms(10, 30), 0);
    }
}
