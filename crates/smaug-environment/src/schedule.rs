// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wall-clock alignment for the scheduled loops.
//!
//! Loops fire on natural boundaries of their period (every whole minute,
//! every whole second), so a restarted process resumes at the next boundary
//! instead of drifting with its start time.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Time from `now` until the next multiple of `period` since the Unix epoch.
///
/// Exactly on a boundary, the next boundary is a full period away.
pub fn until_next_boundary(now: DateTime<Utc>, period: Duration) -> Duration {
    let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX).max(1);
    let elapsed = now.timestamp_millis().rem_euclid(period_ms);
    Duration::from_millis((period_ms - elapsed) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_minute_alignment() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 45).unwrap();
        assert_eq!(
            until_next_boundary(now, Duration::from_secs(60)),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_exact_boundary_waits_full_period() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 31, 0).unwrap();
        assert_eq!(
            until_next_boundary(now, Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_second_alignment_with_millis() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_250).unwrap();
        assert_eq!(
            until_next_boundary(now, Duration::from_secs(1)),
            Duration::from_millis(750)
        );
    }
}
