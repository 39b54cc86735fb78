//! Rolling ingestion statistics for one session.

use std::collections::VecDeque;

/// Snapshot of the stream's operational telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamStats {
    /// Accepted samples since the session started (or relatched).
    pub total_samples: u64,
    /// Seconds between the first and the last accepted timestamp.
    pub elapsed_secs: f64,
    /// Accepted samples in the last rolling second.
    pub last_second: usize,
    /// Delta between the last two accepted timestamps, seconds.
    pub last_dt_secs: f64,
}

/// Emission throttle: at most one stats event per this many nanoseconds.
const EMIT_INTERVAL_NS: u64 = 200_000_000;

/// Rolling-second window width.
const WINDOW_NS: u64 = 1_000_000_000;

/// Internal accumulator behind [`StreamStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsTracker {
    first_ns: u64,
    prev_ns: u64,
    last_dt_ns: u64,
    total: u64,
    last_emit_ns: u64,
    window: VecDeque<u64>,
}

impl StatsTracker {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record one accepted sample; returns a snapshot when the emission
    /// throttle allows one.
    pub(crate) fn record(&mut self, t_ns: u64) -> Option<StreamStats> {
        self.total += 1;

        if self.first_ns == 0 {
            self.first_ns = t_ns;
        }
        self.last_dt_ns = if self.prev_ns != 0 {
            t_ns.saturating_sub(self.prev_ns)
        } else {
            0
        };
        self.prev_ns = t_ns;

        self.window.push_back(t_ns);
        while self
            .window
            .front()
            .is_some_and(|&front| t_ns.saturating_sub(front) > WINDOW_NS)
        {
            self.window.pop_front();
        }

        if self.last_emit_ns == 0 || t_ns.saturating_sub(self.last_emit_ns) >= EMIT_INTERVAL_NS {
            self.last_emit_ns = t_ns;
            Some(self.snapshot(t_ns))
        } else {
            None
        }
    }

    fn snapshot(&self, t_ns: u64) -> StreamStats {
        StreamStats {
            total_samples: self.total,
            elapsed_secs: if t_ns > self.first_ns {
                (t_ns - self.first_ns) as f64 * 1e-9
            } else {
                0.0
            },
            last_second: self.window.len(),
            last_dt_secs: self.last_dt_ns as f64 * 1e-9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MS: u64 = 1_000_000;

    #[test]
    fn first_sample_emits_immediately() {
        let mut s = StatsTracker::default();
        let snap = s.record(10 * MS).unwrap();
        assert_eq!(snap.total_samples, 1);
        assert_eq!(snap.last_second, 1);
        assert_eq!(snap.last_dt_secs, 0.0);
    }

    #[test]
    fn emission_is_throttled_to_200ms() {
        let mut s = StatsTracker::default();
        assert!(s.record(MS).is_some());
        assert!(s.record(50 * MS).is_none());
        assert!(s.record(150 * MS).is_none());
        let snap = s.record(201 * MS).unwrap();
        assert_eq!(snap.total_samples, 4);
    }

    #[test]
    fn rolling_second_drops_old_samples() {
        let mut s = StatsTracker::default();
        for i in 1..=5 {
            s.record(i * 300 * MS);
        }
        // At t = 1800 ms the samples before 800 ms fell out of the window.
        let snap = s.record(1800 * MS).unwrap();
        assert_eq!(snap.last_second, 4);
        assert_eq!(snap.total_samples, 6);
    }

    #[test]
    fn elapsed_and_dt_track_timestamps() {
        let mut s = StatsTracker::default();
        s.record(1_000 * MS);
        s.record(1_010 * MS);
        let snap = s.record(1_250 * MS).unwrap();
        assert_relative_eq!(snap.elapsed_secs, 0.25);
        assert_relative_eq!(snap.last_dt_secs, 0.24);
    }

    #[test]
    fn reset_clears_everything() {
        let mut s = StatsTracker::default();
        s.record(MS);
        s.record(500 * MS);
        s.reset();
        let snap = s.record(2_000 * MS).unwrap();
        assert_eq!(snap.total_samples, 1);
        assert_eq!(snap.elapsed_secs, 0.0);
    }
}
