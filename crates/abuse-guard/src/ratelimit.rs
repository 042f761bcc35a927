//! Sliding-window rate limiting.
//!
//! Each session keeps an ordered log of the timestamps of its admitted
//! requests.  Two trailing windows are enforced on every call: one minute and
//! one hour.  The check order is a behavioral contract: prune to the hour
//! horizon, test the minute window, test the hour window, and only record the
//! attempt when both checks pass; a denied attempt never counts against
//! future windows.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub(crate) const MINUTE: Duration = Duration::from_secs(60);
pub(crate) const HOUR: Duration = Duration::from_secs(60 * 60);

/// Ordered timestamps of a session's admitted requests.
///
/// Entries are appended in non-decreasing order and pruned to the one-hour
/// horizon on every check, so the log never grows past `max_per_hour`.
#[derive(Debug, Default)]
pub struct RequestLog {
    timestamps: VecDeque<Instant>,
}

impl RequestLog {
    /// Drop entries older than the hour window.
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.timestamps.front() {
            if now.duration_since(*front) >= HOUR {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Count entries younger than `window`.
    fn count_within(&self, now: Instant, window: Duration) -> u32 {
        self.timestamps
            .iter()
            .filter(|t| now.duration_since(**t) < window)
            .count() as u32
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Which window rejected the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateWindow {
    Minute,
    Hour,
}

/// A rate rejection, carrying enough context for the user-facing text.
#[derive(Debug, Clone)]
pub struct RateDenied {
    pub window: RateWindow,
    pub observed: u32,
    pub limit: u32,
}

impl RateDenied {
    /// Human-readable rejection shown to the visitor.
    pub fn reply(&self) -> String {
        match self.window {
            RateWindow::Minute => format!(
                "Too many requests. Please wait a minute. ({}/{})",
                self.observed, self.limit
            ),
            RateWindow::Hour => format!(
                "Too many requests this hour. ({}/{})",
                self.observed, self.limit
            ),
        }
    }
}

/// Window limits applied to every session.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub max_per_minute: u32,
    pub max_per_hour: u32,
}

impl RateLimits {
    /// Enforce both windows against `log`, recording the attempt only when it
    /// is allowed.
    pub fn check_and_record(
        &self,
        log: &mut RequestLog,
        now: Instant,
    ) -> Result<(), RateDenied> {
        log.prune(now);

        let last_minute = log.count_within(now, MINUTE);
        let last_hour = log.len() as u32;

        if last_minute >= self.max_per_minute {
            return Err(RateDenied {
                window: RateWindow::Minute,
                observed: last_minute,
                limit: self.max_per_minute,
            });
        }

        if last_hour >= self.max_per_hour {
            return Err(RateDenied {
                window: RateWindow::Hour,
                observed: last_hour,
                limit: self.max_per_hour,
            });
        }

        log.timestamps.push_back(now);
        Ok(())
    }
}
