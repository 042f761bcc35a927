//! Strike/ban trust state machine.
//!
//! A session is either `CLEAN` (no unexpired ban; strikes below the
//! threshold) or `BANNED`.  Strikes accumulate silently until the threshold
//! bans the session; critical attacks ban directly without walking the strike
//! ladder.  A ban always has an expiry and is lifted lazily on the next
//! lookup, which also forgives the strikes that earned it.

use std::time::{Duration, Instant};

use tracing::warn;

/// An active ban for a session.
#[derive(Debug, Clone)]
pub struct BanRecord {
    pub until: Instant,
    pub reason: String,
}

/// Per-session trust state: accumulated strikes and an optional ban.
#[derive(Debug, Default)]
pub struct TrustState {
    pub strikes: u32,
    pub ban: Option<BanRecord>,
}

impl TrustState {
    /// `true` while a ban record exists and has not expired.
    pub fn is_banned(&self, now: Instant) -> bool {
        self.ban.as_ref().is_some_and(|ban| now < ban.until)
    }
}

/// What a banned caller is told.
#[derive(Debug, Clone)]
pub struct BanNotice {
    pub remaining_minutes: u64,
    pub reason: String,
}

impl BanNotice {
    pub fn reply(&self) -> String {
        format!(
            "Session is blocked. {} minute(s) remaining.",
            self.remaining_minutes
        )
    }
}

/// Strike thresholds and ban durations applied to every session.
#[derive(Debug, Clone, Copy)]
pub struct TrustPolicy {
    pub max_strikes: u32,
    pub ban_duration: Duration,
    pub critical_ban_duration: Duration,
}

impl TrustPolicy {
    /// Report the session's ban status, lazily evicting an expired ban.
    ///
    /// Eviction resets the strike counter to zero in the same moment: ban
    /// expiry forgives prior strikes.  Calling this again after expiry is a
    /// no-op; the reset happens exactly once.
    pub fn check_ban(&self, state: &mut TrustState, now: Instant) -> Option<BanNotice> {
        let ban = state.ban.as_ref()?;

        if now < ban.until {
            let remaining = ban.until.duration_since(now);
            return Some(BanNotice {
                remaining_minutes: minutes_ceil(remaining),
                reason: ban.reason.clone(),
            });
        }

        state.ban = None;
        state.strikes = 0;
        None
    }

    /// Record one strike against the session, banning it when the count
    /// reaches the threshold.  Returns the new strike count.
    pub fn add_strike(&self, state: &mut TrustState, key: &str, reason: &str, now: Instant) -> u32 {
        state.strikes += 1;
        let strikes = state.strikes;

        warn!(
            session = %key_preview(key),
            strikes,
            max_strikes = self.max_strikes,
            reason,
            "strike recorded"
        );

        if strikes >= self.max_strikes {
            self.ban(
                state,
                key,
                &format!("max strikes reached ({strikes})"),
                self.ban_duration,
                now,
            );
        }

        strikes
    }

    /// Ban the session outright for `duration`.
    pub fn ban(
        &self,
        state: &mut TrustState,
        key: &str,
        reason: &str,
        duration: Duration,
        now: Instant,
    ) {
        warn!(
            session = %key_preview(key),
            duration_minutes = minutes_ceil(duration),
            reason,
            "session banned"
        );
        state.ban = Some(BanRecord {
            until: now + duration,
            reason: reason.to_string(),
        });
    }
}

/// Whole minutes, rounded up so a fresh ban reads as its full duration.
fn minutes_ceil(duration: Duration) -> u64 {
    duration.as_secs().div_ceil(60)
}

/// Session keys are caller-supplied and unbounded; logs only carry a prefix.
pub(crate) fn key_preview(key: &str) -> String {
    let preview: String = key.chars().take(20).collect();
    if preview.len() < key.len() {
        format!("{preview}…")
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TrustPolicy {
        TrustPolicy {
            max_strikes: 3,
            ban_duration: Duration::from_secs(30 * 60),
            critical_ban_duration: Duration::from_secs(60 * 60),
        }
    }

    #[test]
    fn strikes_below_threshold_do_not_ban() {
        let policy = policy();
        let mut state = TrustState::default();
        let now = Instant::now();

        assert_eq!(policy.add_strike(&mut state, "s1", "spam", now), 1);
        assert_eq!(policy.add_strike(&mut state, "s1", "spam", now), 2);
        assert!(!state.is_banned(now));
        assert!(policy.check_ban(&mut state, now).is_none());
    }

    #[test]
    fn third_strike_bans_for_default_duration() {
        let policy = policy();
        let mut state = TrustState::default();
        let now = Instant::now();

        for _ in 0..3 {
            policy.add_strike(&mut state, "s1", "prompt_injection", now);
        }

        assert!(state.is_banned(now));
        let notice = policy.check_ban(&mut state, now).expect("banned");
        assert_eq!(notice.remaining_minutes, 30);
        assert!(notice.reason.contains("max strikes"));
    }

    #[test]
    fn ban_expiry_resets_strikes() {
        let policy = policy();
        let mut state = TrustState::default();
        let now = Instant::now();

        for _ in 0..3 {
            policy.add_strike(&mut state, "s1", "spam", now);
        }
        assert!(state.is_banned(now));

        let after = now + policy.ban_duration + Duration::from_secs(1);
        assert!(policy.check_ban(&mut state, after).is_none());
        assert_eq!(state.strikes, 0);
        assert!(state.ban.is_none());
    }

    #[test]
    fn expired_ban_eviction_is_idempotent() {
        let policy = policy();
        let mut state = TrustState::default();
        let now = Instant::now();

        policy.ban(&mut state, "s1", "command_execution", policy.ban_duration, now);

        let after = now + policy.ban_duration + Duration::from_secs(1);
        assert!(policy.check_ban(&mut state, after).is_none());

        // A strike earned after the reset must not be clobbered by a second
        // lookup re-running the eviction.
        state.strikes = 1;
        assert!(policy.check_ban(&mut state, after).is_none());
        assert_eq!(state.strikes, 1);
    }

    #[test]
    fn direct_ban_uses_given_duration() {
        let policy = policy();
        let mut state = TrustState::default();
        let now = Instant::now();

        policy.ban(
            &mut state,
            "s1",
            "command_execution",
            policy.critical_ban_duration,
            now,
        );

        let notice = policy.check_ban(&mut state, now).expect("banned");
        assert_eq!(notice.remaining_minutes, 60);

        // Still banned just before expiry, clear right after.
        let almost = now + policy.critical_ban_duration - Duration::from_secs(1);
        assert!(state.is_banned(almost));
        let after = now + policy.critical_ban_duration;
        assert!(!state.is_banned(after));
    }

    #[test]
    fn remaining_minutes_round_up() {
        let policy = policy();
        let mut state = TrustState::default();
        let now = Instant::now();

        policy.ban(&mut state, "s1", "spam", Duration::from_secs(61), now);
        let notice = policy.check_ban(&mut state, now).expect("banned");
        assert_eq!(notice.remaining_minutes, 2);
    }

    #[test]
    fn key_preview_truncates_long_keys() {
        assert_eq!(key_preview("short"), "short");
        let long = "x".repeat(40);
        let preview = key_preview(&long);
        assert!(preview.starts_with(&"x".repeat(20)));
        assert!(preview.ends_with('…'));
    }
}
