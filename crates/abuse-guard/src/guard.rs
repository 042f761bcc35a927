//! Validation pipeline.
//!
//! One call per inbound message: ban check, then rate-limit check, then
//! content classification, in that fixed order.  Classification is the most
//! expensive step, and a banned or rate-limited caller must never learn
//! whether their content would have matched a rule; reordering these checks
//! would widen the probing surface.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::classifier::{Classification, Classifier, ClassifierError};
use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::decision::{AttackReport, Decision};
use crate::patterns::Severity;
use crate::ratelimit::RateLimits;
use crate::store::SessionStore;
use crate::trust::{key_preview, TrustPolicy};

/// Reply used when a critical attack bans the session on the spot.
const CRITICAL_REPLY: &str = "Access blocked due to suspicious activity.";

/// The abuse-mitigation engine.
///
/// Holds all per-session state in memory; nothing survives a restart, and
/// that is deliberate: bans self-heal by elapsed time and rate windows are
/// short.  The engine performs no I/O and every call completes in
/// microseconds.
pub struct AbuseGuard {
    classifier: Classifier,
    limits: RateLimits,
    policy: TrustPolicy,
    store: SessionStore,
    clock: Arc<dyn Clock>,
    config: GuardConfig,
}

impl AbuseGuard {
    /// Build a guard from `config` using the system clock.
    pub fn new(config: GuardConfig) -> Result<Self, ClassifierError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a guard with an injected clock (tests drive time manually).
    pub fn with_clock(
        config: GuardConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ClassifierError> {
        Ok(Self {
            classifier: Classifier::new(config.max_message_chars)?,
            limits: config.rate_limits(),
            policy: config.trust_policy(),
            store: SessionStore::new(config.max_sessions, config.shards),
            clock,
            config,
        })
    }

    /// Validate one inbound message for `session_key`.
    pub fn validate(&self, session_key: &str, message: &str) -> Decision {
        let now = self.clock.now();

        self.store.with_session(session_key, now, |state| {
            // 1. Ban check: a banned session's content is never inspected.
            if let Some(notice) = self.policy.check_ban(&mut state.trust, now) {
                return Decision::RejectBanned {
                    reply: notice.reply(),
                };
            }

            // 2. Rate limit: denied attempts are not recorded.
            if let Err(denied) = self.limits.check_and_record(&mut state.requests, now) {
                warn!(
                    session = %key_preview(session_key),
                    observed = denied.observed,
                    limit = denied.limit,
                    "rate limit exceeded"
                );
                return Decision::RejectRateLimited {
                    reply: denied.reply(),
                };
            }

            // 3. Content classification, first match wins.
            let Some(found) = self.classifier.classify(message) else {
                return Decision::Admit;
            };

            let strikes =
                self.policy
                    .add_strike(&mut state.trust, session_key, found.rule, now);
            let attack = self.report(&found, strikes);

            if found.severity == Severity::Critical {
                // Critical attacks skip the strike ladder: ban immediately for
                // the extended duration (overriding any strike-threshold ban
                // the strike above may have armed).
                self.policy.ban(
                    &mut state.trust,
                    session_key,
                    found.category.as_str(),
                    self.policy.critical_ban_duration,
                    now,
                );
                return Decision::RejectCritical {
                    attack,
                    reply: CRITICAL_REPLY.to_string(),
                };
            }

            // Non-critical: the strike may have armed a ban, but it applies to
            // future messages only; this one is flagged, not banned.
            Decision::Flagged {
                attack,
                reply: found.category.canned_reply().to_string(),
            }
        })
    }

    fn report(&self, found: &Classification, strikes: u32) -> AttackReport {
        AttackReport {
            rule: found.rule,
            category: found.category,
            severity: found.severity,
            description: found.description.clone(),
            strikes,
            max_strikes: self.config.max_strikes,
        }
    }

    /// Operational snapshot for the status surface.
    pub fn status(&self) -> GuardStatus {
        let now = self.clock.now();
        GuardStatus {
            max_message_chars: self.config.max_message_chars,
            max_per_minute: self.config.max_per_minute,
            max_per_hour: self.config.max_per_hour,
            ban_minutes: self.config.ban_minutes,
            critical_ban_minutes: self.config.critical_ban_minutes,
            max_strikes: self.config.max_strikes,
            active_bans: self.store.banned_count(now),
            tracked_sessions: self.store.len(),
        }
    }
}

/// Configured thresholds plus live counters, reported by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GuardStatus {
    pub max_message_chars: usize,
    pub max_per_minute: u32,
    pub max_per_hour: u32,
    pub ban_minutes: u64,
    pub critical_ban_minutes: u64,
    pub max_strikes: u32,
    pub active_bans: usize,
    pub tracked_sessions: usize,
}
