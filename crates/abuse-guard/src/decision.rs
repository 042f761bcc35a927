//! The outcome of validating one inbound message.

use serde::Serialize;

use crate::patterns::{AttackCategory, Severity};

/// Structured description of a detected attack, suitable for the alert
/// channel and for logs.
#[derive(Debug, Clone, Serialize)]
pub struct AttackReport {
    /// Catalogue rule that fired (or `"oversize"`).
    pub rule: &'static str,
    pub category: AttackCategory,
    pub severity: Severity,
    pub description: String,
    /// Strike count after this detection.
    pub strikes: u32,
    pub max_strikes: u32,
}

/// What the chat orchestrator should do with the message.
///
/// Policy rejections are ordinary values, never errors.  Only `Admit` lets
/// the message reach the LLM provider; every other variant carries the exact
/// user-facing reply to return instead.
#[derive(Debug)]
pub enum Decision {
    /// No ban, under the rate limits, no attack detected.
    Admit,
    /// The session is banned; the message was neither rate-checked nor
    /// classified.
    RejectBanned { reply: String },
    /// Over a rate window; the message content was not inspected.
    RejectRateLimited { reply: String },
    /// A critical attack: a strike was recorded and the session is now
    /// banned for the extended duration.
    RejectCritical {
        attack: AttackReport,
        reply: String,
    },
    /// A non-critical attack: a strike was recorded (possibly arming a ban
    /// that applies to *future* messages) and the canned reply below is
    /// substituted for a provider call.
    Flagged {
        attack: AttackReport,
        reply: String,
    },
}

impl Decision {
    /// `true` only when the message may be forwarded to the provider.
    pub fn allows_forwarding(&self) -> bool {
        matches!(self, Decision::Admit)
    }

    /// The attack payload, when one was detected.
    pub fn attack(&self) -> Option<&AttackReport> {
        match self {
            Decision::RejectCritical { attack, .. } | Decision::Flagged { attack, .. } => {
                Some(attack)
            }
            _ => None,
        }
    }

    /// The substitute reply, when the provider must not be called.
    pub fn reply(&self) -> Option<&str> {
        match self {
            Decision::Admit => None,
            Decision::RejectBanned { reply }
            | Decision::RejectRateLimited { reply }
            | Decision::RejectCritical { reply, .. }
            | Decision::Flagged { reply, .. } => Some(reply),
        }
    }

    /// `true` for the variants that fully block the session's request.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            Decision::RejectBanned { .. }
                | Decision::RejectRateLimited { .. }
                | Decision::RejectCritical { .. }
        )
    }
}
