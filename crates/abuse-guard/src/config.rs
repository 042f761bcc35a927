//! Guard configuration.

use serde::Deserialize;
use std::time::Duration;

use crate::ratelimit::RateLimits;
use crate::trust::TrustPolicy;

/// Thresholds for the abuse-mitigation engine.  Every field has a default so
/// a missing or partial config section still yields a working guard.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// Messages longer than this (in characters) classify as oversize.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: u32,
    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: u32,
    /// Duration of a strike-threshold ban.
    #[serde(default = "default_ban_minutes")]
    pub ban_minutes: u64,
    /// Duration of the immediate ban for critical attacks.
    #[serde(default = "default_critical_ban_minutes")]
    pub critical_ban_minutes: u64,
    #[serde(default = "default_max_strikes")]
    pub max_strikes: u32,
    /// Total session budget; idle sessions are evicted past this.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Lock shards for the session store.
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            max_per_minute: default_max_per_minute(),
            max_per_hour: default_max_per_hour(),
            ban_minutes: default_ban_minutes(),
            critical_ban_minutes: default_critical_ban_minutes(),
            max_strikes: default_max_strikes(),
            max_sessions: default_max_sessions(),
            shards: default_shards(),
        }
    }
}

impl GuardConfig {
    pub(crate) fn rate_limits(&self) -> RateLimits {
        RateLimits {
            max_per_minute: self.max_per_minute,
            max_per_hour: self.max_per_hour,
        }
    }

    pub(crate) fn trust_policy(&self) -> TrustPolicy {
        TrustPolicy {
            max_strikes: self.max_strikes,
            ban_duration: Duration::from_secs(self.ban_minutes * 60),
            critical_ban_duration: Duration::from_secs(self.critical_ban_minutes * 60),
        }
    }
}

fn default_max_message_chars() -> usize {
    2000
}

fn default_max_per_minute() -> u32 {
    10
}

fn default_max_per_hour() -> u32 {
    60
}

fn default_ban_minutes() -> u64 {
    30
}

fn default_critical_ban_minutes() -> u64 {
    60
}

fn default_max_strikes() -> u32 {
    3
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_shards() -> usize {
    16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config: GuardConfig = serde_yml::from_str("{}").unwrap();
        assert_eq!(config.max_message_chars, 2000);
        assert_eq!(config.max_per_minute, 10);
        assert_eq!(config.max_per_hour, 60);
        assert_eq!(config.ban_minutes, 30);
        assert_eq!(config.critical_ban_minutes, 60);
        assert_eq!(config.max_strikes, 3);
        assert_eq!(config.max_sessions, 10_000);
        assert_eq!(config.shards, 16);
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let yaml = r#"
max_per_minute: 3
ban_minutes: 5
"#;
        let config: GuardConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.max_per_minute, 3);
        assert_eq!(config.ban_minutes, 5);
        assert_eq!(config.max_per_hour, 60);
    }

    #[test]
    fn durations_convert_to_seconds() {
        let config = GuardConfig::default();
        let policy = config.trust_policy();
        assert_eq!(policy.ban_duration, Duration::from_secs(1800));
        assert_eq!(policy.critical_ban_duration, Duration::from_secs(3600));
    }
}
