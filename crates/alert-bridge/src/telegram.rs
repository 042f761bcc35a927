use serde::Deserialize;

use crate::alert::{format_alert, Alert};

/// Errors that can occur while delivering an alert.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telegram api returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("telegram api rejected the call: {description}")]
    Rejected { description: String },
}

/// Request timeout for Bot API calls. Alerts are best-effort; a slow
/// Telegram must not back up the dispatch queue for long.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Minimal Telegram Bot API client used for operator alerts.
pub struct TelegramNotifier {
    http: reqwest::Client,
    base_url: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: impl Into<String>) -> Result<Self, NotifyError> {
        Self::with_base_url(format!("https://api.telegram.org/bot{bot_token}"), chat_id)
    }

    /// Used by tests to point the client at a local mock server.
    pub fn with_base_url(
        base_url: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            chat_id: chat_id.into(),
        })
    }

    /// Deliver one alert as a plain-text `sendMessage` call.
    pub async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": format_alert(alert),
        });

        let response = self
            .http
            .post(format!("{}/sendMessage", self.base_url))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    /// Connectivity probe: `getMe` returns the bot's identity when the token
    /// is valid.  Exposed so an operator can verify the channel is wired up.
    pub async fn get_me(&self) -> Result<BotProfile, NotifyError> {
        let response = self
            .http
            .get(format!("{}/getMe", self.base_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: GetMeResponse = response.json().await?;
        if !envelope.ok {
            return Err(NotifyError::Rejected {
                description: envelope
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Ok(envelope.result.unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct GetMeResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<BotProfile>,
}

/// The subset of the bot identity we surface to operators.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotProfile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, rename = "first_name")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifier_builds_from_token() {
        let notifier = TelegramNotifier::new("123:abc", "42").unwrap();
        assert_eq!(notifier.base_url, "https://api.telegram.org/bot123:abc");
        assert_eq!(notifier.chat_id, "42");
    }

    #[test]
    fn get_me_envelope_parses() {
        let json = r#"{"ok":true,"result":{"id":1,"is_bot":true,"first_name":"Warden","username":"warden_bot"}}"#;
        let envelope: GetMeResponse = serde_json::from_str(json).unwrap();
        assert!(envelope.ok);
        let profile = envelope.result.unwrap();
        assert_eq!(profile.username.as_deref(), Some("warden_bot"));
        assert_eq!(profile.name.as_deref(), Some("Warden"));
    }

    #[test]
    fn get_me_error_envelope_parses() {
        let json = r#"{"ok":false,"description":"Unauthorized"}"#;
        let envelope: GetMeResponse = serde_json::from_str(json).unwrap();
        assert!(!envelope.ok);
        assert_eq!(envelope.description.as_deref(), Some("Unauthorized"));
    }
}
