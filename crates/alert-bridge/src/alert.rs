use serde::{Deserialize, Serialize};

/// A single operator alert raised somewhere in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub kind: AlertKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    pub text: String,
}

impl Alert {
    /// Create a new alert with an auto-generated UUID v4 and the current UTC
    /// timestamp.  Optional context is attached builder-style.
    pub fn new(kind: AlertKind, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            kind,
            severity: None,
            session_key: None,
            page_url: None,
            text: text.into(),
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    pub fn with_session_key(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    pub fn with_page_url(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = Some(page_url.into());
        self
    }
}

/// The category of event being alerted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// An attack was detected by the abuse guard.
    Attack,
    /// A visitor asked for a human or reported something broken.
    Escalation,
    /// Visitor feedback, positive or negative.
    Feedback,
    /// Operational information (startup, configuration changes).
    Info,
    /// Connectivity test triggered by an operator.
    Test,
}

impl AlertKind {
    /// Uppercase label used in the rendered message header.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Attack => "ATTACK",
            Self::Escalation => "ESCALATION",
            Self::Feedback => "FEEDBACK",
            Self::Info => "INFO",
            Self::Test => "TEST",
        }
    }
}

/// Render an alert as the plain-text message sent to the channel.
///
/// Plain text on purpose: markdown parse modes choke on user-controlled
/// content, and an alert that fails to render is worse than an ugly one.
pub fn format_alert(alert: &Alert) -> String {
    let mut lines = vec![
        format!(
            "[{}] {}",
            alert.kind.label(),
            alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    ];

    if let Some(severity) = &alert.severity {
        lines.push(format!("Severity: {severity}"));
    }

    lines.push(String::new());
    lines.push(alert.text.clone());

    if let Some(session) = &alert.session_key {
        let preview: String = session.chars().take(20).collect();
        if preview.len() < session.len() {
            lines.push(format!("Session: {preview}…"));
        } else {
            lines.push(format!("Session: {preview}"));
        }
    }
    if let Some(url) = &alert.page_url {
        lines.push(format!("Page: {url}"));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_attaches_optional_context() {
        let alert = Alert::new(AlertKind::Attack, "prompt injection")
            .with_severity("high")
            .with_session_key("s1")
            .with_page_url("https://example.com/pricing");

        assert_eq!(alert.kind, AlertKind::Attack);
        assert_eq!(alert.severity.as_deref(), Some("high"));
        assert_eq!(alert.session_key.as_deref(), Some("s1"));
        assert_eq!(alert.page_url.as_deref(), Some("https://example.com/pricing"));
    }

    #[test]
    fn format_includes_kind_severity_and_context() {
        let alert = Alert::new(AlertKind::Escalation, "visitor wants a human")
            .with_severity("high")
            .with_session_key("session-abc")
            .with_page_url("https://example.com/checkout");

        let text = format_alert(&alert);
        assert!(text.starts_with("[ESCALATION]"));
        assert!(text.contains("Severity: high"));
        assert!(text.contains("visitor wants a human"));
        assert!(text.contains("Session: session-abc"));
        assert!(text.contains("Page: https://example.com/checkout"));
    }

    #[test]
    fn format_truncates_long_session_keys() {
        let long_key = "k".repeat(64);
        let alert = Alert::new(AlertKind::Attack, "x").with_session_key(long_key);

        let text = format_alert(&alert);
        let session_line = text
            .lines()
            .find(|l| l.starts_with("Session:"))
            .expect("session line");
        assert!(session_line.contains(&"k".repeat(20)));
        assert!(session_line.ends_with('…'));
        assert!(!session_line.contains(&"k".repeat(21)));
    }

    #[test]
    fn format_omits_missing_context() {
        let alert = Alert::new(AlertKind::Info, "relay started");
        let text = format_alert(&alert);
        assert!(!text.contains("Session:"));
        assert!(!text.contains("Page:"));
        assert!(!text.contains("Severity:"));
    }

    #[test]
    fn alert_serializes_without_empty_fields() {
        let alert = Alert::new(AlertKind::Feedback, "great bot");
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["kind"], "feedback");
        assert!(json.get("session_key").is_none());
        assert!(json.get("severity").is_none());
    }
}
