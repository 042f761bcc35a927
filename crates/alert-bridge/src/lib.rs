//! Operator alerting for the chat-warden relay.
//!
//! The abuse guard and chat orchestrator produce structured [`Alert`]
//! payloads; this crate owns their delivery.  Alerts flow through a
//! cloneable [`AlertSink`] into a background dispatcher that posts them to a
//! Telegram channel via [`TelegramNotifier`]: fire-and-forget, best-effort,
//! and fully decoupled from the decision that raised them.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use alert_bridge::{Alert, AlertKind, AlertSink, TelegramNotifier};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let notifier = TelegramNotifier::new("bot-token", "chat-id")?;
//! let (sink, _handle) = AlertSink::start(Some(notifier));
//!
//! sink.notify(
//!     Alert::new(AlertKind::Attack, "prompt injection detected")
//!         .with_severity("high")
//!         .with_session_key("session-1"),
//! )
//! .await;
//! # Ok(())
//! # }
//! ```

pub mod alert;
pub mod sink;
pub mod telegram;

// Re-export primary public types at the crate root for convenience.
pub use alert::{format_alert, Alert, AlertKind};
pub use sink::AlertSink;
pub use telegram::{BotProfile, NotifyError, TelegramNotifier};
