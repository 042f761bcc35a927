use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::alert::Alert;
use crate::telegram::TelegramNotifier;

/// Channel buffer between producers and the background dispatcher.
const CHANNEL_BUFFER: usize = 256;

/// A cheap, cloneable handle used to submit [`Alert`] values for delivery.
///
/// `AlertSink` is `Clone + Send + Sync` so it can be shared across request
/// handlers.  Delivery is fire-and-forget: failures are logged by the
/// background task and never surface to the caller; an alert that cannot be
/// delivered must not change whatever decision produced it.
#[derive(Clone)]
pub struct AlertSink {
    tx: mpsc::Sender<Alert>,
}

impl AlertSink {
    /// Spawn the background dispatcher and return a `(sink, join_handle)`
    /// pair.
    ///
    /// With `notifier = None` the channel is disabled: alerts are drained and
    /// logged at debug level so callers never need to special-case an
    /// unconfigured deployment.
    pub fn start(notifier: Option<TelegramNotifier>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<Alert>(CHANNEL_BUFFER);

        let handle = tokio::spawn(async move {
            run_dispatch_loop(notifier, rx).await;
        });

        (Self { tx }, handle)
    }

    /// Queue an alert for delivery.
    ///
    /// Waits for channel space if the dispatcher is backed up.  If the
    /// background task has exited the alert is dropped with a warning.
    pub async fn notify(&self, alert: Alert) {
        if let Err(err) = self.tx.send(alert).await {
            tracing::warn!(
                kind = ?err.0.kind,
                "alert channel closed — alert dropped"
            );
        }
    }
}

/// Drain alerts until every sink clone is dropped.
async fn run_dispatch_loop(notifier: Option<TelegramNotifier>, mut rx: mpsc::Receiver<Alert>) {
    while let Some(alert) = rx.recv().await {
        match &notifier {
            Some(notifier) => {
                if let Err(err) = notifier.send(&alert).await {
                    tracing::error!(%err, kind = ?alert.kind, "failed to deliver alert");
                }
            }
            None => {
                tracing::debug!(
                    kind = ?alert.kind,
                    text = %alert.text,
                    "alert delivery disabled — not sent"
                );
            }
        }
    }
    tracing::debug!("alert dispatcher shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertKind;

    #[tokio::test]
    async fn disabled_sink_drains_alerts_and_shuts_down() {
        let (sink, handle) = AlertSink::start(None);

        sink.notify(Alert::new(AlertKind::Info, "first")).await;
        sink.notify(Alert::new(AlertKind::Attack, "second")).await;

        // Dropping the last sink clone closes the channel; the dispatcher
        // must drain and exit cleanly.
        drop(sink);
        handle.await.expect("dispatcher should exit without panicking");
    }

    #[tokio::test]
    async fn sink_clones_share_one_dispatcher() {
        let (sink, handle) = AlertSink::start(None);
        let clone = sink.clone();

        clone.notify(Alert::new(AlertKind::Feedback, "from clone")).await;
        sink.notify(Alert::new(AlertKind::Info, "from original")).await;

        drop(sink);
        drop(clone);
        handle.await.expect("dispatcher should exit");
    }
}
