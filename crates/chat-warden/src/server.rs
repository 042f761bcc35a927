//! WebSocket endpoint.
//!
//! The widget keeps one WebSocket open and exchanges small tagged JSON
//! messages with the relay.  Each connection is handled in its own task;
//! requests on a connection are processed in order.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HsRequest, Response as HsResponse,
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use abuse_guard::GuardStatus;

use crate::chat::{ChatService, PageContext};
use crate::storage::StoredMessage;

// ---------------------------------------------------------------------------
// Wire schema
// ---------------------------------------------------------------------------

fn default_history_limit() -> usize {
    50
}

/// Requests the widget can send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Chat {
        session_key: String,
        message: String,
        #[serde(default)]
        page_context: Option<PageContext>,
    },
    History {
        session_key: String,
        #[serde(default = "default_history_limit")]
        limit: usize,
    },
    DeleteSession {
        session_key: String,
    },
    Sessions,
    Status,
}

/// Responses the relay sends back.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerReply {
    Chat {
        session_key: String,
        reply: String,
        blocked: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        attack_detected: Option<String>,
    },
    History {
        session_key: String,
        messages: Vec<StoredMessage>,
    },
    Deleted {
        session_key: String,
    },
    Sessions {
        sessions: Vec<String>,
    },
    Status {
        guard: GuardStatus,
        model: String,
        knowledge_documents: usize,
    },
    Error {
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Allowed `Origin` header values; `"*"` allows any origin.
    pub origin_allowlist: Vec<String>,
}

pub struct RelayServer {
    config: ServerConfig,
    service: Arc<ChatService>,
}

impl RelayServer {
    pub fn new(config: ServerConfig, service: Arc<ChatService>) -> Self {
        Self { config, service }
    }

    /// Bind and accept connections forever.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "chat-warden listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let service = Arc::clone(&self.service);
            let allowlist = self.config.origin_allowlist.clone();

            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, remote_addr, allowlist, service).await
                {
                    debug!(%remote_addr, %err, "connection ended with error");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    allowlist: Vec<String>,
    service: Arc<ChatService>,
) -> anyhow::Result<()> {
    let callback =
        move |req: &HsRequest, response: HsResponse| -> Result<HsResponse, ErrorResponse> {
            let origin = req
                .headers()
                .get("origin")
                .and_then(|v| v.to_str().ok());

            if origin_allowed(origin, &allowlist) {
                Ok(response)
            } else {
                warn!(%remote_addr, origin = origin.unwrap_or("<none>"), "origin rejected");
                let mut rejection = ErrorResponse::new(Some("Origin not allowed".to_string()));
                *rejection.status_mut() = StatusCode::FORBIDDEN;
                Err(rejection)
            }
        };

    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    debug!(%remote_addr, "widget connected");

    let (mut writer, mut reader) = ws.split();

    while let Some(message) = reader.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(%remote_addr, %err, "read error, closing connection");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let reply = match serde_json::from_str::<ClientRequest>(&text) {
                    Ok(request) => dispatch(&service, request).await,
                    Err(err) => ServerReply::Error {
                        message: format!("invalid request: {err}"),
                    },
                };

                let json = match serde_json::to_string(&reply) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(%err, "failed to serialize reply");
                        continue;
                    }
                };
                if writer.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Message::Close(frame) => {
                let _ = writer.send(Message::Close(frame)).await;
                break;
            }
            Message::Ping(payload) => {
                if writer.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            // Binary and pong frames are ignored.
            _ => {}
        }
    }

    debug!(%remote_addr, "widget disconnected");
    Ok(())
}

/// Map one request to its reply.  Handler failures become `Error` replies;
/// the connection itself stays up.
async fn dispatch(service: &ChatService, request: ClientRequest) -> ServerReply {
    match request {
        ClientRequest::Chat {
            session_key,
            message,
            page_context,
        } => match service
            .handle_message(&session_key, &message, page_context.as_ref())
            .await
        {
            Ok(outcome) => ServerReply::Chat {
                session_key,
                reply: outcome.reply,
                blocked: outcome.blocked,
                attack_detected: outcome.attack_detected,
            },
            Err(err) => {
                warn!(%err, "chat handling failed");
                ServerReply::Error {
                    message: format!("chat failed: {err}"),
                }
            }
        },
        ClientRequest::History { session_key, limit } => {
            match service.store().history(&session_key, limit).await {
                Ok(messages) => ServerReply::History {
                    session_key,
                    messages,
                },
                Err(err) => ServerReply::Error {
                    message: format!("history failed: {err}"),
                },
            }
        }
        ClientRequest::DeleteSession { session_key } => {
            match service.store().delete_session(&session_key).await {
                Ok(()) => ServerReply::Deleted { session_key },
                Err(err) => ServerReply::Error {
                    message: format!("delete failed: {err}"),
                },
            }
        }
        ClientRequest::Sessions => match service.store().sessions().await {
            Ok(sessions) => ServerReply::Sessions { sessions },
            Err(err) => ServerReply::Error {
                message: format!("listing failed: {err}"),
            },
        },
        ClientRequest::Status => ServerReply::Status {
            guard: service.guard().status(),
            model: service.model().to_string(),
            knowledge_documents: service.knowledge_documents(),
        },
    }
}

/// Origin policy: browsers always send an `Origin` on WebSocket upgrades, but
/// non-browser clients (curl, health checks) may not; those are allowed.
fn origin_allowed(origin: Option<&str>, allowlist: &[String]) -> bool {
    let Some(origin) = origin else {
        return true;
    };
    if origin.is_empty() {
        return false;
    }
    allowlist
        .iter()
        .any(|allowed| allowed == "*" || allowed == origin)
}
