//! Realtime change feed over the Phoenix channel protocol.
//!
//! One websocket per subscription. The socket joins a `postgres_changes`
//! channel for the products of one store, sends a heartbeat every 30 seconds
//! and forwards decoded [`ChangeEvent`]s over an `mpsc` channel. The socket is
//! not reconnected: when it closes, the receiver closes too.

use std::time::Duration;

use campus_market_core::StoreId;
use campus_market_core::realtime::{ChangeEvent, ChangeKind, OldRecord};
use chrono::{DateTime, Utc};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::{BackendError, ChangeFeed, Session};
use crate::config::SupabaseConfig;

const REALTIME_PATH: &str = "realtime/v1/websocket";
const PROTOCOL_VERSION: &str = "1.0.0";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CHANNEL_CAPACITY: usize = 256;
const JOIN_REF: &str = "1";

/// Subscribes to product changes pushed by the backend.
#[derive(Clone)]
pub struct RealtimeFeed {
    base_url: Url,
    anon_key: SecretString,
    access_token: Option<SecretString>,
}

impl std::fmt::Debug for RealtimeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeFeed")
            .field("base_url", &self.base_url.as_str())
            .field("anon_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl RealtimeFeed {
    #[must_use]
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            base_url: config.url.clone(),
            anon_key: config.anon_key.clone(),
            access_token: None,
        }
    }

    /// Join channels as the session's user so row-level policies apply.
    #[must_use]
    pub fn with_session(mut self, session: &Session) -> Self {
        self.access_token = Some(session.access_token.clone());
        self
    }

    /// Websocket URL: the project URL with a `ws`/`wss` scheme.
    fn socket_url(&self) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        let mut url = url.join(REALTIME_PATH)?;

        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(BackendError::Realtime(format!(
                    "unsupported URL scheme '{other}'"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| BackendError::Realtime("cannot switch to websocket scheme".to_string()))?;

        url.query_pairs_mut()
            .append_pair("apikey", self.anon_key.expose_secret())
            .append_pair("vsn", PROTOCOL_VERSION);
        Ok(url)
    }

    fn join_message(&self, topic: &str, store_id: StoreId) -> PhoenixMessage {
        let token = self
            .access_token
            .as_ref()
            .unwrap_or(&self.anon_key)
            .expose_secret();

        PhoenixMessage {
            topic: topic.to_string(),
            event: "phx_join".to_string(),
            payload: serde_json::json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": "products",
                        "filter": format!("store_id=eq.{store_id}"),
                    }],
                },
                "access_token": token,
            }),
            reference: Some(JOIN_REF.to_string()),
        }
    }
}

impl ChangeFeed for RealtimeFeed {
    #[instrument(skip(self))]
    async fn subscribe(&self, store_id: StoreId) -> Result<mpsc::Receiver<ChangeEvent>, BackendError> {
        let url = self.socket_url()?;
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut sink, stream) = socket.split();

        let topic = format!("realtime:public:products:store_id=eq.{store_id}");
        send_json(&mut sink, &self.join_message(&topic, store_id)).await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run_channel(sink, stream, tx, topic));
        Ok(rx)
    }
}

/// Envelope of every Phoenix message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

impl PhoenixMessage {
    fn heartbeat(reference: u64) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: serde_json::json!({}),
            reference: Some(reference.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    record: Option<serde_json::Value>,
    #[serde(default)]
    old_record: Option<serde_json::Value>,
    #[serde(default)]
    commit_timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ReplyPayload {
    status: String,
    #[serde(default)]
    response: serde_json::Value,
}

/// What a text frame means to the subscriber.
#[derive(Debug, PartialEq)]
enum Frame {
    Change(ChangeEvent),
    Joined,
    JoinFailed(String),
    Closed,
    Other,
}

fn decode_frame(text: &str) -> Result<Frame, BackendError> {
    let message: PhoenixMessage = serde_json::from_str(text)?;

    match message.event.as_str() {
        "postgres_changes" => {
            let payload: ChangePayload = serde_json::from_value(message.payload)?;
            Ok(Frame::Change(into_change_event(payload.data)?))
        }
        "phx_reply" if message.reference.as_deref() == Some(JOIN_REF) => {
            let reply: ReplyPayload = serde_json::from_value(message.payload)?;
            if reply.status == "ok" {
                Ok(Frame::Joined)
            } else {
                Ok(Frame::JoinFailed(reply.response.to_string()))
            }
        }
        "phx_error" | "phx_close" => Ok(Frame::Closed),
        _ => Ok(Frame::Other),
    }
}

fn into_change_event(data: ChangeData) -> Result<ChangeEvent, BackendError> {
    let new = match data.kind {
        ChangeKind::Delete => None,
        ChangeKind::Insert | ChangeKind::Update => non_empty(data.record)
            .map(serde_json::from_value)
            .transpose()?,
    };
    let old: Option<OldRecord> = non_empty(data.old_record)
        .map(serde_json::from_value)
        .transpose()?;

    Ok(ChangeEvent {
        event_type: data.kind,
        new,
        old,
        commit_timestamp: data.commit_timestamp,
    })
}

fn non_empty(value: Option<serde_json::Value>) -> Option<serde_json::Value> {
    value.filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
}

async fn send_json<S>(sink: &mut S, message: &PhoenixMessage) -> Result<(), BackendError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(message)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

async fn run_channel<S, R>(mut sink: S, mut stream: R, tx: mpsc::Sender<ChangeEvent>, topic: String)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately
    heartbeat.tick().await;
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            () = tx.closed() => {
                debug!(%topic, "Subscriber dropped");
                break;
            }
            _ = heartbeat.tick() => {
                let message = PhoenixMessage::heartbeat(next_ref);
                next_ref += 1;
                if let Err(e) = send_json(&mut sink, &message).await {
                    warn!(error = %e, "Realtime heartbeat failed");
                    break;
                }
            }
            frame = stream.next() => {
                let Some(frame) = frame else { break };
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "Realtime socket error");
                        break;
                    }
                };

                match decode_frame(&text) {
                    Ok(Frame::Change(event)) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(Frame::Joined) => info!(%topic, "Realtime channel joined"),
                    Ok(Frame::JoinFailed(reason)) => {
                        error!(%topic, %reason, "Realtime channel join refused");
                        break;
                    }
                    Ok(Frame::Closed) => break,
                    Ok(Frame::Other) => {}
                    Err(e) => warn!(error = %e, "Skipping undecodable realtime frame"),
                }
            }
        }
    }

    let _ = sink.close().await;
    info!(%topic, "Realtime channel closed");
}
