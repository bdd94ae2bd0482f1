//! Realtime change channel
//!
//! Long-lived WebSocket connection to the realtime endpoint speaking the
//! Phoenix channel protocol. Row changes on the owner's notes are forwarded
//! as `ChangeEvent`s. Reconnects with exponential backoff and emits a
//! `Resync` event after every reconnect, since events may have been missed.
//!
//! The task stops when the `ChangeFeed` receiver is dropped.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{ChangeEvent, ChangeFeed, ChangeKind};
use super::{CloudError, CloudResult};

/// Interval between heartbeats; the server drops silent sockets after about a minute
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// A Phoenix channel frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl ChannelMessage {
    /// Join the owner's notes topic with a postgres_changes subscription
    pub fn join(topic: &str, owner: &str, token: &str, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": "notes",
                        "filter": format!("userId=eq.{}", owner),
                    }]
                },
                "access_token": token,
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn leave(topic: &str, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn encode(&self) -> CloudResult<String> {
        serde_json::to_string(self).map_err(|e| CloudError::Decode(e.to_string()))
    }

    pub fn decode(text: &str) -> CloudResult<Self> {
        serde_json::from_str(text).map_err(|e| CloudError::Decode(e.to_string()))
    }
}

/// What an incoming frame means for the subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Change(ChangeEvent),
    JoinFailed(String),
    Closed,
    Ignored,
}

/// Interpret a frame received on `topic`
pub fn classify(message: &ChannelMessage, topic: &str) -> Incoming {
    if message.topic != topic {
        return Incoming::Ignored;
    }

    match message.event.as_str() {
        "postgres_changes" => {
            let data = &message.payload["data"];
            let kind = match data["type"].as_str().unwrap_or_default() {
                "INSERT" => ChangeKind::Insert,
                "UPDATE" => ChangeKind::Update,
                "DELETE" => ChangeKind::Delete,
                _ => ChangeKind::Resync,
            };
            let id = [&data["record"]["id"], &data["old_record"]["id"]]
                .into_iter()
                .find_map(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok()));
            Incoming::Change(ChangeEvent::new(kind, id))
        }
        "phx_reply" if message.payload["status"] == "error" => {
            Incoming::JoinFailed(message.payload["response"].to_string())
        }
        "phx_error" | "phx_close" => Incoming::Closed,
        _ => Incoming::Ignored,
    }
}

/// Settings for one realtime subscription
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket URL including the API key
    pub url: String,
    pub token: String,
    pub owner: String,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl RealtimeConfig {
    pub fn new(base_url: &str, key: &str, token: &str, owner: &str) -> CloudResult<Self> {
        Ok(Self {
            url: websocket_url(base_url, key)?,
            token: token.to_string(),
            owner: owner.to_string(),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        })
    }

    pub fn topic(&self) -> String {
        format!("realtime:notes:{}", self.owner)
    }
}

/// Derive the realtime WebSocket URL from the service's HTTP endpoint
pub fn websocket_url(base_url: &str, key: &str) -> CloudResult<String> {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return Err(CloudError::Decode(format!(
            "Cloud URL must start with http:// or https://: {}",
            base_url
        )));
    };

    let url = reqwest::Url::parse_with_params(
        &format!("{}/realtime/v1/websocket", ws_base.trim_end_matches('/')),
        &[("apikey", key), ("vsn", "1.0.0")],
    )
    .map_err(|e| CloudError::Decode(e.to_string()))?;
    Ok(url.to_string())
}

/// Spawn the channel task and return its feed
pub fn spawn_channel(config: RealtimeConfig) -> ChangeFeed {
    let (tx, feed) = ChangeFeed::channel();
    tokio::spawn(channel_loop(config, tx));
    feed
}

/// Connection loop with reconnection
async fn channel_loop(config: RealtimeConfig, tx: mpsc::UnboundedSender<ChangeEvent>) {
    let mut reconnect_delay = config.initial_reconnect_delay;
    let mut connected_before = false;

    loop {
        match connect_and_listen(&config, &tx, connected_before).await {
            Ok(Stop::ReceiverGone) => break,
            Ok(Stop::ServerClosed) => {
                debug!("Realtime channel closed by server");
                reconnect_delay = config.initial_reconnect_delay;
            }
            Err(CloudError::Realtime(reason)) if reason.starts_with("join rejected") => {
                warn!("Realtime subscription refused: {}", reason);
                break;
            }
            Err(e) => {
                warn!("Realtime connection error: {}", e);
            }
        }
        connected_before = true;

        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {
                reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
            }
            _ = tx.closed() => break,
        }
    }

    debug!("Realtime channel for {} stopped", config.owner);
}

enum Stop {
    ReceiverGone,
    ServerClosed,
}

/// Connect, join and forward events until disconnection
async fn connect_and_listen(
    config: &RealtimeConfig,
    tx: &mpsc::UnboundedSender<ChangeEvent>,
    is_reconnect: bool,
) -> CloudResult<Stop> {
    let (ws_stream, _response) = connect_async(config.url.as_str())
        .await
        .map_err(|e| CloudError::Realtime(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let topic = config.topic();
    let mut next_ref: u64 = 1;

    let join = ChannelMessage::join(&topic, &config.owner, &config.token, next_ref);
    write
        .send(Message::Text(join.encode()?))
        .await
        .map_err(|e| CloudError::Realtime(e.to_string()))?;
    next_ref += 1;
    info!("Joined realtime topic {}", topic);

    if is_reconnect && tx.send(ChangeEvent::new(ChangeKind::Resync, None)).is_err() {
        return Ok(Stop::ReceiverGone);
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let message = match ChannelMessage::decode(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                debug!("Skipping undecodable realtime frame: {}", e);
                                continue;
                            }
                        };
                        match classify(&message, &topic) {
                            Incoming::Change(event) => {
                                debug!("Realtime change: {:?}", event);
                                if tx.send(event).is_err() {
                                    let _ = write.send(Message::Text(ChannelMessage::leave(&topic, next_ref).encode()?)).await;
                                    let _ = write.close().await;
                                    return Ok(Stop::ReceiverGone);
                                }
                            }
                            Incoming::JoinFailed(reason) => {
                                return Err(CloudError::Realtime(format!("join rejected: {}", reason)));
                            }
                            Incoming::Closed => return Ok(Stop::ServerClosed),
                            Incoming::Ignored => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(Stop::ServerClosed),
                    Some(Err(e)) => return Err(CloudError::Realtime(e.to_string())),
                    _ => {}
                }
            }
            _ = heartbeat.tick() => {
                let beat = ChannelMessage::heartbeat(next_ref);
                next_ref += 1;
                write
                    .send(Message::Text(beat.encode()?))
                    .await
                    .map_err(|e| CloudError::Realtime(e.to_string()))?;
            }
            _ = tx.closed() => {
                let _ = write.send(Message::Text(ChannelMessage::leave(&topic, next_ref).encode()?)).await;
                let _ = write.close().await;
                return Ok(Stop::ReceiverGone);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "realtime:notes:user-1";

    fn frame(event: &str, payload: Value) -> ChannelMessage {
        ChannelMessage {
            topic: TOPIC.to_string(),
            event: event.to_string(),
            payload,
            reference: None,
        }
    }

    #[test]
    fn test_websocket_url() {
        let url = websocket_url("https://abc.example.co", "anon").unwrap();
        assert_eq!(
            url,
            "wss://abc.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let url = websocket_url("http://localhost:54321/", "k").unwrap();
        assert!(url.starts_with("ws://localhost:54321/realtime/v1/websocket"));

        assert!(websocket_url("ftp://nope", "k").is_err());
    }

    #[test]
    fn test_join_message() {
        let join = ChannelMessage::join(TOPIC, "user-1", "tok", 1);
        let encoded = join.encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["ref"], "1");
        assert_eq!(value["payload"]["access_token"], "tok");
        assert_eq!(
            value["payload"]["config"]["postgres_changes"][0]["filter"],
            "userId=eq.user-1"
        );
    }

    #[test]
    fn test_classify_changes() {
        let id = Uuid::new_v4();
        let insert = frame(
            "postgres_changes",
            json!({"data": {"type": "INSERT", "record": {"id": id.to_string()}}}),
        );
        assert_eq!(
            classify(&insert, TOPIC),
            Incoming::Change(ChangeEvent::new(ChangeKind::Insert, Some(id)))
        );

        let delete = frame(
            "postgres_changes",
            json!({"data": {"type": "DELETE", "old_record": {"id": id.to_string()}}}),
        );
        assert_eq!(
            classify(&delete, TOPIC),
            Incoming::Change(ChangeEvent::new(ChangeKind::Delete, Some(id)))
        );
    }

    #[test]
    fn test_classify_control_frames() {
        let rejected = frame(
            "phx_reply",
            json!({"status": "error", "response": {"reason": "unauthorized"}}),
        );
        assert!(matches!(classify(&rejected, TOPIC), Incoming::JoinFailed(_)));

        let ok = frame("phx_reply", json!({"status": "ok", "response": {}}));
        assert_eq!(classify(&ok, TOPIC), Incoming::Ignored);

        assert_eq!(classify(&frame("phx_close", json!({})), TOPIC), Incoming::Closed);

        let other_topic = ChannelMessage {
            topic: "phoenix".to_string(),
            ..frame("postgres_changes", json!({}))
        };
        assert_eq!(classify(&other_topic, TOPIC), Incoming::Ignored);
    }

    #[test]
    fn test_decode_server_frame() {
        let text = r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok"},"ref":"2"}"#;
        let message = ChannelMessage::decode(text).unwrap();
        assert_eq!(message.reference.as_deref(), Some("2"));
        assert!(ChannelMessage::decode("not json").is_err());
    }
}
