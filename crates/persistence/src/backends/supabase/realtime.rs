//! Supabase Realtime client.
//!
//! Speaks the Phoenix channel protocol over a WebSocket: one socket per
//! subscription, joined to `realtime:<schema>:<table>` with a
//! `postgres_changes` filter. The socket is kept alive with heartbeats and
//! re-established with exponential backoff when it drops.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::core::{ChangeCallback, ChangeEvent, ChangeType};
use crate::error::{BackendError, QueryError, StorageError, StorageResult};

use super::rest::BACKEND;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const JOIN_REF: &str = "1";

/// Everything needed to (re)join one table's change feed.
#[derive(Debug, Clone)]
pub(crate) struct Channel {
    pub endpoint: Url,
    pub topic: String,
    pub table: String,
    pub join: Value,
    pub timeout: Duration,
}

impl Channel {
    pub(crate) fn new(
        project_url: &str,
        api_key: &str,
        schema: &str,
        table: &str,
        timeout: Duration,
    ) -> StorageResult<Self> {
        let endpoint = endpoint(project_url, api_key)?;
        let topic = format!("realtime:{}:{}", schema, table);
        let join = json!({
            "topic": topic,
            "event": "phx_join",
            "payload": {
                "config": {
                    "broadcast": {"self": false},
                    "presence": {"key": ""},
                    "postgres_changes": [
                        {"event": "*", "schema": schema, "table": table}
                    ]
                },
                "access_token": api_key
            },
            "ref": JOIN_REF
        });

        Ok(Self {
            endpoint,
            topic,
            table: table.to_string(),
            join,
            timeout,
        })
    }

    /// Connects and waits for the join to be acknowledged.
    pub(crate) async fn open(&self) -> StorageResult<WsStream> {
        let attempt = async {
            let (mut socket, _) = connect_async(self.endpoint.as_str())
                .await
                .map_err(|e| connection_failed(format!("realtime connect failed: {}", e)))?;

            socket
                .send(Message::Text(self.join.to_string().into()))
                .await
                .map_err(|e| connection_failed(format!("realtime join failed: {}", e)))?;

            while let Some(message) = socket.next().await {
                let message =
                    message.map_err(|e| connection_failed(format!("realtime join failed: {}", e)))?;
                let Message::Text(text) = message else { continue };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else { continue };
                if frame["event"] == "phx_reply" && frame["ref"] == JOIN_REF {
                    return match frame["payload"]["status"].as_str() {
                        Some("ok") => Ok(socket),
                        _ => Err(StorageError::Backend(BackendError::QueryError {
                            backend_name: BACKEND.to_string(),
                            message: format!(
                                "realtime join for '{}' rejected: {}",
                                self.table, frame["payload"]["response"]
                            ),
                        })),
                    };
                }
            }
            Err(connection_failed("realtime socket closed during join".to_string()))
        };

        tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| {
                StorageError::Backend(BackendError::Timeout {
                    backend_name: BACKEND.to_string(),
                    operation: "realtime join".to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            })?
    }
}

/// Delivers changes until the task is aborted, rejoining after disconnects.
pub(crate) async fn run(channel: Channel, first: WsStream, callback: ChangeCallback) {
    let mut socket = Some(first);
    let mut backoff = Duration::from_secs(1);

    loop {
        let current = match socket.take() {
            Some(current) => current,
            None => match channel.open().await {
                Ok(current) => {
                    tracing::info!(table = %channel.table, "realtime channel rejoined");
                    backoff = Duration::from_secs(1);
                    current
                }
                Err(err) => {
                    tracing::warn!(
                        table = %channel.table,
                        error = %err,
                        retry_in = ?backoff,
                        "realtime rejoin failed"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            },
        };

        pump(&channel, current, &callback).await;
        tracing::warn!(table = %channel.table, "realtime socket closed");
    }
}

/// Reads one socket until it closes.
async fn pump(channel: &Channel, socket: WsStream, callback: &ChangeCallback) {
    let (mut sink, mut stream) = socket.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let frame = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": next_ref.to_string()
                });
                next_ref += 1;
                if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                    return;
                }
            }
            message = stream.next() => {
                let Some(Ok(message)) = message else { return };
                match message {
                    Message::Text(text) => {
                        let Ok(frame) = serde_json::from_str::<Value>(&text) else { continue };
                        if frame["topic"] != channel.topic.as_str() {
                            continue;
                        }
                        if frame["event"] == "phx_close" || frame["event"] == "phx_error" {
                            return;
                        }
                        if let Some(event) = decode_change(&channel.table, &frame) {
                            callback(event);
                        }
                    }
                    Message::Close(_) => return,
                    _ => {}
                }
            }
        }
    }
}

/// Decodes a `postgres_changes` frame.
pub(crate) fn decode_change(table: &str, frame: &Value) -> Option<ChangeEvent> {
    if frame["event"] != "postgres_changes" {
        return None;
    }
    let data = &frame["payload"]["data"];
    let change_type = match data["type"].as_str()? {
        "INSERT" => ChangeType::Insert,
        "UPDATE" => ChangeType::Update,
        "DELETE" => ChangeType::Delete,
        _ => return None,
    };

    let row = |key: &str| match &data[key] {
        Value::Object(map) if !map.is_empty() => Some(map.clone()),
        _ => None,
    };

    Some(ChangeEvent {
        table: data["table"].as_str().unwrap_or(table).to_string(),
        change_type,
        new: row("record"),
        old: row("old_record"),
        commit_timestamp: data["commit_timestamp"].as_str().map(String::from),
    })
}

/// `https://x.supabase.co` becomes `wss://x.supabase.co/realtime/v1/websocket?apikey=..&vsn=1.0.0`.
pub(crate) fn endpoint(project_url: &str, api_key: &str) -> StorageResult<Url> {
    let mut url = Url::parse(project_url).map_err(|e| QueryError::InvalidValue {
        field: "SUPABASE_URL".to_string(),
        message: e.to_string(),
    })?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme).map_err(|_| QueryError::InvalidValue {
        field: "SUPABASE_URL".to_string(),
        message: format!("cannot derive a websocket url from '{}'", project_url),
    })?;

    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}/realtime/v1/websocket", base));
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", api_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

fn connection_failed(message: String) -> StorageError {
    StorageError::Backend(BackendError::ConnectionFailed {
        backend_name: BACKEND.to_string(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let url = endpoint("https://abc.supabase.co", "anon").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let url = endpoint("http://127.0.0.1:54321", "anon").unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/realtime/v1/websocket");
    }

    #[test]
    fn test_decode_insert() {
        let frame = json!({
            "topic": "realtime:public:shows",
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "INSERT",
                    "table": "shows",
                    "schema": "public",
                    "record": {"id": "s1", "name": "Harbor Lights"},
                    "old_record": {},
                    "commit_timestamp": "2026-05-01T20:00:00Z"
                },
                "ids": [1]
            },
            "ref": null
        });

        let event = decode_change("shows", &frame).unwrap();
        assert_eq!(event.change_type, ChangeType::Insert);
        assert_eq!(event.new.unwrap()["name"], json!("Harbor Lights"));
        assert!(event.old.is_none());
        assert_eq!(event.commit_timestamp.as_deref(), Some("2026-05-01T20:00:00Z"));
    }

    #[test]
    fn test_decode_delete_and_ignores_other_events() {
        let frame = json!({
            "event": "postgres_changes",
            "payload": {"data": {"type": "DELETE", "old_record": {"id": "s1"}}}
        });
        let event = decode_change("shows", &frame).unwrap();
        assert_eq!(event.change_type, ChangeType::Delete);
        assert_eq!(event.table, "shows");
        assert!(event.new.is_none());

        assert!(decode_change("shows", &json!({"event": "presence_state"})).is_none());
    }

    #[test]
    fn test_join_frame() {
        let channel = Channel::new(
            "https://abc.supabase.co",
            "anon",
            "public",
            "bookings",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(channel.topic, "realtime:public:bookings");
        assert_eq!(channel.join["event"], "phx_join");
        assert_eq!(
            channel.join["payload"]["config"]["postgres_changes"][0]["table"],
            "bookings"
        );
    }
}
