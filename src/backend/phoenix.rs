//! Realtime transport: one websocket per channel speaking the Phoenix
//! channel protocol the hosted backend exposes for `postgres_changes`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::Channel;
use crate::error::{Error, Result};
use crate::types::{ChangeEvent, ChangeKind, ChannelFilter, ChannelMessage, ChannelStatus, Table};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const CHANNEL_BUFFER: usize = 64;
const JOIN_REF: &str = "1";

#[derive(Debug, Clone)]
pub(crate) struct RealtimeEndpoint {
    pub url: Url,
    pub access_token: Option<String>,
    pub join_timeout: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

pub(crate) fn topic_for(filter: &ChannelFilter) -> String {
    format!("realtime:{filter}")
}

pub(crate) fn join_message(filter: &ChannelFilter, access_token: Option<&str>) -> PhoenixMessage {
    let mut change = json!({
        "event": filter.event.as_str(),
        "schema": "public",
        "table": filter.table.as_str(),
    });
    if let Some(expr) = filter.filter_expr() {
        change["filter"] = Value::String(expr);
    }
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [change],
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }
    PhoenixMessage {
        topic: topic_for(filter),
        event: "phx_join".to_string(),
        payload,
        msg_ref: Some(JOIN_REF.to_string()),
        join_ref: Some(JOIN_REF.to_string()),
    }
}

fn control_message(topic: &str, event: &str, msg_ref: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: event.to_string(),
        payload: json!({}),
        msg_ref: Some(msg_ref.to_string()),
        join_ref: None,
    }
}

/// Maps one server frame to what the channel reports. `None` means the frame
/// is protocol noise (heartbeat replies, presence, other topics).
pub(crate) fn decode(msg: &PhoenixMessage, topic: &str) -> Option<ChannelMessage> {
    if msg.topic != topic {
        return None;
    }
    match msg.event.as_str() {
        "phx_reply" if msg.msg_ref.as_deref() == Some(JOIN_REF) => {
            if msg.payload["status"] == "ok" {
                Some(ChannelMessage::Status(ChannelStatus::Subscribed))
            } else {
                let reason = msg.payload["response"]["reason"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| msg.payload.to_string());
                Some(ChannelMessage::Status(ChannelStatus::ChannelError(reason)))
            }
        }
        "phx_error" => Some(ChannelMessage::Status(ChannelStatus::ChannelError(
            "channel crashed on the server".to_string(),
        ))),
        "phx_close" => Some(ChannelMessage::Status(ChannelStatus::Closed)),
        "system" if msg.payload["status"] == "error" => {
            let reason = msg.payload["message"].as_str().unwrap_or("system error");
            Some(ChannelMessage::Status(ChannelStatus::ChannelError(
                reason.to_string(),
            )))
        }
        "postgres_changes" => decode_change(&msg.payload["data"]).map(ChannelMessage::Change),
        _ => None,
    }
}

fn decode_change(data: &Value) -> Option<ChangeEvent> {
    let table = Table::parse(data["table"].as_str()?)?;
    let kind = ChangeKind::parse(data["type"].as_str()?)?;
    let commit_timestamp = data["commit_timestamp"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    Some(ChangeEvent {
        table,
        kind,
        record: data.get("record").cloned().unwrap_or(Value::Null),
        old_record: data.get("old_record").cloned().unwrap_or(Value::Null),
        commit_timestamp,
    })
}

fn encode(msg: &PhoenixMessage) -> Result<Message> {
    Ok(Message::Text(serde_json::to_string(msg)?))
}

/// Connects, joins the topic, and pumps frames into a [`Channel`] until the
/// channel is dropped or the socket fails.
///
/// The handshake and the join request share the join timeout, so a peer
/// that accepts TCP and then stalls counts as a failed open.
pub(crate) async fn open(endpoint: &RealtimeEndpoint, filter: &ChannelFilter) -> Result<Channel> {
    let topic = topic_for(filter);
    let connect = async {
        let (socket, _) = tokio_tungstenite::connect_async(endpoint.url.as_str())
            .await
            .map_err(|e| Error::Realtime(e.to_string()))?;
        let (mut sink, stream) = socket.split();
        sink.send(encode(&join_message(filter, endpoint.access_token.as_deref()))?)
            .await
            .map_err(|e| Error::Realtime(e.to_string()))?;
        Ok::<_, Error>((sink, stream))
    };
    let (mut sink, mut stream) = tokio::time::timeout(endpoint.join_timeout, connect)
        .await
        .map_err(|_| {
            tracing::warn!("Realtime connect for {} timed out", topic);
            Error::Realtime(format!(
                "connect timed out after {:?}",
                endpoint.join_timeout
            ))
        })??;

    let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    let join_timeout = endpoint.join_timeout;

    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let join_deadline = tokio::time::sleep(join_timeout);
        tokio::pin!(join_deadline);
        let mut joined = false;
        let mut next_ref: u64 = 2;

        let end = loop {
            tokio::select! {
                _ = token.cancelled() => {
                    if let Ok(leave) = encode(&control_message(&topic, "phx_leave", next_ref)) {
                        let _ = sink.send(leave).await;
                    }
                    let _ = sink.close().await;
                    break None;
                }
                _ = &mut join_deadline, if !joined => {
                    tracing::warn!("Realtime join for {} timed out", topic);
                    break Some(ChannelStatus::TimedOut);
                }
                _ = heartbeat.tick() => {
                    let Ok(beat) = encode(&control_message("phoenix", "heartbeat", next_ref)) else {
                        continue;
                    };
                    next_ref += 1;
                    if let Err(e) = sink.send(beat).await {
                        break Some(ChannelStatus::ChannelError(e.to_string()));
                    }
                }
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => break Some(ChannelStatus::Closed),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => break Some(ChannelStatus::ChannelError(e.to_string())),
                    };
                    let msg: PhoenixMessage = match serde_json::from_str(&text) {
                        Ok(msg) => msg,
                        Err(e) => {
                            tracing::debug!("Ignoring malformed realtime frame: {}", e);
                            continue;
                        }
                    };
                    let Some(decoded) = decode(&msg, &topic) else {
                        continue;
                    };
                    let failed = matches!(&decoded, ChannelMessage::Status(s) if s.is_failure());
                    if matches!(decoded, ChannelMessage::Status(ChannelStatus::Subscribed)) {
                        joined = true;
                    }
                    if tx.send(decoded).await.is_err() || failed {
                        break None;
                    }
                }
            }
        };

        if let Some(status) = end {
            let _ = tx.send(ChannelMessage::Status(status)).await;
        }
    });

    Ok(Channel::new(rx, Some(guard)))
}
