//! Websocket change-feed speaking the hosted Postgres-changes protocol.
//!
//! One connection per subscribed stream. Each connection joins a
//! `realtime:realtime-{table}` channel asking for every change on
//! `public.{table}`, sends a heartbeat every 25 seconds and forwards
//! `postgres_changes` frames as [`RawChange`]s. Dropped connections are
//! re-established after a delay; changes missed while disconnected are not
//! backfilled.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RealtimeConfig;
use crate::feed::{ChangeFeed, ChangeKind, FeedSubscription, RawChange};

/// Protocol version requested on connect.
const PROTOCOL_VSN: &str = "1.0.0";

/// Heartbeat cadence expected by the server.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Delay before reconnecting a dropped socket.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Change-feed backed by the realtime websocket service.
#[derive(Debug, Clone)]
pub struct RealtimeFeed {
    endpoint: Url,
    api_key: String,
    reconnect_delay: Duration,
}

impl RealtimeFeed {
    pub fn new(project_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            endpoint: websocket_endpoint(project_url, api_key)?,
            api_key: api_key.to_string(),
            reconnect_delay: RECONNECT_DELAY,
        })
    }

    /// Build from config; `None` when the feed is not configured.
    pub fn from_config(config: &RealtimeConfig) -> Result<Option<Self>> {
        match (&config.url, &config.api_key) {
            (Some(url), Some(key)) if config.is_enabled() => Ok(Some(Self::new(url, key)?)),
            _ => Ok(None),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl ChangeFeed for RealtimeFeed {
    /// Spawns the connection task; must be called inside a tokio runtime.
    fn subscribe(&self, stream: &str) -> FeedSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(run_channel(self.clone(), stream.to_string(), tx, shutdown_rx));
        FeedSubscription::new(
            stream,
            rx,
            Some(Box::new(move || {
                let _ = shutdown_tx.send(());
            })),
        )
    }
}

/// Websocket URL for a project URL, e.g. `https://x.supabase.co` becomes
/// `wss://x.supabase.co/realtime/v1/websocket?apikey=…&vsn=1.0.0`.
pub fn websocket_endpoint(project_url: &str, api_key: &str) -> Result<Url> {
    let mut url =
        Url::parse(project_url).with_context(|| format!("invalid realtime URL {project_url}"))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(anyhow!("unsupported realtime URL scheme {other}")),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot switch {project_url} to {scheme}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("realtime URL cannot be a base: {project_url}"))?
        .pop_if_empty()
        .extend(["realtime", "v1", "websocket"]);
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", api_key)
        .append_pair("vsn", PROTOCOL_VSN);
    Ok(url)
}

/// Channel topic for a table stream.
pub fn topic_for(table: &str) -> String {
    format!("realtime:realtime-{table}")
}

/// `phx_join` frame requesting all changes on `public.{table}`.
pub fn join_message(table: &str, api_key: &str, msg_ref: u64) -> Value {
    json!({
        "topic": topic_for(table),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": table }
                ]
            },
            "access_token": api_key
        },
        "ref": msg_ref.to_string()
    })
}

pub fn heartbeat_message(msg_ref: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string()
    })
}

/// Server frames we act on.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Change(RawChange),
    JoinOk,
    JoinError(String),
    ChannelClosed,
    Other,
}

/// Parse one text frame for `table`. Changes for other tables map to [`Frame::Other`].
pub fn parse_frame(text: &str, table: &str) -> Result<Frame> {
    let msg: Value = serde_json::from_str(text).context("non-JSON frame")?;
    let event = msg.get("event").and_then(Value::as_str).unwrap_or_default();
    let topic = msg.get("topic").and_then(Value::as_str).unwrap_or_default();
    let own_topic = topic == topic_for(table);

    match event {
        "postgres_changes" if own_topic => {
            let data = msg
                .pointer("/payload/data")
                .ok_or_else(|| anyhow!("postgres_changes without data"))?;
            if data.get("table").and_then(Value::as_str) != Some(table) {
                return Ok(Frame::Other);
            }
            let kind: ChangeKind = serde_json::from_value(
                data.get("type").cloned().unwrap_or(Value::Null),
            )
            .context("unknown change type")?;
            Ok(Frame::Change(RawChange {
                kind,
                record: data.get("record").cloned().unwrap_or(Value::Null),
                old_record: data.get("old_record").cloned().unwrap_or(Value::Null),
            }))
        }
        "phx_reply" if own_topic => {
            match msg.pointer("/payload/status").and_then(Value::as_str) {
                Some("ok") => Ok(Frame::JoinOk),
                _ => Ok(Frame::JoinError(
                    msg.pointer("/payload/response")
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "join rejected".to_string()),
                )),
            }
        }
        "phx_close" | "phx_error" if own_topic => Ok(Frame::ChannelClosed),
        "system" if own_topic => {
            match msg.pointer("/payload/status").and_then(Value::as_str) {
                Some("error") => Ok(Frame::JoinError(
                    msg.pointer("/payload/message")
                        .and_then(Value::as_str)
                        .unwrap_or("system error")
                        .to_string(),
                )),
                _ => Ok(Frame::Other),
            }
        }
        _ => Ok(Frame::Other),
    }
}

/// How one connection attempt ended.
enum Exit {
    Shutdown,
    Dropped(anyhow::Error),
}

async fn run_channel(
    feed: RealtimeFeed,
    table: String,
    tx: mpsc::UnboundedSender<RawChange>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match connect_once(&feed, &table, &tx, &mut shutdown_rx).await {
            Exit::Shutdown => {
                debug!("[{table}] Realtime channel shut down");
                return;
            }
            Exit::Dropped(e) => {
                if tx.is_closed() {
                    return;
                }
                warn!(
                    "[{table}] Realtime connection lost (attempt {attempt}): {e:#}; reconnecting in {:?}",
                    feed.reconnect_delay
                );
            }
        }
        tokio::select! {
            _ = &mut shutdown_rx => return,
            _ = tokio::time::sleep(feed.reconnect_delay) => {}
        }
    }
}

async fn connect_once(
    feed: &RealtimeFeed,
    table: &str,
    tx: &mpsc::UnboundedSender<RawChange>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> Exit {
    let (ws_stream, _) = match connect_async(feed.endpoint.as_str()).await {
        Ok(conn) => conn,
        Err(e) => return Exit::Dropped(e.into()),
    };
    let (mut write, mut read) = ws_stream.split();

    let mut msg_ref: u64 = 1;
    let join = join_message(table, &feed.api_key, msg_ref);
    if let Err(e) = write.send(Message::Text(join.to_string().into())).await {
        return Exit::Dropped(e.into());
    }
    info!("[{table}] Joined realtime channel {}", topic_for(table));

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                let _ = write.send(Message::Close(None)).await;
                return Exit::Shutdown;
            }
            _ = heartbeat.tick() => {
                msg_ref += 1;
                let beat = heartbeat_message(msg_ref);
                if let Err(e) = write.send(Message::Text(beat.to_string().into())).await {
                    return Exit::Dropped(e.into());
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => match parse_frame(text.as_str(), table) {
                    Ok(Frame::Change(change)) => {
                        if tx.send(change).is_err() {
                            return Exit::Shutdown;
                        }
                    }
                    Ok(Frame::JoinOk) => debug!("[{table}] Channel reply ok"),
                    Ok(Frame::JoinError(reason)) => {
                        return Exit::Dropped(anyhow!("channel error: {reason}"));
                    }
                    Ok(Frame::ChannelClosed) => {
                        return Exit::Dropped(anyhow!("channel closed by server"));
                    }
                    Ok(Frame::Other) => {}
                    Err(e) => debug!("[{table}] Ignoring frame: {e:#}"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return Exit::Dropped(anyhow!("server closed socket: {frame:?}"));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Exit::Dropped(e.into()),
                None => return Exit::Dropped(anyhow!("socket stream ended")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_from_project_url() {
        let url = websocket_endpoint("https://demo.supabase.co", "anon-key").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://demo.supabase.co/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
        );

        let local = websocket_endpoint("http://127.0.0.1:54321/", "k").unwrap();
        assert_eq!(
            local.as_str(),
            "ws://127.0.0.1:54321/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
    }

    #[test]
    fn endpoint_rejects_other_schemes() {
        assert!(websocket_endpoint("ftp://demo.supabase.co", "k").is_err());
        assert!(websocket_endpoint("demo.supabase.co", "k").is_err());
    }

    #[test]
    fn join_targets_public_table() {
        let join = join_message("markets", "k", 1);
        assert_eq!(join["topic"], "realtime:realtime-markets");
        assert_eq!(join["event"], "phx_join");
        assert_eq!(join["payload"]["config"]["postgres_changes"][0]["table"], "markets");
        assert_eq!(join["payload"]["access_token"], "k");
        assert_eq!(join["ref"], "1");
    }

    #[test]
    fn parses_change_frames() {
        let text = r#"{
            "topic": "realtime:realtime-markets",
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "schema": "public",
                    "table": "markets",
                    "type": "UPDATE",
                    "record": { "id": "m1", "volume": 10 },
                    "old_record": { "id": "m1" }
                },
                "ids": [1]
            },
            "ref": null
        }"#;
        let frame = parse_frame(text, "markets").unwrap();
        assert_eq!(
            frame,
            Frame::Change(RawChange {
                kind: ChangeKind::Update,
                record: json!({ "id": "m1", "volume": 10 }),
                old_record: json!({ "id": "m1" }),
            })
        );
    }

    #[test]
    fn delete_frames_carry_old_record() {
        let text = r#"{
            "topic": "realtime:realtime-tracked_traders",
            "event": "postgres_changes",
            "payload": { "data": {
                "table": "tracked_traders",
                "type": "DELETE",
                "old_record": { "id": "t9" }
            } }
        }"#;
        let Frame::Change(change) = parse_frame(text, "tracked_traders").unwrap() else {
            panic!("expected a change");
        };
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.record, Value::Null);
        assert_eq!(change.old_record["id"], "t9");
    }

    #[test]
    fn other_topics_and_tables_are_ignored() {
        let wrong_topic = r#"{"topic":"realtime:realtime-traders","event":"postgres_changes","payload":{"data":{"table":"traders","type":"INSERT","record":{}}}}"#;
        assert_eq!(parse_frame(wrong_topic, "markets").unwrap(), Frame::Other);

        let heartbeat_reply = r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"2"}"#;
        assert_eq!(parse_frame(heartbeat_reply, "markets").unwrap(), Frame::Other);
    }

    #[test]
    fn join_replies() {
        let ok = r#"{"topic":"realtime:realtime-markets","event":"phx_reply","payload":{"status":"ok","response":{"postgres_changes":[]}},"ref":"1"}"#;
        assert_eq!(parse_frame(ok, "markets").unwrap(), Frame::JoinOk);

        let err = r#"{"topic":"realtime:realtime-markets","event":"phx_reply","payload":{"status":"error","response":{"reason":"unauthorized"}},"ref":"1"}"#;
        assert!(matches!(
            parse_frame(err, "markets").unwrap(),
            Frame::JoinError(reason) if reason.contains("unauthorized")
        ));

        let closed = r#"{"topic":"realtime:realtime-markets","event":"phx_close","payload":{},"ref":null}"#;
        assert_eq!(parse_frame(closed, "markets").unwrap(), Frame::ChannelClosed);
    }

    #[test]
    fn malformed_frames_error() {
        assert!(parse_frame("PONG", "markets").is_err());
        let bad_type = r#"{"topic":"realtime:realtime-markets","event":"postgres_changes","payload":{"data":{"table":"markets","type":"TRUNCATE"}}}"#;
        assert!(parse_frame(bad_type, "markets").is_err());
    }

    #[test]
    fn from_config_requires_both_fields() {
        let disabled = RealtimeConfig {
            url: Some("https://demo.supabase.co".into()),
            api_key: None,
        };
        assert!(RealtimeFeed::from_config(&disabled).unwrap().is_none());

        let enabled = RealtimeConfig {
            url: Some("https://demo.supabase.co".into()),
            api_key: Some("k".into()),
        };
        let feed = RealtimeFeed::from_config(&enabled).unwrap().unwrap();
        assert_eq!(feed.endpoint().scheme(), "wss");
    }
}
