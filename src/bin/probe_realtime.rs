//! Probe: realtime change-feed
//!
//! Connects to the realtime websocket configured in config.toml / the
//! environment and:
//! - Joins the channel for one table (default `markets`)
//! - Prints every raw frame with its arrival time
//! - Counts frames per event type and decoded changes per kind
//! - Stops after the listen window (default 30 seconds)

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use prediction_dashboard::config::{AppConfig, CONFIG_PATH};
use prediction_dashboard::realtime::{
    Frame, heartbeat_message, join_message, parse_frame, websocket_endpoint,
};

#[derive(Parser)]
#[command(name = "probe_realtime", about = "Print raw realtime frames for one table")]
struct Args {
    /// Table to join
    #[arg(long, default_value = "markets")]
    table: String,

    /// Listen window in seconds
    #[arg(long, default_value_t = 30)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = AppConfig::load_or_default(Path::new(CONFIG_PATH))?;
    let (Some(project_url), Some(api_key)) = (&config.realtime.url, &config.realtime.api_key) else {
        bail!("Realtime feed not configured (set REALTIME_URL and REALTIME_API_KEY)");
    };
    let endpoint = websocket_endpoint(project_url, api_key)?;

    println!("=== Probe: realtime change-feed ===");
    println!("Host:  {}", endpoint.host_str().unwrap_or("?"));
    println!("Table: {}", args.table);
    println!();

    println!("--- Connecting ---");
    let (ws_stream, response) = connect_async(endpoint.as_str()).await?;
    println!("Connected! Response status: {}", response.status());
    println!();

    let (mut write, mut read) = ws_stream.split();

    let mut msg_ref: u64 = 1;
    let join = join_message(&args.table, api_key, msg_ref);
    println!("--- Sending join ---");
    println!("  topic={}", join["topic"]);
    write.send(Message::Text(join.to_string().into())).await?;
    println!();

    println!("--- Listening for {} seconds ---", args.seconds);
    let start = Instant::now();
    let window = Duration::from_secs(args.seconds);
    let mut frame_count = 0;
    let mut event_types: HashMap<String, usize> = HashMap::new();
    let mut change_kinds: HashMap<String, usize> = HashMap::new();
    let mut last_beat = Instant::now();

    loop {
        if start.elapsed() >= window {
            break;
        }

        if last_beat.elapsed() >= Duration::from_secs(25) {
            msg_ref += 1;
            let beat = heartbeat_message(msg_ref);
            let _ = write.send(Message::Text(beat.to_string().into())).await;
            last_beat = Instant::now();
        }

        match tokio::time::timeout(Duration::from_secs(1), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                frame_count += 1;
                let elapsed = start.elapsed();
                let event = serde_json::from_str::<Value>(text.as_str())
                    .ok()
                    .and_then(|v| v.get("event").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| "?".to_string());
                *event_types.entry(event.clone()).or_default() += 1;

                match parse_frame(text.as_str(), &args.table) {
                    Ok(Frame::Change(change)) => {
                        *change_kinds.entry(format!("{:?}", change.kind)).or_default() += 1;
                    }
                    Ok(Frame::JoinError(reason)) => println!("  !! join error: {reason}"),
                    Ok(_) => {}
                    Err(e) => println!("  !! unparseable frame: {e:#}"),
                }

                println!("[{:>5.1}s] {event}: {}", elapsed.as_secs_f64(), text.as_str());
            }
            Ok(Some(Ok(Message::Close(frame)))) => {
                println!("Server closed connection: {frame:?}");
                break;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                println!("WebSocket error: {e}");
                break;
            }
            Ok(None) => {
                println!("Stream ended");
                break;
            }
            Err(_) => {}
        }
    }

    println!();
    println!("--- Summary ---");
    println!("Frames received: {frame_count}");
    let mut events: Vec<_> = event_types.into_iter().collect();
    events.sort();
    for (event, count) in events {
        println!("  {event}: {count}");
    }
    let mut kinds: Vec<_> = change_kinds.into_iter().collect();
    kinds.sort();
    println!("Changes decoded:");
    for (kind, count) in kinds {
        println!("  {kind}: {count}");
    }

    Ok(())
}
