use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use prediction_dashboard::api::ApiClient;
use prediction_dashboard::config::{AppConfig, CONFIG_PATH};
use prediction_dashboard::feed::{ChangeFeed, DisabledFeed};
use prediction_dashboard::format::{format_number, format_pct, format_usd};
use prediction_dashboard::live::{Identified, LiveTable};
use prediction_dashboard::models::ModelDirectory;
use prediction_dashboard::performance::PerformanceMonitor;
use prediction_dashboard::realtime::RealtimeFeed;
use prediction_dashboard::reporter::{self, PerformanceEvent, RunEvent, RunSummary, TableEvent};
use prediction_dashboard::runner::{PollSettings, RunController};
use prediction_dashboard::tables;
use prediction_dashboard::types::MarketStatus;

#[derive(Parser)]
#[command(name = "dashboard", about = "Prediction market dashboard client")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow the markets collection
    Markets {
        /// Only fetch markets with this status (active, closed, resolved, archived)
        #[arg(long, value_parser = parse_status)]
        status: Option<MarketStatus>,

        /// Print the first loaded state and exit
        #[arg(long)]
        once: bool,
    },
    /// Follow the tracked-traders watchlist
    Traders {
        /// Print the first loaded state and exit
        #[arg(long)]
        once: bool,
    },
    /// Run predictions for a market and wait for the consensus
    Run {
        /// Market id
        market_id: String,
    },
    /// Follow performance analytics
    Performance {
        /// Print the first loaded view and exit
        #[arg(long)]
        once: bool,
    },
}

fn parse_status(s: &str) -> Result<MarketStatus, String> {
    match s {
        "active" => Ok(MarketStatus::Active),
        "closed" => Ok(MarketStatus::Closed),
        "resolved" => Ok(MarketStatus::Resolved),
        "archived" => Ok(MarketStatus::Archived),
        other => Err(format!("unknown market status: {other}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = Path::new(&args.config);
    let config = AppConfig::load_or_default(config_path)?;
    info!("Using API at {}", config.api.base_url);

    let api = ApiClient::from_config(&config.api)?;

    match args.command {
        Command::Markets { status, once } => {
            let feed = change_feed(&config)?;
            let table = tables::markets(&api, feed.as_ref(), status);
            follow_table(&table, once).await;
        }
        Command::Traders { once } => {
            let feed = change_feed(&config)?;
            let table = tables::tracked_traders(&api, feed.as_ref());
            follow_table(&table, once).await;
        }
        Command::Run { market_id } => {
            let settings = PollSettings::from(&config.polling);
            run_market(api, &market_id, settings).await?;
        }
        Command::Performance { once } => {
            let interval = config.polling.performance_interval();
            follow_performance(api, interval, once).await;
        }
    }

    Ok(())
}

fn change_feed(config: &AppConfig) -> Result<Box<dyn ChangeFeed>> {
    match RealtimeFeed::from_config(&config.realtime)? {
        Some(feed) => {
            info!("Realtime feed at {}", feed.endpoint().host_str().unwrap_or("?"));
            Ok(Box::new(feed))
        }
        None => {
            warn!("Realtime feed not configured; collections update on refresh only");
            Ok(Box::new(DisabledFeed))
        }
    }
}

/// Print every state change of `table` as a JSON line until Ctrl+C.
async fn follow_table<T>(table: &LiveTable<T>, once: bool)
where
    T: Identified + Clone + Serialize + Send + Sync + 'static,
{
    let mut rx = table.watch();
    info!("Following {}. Press Ctrl+C to stop.", table.stream());
    loop {
        let state = rx.borrow_and_update().clone();
        if !state.is_loading {
            info!("{}: {} rows", table.stream(), format_number(state.items.len() as f64));
            reporter::report_event(&TableEvent::new(table.stream(), &state));
            if once {
                break;
            }
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    table.close();
}

async fn run_market(api: ApiClient, market_id: &str, settings: PollSettings) -> Result<()> {
    let models = ModelDirectory::load(&api).await;
    let controller = RunController::with_settings(api, settings);
    let mut rx = controller.watch();

    info!("Starting prediction run for market {market_id}");
    controller.run(market_id).await?;

    loop {
        let view = rx.borrow_and_update().clone();
        reporter::report_event(&RunEvent::new(&view));
        if !view.is_running() {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, abandoning run");
                controller.dispose();
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    let view = controller.view();
    if let Some(detail) = &view.snapshot {
        for p in &detail.predictions {
            info!(
                "{}: {} ({})",
                models.display_name(&p.model_name),
                p.prediction.as_str(),
                format_pct(p.confidence)
            );
        }
        if let Some(c) = &detail.consensus {
            info!(
                "Consensus {} at {} agreement, bet {}",
                c.final_decision.as_str(),
                format_pct(c.agreement_ratio),
                format_usd(c.bet_amount)
            );
        }
    }
    reporter::report_summary(&RunSummary::new(&view, |name| models.display_name(name)));
    Ok(())
}

async fn follow_performance(api: ApiClient, interval: std::time::Duration, once: bool) {
    let monitor = PerformanceMonitor::spawn(api, interval);
    let mut rx = monitor.watch();
    info!("Refreshing performance every {interval:?}. Press Ctrl+C to stop.");
    loop {
        let view = rx.borrow_and_update().clone();
        if !view.is_loading {
            if let Some(summary) = &view.summary {
                info!(
                    "{} markets, {} predictions, accuracy {:.1}%, avg confidence {}, P&L {}",
                    format_number(summary.total_markets as f64),
                    format_number(summary.total_predictions as f64),
                    summary.accuracy_pct,
                    format_pct(summary.avg_confidence),
                    format_usd(summary.total_pnl)
                );
            }
            reporter::report_event(&PerformanceEvent::new(&view));
            if once {
                break;
            }
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
