//! Periodic analytics refresher.
//!
//! Fetches the summary, per-model breakdown and P&L history together, pausing
//! a fixed interval after each cycle. A failed cycle keeps the previous values.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::types::{ModelPerformance, PerformanceSummary, PnlPoint};

/// Source of analytics data.
#[async_trait]
pub trait PerformanceSource: Send + Sync + 'static {
    async fn summary(&self) -> anyhow::Result<PerformanceSummary>;
    async fn by_model(&self) -> anyhow::Result<Vec<ModelPerformance>>;
    async fn pnl_history(&self) -> anyhow::Result<Vec<PnlPoint>>;
}

#[async_trait]
impl PerformanceSource for ApiClient {
    async fn summary(&self) -> anyhow::Result<PerformanceSummary> {
        Ok(self.performance_summary().await?)
    }

    async fn by_model(&self) -> anyhow::Result<Vec<ModelPerformance>> {
        Ok(self.performance_by_model().await?)
    }

    async fn pnl_history(&self) -> anyhow::Result<Vec<PnlPoint>> {
        Ok(ApiClient::pnl_history(self).await?)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceView {
    pub summary: Option<PerformanceSummary>,
    pub by_model: Vec<ModelPerformance>,
    pub pnl_history: Vec<PnlPoint>,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

struct Shared<S> {
    source: S,
    view: watch::Sender<PerformanceView>,
}

impl<S: PerformanceSource> Shared<S> {
    async fn refresh(&self) -> Result<(), String> {
        self.view.send_modify(|view| view.is_loading = true);
        let result = tokio::try_join!(
            self.source.summary(),
            self.source.by_model(),
            self.source.pnl_history()
        );
        match result {
            Ok((summary, by_model, pnl_history)) => {
                debug!(
                    "Performance refreshed: {} models, {} P&L points",
                    by_model.len(),
                    pnl_history.len()
                );
                self.view.send_modify(|view| {
                    view.summary = Some(summary);
                    view.by_model = by_model;
                    view.pnl_history = pnl_history;
                    view.is_loading = false;
                    view.last_error = None;
                });
                Ok(())
            }
            Err(e) => {
                let message = format!("{e:#}");
                warn!("Performance refresh failed: {message}");
                self.view.send_modify(|view| {
                    view.is_loading = false;
                    view.last_error = Some(message.clone());
                });
                Err(message)
            }
        }
    }
}

/// Keeps a [`PerformanceView`] fresh until dropped.
pub struct PerformanceMonitor<S> {
    shared: Arc<Shared<S>>,
    task: JoinHandle<()>,
}

impl<S: PerformanceSource> PerformanceMonitor<S> {
    /// Refresh now, then again `interval` after each cycle settles.
    /// Must be called inside a tokio runtime.
    pub fn spawn(source: S, interval: Duration) -> Self {
        let (view, _) = watch::channel(PerformanceView {
            is_loading: true,
            ..PerformanceView::default()
        });
        let shared = Arc::new(Shared { source, view });
        let looped = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            loop {
                let _ = looped.refresh().await;
                tokio::time::sleep(interval).await;
            }
        });
        Self { shared, task }
    }

    /// Refresh outside the regular cadence.
    pub async fn refresh(&self) -> Result<(), String> {
        self.shared.refresh().await
    }

    pub fn view(&self) -> PerformanceView {
        self.shared.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PerformanceView> {
        self.shared.view.subscribe()
    }
}

impl<S> Drop for PerformanceMonitor<S> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
