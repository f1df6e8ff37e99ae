use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::runner::RunBackend;
use crate::types::{
    Consensus, LlmModel, Market, MarketDetail, MarketStatus, MarketsRefreshed, ModelPerformance,
    PerformanceSummary, PnlPoint, Prediction, RunAccepted, TrackedTrader, TraderDetail,
};

pub type Result<T> = std::result::Result<T, ApiError>;

/// Filters for `GET /markets`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketQuery {
    pub status: Option<MarketStatus>,
    pub category: Option<String>,
    pub page: Option<u32>,
}

impl MarketQuery {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(category) = &self.category {
            pairs.push(("category", category.clone()));
        }
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        pairs
    }
}

/// Client for the dashboard backend REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(ApiError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Build an endpoint URL from path segments; each segment is percent-encoded.
    fn endpoint(&self, segments: &[&str], query: &[(&str, String)]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        url
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.endpoint(segments, query);
        let resp = self.http.request(method.clone(), url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                path: url.path().to_string(),
            });
        }
        let body = resp.bytes().await?;
        let value = serde_json::from_slice(&body)?;
        debug!("{method} {} -> {status}", url.path());
        Ok(value)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        self.request(Method::GET, segments, &[]).await
    }

    async fn post<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        self.request(Method::POST, segments, &[]).await
    }

    // ── markets ────────────────────────────────────────────────────

    pub async fn list_markets(&self, query: &MarketQuery) -> Result<Vec<Market>> {
        let markets: Vec<Market> = self
            .request(Method::GET, &["markets"], &query.pairs())
            .await?;
        debug!("Fetched {} markets", markets.len());
        Ok(markets)
    }

    pub async fn market(&self, id: &str) -> Result<MarketDetail> {
        self.get(&["markets", id]).await
    }

    /// Ask the backend to pull new markets from the exchange.
    pub async fn refresh_markets(&self) -> Result<MarketsRefreshed> {
        self.post(&["markets", "refresh"]).await
    }

    // ── predictions / consensus ───────────────────────────────────

    pub async fn predictions(&self, market_id: &str) -> Result<Vec<Prediction>> {
        self.get(&["predictions", market_id]).await
    }

    /// Kick off predictions for every enabled model. Returns once accepted.
    pub async fn run_predictions(&self, market_id: &str) -> Result<RunAccepted> {
        self.post(&["predictions", market_id, "run"]).await
    }

    pub async fn consensus(&self) -> Result<Vec<Consensus>> {
        self.get(&["consensus"]).await
    }

    pub async fn active_consensus(&self) -> Result<Vec<Consensus>> {
        self.get(&["consensus", "active"]).await
    }

    // ── performance ────────────────────────────────────────────────

    pub async fn performance_summary(&self) -> Result<PerformanceSummary> {
        self.get(&["performance", "summary"]).await
    }

    pub async fn performance_by_model(&self) -> Result<Vec<ModelPerformance>> {
        self.get(&["performance", "by-model"]).await
    }

    pub async fn pnl_history(&self) -> Result<Vec<PnlPoint>> {
        self.get(&["performance", "pnl-history"]).await
    }

    // ── models / traders ───────────────────────────────────────────

    pub async fn models(&self, enabled: Option<bool>) -> Result<Vec<LlmModel>> {
        let query: Vec<(&str, String)> = enabled
            .map(|e| vec![("enabled", e.to_string())])
            .unwrap_or_default();
        self.request(Method::GET, &["models"], &query).await
    }

    pub async fn tracked_traders(&self) -> Result<Vec<TrackedTrader>> {
        let traders: Vec<TrackedTrader> = self.get(&["traders", "tracked"]).await?;
        debug!("Fetched {} tracked traders", traders.len());
        Ok(traders)
    }

    pub async fn trader(&self, trader_id: &str) -> Result<TraderDetail> {
        self.get(&["traders", trader_id]).await
    }
}

#[async_trait]
impl RunBackend for ApiClient {
    type Snapshot = MarketDetail;

    async fn start_run(&self, target: &str) -> anyhow::Result<()> {
        let accepted = self.run_predictions(target).await?;
        debug!("[{target}] Run accepted: {}", accepted.status);
        Ok(())
    }

    async fn fetch_detail(&self, target: &str) -> anyhow::Result<MarketDetail> {
        Ok(self.market(target).await?)
    }
}
