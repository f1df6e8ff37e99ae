use serde::{Deserialize, Serialize};

use crate::live::Identified;

/// Lifecycle status of a tracked market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Active,
    Closed,
    Resolved,
    Archived,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Active => "active",
            MarketStatus::Closed => "closed",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Archived => "archived",
        }
    }
}

/// A predictor's call (or the consensus call) on a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Yes,
    No,
    NoTrade,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Yes => "YES",
            Decision::No => "NO",
            Decision::NoTrade => "NO_TRADE",
        }
    }
}

/// A market tracked by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub polymarket_id: String,
    pub question: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub event_slug: Option<String>,
    #[serde(default)]
    pub polymarket_url: Option<String>,
    #[serde(default)]
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub outcome_prices: Vec<f64>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub liquidity: f64,
    pub status: MarketStatus,
    /// Winning outcome once resolved.
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub clob_token_ids: Vec<String>,
    #[serde(default)]
    pub web_research: Option<String>,
    #[serde(default)]
    pub web_research_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Identified for Market {
    fn id(&self) -> &str {
        &self.id
    }
}

/// One model's prediction for a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub market_id: String,
    pub model_name: String,
    pub prediction: Decision,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub raw_response: serde_json::Value,
    #[serde(default)]
    pub response_time_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Aggregate decision derived from all predictions of a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub id: String,
    pub market_id: String,
    pub final_decision: Decision,
    pub avg_confidence: f64,
    pub agreement_ratio: f64,
    #[serde(default)]
    pub bet_amount: f64,
    #[serde(default)]
    pub bet_odds: f64,
    #[serde(default)]
    pub current_odds: f64,
    #[serde(default)]
    pub pnl: Option<f64>,
    #[serde(default)]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub resolved_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Identified for Consensus {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Full market view: the market plus its predictions and (once all are in) consensus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDetail {
    #[serde(flatten)]
    pub market: Market,
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    #[serde(default)]
    pub consensus: Option<Consensus>,
}

/// A configured LLM predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmModel {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub openrouter_id: String,
    pub enabled: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A trader on the watchlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTrader {
    pub id: String,
    pub proxy_wallet: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub x_username: Option<String>,
    #[serde(default)]
    pub verified_badge: bool,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub pnl: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub auto_discovered: bool,
    #[serde(default)]
    pub last_refreshed_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn default_category() -> String {
    "OVERALL".to_string()
}

impl Identified for TrackedTrader {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Trader detail as returned by `/traders/{id}`. Nested collections are kept loose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraderDetail {
    #[serde(flatten)]
    pub trader: TrackedTrader,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_markets: u64,
    pub total_predictions: u64,
    pub resolved_markets: u64,
    pub accuracy_pct: f64,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub model_name: String,
    pub total_predictions: u64,
    pub correct: u64,
    pub incorrect: u64,
    pub no_trade: u64,
    pub accuracy_pct: f64,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlPoint {
    pub date: String,
    pub cumulative_pnl: f64,
    pub daily_pnl: f64,
}

/// Response of `POST /predictions/{id}/run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAccepted {
    pub status: String,
}

/// Response of `POST /markets/refresh`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketsRefreshed {
    pub status: String,
    #[serde(default)]
    pub new_markets: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn market_json(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "polymarket_id": "pm-1",
            "question": "Will it rain tomorrow?",
            "description": null,
            "category": "weather",
            "outcomes": ["Yes", "No"],
            "outcome_prices": [0.42, 0.58],
            "volume": 1200.5,
            "liquidity": 300.0,
            "status": "active",
            "clob_token_ids": ["t1", "t2"],
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        })
    }

    #[test]
    fn market_parses_backend_row() {
        let market: Market = serde_json::from_value(market_json("m1")).unwrap();
        assert_eq!(market.id, "m1");
        assert_eq!(market.status, MarketStatus::Active);
        assert_eq!(market.outcome_prices, vec![0.42, 0.58]);
        assert!(market.polymarket_url.is_none());
    }

    #[test]
    fn detail_flattens_market_fields() {
        let mut value = market_json("m1");
        value["predictions"] = json!([{
            "id": "p1",
            "market_id": "m1",
            "model_name": "gpt-4",
            "prediction": "NO_TRADE",
            "confidence": 0.55,
            "reasoning": "coin flip",
            "raw_response": {},
            "response_time_ms": 900,
            "error": null,
            "created_at": "2025-01-01T00:00:00Z"
        }]);
        value["consensus"] = json!(null);

        let detail: MarketDetail = serde_json::from_value(value).unwrap();
        assert_eq!(detail.market.id, "m1");
        assert_eq!(detail.predictions.len(), 1);
        assert_eq!(detail.predictions[0].prediction, Decision::NoTrade);
        assert!(detail.consensus.is_none());
    }

    #[test]
    fn tracked_trader_defaults() {
        let trader: TrackedTrader = serde_json::from_value(json!({
            "id": "t1",
            "proxy_wallet": "0xabc"
        }))
        .unwrap();
        assert_eq!(trader.category, "OVERALL");
        assert!(!trader.verified_badge);
        assert_eq!(trader.pnl, 0.0);
    }
}
