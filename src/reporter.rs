use serde::Serialize;

use crate::live::TableState;
use crate::performance::PerformanceView;
use crate::runner::{RunState, RunView};
use crate::types::{MarketDetail, ModelPerformance, PerformanceSummary, Prediction};

/// One observed state of a live table.
#[derive(Debug, Serialize)]
pub struct TableEvent<'a, T> {
    pub stream: &'a str,
    pub count: usize,
    pub is_loading: bool,
    pub last_error: Option<&'a str>,
    pub items: &'a [T],
}

impl<'a, T> TableEvent<'a, T> {
    pub fn new(stream: &'a str, state: &'a TableState<T>) -> Self {
        Self {
            stream,
            count: state.items.len(),
            is_loading: state.is_loading,
            last_error: state.last_error.as_deref(),
            items: &state.items,
        }
    }
}

/// One observed state of a prediction run.
#[derive(Debug, Serialize)]
pub struct RunEvent<'a> {
    pub state: RunState,
    pub market_id: Option<&'a str>,
    pub ticks: u32,
    pub elapsed_secs: Option<i64>,
    pub predictions: usize,
    pub decision: Option<String>,
    pub last_error: Option<&'a str>,
}

impl<'a> RunEvent<'a> {
    pub fn new(view: &'a RunView<MarketDetail>) -> Self {
        let detail = view.snapshot.as_ref();
        Self {
            state: view.state,
            market_id: view.target.as_deref(),
            ticks: view.ticks,
            elapsed_secs: view
                .started_at
                .map(|at| (chrono::Utc::now() - at).num_seconds()),
            predictions: detail.map_or(0, |d| d.predictions.len()),
            decision: detail
                .and_then(|d| d.consensus.as_ref())
                .map(|c| c.final_decision.as_str().to_string()),
            last_error: view.last_error.as_deref(),
        }
    }
}

/// Final outcome of a run, printed once it stops.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub state: RunState,
    pub market_id: Option<&'a str>,
    pub question: Option<&'a str>,
    pub predictions: Vec<PredictionLine<'a>>,
    pub decision: Option<String>,
    pub avg_confidence: Option<f64>,
    pub agreement_ratio: Option<f64>,
    pub bet_amount: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PredictionLine<'a> {
    pub model: &'a str,
    pub decision: &'static str,
    pub confidence: f64,
    pub error: Option<&'a str>,
}

impl<'a> RunSummary<'a> {
    /// `display_name` maps a model key to the name shown to the user.
    pub fn new(
        view: &'a RunView<MarketDetail>,
        display_name: impl Fn(&'a str) -> &'a str,
    ) -> Self {
        let detail = view.snapshot.as_ref();
        let consensus = detail.and_then(|d| d.consensus.as_ref());
        Self {
            state: view.state,
            market_id: view.target.as_deref(),
            question: detail.map(|d| d.market.question.as_str()),
            predictions: detail
                .map(|d| {
                    d.predictions
                        .iter()
                        .map(|p| PredictionLine::new(p, &display_name))
                        .collect()
                })
                .unwrap_or_default(),
            decision: consensus.map(|c| c.final_decision.as_str().to_string()),
            avg_confidence: consensus.map(|c| c.avg_confidence),
            agreement_ratio: consensus.map(|c| c.agreement_ratio),
            bet_amount: consensus.map(|c| c.bet_amount),
        }
    }
}

impl<'a> PredictionLine<'a> {
    fn new(p: &'a Prediction, display_name: &impl Fn(&'a str) -> &'a str) -> Self {
        Self {
            model: display_name(&p.model_name),
            decision: p.prediction.as_str(),
            confidence: p.confidence,
            error: p.error.as_deref(),
        }
    }
}

/// One observed state of the analytics view.
#[derive(Debug, Serialize)]
pub struct PerformanceEvent<'a> {
    pub is_loading: bool,
    pub last_error: Option<&'a str>,
    pub summary: Option<&'a PerformanceSummary>,
    pub by_model: &'a [ModelPerformance],
    pub pnl_points: usize,
    pub cumulative_pnl: Option<f64>,
}

impl<'a> PerformanceEvent<'a> {
    pub fn new(view: &'a PerformanceView) -> Self {
        Self {
            is_loading: view.is_loading,
            last_error: view.last_error.as_deref(),
            summary: view.summary.as_ref(),
            by_model: &view.by_model,
            pnl_points: view.pnl_history.len(),
            cumulative_pnl: view.pnl_history.last().map(|p| p.cumulative_pnl),
        }
    }
}

/// Emit an event as a single JSON line to stdout.
pub fn report_event<E: Serialize>(event: &E) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{json}");
    }
}

/// Emit a summary as pretty-printed JSON to stdout.
pub fn report_summary<E: Serialize>(summary: &E) {
    if let Ok(json) = serde_json::to_string_pretty(summary) {
        println!("{json}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Consensus, Decision, Market};
    use serde_json::{Value, json};

    fn detail() -> MarketDetail {
        let market: Market = serde_json::from_value(json!({
            "id": "m1",
            "polymarket_id": "pm1",
            "question": "Will it rain?",
            "status": "active"
        }))
        .unwrap();
        let prediction: Prediction = serde_json::from_value(json!({
            "id": "p1",
            "market_id": "m1",
            "model_name": "gpt-4",
            "prediction": "YES",
            "confidence": 0.8
        }))
        .unwrap();
        let consensus: Consensus = serde_json::from_value(json!({
            "id": "c1",
            "market_id": "m1",
            "final_decision": "YES",
            "avg_confidence": 0.8,
            "agreement_ratio": 1.0,
            "bet_amount": 12.5
        }))
        .unwrap();
        MarketDetail {
            market,
            predictions: vec![prediction],
            consensus: Some(consensus),
        }
    }

    #[test]
    fn table_event_shape() {
        let state = TableState {
            items: vec![1, 2, 3],
            is_loading: false,
            last_error: Some("API error: 500 (/markets)".to_string()),
        };
        let value = serde_json::to_value(TableEvent::new("markets", &state)).unwrap();
        assert_eq!(value["stream"], "markets");
        assert_eq!(value["count"], 3);
        assert_eq!(value["last_error"], "API error: 500 (/markets)");
    }

    #[test]
    fn run_summary_uses_display_names() {
        let view = RunView {
            state: RunState::Completed,
            target: Some("m1".to_string()),
            snapshot: Some(detail()),
            ticks: 3,
            ..RunView::default()
        };
        let summary = RunSummary::new(&view, |name| if name == "gpt-4" { "GPT-4o" } else { name });
        let value: Value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["state"], "completed");
        assert_eq!(value["question"], "Will it rain?");
        assert_eq!(value["predictions"][0]["model"], "GPT-4o");
        assert_eq!(value["predictions"][0]["decision"], "YES");
        assert_eq!(value["decision"], Decision::Yes.as_str());
        assert_eq!(value["bet_amount"], 12.5);

        let event = serde_json::to_value(RunEvent::new(&view)).unwrap();
        assert_eq!(event["market_id"], "m1");
        assert_eq!(event["predictions"], 1);
        assert!(event["elapsed_secs"].is_null());
    }
}
