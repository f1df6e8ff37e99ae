//! Live tables for the backend streams the dashboard watches.

use crate::api::{ApiClient, MarketQuery};
use crate::feed::ChangeFeed;
use crate::live::{LiveTable, fetcher};
use crate::types::{Market, MarketStatus, TrackedTrader};

/// Change stream carrying `markets` rows.
pub const MARKETS_STREAM: &str = "markets";

/// Change stream carrying `tracked_traders` rows.
pub const TRACKED_TRADERS_STREAM: &str = "tracked_traders";

/// Markets, optionally restricted to one status for the full fetch.
///
/// Change events are not filtered by status: a row that moves to another
/// status stays in the collection until the next refresh.
pub fn markets(
    api: &ApiClient,
    feed: &dyn ChangeFeed,
    status: Option<MarketStatus>,
) -> LiveTable<Market> {
    let api = api.clone();
    let fetch = fetcher(move || {
        let api = api.clone();
        let query = MarketQuery {
            status,
            ..MarketQuery::default()
        };
        async move { Ok(api.list_markets(&query).await?) }
    });
    LiveTable::subscribe(MARKETS_STREAM, fetch, feed)
}

/// Traders on the watchlist.
pub fn tracked_traders(api: &ApiClient, feed: &dyn ChangeFeed) -> LiveTable<TrackedTrader> {
    let api = api.clone();
    let fetch = fetcher(move || {
        let api = api.clone();
        async move { Ok(api.tracked_traders().await?) }
    });
    LiveTable::subscribe(TRACKED_TRADERS_STREAM, fetch, feed)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::feed::{BroadcastFeed, RawChange};

    #[tokio::test]
    async fn market_table_follows_feed_even_when_backend_is_down() {
        // Nothing listens on port 9; the initial fetch fails fast.
        let api = ApiClient::new("http://127.0.0.1:9/api", Duration::from_secs(1)).unwrap();
        let feed = BroadcastFeed::new();
        let table = markets(&api, &feed, Some(MarketStatus::Active));
        assert_eq!(table.stream(), MARKETS_STREAM);

        let mut rx = table.watch();
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.is_loading))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert!(state.last_error.is_some());
        assert!(state.items.is_empty());

        feed.publish(
            MARKETS_STREAM,
            RawChange::insert(json!({
                "id": "m1",
                "polymarket_id": "pm1",
                "question": "Will it rain?",
                "status": "active"
            })),
        );
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| !s.items.is_empty()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(state.items[0].question, "Will it rain?");
        assert!(state.last_error.is_some());
    }
}
