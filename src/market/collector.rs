use super::SnapshotStore;
use crate::api::BinanceClient;
use crate::config::MarketSettings;
use crate::models::{pair_symbol, Candle, Decision, MarketSnapshot};
use crate::Result;

/// 24h change (percent) beyond which the coarse indicator leaves hold
const INDICATOR_THRESHOLD_PCT: f64 = 1.0;

/// Outcome of one collection pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectSummary {
    pub fetched: Vec<String>,
    pub skipped: Vec<String>,
}

/// Fetches market data and persists one snapshot per pair
pub struct MarketCollector {
    client: BinanceClient,
    store: SnapshotStore,
    interval: String,
    limit: u32,
    downsample: usize,
}

impl MarketCollector {
    pub fn new(client: BinanceClient, store: SnapshotStore, settings: &MarketSettings) -> Self {
        Self {
            client,
            store,
            interval: settings.interval.clone(),
            limit: settings.limit,
            downsample: settings.downsample.max(1),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Fetch, reduce and persist the snapshot for `pair`
    pub async fn collect(&self, pair: &str) -> Result<MarketSnapshot> {
        let symbol = pair_symbol(pair);

        let candles = self.client.klines(&symbol, &self.interval, self.limit).await?;
        let ohlcv = downsample(candles, self.downsample);
        let ticker = self.client.ticker_24h(&symbol).await?;

        let snapshot = MarketSnapshot {
            pair: pair.to_string(),
            indicator: indicator_for_change(ticker.price_change_percent),
            price: Some(ticker.last_price),
            percent_change_24h: Some(ticker.price_change_percent),
            ohlcv,
        };

        self.store.save(&snapshot)?;
        tracing::info!(
            pair = %pair,
            candles = snapshot.ohlcv.len(),
            indicator = %snapshot.indicator,
            "Saved market snapshot"
        );
        Ok(snapshot)
    }

    /// Collect every pair; failures are logged and skipped
    pub async fn collect_all(&self, pairs: &[String]) -> CollectSummary {
        let mut summary = CollectSummary::default();

        for pair in pairs {
            match self.collect(pair).await {
                Ok(_) => summary.fetched.push(pair.clone()),
                Err(e) => {
                    tracing::warn!(pair = %pair, "Failed to collect market data: {}", e);
                    summary.skipped.push(pair.clone());
                }
            }
        }

        tracing::info!(
            fetched = summary.fetched.len(),
            skipped = summary.skipped.len(),
            "Market data collection complete"
        );
        summary
    }
}

/// Keep every `step`th candle, then drop the last one (still forming)
fn downsample(candles: Vec<Candle>, step: usize) -> Vec<Candle> {
    let mut kept: Vec<Candle> = candles.into_iter().step_by(step.max(1)).collect();
    kept.pop();
    kept
}

pub fn indicator_for_change(percent_change_24h: f64) -> Decision {
    if percent_change_24h > INDICATOR_THRESHOLD_PCT {
        Decision::Buy
    } else if percent_change_24h < -INDICATOR_THRESHOLD_PCT {
        Decision::Sell
    } else {
        Decision::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use mockito::Matcher;

    fn candles(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Candle {
                timestamp: start + Duration::minutes(5 * i as i64),
                open: i as f64,
                high: i as f64,
                low: i as f64,
                close: i as f64,
                volume: 1.0,
            })
            .collect()
    }

    fn kline_body(n: usize) -> String {
        let rows: Vec<String> = (0..n)
            .map(|i| {
                format!(
                    r#"[{},"{}","{}","{}","{}","10",0,"0",1,"0","0","0"]"#,
                    1704067200000i64 + (i as i64) * 300_000,
                    i,
                    i + 1,
                    i,
                    i
                )
            })
            .collect();
        format!("[{}]", rows.join(","))
    }

    fn settings(dir: &std::path::Path) -> MarketSettings {
        MarketSettings {
            data_dir: dir.to_path_buf(),
            limit: 12,
            ..MarketSettings::default()
        }
    }

    #[test]
    fn test_downsample_keeps_every_fourth_and_drops_last() {
        let kept = downsample(candles(12), 4);

        // Indices 0, 4, 8 kept, then 8 dropped
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].close, 0.0);
        assert_eq!(kept[1].close, 4.0);
        assert!(downsample(Vec::new(), 4).is_empty());
    }

    #[test]
    fn test_indicator_for_change() {
        assert_eq!(indicator_for_change(1.5), Decision::Buy);
        assert_eq!(indicator_for_change(-1.01), Decision::Sell);
        assert_eq!(indicator_for_change(1.0), Decision::Hold);
        assert_eq!(indicator_for_change(0.0), Decision::Hold);
    }

    #[tokio::test]
    async fn test_collect_persists_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let _klines = server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_status(200)
            .with_body(kline_body(12))
            .create_async()
            .await;
        let _ticker = server
            .mock("GET", "/api/v3/ticker/24hr")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_status(200)
            .with_body(r#"{"symbol":"BTCUSDT","lastPrice":"43000","priceChangePercent":"2.5"}"#)
            .create_async()
            .await;

        let dir = std::env::temp_dir().join(format!("tradeadvisor-collect-{}", uuid::Uuid::new_v4()));
        let client = BinanceClient::new(server.url(), 600).unwrap();
        let collector = MarketCollector::new(client, SnapshotStore::new(&dir), &settings(&dir));

        let snapshot = collector.collect("BTC/USDT").await.unwrap();

        assert_eq!(snapshot.indicator, Decision::Buy);
        assert_eq!(snapshot.price, Some(43000.0));
        assert_eq!(snapshot.ohlcv.len(), 2);
        assert_eq!(collector.store().load("BTC/USDT"), Some(snapshot));
    }

    #[tokio::test]
    async fn test_collect_all_skips_failing_pairs() {
        let mut server = mockito::Server::new_async().await;
        let _klines_ok = server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::UrlEncoded("symbol".into(), "ETHUSDT".into()))
            .with_status(200)
            .with_body(kline_body(8))
            .create_async()
            .await;
        let _ticker_ok = server
            .mock("GET", "/api/v3/ticker/24hr")
            .match_query(Matcher::UrlEncoded("symbol".into(), "ETHUSDT".into()))
            .with_status(200)
            .with_body(r#"{"symbol":"ETHUSDT","lastPrice":"2300","priceChangePercent":"-4"}"#)
            .create_async()
            .await;
        let _klines_bad = server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::UrlEncoded("symbol".into(), "LUNAUSDT".into()))
            .with_status(400)
            .with_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#)
            .create_async()
            .await;

        let dir = std::env::temp_dir().join(format!("tradeadvisor-collect-{}", uuid::Uuid::new_v4()));
        let client = BinanceClient::new(server.url(), 600).unwrap();
        let collector = MarketCollector::new(client, SnapshotStore::new(&dir), &settings(&dir));

        let summary = collector
            .collect_all(&["LUNA/USDT".to_string(), "ETH/USDT".to_string()])
            .await;

        assert_eq!(summary.fetched, vec!["ETH/USDT"]);
        assert_eq!(summary.skipped, vec!["LUNA/USDT"]);
        assert_eq!(collector.store().load("ETH/USDT").unwrap().indicator, Decision::Sell);
    }
}
