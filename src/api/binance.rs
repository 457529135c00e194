use crate::models::Candle;
use crate::{AdvisorError, Result};
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

pub const BINANCE_API_BASE: &str = "https://api.binance.com";
const DEFAULT_RATE_LIMIT_RPM: u32 = 600;
const MAX_RETRIES: u32 = 3;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// 24 hour rolling window statistics
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker24h {
    pub symbol: String,
    pub last_price: f64,
    pub price_change_percent: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerResponse {
    symbol: String,
    last_price: String,
    price_change_percent: String,
}

/// Binance public market data client
///
/// Cloneable; all clones share one rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<BinanceRateLimiter>,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>, requests_per_minute: u32) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let rpm = NonZeroU32::new(requests_per_minute)
            .or(NonZeroU32::new(DEFAULT_RATE_LIMIT_RPM))
            .unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    /// Rate-limited GET with retry on 429 and server errors
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match self.client.get(&url).query(query).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let body = response.text().await.unwrap_or_default();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "Binance returned {}, retrying in {}s (attempt {}/{})",
                            status,
                            backoff_secs,
                            attempt,
                            MAX_RETRIES
                        );
                        last_error = Some(AdvisorError::Api {
                            status: status.as_u16(),
                            body,
                        });
                        if attempt < MAX_RETRIES {
                            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        }
                        continue;
                    }

                    return Err(AdvisorError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(
                        "Network error: {}, retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    last_error = Some(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error.unwrap_or(AdvisorError::RateLimited))
    }

    /// Candles for `symbol` (e.g. "BTCUSDT"), oldest first
    pub async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.get("/api/v3/klines", &query).await?.json().await?;

        let candles: Vec<Candle> = rows.iter().filter_map(|row| parse_kline(row)).collect();
        if candles.len() < rows.len() {
            tracing::warn!(
                symbol,
                skipped = rows.len() - candles.len(),
                "Skipped malformed kline rows"
            );
        }

        tracing::debug!(symbol, count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    pub async fn ticker_24h(&self, symbol: &str) -> Result<Ticker24h> {
        let query = [("symbol", symbol.to_string())];
        let ticker: TickerResponse = self.get("/api/v3/ticker/24hr", &query).await?.json().await?;

        let parse = |field: &str, value: &str| -> Result<f64> {
            value
                .parse()
                .map_err(|_| AdvisorError::MissingData(format!("{} {}: {:?}", ticker.symbol, field, value)))
        };

        Ok(Ticker24h {
            last_price: parse("lastPrice", &ticker.last_price)?,
            price_change_percent: parse("priceChangePercent", &ticker.price_change_percent)?,
            symbol: ticker.symbol.clone(),
        })
    }
}

/// `[open_time_ms, "open", "high", "low", "close", "volume", ...]`
fn parse_kline(row: &[Value]) -> Option<Candle> {
    let price = |i: usize| -> Option<f64> {
        match row.get(i)? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    };

    let open_time = row.first()?.as_i64()?;
    Some(Candle {
        timestamp: DateTime::<Utc>::from_timestamp_millis(open_time)?,
        open: price(1)?,
        high: price(2)?,
        low: price(3)?,
        close: price(4)?,
        volume: price(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_parse_kline() {
        let row: Vec<Value> = serde_json::from_str(
            r#"[1704067200000,"42000.1","42100.0","41900.5","42050.0","12.5",1704067499999,"0",10,"0","0","0"]"#,
        )
        .unwrap();
        let candle = parse_kline(&row).unwrap();

        assert_eq!(candle.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(candle.open, 42000.1);
        assert_eq!(candle.close, 42050.0);
        assert_eq!(candle.volume, 12.5);
    }

    #[test]
    fn test_parse_kline_rejects_short_rows() {
        let row: Vec<Value> = serde_json::from_str(r#"[1704067200000,"1","2"]"#).unwrap();
        assert!(parse_kline(&row).is_none());
    }

    #[tokio::test]
    async fn test_klines_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "5m".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[[1704067200000,"1.0","2.0","0.5","1.5","100",0,"0",1,"0","0","0"],
                    [1704067500000,"1.5","2.5","1.0","2.0","200",0,"0",1,"0","0","0"]]"#,
            )
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), 600).unwrap();
        let candles = client.klines("BTCUSDT", "5m", 2).await.unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, 2.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ticker_24h() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v3/ticker/24hr")
            .match_query(Matcher::UrlEncoded("symbol".into(), "ETHUSDT".into()))
            .with_status(200)
            .with_body(r#"{"symbol":"ETHUSDT","lastPrice":"2300.50","priceChangePercent":"-3.25","volume":"1"}"#)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), 600).unwrap();
        let ticker = client.ticker_24h("ETHUSDT").await.unwrap();

        assert_eq!(ticker.last_price, 2300.5);
        assert_eq!(ticker.price_change_percent, -3.25);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/24hr")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#)
            .expect(1)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), 600).unwrap();
        let err = client.ticker_24h("NOPE").await.unwrap_err();

        assert!(matches!(err, AdvisorError::Api { status: 400, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_live_ticker() {
        let client = BinanceClient::new(BINANCE_API_BASE, 600).unwrap();
        let ticker = client.ticker_24h("BTCUSDT").await.unwrap();
        assert!(ticker.last_price > 0.0);
    }
}
