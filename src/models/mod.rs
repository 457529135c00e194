use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(rename = "open_time", deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// RFC 3339, or a naive `%Y-%m-%dT%H:%M:%S` read as UTC
fn flexible_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Trading decision for one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Buy,
    Sell,
    #[default]
    Hold,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Buy => "buy",
            Decision::Sell => "sell",
            Decision::Hold => "hold",
        }
    }

    /// Case-insensitive parse, `None` for anything outside buy/sell/hold
    pub fn parse_lenient(value: &str) -> Option<Decision> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(Decision::Buy),
            "sell" => Some(Decision::Sell),
            "hold" => Some(Decision::Hold),
            _ => None,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deserialize a decision string, mapping unknown values (e.g. "unknown") to hold
fn lenient_decision<'de, D>(deserializer: D) -> std::result::Result<Decision, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .and_then(Decision::parse_lenient)
        .unwrap_or_default())
}

/// One validated recommendation for an asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub pair: String,
    pub decision: Decision,
    /// Fraction of free capital to deploy (0-100), buy only
    pub buy_percentage: f64,
    /// Fraction of the current holding to liquidate (0-100), sell only
    pub sell_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Recommendation {
    pub fn hold(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            decision: Decision::Hold,
            buy_percentage: 0.0,
            sell_percentage: 0.0,
            buy_amount: None,
            reason: None,
            confidence: None,
        }
    }
}

/// Where a recommendation set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Live,
    Fallback,
}

/// Immutable set of recommendations produced by one refresh
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationSet {
    pub id: Uuid,
    pub recommendations: Vec<Recommendation>,
    pub created_at: DateTime<Utc>,
    pub provenance: Provenance,
    /// One-line market summary, when the advisory response carried one
    pub analysis: Option<String>,
}

impl RecommendationSet {
    pub fn new(
        recommendations: Vec<Recommendation>,
        created_at: DateTime<Utc>,
        provenance: Provenance,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recommendations,
            created_at,
            provenance,
            analysis: None,
        }
    }

    pub fn with_analysis(mut self, analysis: Option<String>) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn is_fallback(&self) -> bool {
        self.provenance == Provenance::Fallback
    }

    /// Age of the set at `now`, negative if it was created in the future
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    pub fn len(&self) -> usize {
        self.recommendations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recommendations.is_empty()
    }
}

/// Wallet state supplied by the trading host on every call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    /// Free capital in the quote currency
    pub free_capital: f64,
    pub quote_currency: String,
    /// Held quantity per base currency (e.g. "BTC" -> 0.25)
    pub holdings: BTreeMap<String, f64>,
}

impl PortfolioState {
    pub fn new(free_capital: f64, quote_currency: impl Into<String>) -> Self {
        Self {
            free_capital,
            quote_currency: quote_currency.into(),
            holdings: BTreeMap::new(),
        }
    }

    pub fn with_holding(mut self, currency: impl Into<String>, quantity: f64) -> Self {
        self.holdings.insert(currency.into(), quantity);
        self
    }

    /// Held quantity of the base currency of `pair` ("BTC/USDT" -> BTC)
    pub fn holding_for_pair(&self, pair: &str) -> f64 {
        let base = pair.split('/').next().unwrap_or(pair);
        self.holdings.get(base).copied().unwrap_or(0.0)
    }
}

/// Normalized decision consumed by the host's entry/exit/sizing hooks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision: Decision,
    pub buy_percentage: f64,
    pub sell_percentage: f64,
    pub buy_amount: f64,
}

impl DecisionRecord {
    pub const HOLD: DecisionRecord = DecisionRecord {
        decision: Decision::Hold,
        buy_percentage: 0.0,
        sell_percentage: 0.0,
        buy_amount: 0.0,
    };
}

impl Default for DecisionRecord {
    fn default() -> Self {
        Self::HOLD
    }
}

/// Last collected market data for one pair, as persisted by the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub pair: String,
    /// Coarse directional indicator derived from the 24h change
    #[serde(default, deserialize_with = "lenient_decision")]
    pub indicator: Decision,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub percent_change_24h: Option<f64>,
    #[serde(default)]
    pub ohlcv: Vec<Candle>,
}

/// Filesystem-friendly symbol for a pair ("BTC/USDT" -> "BTCUSDT")
pub fn pair_symbol(pair: &str) -> String {
    pair.replace('/', "").to_uppercase()
}
