use crate::indicators::{format_decimal, format_optional, IndicatorSnapshot};
use crate::models::{Candle, PortfolioState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Most recent OHLCV rows embedded per asset
pub const DEFAULT_MAX_CANDLES: usize = 24;

/// Which request/response shape to ask the advisory endpoint for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStyle {
    /// Flat array of per-pair allocations, fed with raw OHLCV history
    #[default]
    Allocation,
    /// `{analysis, recommendations}` object, fed with indicator snapshots
    Analysis,
}

/// Market data for one asset, in whichever form the prompt style embeds
#[derive(Debug, Clone)]
pub enum AssetData {
    Candles(Vec<Candle>),
    Indicators(IndicatorSnapshot),
    Missing,
}

const ALLOCATION_PREAMBLE: &str = "You are an expert cryptocurrency trading assistant. \
Analyze the market data below for each trading pair and return, for every pair:
1. A trading decision: \"buy\", \"sell\" or \"hold\"
2. For \"buy\": the percentage (0-100) of available capital to allocate
3. For \"sell\": the percentage (0-100) of the current holding to sell
4. For \"hold\": both percentages set to 0
5. buy_amount: the quantity of the base asset to buy, given the available capital and holdings
Use risk-adjusted position sizing. Be conservative.

Respond with a single JSON array and nothing else, using exactly this structure:
[
  {\"pair\": \"BTC/USDT\", \"decision\": \"hold\", \"buy_percentage\": 0, \"sell_percentage\": 0, \"buy_amount\": 0}
]
";

const ANALYSIS_PREAMBLE: &str = "You are a cryptocurrency trading assistant. \
Analyze the market data below and provide short-term trading recommendations.
Goal: win as many trades as possible with moderate profit over the next hour. Keep it safe.

Respond with a single JSON object and nothing else, using exactly this structure:
{
  \"analysis\": \"One line market summary\",
  \"recommendations\": [
    {\"pair\": \"BTC/USDT\", \"decision\": \"buy\", \"buy_percentage\": 10, \"sell_percentage\": 0, \"buy_amount\": 0, \"reason\": \"One line\", \"confidence\": 0.85}
  ]
}
Only include pairs with strong signals. Confidence is between 0.0 and 1.0.
";

/// Renders the advisory request text
///
/// Rendering is deterministic: assets are visited in key order, fields in a
/// fixed order, and every number goes through `format_decimal`.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    style: PromptStyle,
    max_candles: usize,
}

impl PromptAssembler {
    pub fn new(style: PromptStyle, max_candles: usize) -> Self {
        Self { style, max_candles }
    }

    pub fn style(&self) -> PromptStyle {
        self.style
    }

    pub fn build_prompt(
        &self,
        portfolio: &PortfolioState,
        assets: &BTreeMap<String, AssetData>,
    ) -> String {
        match self.style {
            PromptStyle::Allocation => self.build_allocation(portfolio, assets),
            PromptStyle::Analysis => self.build_analysis(portfolio, assets),
        }
    }

    fn build_allocation(
        &self,
        portfolio: &PortfolioState,
        assets: &BTreeMap<String, AssetData>,
    ) -> String {
        let mut prompt = String::from(ALLOCATION_PREAMBLE);

        let pairs: Vec<&str> = assets.keys().map(String::as_str).collect();
        let _ = writeln!(prompt, "\nPairs to analyze: {}", pairs.join(", "));

        let _ = writeln!(prompt, "\nPORTFOLIO:");
        let _ = writeln!(
            prompt,
            "- Available money: {} {}",
            format_decimal(portfolio.free_capital),
            portfolio.quote_currency
        );
        let _ = writeln!(prompt, "- Holdings: {}", render_holdings(portfolio));

        let _ = writeln!(
            prompt,
            "\nRecent OHLCV data per pair (last {} entries, oldest first; time,open,high,low,close,volume):",
            self.max_candles
        );
        for (pair, data) in assets {
            let _ = writeln!(prompt, "\n{}:", pair);
            match data {
                AssetData::Candles(candles) if !candles.is_empty() => {
                    let start = candles.len().saturating_sub(self.max_candles);
                    for c in &candles[start..] {
                        let _ = writeln!(prompt, "{}", render_candle(c));
                    }
                }
                AssetData::Indicators(snapshot) => render_snapshot(&mut prompt, snapshot, None),
                _ => {
                    let _ = writeln!(prompt, "no market data available");
                }
            }
        }

        prompt.push_str("\nUse all of the data above and answer with the JSON array only.\n");
        prompt
    }

    fn build_analysis(
        &self,
        portfolio: &PortfolioState,
        assets: &BTreeMap<String, AssetData>,
    ) -> String {
        let mut prompt = String::from(ANALYSIS_PREAMBLE);

        let _ = writeln!(prompt, "\nPORTFOLIO STATUS:");
        let _ = writeln!(
            prompt,
            "- Free Capital: {} {}",
            format_decimal(portfolio.free_capital),
            portfolio.quote_currency
        );

        let _ = writeln!(prompt, "\nMARKET DATA SUMMARY:");
        for (pair, data) in assets {
            let _ = writeln!(prompt, "\n{}:", pair);
            let holding = portfolio.holding_for_pair(pair);
            match data {
                AssetData::Indicators(snapshot) => {
                    render_snapshot(&mut prompt, snapshot, Some(holding))
                }
                AssetData::Candles(candles) if !candles.is_empty() => {
                    let _ = writeln!(prompt, "- current_holdings: {}", format_decimal(holding));
                    let start = candles.len().saturating_sub(self.max_candles);
                    for c in &candles[start..] {
                        let _ = writeln!(prompt, "- {}", render_candle(c));
                    }
                }
                _ => {
                    let _ = writeln!(prompt, "- no market data available");
                }
            }
        }

        prompt.push_str("\nAnswer with the JSON object only.\n");
        prompt
    }
}

fn render_holdings(portfolio: &PortfolioState) -> String {
    if portfolio.holdings.is_empty() {
        return "none".to_string();
    }
    portfolio
        .holdings
        .iter()
        .map(|(currency, qty)| format!("{} {}", format_decimal(*qty), currency))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_candle(c: &Candle) -> String {
    format!(
        "{},{},{},{},{},{}",
        c.timestamp.format("%Y-%m-%dT%H:%M:%S"),
        format_decimal(c.open),
        format_decimal(c.high),
        format_decimal(c.low),
        format_decimal(c.close),
        format_decimal(c.volume)
    )
}

fn render_snapshot(prompt: &mut String, snapshot: &IndicatorSnapshot, holding: Option<f64>) {
    if let Some(qty) = holding {
        let _ = writeln!(prompt, "- current_holdings: {}", format_decimal(qty));
    }
    let _ = writeln!(prompt, "- current_price: {}", format_decimal(snapshot.current_price));
    for field in &snapshot.fields {
        let _ = writeln!(prompt, "- {}: {}", field.name, format_optional(field.value));
    }
}
