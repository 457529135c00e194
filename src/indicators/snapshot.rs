use super::*;
use crate::models::Candle;

/// Lagged close prices, by label and age in minutes
const LAGGED_PRICES: &[(&str, u32)] = &[
    ("previous_price_5m", 5),
    ("previous_price_10m", 10),
    ("previous_price_15m", 15),
    ("previous_price_30m", 30),
    ("previous_price_45m", 45),
    ("previous_price_1h", 60),
    ("previous_price_2h", 120),
    ("previous_price_3h", 180),
    ("previous_price_6h", 360),
    ("previous_price_8h", 480),
    ("previous_price_12h", 720),
];

/// Percentage change horizons, by label and minutes
const CHANGES: &[(&str, u32)] = &[
    ("change_15m", 15),
    ("change_30m", 30),
    ("change_45m", 45),
    ("change_1h", 60),
    ("change_2h", 120),
    ("change_3h", 180),
    ("change_12h", 720),
];

/// One named numeric value of a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotField {
    pub name: &'static str,
    pub value: Option<f64>,
}

/// Per-asset market state rendered into the advisory request
///
/// Built once per refresh cycle from the candle window and never mutated.
/// Fields keep a fixed order so identical candles always render identically.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub pair: String,
    pub current_price: f64,
    pub fields: Vec<SnapshotField>,
}

impl IndicatorSnapshot {
    /// Build a snapshot from candles spaced `interval_minutes` apart (oldest first)
    ///
    /// Returns `None` for an empty window. Lag horizons that are not a whole
    /// number of candles, or reach past the window, are left out.
    pub fn from_candles(pair: &str, candles: &[Candle], interval_minutes: u32) -> Option<Self> {
        let current = candles.last()?.close;
        let prices: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let lagged = |minutes: u32| -> Option<f64> {
            if interval_minutes == 0 || minutes % interval_minutes != 0 {
                return None;
            }
            let offset = (minutes / interval_minutes) as usize;
            prices.len().checked_sub(offset + 1).map(|i| prices[i])
        };

        let mut fields = Vec::with_capacity(64);
        let mut push = |name: &'static str, value: Option<f64>| {
            fields.push(SnapshotField { name, value });
        };

        for (name, minutes) in LAGGED_PRICES {
            if let Some(price) = lagged(*minutes) {
                push(*name, Some(price));
            }
        }
        for (name, minutes) in CHANGES {
            if let Some(past) = lagged(*minutes).filter(|p| *p != 0.0) {
                push(*name, Some((current - past) / past * 100.0));
            }
        }

        let window_max = candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let window_min = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        push("last_available_max", Some(window_max));
        push("last_available_min", Some(window_min));
        push(
            "current_to_max_ratio",
            (window_max != 0.0).then(|| current / window_max),
        );
        push(
            "current_to_min_ratio",
            (window_min != 0.0).then(|| current / window_min),
        );

        // Momentum
        push("rsi", calculate_rsi(&prices, 14));
        push("willr", calculate_willr(candles, 14));
        push("cci", calculate_cci(candles, 14));
        push("roc", calculate_roc(candles, 10));
        push("mom", calculate_mom(candles, 10));
        push("apo", calculate_apo(&prices, 12, 26));
        push("ppo", calculate_ppo(&prices, 12, 26));
        push("bop", calculate_bop(candles));

        // Volatility
        push("atr", calculate_atr(candles, 14));
        push("natr", calculate_natr(candles, 14));
        push("trange", calculate_true_range(candles));

        // Trend
        for period in [10, 20, 50, 100, 200] {
            push(ema_name(period), calculate_ema(&prices, period));
        }
        for period in [10, 20, 50, 100, 200] {
            push(sma_name(period), calculate_sma(&prices, period));
        }
        push("wma20", calculate_wma(&prices, 20));

        // Volume
        push("obv", calculate_obv(candles));
        push("ad", calculate_ad(candles));
        push("mfi", calculate_mfi(candles, 14));

        Some(Self {
            pair: pair.to_string(),
            current_price: current,
            fields,
        })
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.value)
    }
}

fn ema_name(period: usize) -> &'static str {
    match period {
        10 => "ema10",
        20 => "ema20",
        50 => "ema50",
        100 => "ema100",
        _ => "ema200",
    }
}

fn sma_name(period: usize) -> &'static str {
    match period {
        10 => "sma10",
        20 => "sma20",
        50 => "sma50",
        100 => "sma100",
        _ => "sma200",
    }
}

/// Format a number with at most 4 fractional digits, trailing zeros trimmed
///
/// Bounds prompt size and keeps float noise from changing the request text.
pub fn format_decimal(value: f64) -> String {
    if !value.is_finite() {
        return "n/a".to_string();
    }

    let formatted = format!("{:.4}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-0" => "0".to_string(),
        s => s.to_string(),
    }
}

/// Format an optional value, `n/a` when missing
pub fn format_optional(value: Option<f64>) -> String {
    value.map(format_decimal).unwrap_or_else(|| "n/a".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let p = 100.0 + i as f64 * 0.5;
                Candle {
                    timestamp: start + Duration::minutes(5 * i as i64),
                    open: p - 0.2,
                    high: p + 1.0,
                    low: p - 1.0,
                    close: p,
                    volume: 1000.0 + i as f64,
                }
            })
            .collect()
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(1.23456789), "1.2346");
        assert_eq!(format_decimal(2.5), "2.5");
        assert_eq!(format_decimal(100.0), "100");
        assert_eq!(format_decimal(0.0), "0");
        assert_eq!(format_decimal(-0.00001), "0");
        assert_eq!(format_decimal(-3.10), "-3.1");
        assert_eq!(format_decimal(f64::NAN), "n/a");
    }

    #[test]
    fn test_empty_window_has_no_snapshot() {
        assert!(IndicatorSnapshot::from_candles("BTC/USDT", &[], 5).is_none());
    }

    #[test]
    fn test_lagged_prices_on_5m_candles() {
        let window = candles(300);
        let snapshot = IndicatorSnapshot::from_candles("BTC/USDT", &window, 5).unwrap();

        assert_eq!(snapshot.current_price, window[299].close);
        assert_eq!(snapshot.value("previous_price_5m"), Some(window[298].close));
        assert_eq!(snapshot.value("previous_price_1h"), Some(window[287].close));
        assert_eq!(snapshot.value("previous_price_12h"), Some(window[155].close));
        assert!(snapshot.value("ema200").is_some());
        assert!(snapshot.value("rsi").is_some());
    }

    #[test]
    fn test_horizons_not_aligned_with_interval_are_skipped() {
        let window = candles(100);
        let snapshot = IndicatorSnapshot::from_candles("ETH/USDT", &window, 20).unwrap();

        assert!(snapshot.value("previous_price_5m").is_none());
        assert!(snapshot.fields.iter().all(|f| f.name != "previous_price_45m"));
        assert_eq!(snapshot.value("previous_price_1h"), Some(window[96].close));
    }

    #[test]
    fn test_field_order_is_stable() {
        let window = candles(60);
        let a = IndicatorSnapshot::from_candles("BTC/USDT", &window, 5).unwrap();
        let b = IndicatorSnapshot::from_candles("BTC/USDT", &window, 5).unwrap();

        let names_a: Vec<_> = a.fields.iter().map(|f| f.name).collect();
        let names_b: Vec<_> = b.fields.iter().map(|f| f.name).collect();
        assert_eq!(names_a, names_b);
        assert_eq!(names_a[0], "previous_price_5m");
        assert_eq!(*names_a.last().unwrap(), "mfi");
    }
}
