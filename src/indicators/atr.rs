/// Volatility indicators: true range, ATR and normalized ATR
///
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
use crate::models::Candle;

fn true_range(candle: &Candle, prev_close: Option<f64>) -> f64 {
    let range = candle.high - candle.low;
    match prev_close {
        Some(prev) => range
            .max((candle.high - prev).abs())
            .max((candle.low - prev).abs()),
        None => range,
    }
}

/// True range of the most recent candle
pub fn calculate_true_range(candles: &[Candle]) -> Option<f64> {
    let last = candles.last()?;
    let prev_close = candles.len().checked_sub(2).map(|i| candles[i].close);
    Some(true_range(last, prev_close))
}

/// Average True Range with Wilder's smoothing
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| true_range(&w[1], Some(w[0].close)))
        .collect();

    let mut atr = ranges[..period].iter().sum::<f64>() / period as f64;
    for tr in &ranges[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }

    Some(atr)
}

/// ATR as a percentage of the last close
pub fn calculate_natr(candles: &[Candle], period: usize) -> Option<f64> {
    let atr = calculate_atr(candles, period)?;
    let close = candles.last()?.close;
    if close == 0.0 {
        return None;
    }
    Some(atr / close * 100.0)
}
