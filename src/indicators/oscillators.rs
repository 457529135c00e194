/// Momentum oscillators over OHLCV candles
use crate::models::Candle;

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Williams %R: position of the close inside the high/low range, from -100 to 0
pub fn calculate_willr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let window = &candles[candles.len() - period..];
    let highest = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let lowest = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let close = window[window.len() - 1].close;

    if highest == lowest {
        return Some(0.0);
    }
    Some((highest - close) / (highest - lowest) * -100.0)
}

/// Commodity Channel Index
pub fn calculate_cci(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let typical: Vec<f64> = candles[candles.len() - period..]
        .iter()
        .map(|c| (c.high + c.low + c.close) / 3.0)
        .collect();
    let mean = typical.iter().sum::<f64>() / period as f64;
    let mean_deviation = typical.iter().map(|tp| (tp - mean).abs()).sum::<f64>() / period as f64;

    if mean_deviation == 0.0 {
        return Some(0.0);
    }
    let last = typical[typical.len() - 1];
    Some((last - mean) / (0.015 * mean_deviation))
}

/// Rate of change in percent over `period` candles
pub fn calculate_roc(candles: &[Candle], period: usize) -> Option<f64> {
    let prices = closes(candles);
    if prices.len() < period + 1 {
        return None;
    }

    let past = prices[prices.len() - 1 - period];
    if past == 0.0 {
        return None;
    }
    Some((prices[prices.len() - 1] / past - 1.0) * 100.0)
}

/// Momentum: close minus the close `period` candles ago
pub fn calculate_mom(candles: &[Candle], period: usize) -> Option<f64> {
    let prices = closes(candles);
    if prices.len() < period + 1 {
        return None;
    }
    Some(prices[prices.len() - 1] - prices[prices.len() - 1 - period])
}

/// Balance of Power of the last candle
pub fn calculate_bop(candles: &[Candle]) -> Option<f64> {
    let last = candles.last()?;
    let range = last.high - last.low;
    if range == 0.0 {
        return Some(0.0);
    }
    Some((last.close - last.open) / range)
}
