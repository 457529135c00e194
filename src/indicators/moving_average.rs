/// Calculate Simple Moving Average (SMA) of the last `period` values
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate Exponential Moving Average (EMA), seeded with the SMA of the first `period` values
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = calculate_sma(&prices[..period], period)?;
    for price in &prices[period..] {
        ema = (price - ema) * multiplier + ema;
    }

    Some(ema)
}

/// Calculate Weighted Moving Average (WMA), linear weights with the newest value heaviest
pub fn calculate_wma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let window = &prices[prices.len() - period..];
    let weighted: f64 = window
        .iter()
        .enumerate()
        .map(|(i, p)| p * (i + 1) as f64)
        .sum();
    let weight_sum = (period * (period + 1)) as f64 / 2.0;

    Some(weighted / weight_sum)
}

/// Absolute Price Oscillator: fast SMA minus slow SMA
pub fn calculate_apo(prices: &[f64], fast: usize, slow: usize) -> Option<f64> {
    Some(calculate_sma(prices, fast)? - calculate_sma(prices, slow)?)
}

/// Percentage Price Oscillator: APO as a percentage of the slow SMA
pub fn calculate_ppo(prices: &[f64], fast: usize, slow: usize) -> Option<f64> {
    let slow_ma = calculate_sma(prices, slow)?;
    if slow_ma == 0.0 {
        return None;
    }
    Some((calculate_sma(prices, fast)? - slow_ma) / slow_ma * 100.0)
}
