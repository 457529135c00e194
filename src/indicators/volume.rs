/// Volume indicators: OBV, accumulation/distribution, money flow index
use crate::models::Candle;

/// On-Balance Volume accumulated over the whole window
pub fn calculate_obv(candles: &[Candle]) -> Option<f64> {
    let first = candles.first()?;
    let mut obv = first.volume;

    for w in candles.windows(2) {
        if w[1].close > w[0].close {
            obv += w[1].volume;
        } else if w[1].close < w[0].close {
            obv -= w[1].volume;
        }
    }

    Some(obv)
}

/// Chaikin Accumulation/Distribution line
pub fn calculate_ad(candles: &[Candle]) -> Option<f64> {
    if candles.is_empty() {
        return None;
    }

    let ad = candles
        .iter()
        .map(|c| {
            let range = c.high - c.low;
            if range == 0.0 {
                0.0
            } else {
                ((c.close - c.low) - (c.high - c.close)) / range * c.volume
            }
        })
        .sum();

    Some(ad)
}

/// Money Flow Index (volume-weighted RSI)
pub fn calculate_mfi(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let typical = |c: &Candle| (c.high + c.low + c.close) / 3.0;
    let window = &candles[candles.len() - period - 1..];

    let mut positive = 0.0;
    let mut negative = 0.0;
    for w in window.windows(2) {
        let (prev, curr) = (typical(&w[0]), typical(&w[1]));
        let flow = curr * w[1].volume;
        if curr > prev {
            positive += flow;
        } else if curr < prev {
            negative += flow;
        }
    }

    if negative == 0.0 {
        return Some(100.0);
    }
    let ratio = positive / negative;
    Some(100.0 - 100.0 / (1.0 + ratio))
}
