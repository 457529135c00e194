use crate::config::ResolverSettings;
use crate::models::{pair_symbol, DecisionRecord, Recommendation, RecommendationSet};

/// Decision for `pair`: the first matching recommendation, or hold
///
/// Pairs match on their symbol, so "BTC/USDT", "btc/usdt" and "BTCUSDT" are
/// the same asset.
pub fn resolve(pair: &str, set: &RecommendationSet) -> DecisionRecord {
    find(pair, set).map_or(DecisionRecord::HOLD, record_for)
}

fn find<'a>(pair: &str, set: &'a RecommendationSet) -> Option<&'a Recommendation> {
    let wanted = pair_symbol(pair);
    set.recommendations
        .iter()
        .find(|rec| rec.pair == pair || pair_symbol(&rec.pair) == wanted)
}

fn record_for(rec: &Recommendation) -> DecisionRecord {
    DecisionRecord {
        decision: rec.decision,
        buy_percentage: rec.buy_percentage,
        sell_percentage: rec.sell_percentage,
        buy_amount: rec.buy_amount.unwrap_or(0.0),
    }
}

/// Resolution with an optional confidence floor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverPolicy {
    /// Recommendations carrying a lower confidence resolve to hold.
    /// Recommendations without a confidence are not gated.
    pub min_confidence: Option<f64>,
}

impl ResolverPolicy {
    pub fn new(min_confidence: Option<f64>) -> Self {
        Self { min_confidence }
    }

    pub fn from_settings(settings: &ResolverSettings) -> Self {
        Self::new(settings.min_confidence)
    }

    pub fn resolve(&self, pair: &str, set: &RecommendationSet) -> DecisionRecord {
        let Some(rec) = find(pair, set) else {
            return DecisionRecord::HOLD;
        };

        if let (Some(floor), Some(confidence)) = (self.min_confidence, rec.confidence) {
            if confidence < floor {
                tracing::debug!(
                    pair = %pair,
                    confidence,
                    floor,
                    "Recommendation below confidence floor, holding"
                );
                return DecisionRecord::HOLD;
            }
        }

        record_for(rec)
    }
}
