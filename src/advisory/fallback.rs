use crate::market::SnapshotSource;
use crate::models::{Decision, MarketSnapshot, Provenance, Recommendation, RecommendationSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Thresholds of the local rule used when no live advice is available
///
/// The 24h change must exceed the trigger in the direction of the snapshot's
/// indicator; the percentage is then `|change| * scale` clamped to the range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackThresholds {
    pub buy_trigger_pct: f64,
    pub sell_trigger_pct: f64,
    pub buy_scale: f64,
    pub buy_min_pct: f64,
    pub buy_max_pct: f64,
    pub sell_scale: f64,
    pub sell_min_pct: f64,
    pub sell_max_pct: f64,
}

impl Default for FallbackThresholds {
    fn default() -> Self {
        Self {
            buy_trigger_pct: 2.0,
            sell_trigger_pct: -2.0,
            buy_scale: 2.0,
            buy_min_pct: 5.0,
            buy_max_pct: 15.0,
            sell_scale: 3.0,
            sell_min_pct: 10.0,
            sell_max_pct: 50.0,
        }
    }
}

/// Rule-based recommendations from already collected snapshots
///
/// Reads local data only and never fails: an asset without a snapshot, or a
/// snapshot without a 24h change, resolves to hold.
#[derive(Debug, Clone, Default)]
pub struct FallbackSynthesizer {
    thresholds: FallbackThresholds,
}

impl FallbackSynthesizer {
    pub fn new(thresholds: FallbackThresholds) -> Self {
        Self { thresholds }
    }

    pub fn synthesize(
        &self,
        assets: &[String],
        source: &dyn SnapshotSource,
        created_at: DateTime<Utc>,
    ) -> RecommendationSet {
        RecommendationSet::new(
            self.recommendations(assets, source),
            created_at,
            Provenance::Fallback,
        )
    }

    /// One recommendation per asset, in asset order
    pub fn recommendations(
        &self,
        assets: &[String],
        source: &dyn SnapshotSource,
    ) -> Vec<Recommendation> {
        assets
            .iter()
            .map(|pair| {
                let snapshot = source.snapshot(pair);
                if snapshot.is_none() {
                    tracing::debug!(pair = %pair, "No snapshot for fallback, holding");
                }
                self.recommend(pair, snapshot.as_ref())
            })
            .collect()
    }

    pub fn recommend(&self, pair: &str, snapshot: Option<&MarketSnapshot>) -> Recommendation {
        let t = &self.thresholds;
        let (indicator, change) = snapshot
            .map(|s| (s.indicator, s.percent_change_24h.unwrap_or(0.0)))
            .unwrap_or((Decision::Hold, 0.0));

        let mut rec = Recommendation::hold(pair);
        if !change.is_finite() {
            return rec;
        }

        match indicator {
            Decision::Buy if change > t.buy_trigger_pct => {
                rec.decision = Decision::Buy;
                rec.buy_percentage = scaled(change, t.buy_scale, t.buy_min_pct, t.buy_max_pct);
            }
            Decision::Sell if change < t.sell_trigger_pct => {
                rec.decision = Decision::Sell;
                rec.sell_percentage = scaled(change, t.sell_scale, t.sell_min_pct, t.sell_max_pct);
            }
            _ => {}
        }

        tracing::debug!(
            pair = %pair,
            decision = %rec.decision,
            change_24h = change,
            "Fallback recommendation"
        );
        rec
    }
}

fn scaled(change: f64, scale: f64, min: f64, max: f64) -> f64 {
    // clamp() panics when min > max
    (change.abs() * scale).max(min).min(max)
}
