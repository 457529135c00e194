use super::cache::RecommendationCache;
use super::resolver::ResolverPolicy;
use crate::models::{DecisionRecord, PortfolioState, RecommendationSet};
use std::sync::Arc;

/// Per-pair decisions for the trading host
///
/// Owns the recommendation cache and the resolution policy. Hosts hold one
/// engine and pass it into every hook call instead of sharing global state.
pub struct DecisionEngine {
    cache: Arc<RecommendationCache>,
    policy: ResolverPolicy,
    pairs: Vec<String>,
}

impl DecisionEngine {
    pub fn new(cache: Arc<RecommendationCache>, policy: ResolverPolicy, pairs: Vec<String>) -> Self {
        Self {
            cache,
            policy,
            pairs,
        }
    }

    pub async fn recommendations(&self, portfolio: &PortfolioState) -> Arc<RecommendationSet> {
        self.cache.get_current(&self.pairs, portfolio).await
    }

    pub async fn decision(&self, pair: &str, portfolio: &PortfolioState) -> DecisionRecord {
        let set = self.recommendations(portfolio).await;
        self.policy.resolve(pair, &set)
    }

    /// Decisions for every configured pair against one recommendation set
    pub async fn decisions(&self, portfolio: &PortfolioState) -> Vec<(String, DecisionRecord)> {
        let set = self.recommendations(portfolio).await;
        self.resolve_all(&set)
    }

    /// Decisions for every configured pair against `set`, without touching the cache
    pub fn resolve_all(&self, set: &RecommendationSet) -> Vec<(String, DecisionRecord)> {
        self.pairs
            .iter()
            .map(|pair| (pair.clone(), self.policy.resolve(pair, set)))
            .collect()
    }
}
