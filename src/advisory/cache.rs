//! Recommendation cache with single-flight refresh
//!
//! At most one refresh runs per cache. Callers arriving while it is in flight
//! get the previous set, or a fresh fallback set when there is none, and never
//! wait on the network. Every refresh outcome is persisted so the validity
//! window holds across process restarts.

use super::client::{request_with_failover, AdvisoryTransport};
use super::credentials::CredentialPool;
use super::fallback::FallbackSynthesizer;
use super::parser;
use super::prompt::{AssetData, PromptAssembler, PromptStyle};
use super::rate_gate::RateGate;
use crate::config::Settings;
use crate::indicators::IndicatorSnapshot;
use crate::market::SnapshotSource;
use crate::models::{PortfolioState, Provenance, Recommendation, RecommendationSet};
use crate::persistence::{write_atomic, JsonFile};
use crate::AdvisorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Why a refresh produced a fallback set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The rate gate refused the call
    RateLimit,
    NoCredentials,
    AllCredentialsRateLimited,
    /// Transport failure or non-2xx on every credential tried
    AdvisoryError,
    ParseFailure,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::RateLimit => "rate_limit",
            FallbackReason::NoCredentials => "no_credentials",
            FallbackReason::AllCredentialsRateLimited => "all_credentials_rate_limited",
            FallbackReason::AdvisoryError => "advisory_error",
            FallbackReason::ParseFailure => "parse_failure",
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted refresh outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub timestamp: DateTime<Utc>,
    pub result: Vec<Recommendation>,
    pub fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
}

impl CacheRecord {
    fn from_outcome(outcome: &RefreshOutcome) -> Self {
        let set = &outcome.set;
        Self {
            timestamp: set.created_at,
            result: set.recommendations.clone(),
            fallback: set.is_fallback(),
            reason: outcome.reason.map(|r| r.as_str().to_string()),
            error: outcome.error.clone(),
            analysis: set.analysis.clone(),
            id: set.id,
        }
    }

    fn into_set(self) -> RecommendationSet {
        let provenance = if self.fallback {
            Provenance::Fallback
        } else {
            Provenance::Live
        };
        RecommendationSet {
            id: self.id,
            recommendations: self.result,
            created_at: self.timestamp,
            provenance,
            analysis: self.analysis,
        }
    }
}

/// Observable cache state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Valid { expired: bool, provenance: Provenance },
    Refreshing,
}

struct RefreshOutcome {
    set: RecommendationSet,
    reason: Option<FallbackReason>,
    error: Option<String>,
}

impl RefreshOutcome {
    fn live(set: RecommendationSet) -> Self {
        Self {
            set,
            reason: None,
            error: None,
        }
    }
}

/// State touched only by the refresh in flight
struct Refresher {
    gate: RateGate,
    pool: CredentialPool,
    transport: Arc<dyn AdvisoryTransport>,
    assembler: PromptAssembler,
}

pub struct RecommendationCache {
    validity: chrono::Duration,
    store: JsonFile<CacheRecord>,
    raw_response_file: Option<PathBuf>,
    candle_interval_minutes: u32,
    current: RwLock<Option<Arc<RecommendationSet>>>,
    refresher: Mutex<Refresher>,
    fallback: FallbackSynthesizer,
    source: Arc<dyn SnapshotSource>,
}

impl RecommendationCache {
    pub fn new(
        settings: &Settings,
        transport: Arc<dyn AdvisoryTransport>,
        source: Arc<dyn SnapshotSource>,
    ) -> Self {
        let gate = RateGate::new(
            settings.rate_gate_path(),
            Duration::from_secs(settings.cache.min_call_interval_secs),
        );
        let pool = CredentialPool::new(&settings.llm.api_keys)
            .with_cursor_file(settings.credential_cursor_path());
        let assembler = PromptAssembler::new(settings.llm.prompt_style, settings.llm.max_candles);

        let store = JsonFile::new(settings.cache_record_path());
        let previous = store.read_or_none().map(|r: CacheRecord| Arc::new(r.into_set()));

        let validity_secs = settings.cache.validity_secs.min(u64::from(u32::MAX)) as i64;
        Self {
            validity: chrono::Duration::seconds(validity_secs),
            store,
            raw_response_file: settings.cache.raw_response_file.clone(),
            candle_interval_minutes: settings.candle_interval_minutes(),
            current: RwLock::new(previous),
            refresher: Mutex::new(Refresher {
                gate,
                pool,
                transport,
                assembler,
            }),
            fallback: FallbackSynthesizer::new(settings.fallback.clone()),
            source,
        }
    }

    pub async fn get_current(
        &self,
        assets: &[String],
        portfolio: &PortfolioState,
    ) -> Arc<RecommendationSet> {
        self.get_current_at(Utc::now(), assets, portfolio).await
    }

    /// Current recommendation set at `now`, refreshing it if needed
    ///
    /// Never fails: every error path ends in a fallback set.
    pub async fn get_current_at(
        &self,
        now: DateTime<Utc>,
        assets: &[String],
        portfolio: &PortfolioState,
    ) -> Arc<RecommendationSet> {
        if let Some(set) = self.fresh_current(now).await {
            tracing::debug!(id = %set.id, "Recommendation cache hit");
            return set;
        }

        let mut refresher = match self.refresher.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if let Some(previous) = self.current.read().await.clone() {
                    tracing::debug!(id = %previous.id, "Refresh in flight, serving previous set");
                    return previous;
                }
                tracing::debug!("Refresh in flight and no previous set, serving fallback");
                return Arc::new(self.fallback.synthesize(assets, self.source.as_ref(), now));
            }
        };

        // Another caller may have completed a refresh before we took the lock
        if let Some(set) = self.fresh_current(now).await {
            return set;
        }

        if let Some(set) = self.persisted_fresh(now) {
            tracing::info!(id = %set.id, "Reusing persisted recommendation set");
            let set = Arc::new(set);
            *self.current.write().await = Some(set.clone());
            return set;
        }

        let outcome = self.refresh(&mut refresher, now, assets, portfolio).await;
        if let Err(e) = self.store.write(&CacheRecord::from_outcome(&outcome)) {
            tracing::error!("Failed to persist recommendation cache: {}", e);
        }

        let set = Arc::new(outcome.set);
        *self.current.write().await = Some(set.clone());
        set
    }

    /// Latest set held in memory, whatever its age
    pub async fn current(&self) -> Option<Arc<RecommendationSet>> {
        self.current.read().await.clone()
    }

    pub async fn state(&self) -> CacheState {
        self.state_at(Utc::now()).await
    }

    pub async fn state_at(&self, now: DateTime<Utc>) -> CacheState {
        if self.refresher.try_lock().is_err() {
            return CacheState::Refreshing;
        }
        match self.current.read().await.as_deref() {
            None => CacheState::Empty,
            Some(set) => CacheState::Valid {
                expired: !self.is_fresh(set, now),
                provenance: set.provenance,
            },
        }
    }

    fn is_fresh(&self, set: &RecommendationSet, now: DateTime<Utc>) -> bool {
        let age = set.age_at(now);
        age >= chrono::Duration::zero() && age < self.validity
    }

    async fn fresh_current(&self, now: DateTime<Utc>) -> Option<Arc<RecommendationSet>> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|set| self.is_fresh(set, now))
            .cloned()
    }

    fn persisted_fresh(&self, now: DateTime<Utc>) -> Option<RecommendationSet> {
        let set = self.store.read_or_none()?.into_set();
        self.is_fresh(&set, now).then_some(set)
    }

    async fn refresh(
        &self,
        refresher: &mut Refresher,
        now: DateTime<Utc>,
        assets: &[String],
        portfolio: &PortfolioState,
    ) -> RefreshOutcome {
        if refresher.pool.enabled_count() == 0 {
            return self.fallback_outcome(FallbackReason::NoCredentials, None, assets, now);
        }
        if !refresher.gate.allow_call_at(now) {
            return self.fallback_outcome(FallbackReason::RateLimit, None, assets, now);
        }

        let data = self.asset_data(assets, refresher.assembler.style());
        let prompt = refresher.assembler.build_prompt(portfolio, &data);
        tracing::debug!(chars = prompt.len(), "Requesting advisory recommendations");

        let outcome =
            request_with_failover(refresher.transport.as_ref(), &mut refresher.pool, &prompt).await;

        let text = match outcome.result {
            Ok(text) => text,
            Err(AdvisorError::NoCredentials) => {
                return self.fallback_outcome(FallbackReason::NoCredentials, None, assets, now)
            }
            Err(AdvisorError::RateLimited) => {
                return self.fallback_outcome(
                    FallbackReason::AllCredentialsRateLimited,
                    None,
                    assets,
                    now,
                )
            }
            Err(e) => {
                return self.fallback_outcome(
                    FallbackReason::AdvisoryError,
                    Some(e.to_string()),
                    assets,
                    now,
                )
            }
        };

        match parser::parse(&text) {
            Ok(advice) => {
                let set = advice.into_set(now);
                if let Some(analysis) = &set.analysis {
                    tracing::info!(id = %set.id, "Advisory analysis: {}", analysis);
                }
                tracing::info!(
                    id = %set.id,
                    recommendations = set.len(),
                    attempts = outcome.attempts,
                    "Adopted live recommendation set"
                );
                RefreshOutcome::live(set)
            }
            Err(failure) => {
                self.dump_raw_response(&text);
                self.fallback_outcome(
                    FallbackReason::ParseFailure,
                    Some(failure.to_string()),
                    assets,
                    now,
                )
            }
        }
    }

    fn fallback_outcome(
        &self,
        reason: FallbackReason,
        error: Option<String>,
        assets: &[String],
        now: DateTime<Utc>,
    ) -> RefreshOutcome {
        let set = self.fallback.synthesize(assets, self.source.as_ref(), now);
        match &error {
            Some(e) => tracing::warn!(id = %set.id, reason = %reason, "Using fallback recommendations: {}", e),
            None => tracing::warn!(id = %set.id, reason = %reason, "Using fallback recommendations"),
        }
        RefreshOutcome {
            set,
            reason: Some(reason),
            error,
        }
    }

    fn asset_data(&self, assets: &[String], style: PromptStyle) -> BTreeMap<String, AssetData> {
        assets
            .iter()
            .map(|pair| {
                let data = match self.source.snapshot(pair) {
                    Some(s) if !s.ohlcv.is_empty() => match style {
                        PromptStyle::Allocation => AssetData::Candles(s.ohlcv),
                        PromptStyle::Analysis => {
                            match IndicatorSnapshot::from_candles(pair, &s.ohlcv, self.candle_interval_minutes) {
                                Some(snapshot) => AssetData::Indicators(snapshot),
                                None => AssetData::Candles(s.ohlcv),
                            }
                        }
                    },
                    _ => AssetData::Missing,
                };
                (pair.clone(), data)
            })
            .collect()
    }

    fn dump_raw_response(&self, text: &str) {
        let Some(path) = &self.raw_response_file else {
            return;
        };
        match write_atomic(path, text.as_bytes()) {
            Ok(()) => tracing::warn!(path = %path.display(), "Saved unparsable advisory response"),
            Err(e) => tracing::error!("Failed to save raw advisory response: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::client::RawResult;
    use crate::advisory::credentials::Credential;
    use crate::models::{Decision, MarketSnapshot};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const LIVE: &str = r#"[{"pair":"BTC/USDT","decision":"buy","buy_percentage":10,"sell_percentage":0,"buy_amount":0.01}]"#;

    struct Fixed {
        result: RawResult,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(result: RawResult) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AdvisoryTransport for Fixed {
        async fn request(&self, _prompt: &str, _credential: &Credential) -> RawResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn settings(keys: &[&str]) -> Settings {
        let dir = std::env::temp_dir().join(format!("tradeadvisor-cache-{}", uuid::Uuid::new_v4()));
        let mut settings = Settings::default();
        settings.llm.api_keys = keys.iter().map(|k| k.to_string()).collect();
        settings.cache.raw_response_file = Some(dir.join("raw.txt"));
        settings.cache.state_dir = dir;
        settings
    }

    fn source() -> Arc<HashMap<String, MarketSnapshot>> {
        let mut map = HashMap::new();
        map.insert(
            "BTC/USDT".to_string(),
            MarketSnapshot {
                pair: "BTC/USDT".to_string(),
                indicator: Decision::Buy,
                price: Some(42000.0),
                percent_change_24h: Some(3.0),
                ohlcv: Vec::new(),
            },
        );
        Arc::new(map)
    }

    fn assets() -> Vec<String> {
        vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]
    }

    fn cache(settings: &Settings, transport: Arc<dyn AdvisoryTransport>) -> RecommendationCache {
        RecommendationCache::new(settings, transport, source())
    }

    fn stored(settings: &Settings) -> CacheRecord {
        JsonFile::<CacheRecord>::new(settings.cache_record_path())
            .read()
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_live_refresh_is_cached_for_validity_window() {
        let settings = settings(&["k1"]);
        let transport = Fixed::new(RawResult::Success(LIVE.to_string()));
        let cache = cache(&settings, transport.clone());
        let portfolio = PortfolioState::new(1000.0, "USDT");
        let now = Utc::now();

        let first = cache.get_current_at(now, &assets(), &portfolio).await;
        let second = cache
            .get_current_at(now + chrono::Duration::seconds(299), &assets(), &portfolio)
            .await;

        assert_eq!(first.provenance, Provenance::Live);
        assert_eq!(first.id, second.id);
        assert_eq!(transport.calls(), 1);

        let record = stored(&settings);
        assert!(!record.fallback);
        assert_eq!(record.id, first.id);
        assert!(record.reason.is_none());
    }

    #[tokio::test]
    async fn test_persisted_set_survives_restart() {
        let settings = settings(&["k1"]);
        let now = Utc::now();
        let portfolio = PortfolioState::new(1000.0, "USDT");

        let first_run = Fixed::new(RawResult::Success(LIVE.to_string()));
        let original = cache(&settings, first_run.clone())
            .get_current_at(now, &assets(), &portfolio)
            .await;

        let second_run = Fixed::new(RawResult::Success(LIVE.to_string()));
        let restarted = cache(&settings, second_run.clone());
        let reused = restarted
            .get_current_at(now + chrono::Duration::seconds(120), &assets(), &portfolio)
            .await;

        assert_eq!(reused.id, original.id);
        assert_eq!(reused.recommendations, original.recommendations);
        assert_eq!(second_run.calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_set_triggers_refresh() {
        let settings = settings(&["k1"]);
        let transport = Fixed::new(RawResult::Success(LIVE.to_string()));
        let cache = cache(&settings, transport.clone());
        let portfolio = PortfolioState::new(1000.0, "USDT");
        let now = Utc::now();

        let first = cache.get_current_at(now, &assets(), &portfolio).await;
        let later = cache
            .get_current_at(now + chrono::Duration::seconds(300), &assets(), &portfolio)
            .await;

        assert_ne!(first.id, later.id);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_rate_gate_denial_falls_back_without_calling() {
        let settings = settings(&["k1"]);
        let now = Utc::now();
        let mut gate = RateGate::new(settings.rate_gate_path(), Duration::from_secs(300));
        assert!(gate.allow_call_at(now - chrono::Duration::seconds(10)));

        let transport = Fixed::new(RawResult::Success(LIVE.to_string()));
        let cache = cache(&settings, transport.clone());
        let set = cache
            .get_current_at(now, &assets(), &PortfolioState::new(1000.0, "USDT"))
            .await;

        assert!(set.is_fallback());
        assert_eq!(set.recommendations[0].decision, Decision::Buy);
        assert_eq!(set.recommendations[0].buy_percentage, 6.0);
        assert_eq!(set.recommendations[1], Recommendation::hold("ETH/USDT"));
        assert_eq!(transport.calls(), 0);
        assert_eq!(stored(&settings).reason.as_deref(), Some("rate_limit"));
    }

    #[tokio::test]
    async fn test_all_credentials_rate_limited() {
        let settings = settings(&["k1", "", "k2"]);
        let transport = Fixed::new(RawResult::RateLimited);
        let cache = cache(&settings, transport.clone());

        let set = cache
            .get_current_at(Utc::now(), &assets(), &PortfolioState::new(1000.0, "USDT"))
            .await;

        assert!(set.is_fallback());
        assert_eq!(transport.calls(), 2);
        let record = stored(&settings);
        assert!(record.fallback);
        assert_eq!(record.reason.as_deref(), Some("all_credentials_rate_limited"));
    }

    #[tokio::test]
    async fn test_transport_failure_records_error() {
        let settings = settings(&["k1"]);
        let transport = Fixed::new(RawResult::Failure("API error (502): bad gateway".into()));
        let cache = cache(&settings, transport);

        let set = cache
            .get_current_at(Utc::now(), &assets(), &PortfolioState::new(1000.0, "USDT"))
            .await;

        assert!(set.is_fallback());
        let record = stored(&settings);
        assert_eq!(record.reason.as_deref(), Some("advisory_error"));
        assert!(record.error.unwrap().contains("502"));
    }

    #[tokio::test]
    async fn test_no_credentials_skips_rate_gate() {
        let settings = settings(&["", " "]);
        let transport = Fixed::new(RawResult::Success(LIVE.to_string()));
        let cache = cache(&settings, transport.clone());

        let set = cache
            .get_current_at(Utc::now(), &assets(), &PortfolioState::new(1000.0, "USDT"))
            .await;

        assert!(set.is_fallback());
        assert_eq!(transport.calls(), 0);
        assert_eq!(stored(&settings).reason.as_deref(), Some("no_credentials"));
        assert!(!settings.rate_gate_path().exists());
    }

    #[tokio::test]
    async fn test_unparsable_response_is_saved_for_inspection() {
        let settings = settings(&["k1"]);
        let transport = Fixed::new(RawResult::Success("The market looks bullish!".into()));
        let cache = cache(&settings, transport);

        let set = cache
            .get_current_at(Utc::now(), &assets(), &PortfolioState::new(1000.0, "USDT"))
            .await;

        assert!(set.is_fallback());
        assert_eq!(stored(&settings).reason.as_deref(), Some("parse_failure"));
        let raw_path = settings.cache.raw_response_file.clone().unwrap();
        assert_eq!(std::fs::read_to_string(raw_path).unwrap(), "The market looks bullish!");
    }

    #[tokio::test]
    async fn test_corrupt_cache_file_is_ignored() {
        let settings = settings(&["k1"]);
        std::fs::create_dir_all(&settings.cache.state_dir).unwrap();
        std::fs::write(settings.cache_record_path(), "{\"timestamp\": 12").unwrap();

        let transport = Fixed::new(RawResult::Success(LIVE.to_string()));
        let cache = cache(&settings, transport.clone());
        assert_eq!(cache.state().await, CacheState::Empty);

        let set = cache
            .get_current_at(Utc::now(), &assets(), &PortfolioState::new(1000.0, "USDT"))
            .await;

        assert_eq!(set.provenance, Provenance::Live);
        assert_eq!(transport.calls(), 1);
    }

    /// Holds the first request open until released
    struct Gated {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AdvisoryTransport for Gated {
        async fn request(&self, _prompt: &str, _credential: &Credential) -> RawResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            RawResult::Success(LIVE.to_string())
        }
    }

    #[tokio::test]
    async fn test_single_flight_serves_fallback_while_refreshing() {
        let settings = settings(&["k1"]);
        let transport = Arc::new(Gated {
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(cache(&settings, transport.clone()));
        let portfolio = PortfolioState::new(1000.0, "USDT");
        let now = Utc::now();

        let refreshing = tokio::spawn({
            let cache = cache.clone();
            let portfolio = portfolio.clone();
            async move { cache.get_current_at(now, &assets(), &portfolio).await }
        });

        transport.entered.notified().await;
        assert_eq!(cache.state_at(now).await, CacheState::Refreshing);

        let concurrent = cache.get_current_at(now, &assets(), &portfolio).await;
        assert!(concurrent.is_fallback());

        transport.release.notify_one();
        let live = refreshing.await.unwrap();

        assert_eq!(live.provenance, Provenance::Live);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.state_at(now).await,
            CacheState::Valid {
                expired: false,
                provenance: Provenance::Live
            }
        );
    }

    #[tokio::test]
    async fn test_single_flight_serves_previous_set_while_refreshing() {
        let settings = settings(&["k1"]);
        let transport = Arc::new(Gated {
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(cache(&settings, transport.clone()));
        let portfolio = PortfolioState::new(1000.0, "USDT");
        let now = Utc::now();

        // 1. Seed a live set
        let seeding = tokio::spawn({
            let cache = cache.clone();
            let portfolio = portfolio.clone();
            async move { cache.get_current_at(now, &assets(), &portfolio).await }
        });
        transport.entered.notified().await;
        transport.release.notify_one();
        let first = seeding.await.unwrap();
        assert_eq!(first.provenance, Provenance::Live);

        // 2. Past the validity window a refresh starts and blocks
        let later = now + chrono::Duration::seconds(400);
        let refreshing = tokio::spawn({
            let cache = cache.clone();
            let portfolio = portfolio.clone();
            async move { cache.get_current_at(later, &assets(), &portfolio).await }
        });
        transport.entered.notified().await;
        assert_eq!(cache.state_at(later).await, CacheState::Refreshing);

        // 3. Concurrent callers get the expired set and start no refresh
        for _ in 0..5 {
            let served = cache.get_current_at(later, &assets(), &portfolio).await;
            assert_eq!(served.id, first.id);
        }
        assert_eq!(cache.current().await.map(|s| s.id), Some(first.id));

        transport.release.notify_one();
        let second = refreshing.await.unwrap();

        assert_ne!(second.id, first.id);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.current().await.map(|s| s.id), Some(second.id));
    }
}
