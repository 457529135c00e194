use crate::advisory::fallback::FallbackThresholds;
use crate::advisory::prompt::PromptStyle;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "tradeadvisor";
const ENV_PREFIX: &str = "TRADEADVISOR";

/// Top-level settings
///
/// Layered: built-in defaults, then an optional TOML file, then
/// `TRADEADVISOR_*` environment variables (`TRADEADVISOR_LLM__MODEL=...`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub pairs: Vec<String>,
    pub quote_currency: String,
    pub llm: LlmSettings,
    pub cache: CacheSettings,
    pub fallback: FallbackThresholds,
    pub market: MarketSettings,
    pub resolver: ResolverSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_url: String,
    pub model: String,
    /// Ordered credentials; blank entries are disabled placeholders
    pub api_keys: Vec<String>,
    pub timeout_secs: u64,
    pub prompt_style: PromptStyle,
    /// OHLCV rows embedded per asset in the allocation prompt
    pub max_candles: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub validity_secs: u64,
    pub min_call_interval_secs: u64,
    pub state_dir: PathBuf,
    /// Where to dump unparsable advisory responses, if anywhere
    pub raw_response_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MarketSettings {
    pub base_url: String,
    pub interval: String,
    pub limit: u32,
    /// Keep every Nth candle
    pub downsample: usize,
    pub data_dir: PathBuf,
    pub requests_per_minute: u32,
    pub fetch_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Recommendations below this confidence resolve to hold
    pub min_confidence: Option<f64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pairs: [
                "BTC/USDT", "BCH/USDT", "ETH/USDT", "LINK/USDT", "LTC/USDT", "SOL/USDT",
                "BNB/USDT", "XRP/USDT", "ADA/USDT", "DOT/USDT", "ETC/USDT", "ALGO/USDT",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            quote_currency: "USDT".to_string(),
            llm: LlmSettings::default(),
            cache: CacheSettings::default(),
            fallback: FallbackThresholds::default(),
            market: MarketSettings::default(),
            resolver: ResolverSettings::default(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "deepseek/deepseek-chat-v3-0324:free".to_string(),
            api_keys: Vec::new(),
            timeout_secs: 120,
            prompt_style: PromptStyle::Allocation,
            max_candles: 24,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            validity_secs: 300,
            min_call_interval_secs: 300,
            state_dir: PathBuf::from("state"),
            raw_response_file: Some(PathBuf::from("state/advisory_raw.txt")),
        }
    }
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            interval: "5m".to_string(),
            limit: 288, // 24 hours of 5 minute candles
            downsample: 4,
            data_dir: PathBuf::from("data"),
            requests_per_minute: 600,
            fetch_interval_secs: 300,
        }
    }
}

impl Settings {
    /// Load settings from `path` (or `tradeadvisor.toml` if present) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("pairs")
                    .with_list_parse_key("llm.api_keys")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    pub fn rate_gate_path(&self) -> PathBuf {
        self.cache.state_dir.join("api_rate_limit.json")
    }

    pub fn credential_cursor_path(&self) -> PathBuf {
        self.cache.state_dir.join("credential_cursor.json")
    }

    pub fn cache_record_path(&self) -> PathBuf {
        self.cache.state_dir.join("advisory_cache.json")
    }

    /// Minutes between stored candles after downsampling
    pub fn candle_interval_minutes(&self) -> u32 {
        let base = parse_interval_minutes(&self.market.interval).unwrap_or(5);
        let factor = u32::try_from(self.market.downsample.max(1)).unwrap_or(u32::MAX);
        base.checked_mul(factor).unwrap_or(u32::MAX)
    }
}

/// Parse an exchange interval such as "5m", "1h" or "1d" into minutes
pub fn parse_interval_minutes(interval: &str) -> Option<u32> {
    let interval = interval.trim();
    let (split, unit) = interval.char_indices().last()?;
    let value: u32 = interval[..split].parse().ok()?;
    match unit {
        'm' => Some(value),
        'h' => value.checked_mul(60),
        'd' => value.checked_mul(60 * 24),
        _ => None,
    }
}
