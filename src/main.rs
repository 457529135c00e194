use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tradeadvisor::advisory::{OpenRouterClient, ResolverPolicy};
use tradeadvisor::api::BinanceClient;
use tradeadvisor::market::{MarketCollector, SnapshotStore};
use tradeadvisor::models::{Decision, PortfolioState};
use tradeadvisor::{DecisionEngine, RecommendationCache, Settings};

/// How often `run` resolves decisions
const DECISION_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Parser)]
#[command(name = "tradeadvisor", version, about = "LLM-advised trading decisions")]
struct Cli {
    /// Settings file (defaults to ./tradeadvisor.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Collect market snapshots for the configured pairs
    Fetch,
    /// Resolve one decision per configured pair
    Decide(PortfolioArgs),
    /// Collect and decide on a loop until interrupted
    Run(PortfolioArgs),
}

#[derive(Debug, clap::Args)]
struct PortfolioArgs {
    /// Free capital in the quote currency
    #[arg(long)]
    free_capital: f64,

    /// Held quantity per base currency, e.g. --holding BTC=0.5
    #[arg(long = "holding", value_parser = parse_holding)]
    holdings: Vec<(String, f64)>,
}

impl PortfolioArgs {
    fn portfolio(&self, quote_currency: &str) -> PortfolioState {
        self.holdings
            .iter()
            .fold(PortfolioState::new(self.free_capital, quote_currency), |p, (c, q)| {
                p.with_holding(c.clone(), *q)
            })
    }
}

fn parse_holding(raw: &str) -> Result<(String, f64), String> {
    let (currency, quantity) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected CURRENCY=QUANTITY, got {:?}", raw))?;
    let quantity: f64 = quantity
        .trim()
        .parse()
        .map_err(|_| format!("invalid quantity in {:?}", raw))?;
    Ok((currency.trim().to_uppercase(), quantity))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

    match &cli.command {
        Command::Fetch => {
            let summary = collector(&settings)?.collect_all(&settings.pairs).await;
            if !summary.skipped.is_empty() {
                tracing::warn!("Skipped pairs: {}", summary.skipped.join(", "));
            }
        }
        Command::Decide(args) => {
            let engine = engine(&settings)?;
            let portfolio = args.portfolio(&settings.quote_currency);
            print_decisions(&engine, &portfolio).await;
        }
        Command::Run(args) => run(&settings, args).await?,
    }

    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tradeadvisor=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn collector(settings: &Settings) -> anyhow::Result<MarketCollector> {
    let client = BinanceClient::new(&settings.market.base_url, settings.market.requests_per_minute)
        .context("failed to build market data client")?;
    Ok(MarketCollector::new(
        client,
        SnapshotStore::new(&settings.market.data_dir),
        &settings.market,
    ))
}

fn engine(settings: &Settings) -> anyhow::Result<DecisionEngine> {
    let transport = OpenRouterClient::new(
        &settings.llm.api_url,
        &settings.llm.model,
        settings.llm.timeout_secs,
    )
    .context("failed to build advisory client")?;
    let source = SnapshotStore::new(&settings.market.data_dir);

    let cache = RecommendationCache::new(settings, Arc::new(transport), Arc::new(source));
    Ok(DecisionEngine::new(
        Arc::new(cache),
        ResolverPolicy::from_settings(&settings.resolver),
        settings.pairs.clone(),
    ))
}

async fn print_decisions(engine: &DecisionEngine, portfolio: &PortfolioState) {
    let set = engine.recommendations(portfolio).await;
    tracing::info!(
        id = %set.id,
        provenance = ?set.provenance,
        created_at = %set.created_at,
        "Recommendation set"
    );

    for (pair, record) in engine.resolve_all(&set) {
        let sizing = match record.decision {
            Decision::Buy => format!("buy {}% of free capital", record.buy_percentage),
            Decision::Sell => format!("sell {}% of holding", record.sell_percentage),
            Decision::Hold => "hold".to_string(),
        };
        println!("{:<12} {}", pair, sizing);
    }
}

async fn run(settings: &Settings, args: &PortfolioArgs) -> anyhow::Result<()> {
    let collector = collector(settings)?;
    let engine = engine(settings)?;
    let portfolio = args.portfolio(&settings.quote_currency);
    let fetch_every = Duration::from_secs(settings.market.fetch_interval_secs);

    tracing::info!(
        pairs = settings.pairs.len(),
        model = %settings.llm.model,
        "Starting decision loop"
    );

    let mut ticker = interval(Duration::from_secs(DECISION_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_fetch: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {
                if last_fetch.map_or(true, |t| t.elapsed() >= fetch_every) {
                    collector.collect_all(&settings.pairs).await;
                    last_fetch = Some(Instant::now());
                }

                for (pair, record) in engine.decisions(&portfolio).await {
                    if record.decision != Decision::Hold {
                        tracing::info!(
                            pair = %pair,
                            decision = %record.decision,
                            buy_pct = record.buy_percentage,
                            sell_pct = record.sell_percentage,
                            "Decision"
                        );
                    }
                }
            }
        }
    }
}
