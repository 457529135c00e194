//! Entry, exit and sizing helpers for the trading host
//!
//! Each helper is a pure function of a resolved `DecisionRecord`, so a host
//! strategy resolves once per pair and cycle and feeds the record to whichever
//! hooks it implements.

use crate::indicators::format_decimal;
use crate::models::{Decision, DecisionRecord};

pub const AI_SELL_EXIT_PREFIX: &str = "ai_sell";
pub const ROI_EXIT_REASON: &str = "roi";

fn actionable_buy(record: &DecisionRecord) -> bool {
    record.decision == Decision::Buy && record.buy_percentage > 0.0
}

fn actionable_sell(record: &DecisionRecord) -> bool {
    record.decision == Decision::Sell && record.sell_percentage > 0.0
}

pub fn entry_signal(record: &DecisionRecord) -> bool {
    actionable_buy(record)
}

pub fn exit_signal(record: &DecisionRecord) -> bool {
    actionable_sell(record)
}

/// Stake in the quote currency for a new position
///
/// `free_capital * buy_percentage / 100`, raised to `min_stake` and capped at
/// `max_stake`. Without an actionable buy the host's minimum (or its own
/// proposal) is used.
pub fn stake_amount(
    record: &DecisionRecord,
    free_capital: f64,
    proposed_stake: f64,
    min_stake: Option<f64>,
    max_stake: f64,
) -> f64 {
    if record.buy_percentage <= 0.0 {
        return min_stake.filter(|m| *m > 0.0).unwrap_or(proposed_stake);
    }

    let mut stake = free_capital * record.buy_percentage / 100.0;
    if let Some(min) = min_stake.filter(|m| *m > 0.0) {
        stake = stake.max(min);
    }
    let stake = stake.min(max_stake);

    tracing::info!(
        "Advisory stake: {}% of {} = {}",
        format_decimal(record.buy_percentage),
        format_decimal(free_capital),
        format_decimal(stake)
    );
    stake
}

/// Exit tag for an actionable sell, e.g. `ai_sell_25`
pub fn custom_exit(record: &DecisionRecord) -> Option<String> {
    actionable_sell(record).then(|| {
        format!(
            "{}_{}",
            AI_SELL_EXIT_PREFIX,
            format_decimal(record.sell_percentage)
        )
    })
}

pub fn confirm_trade_entry(record: &DecisionRecord) -> bool {
    actionable_buy(record)
}

/// Advisory exits always go through; an ROI exit is refused while the
/// advice for the pair is still buy
pub fn confirm_trade_exit(record: &DecisionRecord, exit_reason: &str) -> bool {
    if exit_reason.starts_with(AI_SELL_EXIT_PREFIX) {
        return true;
    }
    if exit_reason == ROI_EXIT_REASON && record.decision == Decision::Buy {
        tracing::info!("ROI exit refused, advice is still buy");
        return false;
    }
    true
}
