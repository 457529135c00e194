pub mod collector;
pub mod store;

pub use collector::{indicator_for_change, CollectSummary, MarketCollector};
pub use store::SnapshotStore;

use crate::models::MarketSnapshot;
use std::collections::HashMap;

/// Read-only provider of the last collected snapshot per pair
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self, pair: &str) -> Option<MarketSnapshot>;
}

impl SnapshotSource for HashMap<String, MarketSnapshot> {
    fn snapshot(&self, pair: &str) -> Option<MarketSnapshot> {
        self.get(pair).cloned()
    }
}
