use super::SnapshotSource;
use crate::models::{pair_symbol, MarketSnapshot};
use crate::persistence::JsonFile;
use crate::Result;
use std::path::{Path, PathBuf};

/// Snapshots stored as `<data_dir>/<BASEQUOTE>.json`, one file per pair
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    data_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, pair: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", pair_symbol(pair)))
    }

    fn file(&self, pair: &str) -> JsonFile<MarketSnapshot> {
        JsonFile::new(self.path_for(pair))
    }

    pub fn save(&self, snapshot: &MarketSnapshot) -> Result<()> {
        self.file(&snapshot.pair).write(snapshot)
    }

    /// Last snapshot for `pair`; missing and corrupt files both read as `None`
    pub fn load(&self, pair: &str) -> Option<MarketSnapshot> {
        self.file(pair).read_or_none()
    }
}

impl SnapshotSource for SnapshotStore {
    fn snapshot(&self, pair: &str) -> Option<MarketSnapshot> {
        self.load(pair)
    }
}
