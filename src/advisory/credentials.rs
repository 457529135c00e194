use crate::persistence::JsonFile;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bearer credential for the advisory endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// `None` for blank placeholders
    pub fn new(key: &str) -> Option<Self> {
        let key = key.trim();
        (!key.is_empty()).then(|| Self(key.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tail: String = self.0.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        write!(f, "Credential(****{})", tail)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CursorState {
    cursor: usize,
}

/// Ordered credentials with a rotating cursor
///
/// Slot positions are kept even for disabled entries so the cursor means the
/// same thing across restarts while keys are being rotated in and out.
pub struct CredentialPool {
    slots: Vec<Option<Credential>>,
    cursor: usize,
    cursor_store: Option<JsonFile<CursorState>>,
}

impl CredentialPool {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            slots: keys.into_iter().map(|k| Credential::new(k.as_ref())).collect(),
            cursor: 0,
            cursor_store: None,
        }
    }

    /// Persist the cursor to `path`, resuming from a previously saved position
    pub fn with_cursor_file(mut self, path: impl Into<PathBuf>) -> Self {
        let store: JsonFile<CursorState> = JsonFile::new(path);
        if let Some(state) = store.read_or_none() {
            self.cursor = state.cursor;
        }
        self.cursor_store = Some(store);
        self.normalize_cursor();
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Enabled credentials in try order: from the cursor, wrapping around once
    pub fn rotation(&self) -> Vec<(usize, Credential)> {
        let len = self.slots.len();
        (0..len)
            .map(|offset| (self.cursor + offset) % len)
            .filter_map(|i| self.slots[i].clone().map(|c| (i, c)))
            .collect()
    }

    /// Move the cursor to the slot after `index`
    pub fn advance_past(&mut self, index: usize) {
        if self.slots.is_empty() {
            return;
        }
        self.cursor = (index + 1) % self.slots.len();

        if let Some(store) = &self.cursor_store {
            if let Err(e) = store.write(&CursorState { cursor: self.cursor }) {
                tracing::error!("Failed to persist credential cursor: {}", e);
            }
        }
    }

    fn normalize_cursor(&mut self) {
        if self.slots.is_empty() || self.cursor >= self.slots.len() {
            self.cursor = 0;
        }
    }
}
