use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Single JSON document on disk, replaced atomically on every write
///
/// Writes go to a sibling `.tmp` file which is then renamed over the target,
/// so readers never observe a partially written document.
#[derive(Debug, Clone)]
pub struct JsonFile<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document
    ///
    /// A missing file is `Ok(None)`; an unreadable or unparsable one is an error.
    pub fn read(&self) -> Result<Option<T>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Read the document, treating corruption the same as absence
    pub fn read_or_none(&self) -> Option<T> {
        match self.read() {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Ignoring unreadable state file: {}",
                    e
                );
                None
            }
        }
    }

    /// Write the document atomically (write-new-then-rename)
    pub fn write(&self, record: &T) -> Result<()> {
        let payload = serde_json::to_string_pretty(record)?;
        write_atomic(&self.path, payload.as_bytes())
    }
}

/// Write `contents` to `path` through a temporary sibling file and a rename
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
