//! JSON file export of page records.

use crate::extract::PageRecord;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Writes one pretty-printed JSON file per record.
#[derive(Debug, Clone)]
pub struct JsonExporter {
    directory: PathBuf,
}

impl JsonExporter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File name for a record: `<identifier>.json`, or a timestamped
    /// fallback when the URL has no usable identifier.
    pub fn file_name(record: &PageRecord) -> String {
        match &record.identifier {
            Some(id) => format!("{id}.json"),
            None => format!("record_{}.json", record.fetched_at.format("%Y%m%d_%H%M%S")),
        }
    }

    /// Write `record`, creating the output directory on demand. Returns the
    /// written path.
    pub fn export(&self, record: &PageRecord) -> Result<PathBuf> {
        if !self.directory.exists() {
            std::fs::create_dir_all(&self.directory).with_context(|| {
                format!("failed to create output directory {}", self.directory.display())
            })?;
            tracing::info!("created output directory {}", self.directory.display());
        }

        let path = self.directory.join(Self::file_name(record));
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!("record saved to {}", path.display());
        Ok(path)
    }
}
