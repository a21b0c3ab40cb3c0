use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use common::OutputConfig;
use serde_json::Value;
use tracing::debug;

use crate::error::PersistError;

/// Writes each response to its own JSON file and hands back the file name,
/// which is what the client receives on the wire.
#[derive(Debug, Clone)]
pub struct ResponsePersister {
    dir: PathBuf,
    prefix: String,
}

impl ResponsePersister {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(config.dir.clone(), config.file_prefix.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<prefix>_<client>_<kind>_<YYYYmmdd_HHMMSS>.json`
    pub fn file_name(&self, client: &str, kind: &str, at: DateTime<Local>) -> String {
        format!(
            "{}_{}_{}_{}.json",
            self.prefix,
            sanitize(client),
            kind,
            at.format("%Y%m%d_%H%M%S")
        )
    }

    pub async fn persist(&self, client: &str, kind: &str, payload: &Value) -> Result<String, PersistError> {
        let name = self.file_name(client, kind, Local::now());
        let path = self.dir.join(&name);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| PersistError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let bytes = serde_json::to_vec_pretty(payload)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| PersistError::Write { path: path.clone(), source })?;

        debug!(path = %path.display(), "response persisted");
        Ok(name)
    }
}

/// Client names end up in file names; keep them to a path-safe alphabet.
fn sanitize(client: &str) -> String {
    client
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
