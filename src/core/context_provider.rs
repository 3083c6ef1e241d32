//! Context provider — the collaborator that resolves a property id into the
//! requester/owner/property mapping the automation consumes. The core never
//! fetches records itself; it only reads the resolved mapping through the
//! dotted-path accessor.

use crate::automation::context::RunContext;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::PathBuf;

#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn resolve(&self, property_id: &str) -> Result<RunContext>;
}

/// Default provider: one `{property_id}.json` per property under the
/// configured context directory. Deployments with a real record system plug
/// their own `ContextProvider` into `AppState` instead.
pub struct JsonContextProvider {
    dir: PathBuf,
}

impl JsonContextProvider {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl ContextProvider for JsonContextProvider {
    async fn resolve(&self, property_id: &str) -> Result<RunContext> {
        // The id becomes a file name; keep path traversal out of it.
        if property_id.is_empty()
            || !property_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(anyhow!("invalid property id '{}'", property_id));
        }

        let path = self.dir.join(format!("{}.json", property_id));
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow!("context for property '{}' unavailable: {}", property_id, e))?;
        let value: serde_json::Value = serde_json::from_str(&contents)
            .map_err(|e| anyhow!("context for property '{}' is malformed: {}", property_id, e))?;
        Ok(RunContext::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_path_traversal_ids() {
        let provider = JsonContextProvider::new(PathBuf::from("/tmp"));
        assert!(provider.resolve("../etc/passwd").await.is_err());
        assert!(provider.resolve("").await.is_err());
    }

    #[tokio::test]
    async fn missing_context_file_is_an_error() {
        let provider = JsonContextProvider::new(PathBuf::from("/nonexistent-dir"));
        assert!(provider.resolve("prop-1").await.is_err());
    }
}
