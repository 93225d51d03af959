//! Index preparation and mapping snapshots

use crate::config::{IndexDefinitionConfig, IngestConfig};
use crate::error::{IngestError, Result};
use crate::error_log::write_pretty;
use crate::sink::{endpoints, SearchClient};
use reqwest::Method;
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// `{mappings, settings}` body used to create the index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub mappings: Value,
    pub settings: Value,
}

impl IndexDefinition {
    /// Read the mapping and settings files.
    ///
    /// Each file may hold the bare object or wrap it in a `mappings` /
    /// `settings` key.
    pub fn load(config: &IndexDefinitionConfig) -> Result<Self> {
        Ok(Self {
            mappings: read_section(&config.mapping_file, "mappings")?,
            settings: read_section(&config.settings_file, "settings")?,
        })
    }

    pub fn body(&self) -> Value {
        json!({"mappings": self.mappings, "settings": self.settings})
    }
}

fn read_section(path: &Path, key: &str) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        IngestError::config(format!("cannot read index definition {}: {e}", path.display()))
    })?;
    let mut value: Value = serde_json::from_str(&text)?;
    Ok(match value.get_mut(key) {
        Some(section) => section.take(),
        None => value,
    })
}

/// Out-of-band index lifecycle operations
#[derive(Debug, Clone)]
pub struct IndexAdmin {
    client: SearchClient,
    index: String,
}

impl IndexAdmin {
    pub fn new(client: SearchClient, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        Ok(Self::new(SearchClient::new(&config.sink)?, &config.transform.index))
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub async fn cluster_health(&self) -> Result<Value> {
        let url = endpoints::cluster_health_url(self.client.base_url());
        Ok(self.client.json(Method::GET, &url, None, &[]).await?)
    }

    /// Tabular index listing as returned by `_cat/indices`
    pub async fn list_indices(&self) -> Result<String> {
        let url = endpoints::cat_indices_url(self.client.base_url());
        Ok(self.client.text(Method::GET, &url, &[]).await?)
    }

    /// Delete the index; a missing index is not an error
    pub async fn delete_index(&self) -> Result<Value> {
        let url = endpoints::index_url(self.client.base_url(), &self.index);
        Ok(self.client.json(Method::DELETE, &url, None, &[400, 404]).await?)
    }

    /// Create the index; an existing index is not an error
    pub async fn create_index(&self, definition: &IndexDefinition) -> Result<Value> {
        let url = endpoints::index_url(self.client.base_url(), &self.index);
        let body = definition.body();
        Ok(self.client.json(Method::PUT, &url, Some(&body), &[400]).await?)
    }

    /// Drop and recreate the index from `definition`
    pub async fn prepare(&self, definition: &IndexDefinition) -> Result<()> {
        let health = self.cluster_health().await?;
        let status = health.get("status").and_then(Value::as_str).unwrap_or("unknown");
        let cluster = health.get("cluster_name").and_then(Value::as_str).unwrap_or("unknown");
        info!(status, cluster, "Cluster health");
        info!(indices = %self.list_indices().await?.trim_end(), "Existing indices");

        let deleted = self.delete_index().await?;
        info!(index = %self.index, response = %deleted, "Deleted index");

        let created = self.create_index(definition).await?;
        info!(index = %self.index, response = %created, "Created index");

        Ok(())
    }

    /// Live mapping of the index
    pub async fn fetch_mapping(&self) -> Result<Value> {
        let url = endpoints::mapping_url(self.client.base_url(), &self.index);
        let mut response = self.client.json(Method::GET, &url, None, &[]).await?;
        Ok(match response.get_mut(&self.index) {
            Some(own) => own.take(),
            None => response,
        })
    }

    /// Fetch the live mapping and write it to `path` for change detection
    pub async fn save_mapping(&self, path: &Path) -> Result<Value> {
        let mapping = self.fetch_mapping().await?;

        let mut file = std::fs::File::create(path)?;
        write_pretty(&mut file, &mapping)?;
        file.write_all(b"\n")?;

        info!(index = %self.index, path = %path.display(), "Saved live mapping");
        Ok(mapping)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_definition_accepts_wrapped_and_bare_files() {
        let dir = TempDir::new().unwrap();
        let mapping_file = dir.path().join("mapping.json");
        let settings_file = dir.path().join("index_settings.json");
        std::fs::write(
            &mapping_file,
            r#"{"mappings": {"properties": {"acct": {"type": "object"}}}}"#,
        )
        .unwrap();
        std::fs::write(&settings_file, r#"{"number_of_shards": 1}"#).unwrap();

        let definition = IndexDefinition::load(&IndexDefinitionConfig {
            mapping_file,
            settings_file,
        })
        .unwrap();

        assert_eq!(
            definition.body(),
            json!({
                "mappings": {"properties": {"acct": {"type": "object"}}},
                "settings": {"number_of_shards": 1}
            })
        );
    }

    #[test]
    fn test_missing_definition_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = IndexDefinition::load(&IndexDefinitionConfig {
            mapping_file: dir.path().join("absent.json"),
            settings_file: dir.path().join("absent.json"),
        })
        .unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }
}
