use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::allocation::NodeAllocation;
use crate::error::Result;

/// Placeholder key; the servers are started without authentication.
pub const DUMMY_API_KEY: &str = "token-123";

/// One reachable server instance, in the shape LiteLLM-style routers accept as a model list entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessEntry {
    pub model_name: String,
    pub litellm_params: LitellmParams,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LitellmParams {
    pub model: String,
    pub api_key: String,
    pub api_base: String,
}

impl AccessEntry {
    pub fn new(model: &str, host: &str, port: u16) -> Self {
        Self {
            model_name: model.to_string(),
            litellm_params: LitellmParams {
                model: format!("hosted_vllm/{model}"),
                api_key: DUMMY_API_KEY.to_string(),
                api_base: format!("http://{host}:{port}/v1"),
            },
        }
    }

    pub fn api_base(&self) -> &str {
        &self.litellm_params.api_base
    }
}

/// Every (node, slot) endpoint for a model, node-major.
pub fn build_access_info(model: &str, nodes: &[String], allocation: &NodeAllocation) -> Vec<AccessEntry> {
    nodes
        .iter()
        .flat_map(|node| {
            allocation
                .slots
                .iter()
                .map(move |slot| AccessEntry::new(model, node, slot.port))
        })
        .collect()
}

/// `<dir>/<model>.json`; model ids with an organisation prefix land in a subdirectory.
pub fn access_info_path(dir: &Path, model: &str) -> PathBuf {
    dir.join(format!("{model}.json"))
}

pub async fn write_access_info(path: &Path, entries: &[AccessEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(entries)?;
    fs::write(path, body).await?;
    Ok(())
}

pub async fn read_access_info(path: &Path) -> Result<Vec<AccessEntry>> {
    let body = fs::read(path).await?;
    let entries = serde_json::from_slice(&body)?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::allocate;

    #[test]
    fn test_build_access_info() {
        let alloc = allocate(8, 4, 40020).unwrap();
        let nodes = vec!["gpu01".to_string(), "gpu02".to_string()];
        let entries = build_access_info("org/model", &nodes, &alloc);

        let bases: Vec<&str> = entries.iter().map(|e| e.api_base()).collect();
        assert_eq!(
            bases,
            vec![
                "http://gpu01:40020/v1",
                "http://gpu01:40021/v1",
                "http://gpu02:40020/v1",
                "http://gpu02:40021/v1",
            ]
        );
        assert_eq!(entries[0].litellm_params.model, "hosted_vllm/org/model");
        assert_eq!(entries[0].litellm_params.api_key, DUMMY_API_KEY);
    }

    #[test]
    fn test_json_shape() {
        let entry = AccessEntry::new("m", "h", 1);
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["model_name"], "m");
        assert_eq!(v["litellm_params"]["api_base"], "http://h:1/v1");
    }

    #[tokio::test]
    async fn test_write_and_read_nested_model_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = access_info_path(dir.path(), "org/model");
        assert!(path.ends_with("org/model.json"));

        let entries = vec![AccessEntry::new("org/model", "gpu01", 40020)];
        write_access_info(&path, &entries).await.unwrap();
        assert_eq!(read_access_info(&path).await.unwrap(), entries);
    }
}
