use std::path::Path;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::client::auth;

/// Read check run before a job is submitted, so a bad model id fails here instead of
/// on every node after the allocation is granted.
#[async_trait]
pub trait ModelProbe: Send + Sync {
    async fn check(&self, model: &str, lora_path: Option<&str>) -> anyhow::Result<()>;
}

/// Checks local paths on disk and everything else against a Hugging Face compatible hub.
pub struct HubProbe {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HubProbe {
    pub fn new(http: reqwest::Client, endpoint: &str, token: Option<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        }
    }
}

#[async_trait]
impl ModelProbe for HubProbe {
    async fn check(&self, model: &str, lora_path: Option<&str>) -> anyhow::Result<()> {
        if let Some(lora) = lora_path {
            if !Path::new(lora).exists() {
                anyhow::bail!("LoRA adapter path '{lora}' does not exist");
            }
        }

        if Path::new(model).exists() {
            tracing::info!(%model, "model is a local path");
            return Ok(());
        }

        let url = format!("{}/api/models/{}", self.endpoint, model);
        let resp = auth(self.http.get(&url), self.token.as_deref())
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("cannot reach model hub at {}: {e}", self.endpoint))?;

        match resp.status() {
            s if s.is_success() => {
                tracing::info!(%model, "model is accessible on the hub");
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => anyhow::bail!(
                "model '{model}' is gated or private; set HF_TOKEN to a token with access"
            ),
            StatusCode::NOT_FOUND => {
                anyhow::bail!("model '{model}' was not found on {} or locally", self.endpoint)
            }
            s => anyhow::bail!("model hub answered {s} for '{model}'"),
        }
    }
}
