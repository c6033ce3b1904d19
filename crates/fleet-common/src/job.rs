use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Everything needed to submit one multi-node serving job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRequest {
    pub job_name: String,
    #[serde(default = "default_one")]
    pub nodes: u32,
    /// Hugging Face model id (e.g. "upstage/solar-pro-preview-instruct") or a local path.
    pub model: String,
    #[serde(default = "default_one")]
    pub tensor_parallel_size: u32,
    #[serde(default)]
    pub lora_path: Option<String>,
    #[serde(default)]
    pub check_access: bool,
    #[serde(default)]
    pub wait_ready: bool,
}

fn default_one() -> u32 {
    1
}

impl JobRequest {
    /// Reject requests that could never produce a running instance.
    pub fn validate(&self, accelerators_per_node: u32) -> Result<()> {
        if self.job_name.trim().is_empty() {
            return Err(FleetError::InvalidRequest("job name is required".into()));
        }
        if self.job_name.contains(['/', ' ']) {
            return Err(FleetError::InvalidRequest(format!(
                "job name '{}' must not contain '/' or spaces",
                self.job_name
            )));
        }
        if self.model.trim().is_empty() {
            return Err(FleetError::InvalidRequest("model is required".into()));
        }
        if self.nodes == 0 {
            return Err(FleetError::InvalidRequest("nodes must be at least 1".into()));
        }
        if self.tensor_parallel_size == 0 {
            return Err(FleetError::InvalidRequest(
                "tensor parallel size must be at least 1".into(),
            ));
        }
        if self.tensor_parallel_size > accelerators_per_node {
            return Err(FleetError::InvalidRequest(format!(
                "tensor parallel size {} exceeds {} accelerators per node",
                self.tensor_parallel_size, accelerators_per_node
            )));
        }
        if let Some(lora) = &self.lora_path {
            if lora.trim().is_empty() {
                return Err(FleetError::InvalidRequest("lora path is empty".into()));
            }
        }
        Ok(())
    }

    /// Adapter registration record for the inference server, if an adapter was requested.
    pub fn lora_adapter(&self) -> Option<LoraAdapter> {
        self.lora_path
            .as_deref()
            .map(|path| LoraAdapter::new(path, &self.model))
    }
}

/// A LoRA adapter as the inference server's `--lora-modules` flag expects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoraAdapter {
    pub name: String,
    pub path: String,
    pub base_model_name: String,
}

impl LoraAdapter {
    /// The adapter is named after the last component of its path.
    pub fn new(path: &str, base_model: &str) -> Self {
        let trimmed = path.trim_end_matches('/');
        let name = Path::new(trimmed)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| trimmed.to_string());
        Self {
            name,
            path: path.to_string(),
            base_model_name: base_model.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest {
            job_name: "solar".to_string(),
            nodes: 2,
            model: "upstage/solar-pro-preview-instruct".to_string(),
            tensor_parallel_size: 2,
            lora_path: None,
            check_access: false,
            wait_ready: false,
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate(8).is_ok());
    }

    #[test]
    fn test_missing_model_rejected() {
        let mut req = request();
        req.model = "  ".to_string();
        let err = req.validate(8).unwrap_err();
        assert!(err.to_string().contains("model is required"));
    }

    #[test]
    fn test_missing_job_name_rejected() {
        let mut req = request();
        req.job_name.clear();
        assert!(req.validate(8).is_err());
        req.job_name = "a/b".to_string();
        assert!(req.validate(8).is_err());
    }

    #[test]
    fn test_tensor_parallel_bounds() {
        let mut req = request();
        req.tensor_parallel_size = 0;
        assert!(req.validate(8).is_err());
        req.tensor_parallel_size = 9;
        assert!(req.validate(8).is_err());
        req.tensor_parallel_size = 8;
        assert!(req.validate(8).is_ok());
    }

    #[test]
    fn test_zero_nodes_rejected() {
        let mut req = request();
        req.nodes = 0;
        assert!(req.validate(8).is_err());
    }

    #[test]
    fn test_lora_adapter_record() {
        let mut req = request();
        req.lora_path = Some("/ckpt/solar-lora/".to_string());
        let adapter = req.lora_adapter().unwrap();
        assert_eq!(adapter.name, "solar-lora");
        assert_eq!(adapter.base_model_name, "upstage/solar-pro-preview-instruct");

        let v: serde_json::Value = serde_json::from_str(&adapter.to_json()).unwrap();
        assert_eq!(v["path"], "/ckpt/solar-lora/");
        assert_eq!(v["name"], "solar-lora");
    }
}
