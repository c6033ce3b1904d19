use std::path::{Path, PathBuf};

use clap::Args;

use crate::error::{FleetError, Result};

/// Cluster-wide settings shared by the submitter and the per-node launcher.
///
/// Parsed once at startup (flags first, then environment) and passed by reference;
/// never mutated afterwards.
#[derive(Debug, Clone, Args)]
pub struct ClusterConfig {
    /// Shared log root; scripts, logs, caches, tmux sockets and access info live under it.
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Slurm partition to submit to.
    #[arg(long, env = "SLURM_PARTITION")]
    pub partition: Option<String>,

    /// First port handed out on every node.
    #[arg(long, env = "START_PORT", default_value_t = 40020)]
    pub start_port: u16,

    /// Accelerators per node. Detected with nvidia-smi when unset.
    #[arg(long, env = "GPUS_PER_NODE")]
    pub accelerators_per_node: Option<u32>,

    /// tmux session name on each node.
    #[arg(long, env = "SESSION_NAME", default_value = "vllm")]
    pub session_name: String,

    /// Conda installation root holding the runtime environment.
    #[arg(long, env = "CONDA_ROOT")]
    pub conda_root: Option<PathBuf>,

    /// Conda environment name to activate for every instance.
    #[arg(long, env = "CONDA_ENV")]
    pub conda_env: Option<String>,

    /// Seconds to keep the instances alive; zero or negative means forever.
    #[arg(long, env = "TIMEOUT_SECONDS", default_value_t = -1, allow_hyphen_values = true)]
    pub timeout_seconds: i64,

    #[arg(long, env = "SLURM_CPUS_PER_GPU", default_value_t = 10)]
    pub cpus_per_gpu: u32,

    #[arg(long, env = "SLURM_MEM_PER_GPU", default_value = "32G")]
    pub mem_per_gpu: String,

    /// Inference server executable, resolved against the runtime environment's PATH.
    #[arg(long, env = "VLLM_BIN", default_value = "vllm")]
    pub vllm_bin: String,

    /// Working directory for the launched servers.
    #[arg(long, env = "FLEET_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Directory for the per-node tmux sockets; `<log_dir>/tmux` when unset. Socket paths
    /// must stay under 108 bytes, so deep shared log roots need this.
    #[arg(long, env = "TMUX_SOCKET_DIR")]
    pub socket_dir: Option<PathBuf>,
}

pub const DEFAULT_ACCELERATORS_PER_NODE: u32 = 8;

impl ClusterConfig {
    /// Defaults for everything except the log root, matching the flag defaults.
    pub fn with_log_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: Some(log_dir.into()),
            partition: None,
            start_port: 40020,
            accelerators_per_node: None,
            session_name: "vllm".to_string(),
            conda_root: None,
            conda_env: None,
            timeout_seconds: -1,
            cpus_per_gpu: 10,
            mem_per_gpu: "32G".to_string(),
            vllm_bin: "vllm".to_string(),
            workdir: None,
            socket_dir: None,
        }
    }

    pub fn log_dir(&self) -> Result<&Path> {
        self.log_dir
            .as_deref()
            .ok_or(FleetError::MissingConfig("LOG_DIR"))
    }

    pub fn partition(&self) -> Result<&str> {
        self.partition
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(FleetError::MissingConfig("SLURM_PARTITION"))
    }

    /// `None` when the instances should run until the job is cancelled.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_seconds > 0).then(|| std::time::Duration::from_secs(self.timeout_seconds as u64))
    }

    pub fn scripts_dir(&self) -> Result<PathBuf> {
        Ok(self.log_dir()?.join("scripts"))
    }

    pub fn logs_dir(&self) -> Result<PathBuf> {
        Ok(self.log_dir()?.join("logs"))
    }

    pub fn access_info_dir(&self) -> Result<PathBuf> {
        Ok(self.log_dir()?.join("access_info"))
    }

    /// Per-node, per-slot cache directory so concurrent servers never share compile caches.
    pub fn cache_dir(&self, node: &str, slot: u32) -> Result<PathBuf> {
        Ok(self
            .log_dir()?
            .join("cache")
            .join(node)
            .join(slot.to_string()))
    }

    /// tmux server socket for this node's session.
    pub fn socket_path(&self, node: &str) -> Result<PathBuf> {
        let dir = match &self.socket_dir {
            Some(dir) => dir.clone(),
            None => self.log_dir()?.join("tmux"),
        };
        Ok(dir.join(format!("{}-{}.sock", self.session_name, node)))
    }

    /// `bin` directory of the configured runtime environment, if any.
    pub fn runtime_bin_dir(&self) -> Option<PathBuf> {
        let root = self.conda_root.as_ref()?;
        match self.conda_env.as_deref() {
            Some(env) if !env.is_empty() && env != "base" => {
                Some(root.join("envs").join(env).join("bin"))
            }
            _ => Some(root.join("bin")),
        }
    }

    /// Environment pairs to export so the cluster job sees the same configuration.
    pub fn export_pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(dir) = &self.log_dir {
            out.push(("LOG_DIR", dir.display().to_string()));
        }
        if let Some(p) = &self.partition {
            out.push(("SLURM_PARTITION", p.clone()));
        }
        out.push(("START_PORT", self.start_port.to_string()));
        if let Some(n) = self.accelerators_per_node {
            out.push(("GPUS_PER_NODE", n.to_string()));
        }
        out.push(("SESSION_NAME", self.session_name.clone()));
        if let Some(root) = &self.conda_root {
            out.push(("CONDA_ROOT", root.display().to_string()));
        }
        if let Some(env) = &self.conda_env {
            out.push(("CONDA_ENV", env.clone()));
        }
        out.push(("TIMEOUT_SECONDS", self.timeout_seconds.to_string()));
        out.push(("VLLM_BIN", self.vllm_bin.clone()));
        if let Some(dir) = &self.workdir {
            out.push(("FLEET_WORKDIR", dir.display().to_string()));
        }
        if let Some(dir) = &self.socket_dir {
            out.push(("TMUX_SOCKET_DIR", dir.display().to_string()));
        }
        out
    }
}
