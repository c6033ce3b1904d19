use std::path::{Path, PathBuf};

use fleet_common::{ClusterConfig, LoraAdapter, Slot};

/// What every instance on this node serves.
#[derive(Debug, Clone)]
pub struct ServeRequest {
    pub model: String,
    pub lora: Option<LoraAdapter>,
    pub host: String,
}

/// An inference server invocation as a program, an argv and environment overrides.
///
/// Arguments are kept as separate elements end to end, so values are never re-parsed
/// by a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ServeCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append `flag value` as two argv elements.
    pub fn flag(mut self, flag: &str, value: impl ToString) -> Self {
        self.args.push(flag.to_string());
        self.args.push(value.to_string());
        self
    }

    pub fn switch(mut self, flag: &str) -> Self {
        self.args.push(flag.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// `vllm serve` for one slot: its port, its accelerators and its private cache directory.
pub fn vllm_command(
    cfg: &ClusterConfig,
    req: &ServeRequest,
    slot: &Slot,
    cache_dir: &Path,
) -> ServeCommand {
    let mut cmd = ServeCommand::new(resolve_program(cfg))
        .arg("serve")
        .arg(req.model.as_str())
        .flag("--host", &req.host)
        .flag("--port", slot.port);

    let tp = slot.tensor_parallel_size();
    if tp > 1 {
        cmd = cmd.flag("--tensor-parallel-size", tp);
    }
    if let Some(lora) = &req.lora {
        cmd = cmd
            .switch("--enable-lora")
            .flag("--lora-modules", lora.to_json());
    }

    cmd = runtime_env(cmd, cfg);
    let cache = cache_dir.display().to_string();
    cmd.env("XDG_CACHE_HOME", cache.clone())
        .env("VLLM_CACHE_ROOT", cache)
        .env("CUDA_VISIBLE_DEVICES", slot.visible_devices())
}

/// A bare program name is looked up in the runtime environment first.
fn resolve_program(cfg: &ClusterConfig) -> String {
    let bin = Path::new(&cfg.vllm_bin);
    match cfg.runtime_bin_dir() {
        Some(dir) if bin.components().count() == 1 => dir.join(bin).display().to_string(),
        _ => cfg.vllm_bin.clone(),
    }
}

/// Equivalent of `conda activate`: put the environment's `bin` first on PATH.
fn runtime_env(cmd: ServeCommand, cfg: &ClusterConfig) -> ServeCommand {
    let Some(bin_dir) = cfg.runtime_bin_dir() else {
        return cmd;
    };
    let prefix = bin_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| bin_dir.clone());

    let mut paths = vec![bin_dir];
    if let Some(current) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&current));
    }
    let path = std::env::join_paths(paths)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let env_name = cfg.conda_env.clone().unwrap_or_else(|| "base".to_string());
    cmd.env("PATH", path)
        .env("CONDA_PREFIX", prefix.display().to_string())
        .env("CONDA_DEFAULT_ENV", env_name)
}

/// Working directory for the servers: configured, else wherever the launcher runs.
pub fn workdir(cfg: &ClusterConfig) -> PathBuf {
    cfg.workdir
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}
