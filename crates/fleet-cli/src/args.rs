use std::path::PathBuf;

use clap::{Parser, Subcommand};

use fleet_common::{ClusterConfig, JobRequest};

#[derive(Debug, Parser)]
#[command(name = "fleet")]
#[command(about = "Run many vLLM instances across a Slurm allocation", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub cluster: ClusterConfig,

    /// OTLP endpoint for exporting traces.
    #[arg(long, env = "FLEET_OTLP_URL")]
    pub otlp_url: Option<String>,

    /// Bearer token for the OTLP endpoint.
    #[arg(long, env = "FLEET_OTLP_TOKEN")]
    pub otlp_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit a serving job to the cluster
    Submit(SubmitArgs),
    /// Send test requests to the endpoints of running jobs
    Probe(ProbeArgs),
    /// Show how a node's accelerators and ports would be split
    Plan {
        /// Accelerators on the node (defaults to the configured count)
        #[arg(long)]
        accelerators: Option<u32>,
        /// Accelerators per instance
        #[arg(long, short = 't', default_value_t = 1)]
        tensor_parallel_size: u32,
    },
    /// Expand a Slurm node list such as `gpu[01-04]`
    Nodes {
        nodelist: String,
    },
}

#[derive(Debug, clap::Args)]
pub struct SubmitArgs {
    /// Name of the job; also names its runfile and log
    #[arg(long, short = 'j')]
    pub job_name: String,

    /// Number of nodes to use
    #[arg(long, short = 'n', default_value_t = 1)]
    pub nodes: u32,

    /// Model to serve. Should be a Hugging Face model name (e.g. upstage/solar-pro-preview-instruct)
    #[arg(long = "model-path", short = 'm', visible_alias = "model")]
    pub model: String,

    /// Tensor parallel size (accelerators per instance)
    #[arg(long, short = 't', default_value_t = 1)]
    pub tensor_parallel_size: u32,

    /// Path to a LoRA adapter to register with every instance
    #[arg(long)]
    pub lora_path: Option<String>,

    /// Check that the model can be read before submitting
    #[arg(long)]
    pub check_access: bool,

    /// After submission, wait until every instance answers a chat request
    #[arg(long)]
    pub wait_ready: bool,

    /// Do not ask for confirmation when no timeout is configured
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Per-node launcher executable (defaults to `fleet-node` next to this binary)
    #[arg(long, env = "FLEET_NODE_BIN")]
    pub launcher_bin: Option<PathBuf>,

    /// Model hub used by the access check
    #[arg(long, env = "HF_ENDPOINT", default_value = "https://huggingface.co")]
    pub hub_endpoint: String,

    /// Token for gated or private models
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hub_token: Option<String>,
}

impl SubmitArgs {
    pub fn to_request(&self) -> JobRequest {
        JobRequest {
            job_name: self.job_name.clone(),
            nodes: self.nodes,
            model: self.model.clone(),
            tensor_parallel_size: self.tensor_parallel_size,
            lora_path: self.lora_path.clone(),
            check_access: self.check_access,
            wait_ready: self.wait_ready,
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct ProbeArgs {
    /// Models to probe; each needs an access info file from a previous submit
    #[arg(long = "model-names", short = 'm', num_args = 1.., required = true)]
    pub models: Vec<String>,

    /// Directory for the `<model>.jsonl` result files
    #[arg(long, short = 'o')]
    pub output_dir: PathBuf,

    /// In-flight requests allowed per instance
    #[arg(long, default_value_t = 10)]
    pub concurrent_tasks_per_instance: usize,

    /// Requests to send per model
    #[arg(long, default_value_t = 100)]
    pub samples: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_requires_model() {
        let err = Args::try_parse_from(["fleet", "submit", "-j", "solar"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_submit_requires_job_name() {
        let err = Args::try_parse_from(["fleet", "submit", "-m", "org/model"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_submit_defaults() {
        let args = Args::try_parse_from(["fleet", "submit", "-j", "solar", "-m", "org/model"]).unwrap();
        let Command::Submit(submit) = args.command else {
            panic!("expected submit");
        };
        let req = submit.to_request();
        assert_eq!(req.nodes, 1);
        assert_eq!(req.tensor_parallel_size, 1);
        assert!(req.lora_path.is_none());
        assert!(!req.check_access);
    }

    #[test]
    fn test_probe_multiple_models() {
        let args = Args::try_parse_from([
            "fleet", "probe", "-m", "a/b", "c/d", "-o", "/tmp/out",
        ])
        .unwrap();
        let Command::Probe(probe) = args.command else {
            panic!("expected probe");
        };
        assert_eq!(probe.models, vec!["a/b", "c/d"]);
        assert_eq!(probe.concurrent_tasks_per_instance, 10);
    }
}
