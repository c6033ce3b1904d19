use clap::Parser;

use fleet_common::ClusterConfig;

#[derive(Debug, Parser)]
#[command(name = "fleet-node")]
#[command(about = "Start one inference server per accelerator slot on this node", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub cluster: ClusterConfig,

    /// Model to serve (Hugging Face id or local path).
    #[arg(long, short = 'm')]
    pub model: String,

    /// Accelerators per server instance.
    #[arg(long, short = 't', default_value_t = 1)]
    pub tensor_parallel_size: u32,

    /// LoRA adapter to register with every instance.
    #[arg(long, short = 'l')]
    pub lora_path: Option<String>,

    /// Node name used for cache and socket paths; falls back to `hostname -s`.
    #[arg(long, env = "SLURMD_NODENAME")]
    pub node_name: Option<String>,

    /// Address the servers bind to.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// OTLP endpoint for exporting traces.
    #[arg(long, env = "FLEET_OTLP_URL")]
    pub otlp_url: Option<String>,

    /// Bearer token for the OTLP endpoint.
    #[arg(long, env = "FLEET_OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
