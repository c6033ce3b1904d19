mod args;
mod gpu;
mod launcher;
mod serve;
mod session;
mod util;

use clap::Parser;

use fleet_common::telemetry::init_tracing;
use fleet_common::{allocate, LoraAdapter, DEFAULT_ACCELERATORS_PER_NODE};

use crate::args::Args;
use crate::launcher::{hold, launch, HoldOutcome};
use crate::serve::ServeRequest;
use crate::session::{Multiplexer, TmuxSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let node = match args.node_name.clone().filter(|n| !n.is_empty()) {
        Some(n) => n,
        None => util::short_hostname().await?,
    };

    let provider = init_tracing(
        "fleet-node",
        Some(&node),
        args.otlp_url.as_deref(),
        args.otlp_token.as_deref(),
    );

    let result = run(&args, &node).await;
    if let Err(e) = &result {
        tracing::error!(node=%node, error=%format!("{e:#}"), "launcher failed");
    }

    if let Some(provider) = provider {
        let _ = provider.shutdown();
    }
    result
}

async fn run(args: &Args, node: &str) -> anyhow::Result<()> {
    let cfg = &args.cluster;
    if args.tensor_parallel_size == 0 {
        anyhow::bail!("tensor parallel size must be at least 1");
    }

    let accelerators = match cfg.accelerators_per_node {
        Some(n) => n,
        None => gpu::detect_gpu_count().await.unwrap_or_else(|| {
            tracing::warn!(
                default = DEFAULT_ACCELERATORS_PER_NODE,
                "could not detect GPUs, using default count"
            );
            DEFAULT_ACCELERATORS_PER_NODE
        }),
    };

    let allocation = allocate(accelerators, args.tensor_parallel_size, cfg.start_port)?;
    let unused = allocation.unused_accelerators();
    if !unused.is_empty() {
        tracing::warn!(
            ?unused,
            accelerators,
            tensor_parallel_size = args.tensor_parallel_size,
            "accelerator count not divisible by tensor parallel size, leaving tail unused"
        );
    }
    if allocation.is_empty() {
        anyhow::bail!(
            "no slot fits: {} accelerators, {} per instance",
            accelerators,
            args.tensor_parallel_size
        );
    }

    tracing::info!(
        node,
        model=%args.model,
        slots = allocation.len(),
        ports = ?allocation.ports(),
        "node allocation"
    );

    let req = ServeRequest {
        model: args.model.clone(),
        lora: args
            .lora_path
            .as_deref()
            .map(|p| LoraAdapter::new(p, &args.model)),
        host: args.host.clone(),
    };

    let session = TmuxSession::new(cfg.socket_path(node)?, cfg.session_name.clone());
    launch(cfg, node, &allocation, &req, &session).await?;
    tracing::info!(attach = %session.attach_hint(), "all instances started");

    match cfg.timeout() {
        Some(t) => tracing::info!(seconds = t.as_secs(), "holding job until timeout"),
        None => tracing::info!("no timeout set, holding job until cancelled"),
    }

    let outcome = hold(cfg.timeout()).await;
    match outcome {
        HoldOutcome::TimedOut => tracing::info!(node, "timeout reached"),
        HoldOutcome::Cancelled => tracing::info!(node, "cancelled"),
    }

    session.teardown().await?;
    Ok(())
}
