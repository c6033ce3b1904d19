mod args;
mod client;
mod hub;
mod output;
mod probe;
mod submit;

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use fleet_common::access::{access_info_path, build_access_info, write_access_info};
use fleet_common::telemetry::init_tracing;
use fleet_common::{allocate, nodelist, ClusterConfig, DEFAULT_ACCELERATORS_PER_NODE};

use crate::args::{Args, Command, ProbeArgs, SubmitArgs};
use crate::client::http_client;
use crate::hub::HubProbe;
use crate::probe::{probe_models, wait_until_ready, ProbeOptions};
use crate::submit::{execution_id, submit_job, wait_for_nodes, JobQueue, SlurmQueue};

const NODE_POLL: Duration = Duration::from_secs(1);
const READY_POLL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let provider = init_tracing("fleet", None, args.otlp_url.as_deref(), args.otlp_token.as_deref());

    let result = match args.command {
        Command::Submit(ref submit) => run_submit(&args.cluster, submit).await,
        Command::Probe(ref probe) => run_probe(&args.cluster, probe).await,
        Command::Plan {
            accelerators,
            tensor_parallel_size,
        } => {
            let accelerators = accelerators
                .or(args.cluster.accelerators_per_node)
                .unwrap_or(DEFAULT_ACCELERATORS_PER_NODE);
            allocate(accelerators, tensor_parallel_size, args.cluster.start_port)
                .map(|a| output::print_allocation(&a))
                .map_err(Into::into)
        }
        Command::Nodes { ref nodelist } => nodelist::expand(nodelist)
            .map(|nodes| output::print_nodes(&nodes))
            .map_err(Into::into),
    };

    if let Some(provider) = provider {
        let _ = provider.shutdown();
    }
    result
}

fn accelerators_per_node(cfg: &ClusterConfig) -> u32 {
    cfg.accelerators_per_node
        .unwrap_or(DEFAULT_ACCELERATORS_PER_NODE)
}

/// `fleet-node` next to the running executable.
fn default_launcher_bin() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate the fleet executable")?;
    Ok(exe.with_file_name("fleet-node"))
}

fn confirm_infinite_timeout(yes: bool) -> anyhow::Result<()> {
    output::print_infinite_timeout_warning();
    if yes {
        return Ok(());
    }
    println!("Press Enter to continue... (Ctrl+C to cancel)");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

async fn run_submit(cfg: &ClusterConfig, args: &SubmitArgs) -> anyhow::Result<()> {
    let req = args.to_request();
    let accelerators = accelerators_per_node(cfg);
    req.validate(accelerators)?;
    cfg.log_dir()?;

    match cfg.timeout() {
        None => confirm_infinite_timeout(args.yes)?,
        Some(t) => println!("{}", output::timeout_line(t, chrono::Local::now())),
    }

    let launcher_bin = match &args.launcher_bin {
        Some(p) => p.clone(),
        None => default_launcher_bin()?,
    };
    let exec_id = execution_id(&chrono::Local::now());

    let http = http_client(Duration::from_secs(30))?;
    let hub = HubProbe::new(http.clone(), &args.hub_endpoint, args.hub_token.clone());
    let queue = SlurmQueue::default();

    let sub = submit_job(cfg, &req, accelerators, &exec_id, &launcher_bin, &queue, &hub).await?;
    output::print_submission(&sub);

    tokio::time::sleep(Duration::from_secs(2)).await;
    match queue.status().await {
        Ok(status) => println!("{status}"),
        Err(e) => tracing::warn!(error=%format!("{e:#}"), "squeue failed"),
    }

    println!("Waiting for the job to start...");
    let nodes = wait_for_nodes(&sub.paths.log, req.nodes as usize, NODE_POLL).await?;
    tracing::info!(job_id=%sub.job_id, ?nodes, "job started");

    let allocation = allocate(accelerators, req.tensor_parallel_size, cfg.start_port)?;
    let entries = build_access_info(&req.model, &nodes, &allocation);
    let path = access_info_path(&cfg.access_info_dir()?, &req.model);
    write_access_info(&path, &entries).await?;
    output::print_access_info(&path, &entries);

    if req.wait_ready {
        println!("Checking accessibility of the model...");
        wait_until_ready(&http, &req.model, &entries, READY_POLL).await?;
    }
    Ok(())
}

async fn run_probe(cfg: &ClusterConfig, args: &ProbeArgs) -> anyhow::Result<()> {
    let access_dir = cfg.access_info_dir()?;
    let opts = ProbeOptions {
        output_dir: args.output_dir.clone(),
        concurrent_tasks_per_instance: args.concurrent_tasks_per_instance,
        samples: args.samples,
    };
    let http = http_client(Duration::from_secs(600))?;

    let results = probe_models(&access_dir, &args.models, &opts, http).await;
    output::print_probe_results(&results);

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} models could not be probed", results.len());
    }
    Ok(())
}
