use std::time::Duration;

use anyhow::Context;
use tokio::fs;

use fleet_common::{ClusterConfig, NodeAllocation, Slot};

use crate::serve::{vllm_command, workdir, ServeRequest};
use crate::session::{Multiplexer, PaneSpec};

/// Pane description for one slot: working directory, runtime environment, private cache,
/// accelerator visibility and the server command line.
pub fn pane_for_slot(
    cfg: &ClusterConfig,
    node: &str,
    req: &ServeRequest,
    slot: &Slot,
) -> anyhow::Result<PaneSpec> {
    let cache_dir = cfg.cache_dir(node, slot.index)?;
    let cmd = vllm_command(cfg, req, slot, &cache_dir);
    let log_path = cfg
        .logs_dir()?
        .join(format!("{}-{}-slot{}.log", cfg.session_name, node, slot.index));

    Ok(PaneSpec {
        name: format!("slot-{}", slot.index),
        cwd: workdir(cfg),
        env: cmd.env.clone(),
        argv: cmd.argv(),
        log_path: Some(log_path),
    })
}

/// Reset the node's session and start one server per slot, in slot order.
///
/// Returns the panes that were opened. If any slot fails to start, the whole session is
/// torn down before the error is returned.
pub async fn launch(
    cfg: &ClusterConfig,
    node: &str,
    allocation: &NodeAllocation,
    req: &ServeRequest,
    mux: &dyn Multiplexer,
) -> anyhow::Result<Vec<PaneSpec>> {
    mux.reset().await.context("failed to reset session")?;

    match start_slots(cfg, node, allocation, req, mux).await {
        Ok(panes) => Ok(panes),
        Err(e) => {
            tracing::warn!(node, "launch failed, tearing down session");
            if let Err(te) = mux.teardown().await {
                tracing::warn!(error=%format!("{te:#}"), "teardown after failed launch");
            }
            Err(e)
        }
    }
}

async fn start_slots(
    cfg: &ClusterConfig,
    node: &str,
    allocation: &NodeAllocation,
    req: &ServeRequest,
    mux: &dyn Multiplexer,
) -> anyhow::Result<Vec<PaneSpec>> {
    let mut panes = Vec::with_capacity(allocation.len());
    for slot in &allocation.slots {
        let pane = pane_for_slot(cfg, node, req, slot)?;
        let cache_dir = cfg.cache_dir(node, slot.index)?;
        fs::create_dir_all(&cache_dir)
            .await
            .with_context(|| format!("failed to create cache dir {}", cache_dir.display()))?;

        tracing::info!(
            node,
            slot = slot.index,
            port = slot.port,
            devices = %slot.visible_devices(),
            "starting inference server"
        );
        mux.spawn_pane(&pane)
            .await
            .with_context(|| format!("failed to start slot {}", slot.index))?;
        panes.push(pane);
    }
    Ok(panes)
}

/// Why the launcher stopped holding the job open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldOutcome {
    TimedOut,
    Cancelled,
}

/// Block until `timeout` elapses (forever when `None`) or the process is asked to stop.
pub async fn hold(timeout: Option<Duration>) -> HoldOutcome {
    let expiry = async {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = expiry => HoldOutcome::TimedOut,
        _ = shutdown_signal() => HoldOutcome::Cancelled,
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error=%e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
