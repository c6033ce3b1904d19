use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local};

use fleet_common::{AccessEntry, NodeAllocation};

use crate::probe::ProbeSummary;
use crate::submit::Submission;

pub fn print_infinite_timeout_warning() {
    println!("+=====================================[WARNING]=====================================+");
    println!("|                            Timeout is set to INFINITY.                            |");
    println!("| This means the vLLM serve will run indefinitely even if the model is not working. |");
    println!("|      It is recommended to set a timeout for better GPU resource utilization.      |");
    println!("+===================================================================================+");
}

pub fn timeout_line(timeout: Duration, now: DateTime<Local>) -> String {
    let eta = i64::try_from(timeout.as_secs())
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|d| now.checked_add_signed(d));
    match eta {
        Some(eta) => format!(
            "Timeout: {} seconds (ETA: {})",
            timeout.as_secs(),
            eta.format("%Y-%m-%d %H:%M:%S %Z")
        ),
        None => format!(
            "Timeout: {} seconds (ETA: beyond representable range)",
            timeout.as_secs()
        ),
    }
}

pub fn print_allocation(allocation: &NodeAllocation) {
    println!(
        "\n=== Node plan: {} accelerators, {} per instance ===\n",
        allocation.accelerators_per_node, allocation.accelerators_per_instance
    );
    if allocation.is_empty() {
        println!("No instance fits on this node.");
        return;
    }
    println!("  {:<6} {:<24} {:<8}", "Slot", "CUDA_VISIBLE_DEVICES", "Port");
    println!("  {:-<40}", "");
    for slot in &allocation.slots {
        println!(
            "  {:<6} {:<24} {:<8}",
            slot.index,
            slot.visible_devices(),
            slot.port
        );
    }
    let unused = allocation.unused_accelerators();
    if !unused.is_empty() {
        println!("\n  Unused accelerators: {unused:?}");
    }
    println!();
}

pub fn print_nodes(nodes: &[String]) {
    for node in nodes {
        println!("{node}");
    }
}

pub fn print_submission(sub: &Submission) {
    println!("✓ Submitted batch job {} ({})", sub.job_id, sub.paths.slurm_name);
    println!("  Runfile: {}", sub.paths.runfile.display());
    println!("  Log:     {}", sub.paths.log.display());
}

pub fn print_access_info(path: &Path, entries: &[AccessEntry]) {
    println!("\n=== Endpoints ({}) ===", entries.len());
    for entry in entries {
        println!("  {}", entry.api_base());
    }
    println!("Access info written to {}", path.display());
}

pub fn print_probe_results(results: &[(String, anyhow::Result<ProbeSummary>)]) {
    for (model, res) in results {
        match res {
            Ok(s) => println!("✓ Model {model} completed ({} ok, {} failed)", s.ok, s.failed),
            Err(e) => eprintln!("✗ Error during processing {model}: {e:#}"),
        }
    }
}
