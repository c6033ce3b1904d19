use tokio::process::Command;

/// Number of GPUs `nvidia-smi` reports, or `None` when it is missing or fails.
pub async fn detect_gpu_count() -> Option<u32> {
    let output = Command::new("nvidia-smi")
        .arg("--query-gpu=index")
        .arg("--format=csv,noheader,nounits")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_gpu_count(&String::from_utf8_lossy(&output.stdout))
}

fn parse_gpu_count(stdout: &str) -> Option<u32> {
    let count = stdout
        .lines()
        .filter(|l| l.trim().parse::<u32>().is_ok())
        .count() as u32;
    (count > 0).then_some(count)
}
