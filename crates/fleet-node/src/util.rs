use tokio::process::Command;

/// Short host name of this machine, as Slurm lists it.
pub async fn short_hostname() -> anyhow::Result<String> {
    let output = Command::new("hostname").arg("-s").output().await?;
    if !output.status.success() {
        anyhow::bail!("hostname exited with {}", output.status);
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() {
        anyhow::bail!("hostname returned an empty name");
    }
    Ok(name)
}
