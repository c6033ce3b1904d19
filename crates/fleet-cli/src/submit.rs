use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use fleet_common::{nodelist, shell, ClusterConfig, JobRequest};

use crate::hub::ModelProbe;

/// Suffix that keeps repeated submissions of one job name apart.
pub fn execution_id<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Where one submission's artifacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    /// Name the job shows up under in the queue.
    pub slurm_name: String,
    pub runfile: PathBuf,
    pub log: PathBuf,
}

impl JobPaths {
    pub fn new(cfg: &ClusterConfig, job_name: &str, exec_id: &str) -> anyhow::Result<Self> {
        Ok(Self {
            slurm_name: format!("{job_name}-{exec_id}"),
            runfile: cfg.scripts_dir()?.join(format!("{job_name}_{exec_id}.slurm")),
            log: cfg.logs_dir()?.join(format!("{job_name}_{exec_id}.log")),
        })
    }
}

/// The sbatch script: one task per node, each running the per-node launcher.
pub fn render_runfile(
    cfg: &ClusterConfig,
    req: &JobRequest,
    paths: &JobPaths,
    accelerators_per_node: u32,
    launcher_bin: &Path,
) -> anyhow::Result<String> {
    let partition = cfg.partition()?;
    let mut s = String::new();
    writeln!(s, "#!/bin/bash")?;
    writeln!(s, "#SBATCH --partition={partition}")?;
    writeln!(s, "#SBATCH -o {}", paths.log.display())?;
    writeln!(s, "#SBATCH --job-name={}", paths.slurm_name)?;
    writeln!(s, "#SBATCH --nodes={}", req.nodes)?;
    writeln!(s, "#SBATCH --ntasks={}", req.nodes)?;
    writeln!(s, "#SBATCH --ntasks-per-node=1")?;
    writeln!(s, "#SBATCH --gpus-per-task={accelerators_per_node}")?;
    writeln!(s, "#SBATCH --cpus-per-gpu={}", cfg.cpus_per_gpu)?;
    writeln!(s, "#SBATCH --mem-per-gpu={}", cfg.mem_per_gpu)?;
    writeln!(s)?;

    for (key, value) in cfg.export_pairs().into_iter().filter(|(k, _)| *k != "GPUS_PER_NODE") {
        writeln!(s, "export {key}={}", shell::quote(&value))?;
    }
    writeln!(s, "export GPUS_PER_NODE={accelerators_per_node}")?;
    writeln!(s, "export MASTER_ADDR=$(hostname)")?;
    writeln!(s)?;
    writeln!(s, "echo \"Nodes: $SLURM_JOB_NODELIST\"")?;
    writeln!(s, "echo \"Master addr: $MASTER_ADDR\"")?;
    writeln!(s)?;

    let mut srun = vec![
        "srun".to_string(),
        "-l".to_string(),
        shell::quote(&launcher_bin.display().to_string()),
        "--model".to_string(),
        shell::quote(&req.model),
        "--tensor-parallel-size".to_string(),
        req.tensor_parallel_size.to_string(),
    ];
    if let Some(lora) = &req.lora_path {
        srun.push("--lora-path".to_string());
        srun.push(shell::quote(lora));
    }
    writeln!(s, "{}", srun.join(" "))?;
    Ok(s)
}

/// Write the runfile, refusing to reuse a job name + execution id that already has a
/// runfile or log: two jobs would otherwise append to the same log.
pub async fn write_runfile(paths: &JobPaths, content: &str) -> anyhow::Result<()> {
    for dir in [paths.runfile.parent(), paths.log.parent()].into_iter().flatten() {
        fs::create_dir_all(dir).await?;
    }
    if fs::try_exists(&paths.log).await.unwrap_or(false) {
        anyhow::bail!(
            "log {} already exists; another job with this name was submitted in the same second",
            paths.log.display()
        );
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&paths.runfile)
        .await
        .with_context(|| format!("runfile {} already exists", paths.runfile.display()))?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// The batch scheduler's submission and queue listing commands.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a runfile; returns the scheduler's job id.
    async fn submit(&self, runfile: &Path, cwd: &Path) -> anyhow::Result<String>;

    /// Human-readable listing of the caller's jobs.
    async fn status(&self) -> anyhow::Result<String>;
}

/// `sbatch` and `squeue` from PATH.
pub struct SlurmQueue {
    sbatch: String,
    squeue: String,
}

impl Default for SlurmQueue {
    fn default() -> Self {
        Self {
            sbatch: "sbatch".to_string(),
            squeue: "squeue".to_string(),
        }
    }
}

#[async_trait]
impl JobQueue for SlurmQueue {
    async fn submit(&self, runfile: &Path, cwd: &Path) -> anyhow::Result<String> {
        let output = Command::new(&self.sbatch)
            .arg(runfile)
            .current_dir(cwd)
            .output()
            .await
            .context("failed to run sbatch")?;
        if !output.status.success() {
            anyhow::bail!(
                "sbatch failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_job_id(&stdout)
            .ok_or_else(|| anyhow::anyhow!("unexpected sbatch output: {}", stdout.trim()))
    }

    async fn status(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.squeue)
            .arg("--me")
            .output()
            .await
            .context("failed to run squeue")?;
        if !output.status.success() {
            anyhow::bail!(
                "squeue failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// `Submitted batch job 123456` → `123456`.
pub fn parse_job_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("Submitted batch job "))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub job_id: String,
    pub paths: JobPaths,
}

/// Validate, optionally probe, render and submit. Nothing reaches the queue unless every
/// earlier step succeeded.
pub async fn submit_job(
    cfg: &ClusterConfig,
    req: &JobRequest,
    accelerators_per_node: u32,
    exec_id: &str,
    launcher_bin: &Path,
    queue: &dyn JobQueue,
    probe: &dyn ModelProbe,
) -> anyhow::Result<Submission> {
    req.validate(accelerators_per_node)?;
    cfg.partition()?;

    if req.check_access {
        println!("Checking access to {}...", req.model);
        probe
            .check(&req.model, req.lora_path.as_deref())
            .await
            .context("access check failed, job not submitted")?;
    }

    let paths = JobPaths::new(cfg, &req.job_name, exec_id)?;
    let content = render_runfile(cfg, req, &paths, accelerators_per_node, launcher_bin)?;
    write_runfile(&paths, &content).await?;

    let cwd = std::env::current_dir()?;
    println!("Running job on {}", cwd.display());
    let job_id = queue.submit(&paths.runfile, &cwd).await?;
    tracing::info!(job_id=%job_id, runfile=%paths.runfile.display(), "job submitted");

    Ok(Submission { job_id, paths })
}

/// Wait for the job log to announce its node list, then expand it.
pub async fn wait_for_nodes(
    log: &Path,
    expected: usize,
    poll: Duration,
) -> anyhow::Result<Vec<String>> {
    loop {
        if let Ok(content) = fs::read_to_string(log).await {
            if let Some(nodes) = content
                .lines()
                .next()
                .and_then(|l| l.strip_prefix("Nodes: "))
            {
                let nodes = nodelist::expand(nodes)?;
                if nodes.len() == expected {
                    return Ok(nodes);
                }
                tracing::debug!(found = nodes.len(), expected, "node list incomplete");
            }
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;

    fn config(dir: &Path) -> ClusterConfig {
        let mut cfg = ClusterConfig::with_log_dir(dir);
        cfg.partition = Some("gpu".to_string());
        cfg.timeout_seconds = 7200;
        cfg
    }

    fn request() -> JobRequest {
        JobRequest {
            job_name: "solar".to_string(),
            nodes: 2,
            model: "upstage/solar-pro-preview-instruct".to_string(),
            tensor_parallel_size: 2,
            lora_path: None,
            check_access: false,
            wait_ready: false,
        }
    }

    #[derive(Default)]
    struct RecordingQueue {
        submitted: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl JobQueue for RecordingQueue {
        async fn submit(&self, runfile: &Path, _cwd: &Path) -> anyhow::Result<String> {
            self.submitted.lock().unwrap().push(runfile.to_path_buf());
            Ok("4242".to_string())
        }

        async fn status(&self) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    struct StaticProbe(bool);

    #[async_trait]
    impl ModelProbe for StaticProbe {
        async fn check(&self, model: &str, _lora: Option<&str>) -> anyhow::Result<()> {
            if self.0 {
                Ok(())
            } else {
                anyhow::bail!("model '{model}' was not found")
            }
        }
    }

    #[test]
    fn test_execution_id_format() {
        let t = Utc.with_ymd_and_hms(2024, 9, 3, 7, 5, 9).unwrap();
        assert_eq!(execution_id(&t), "20240903_070509");
    }

    #[test]
    fn test_render_runfile() {
        let cfg = config(Path::new("/shared"));
        let mut req = request();
        req.lora_path = Some("/ckpt/it's lora".to_string());
        let paths = JobPaths::new(&cfg, "solar", "20240903_070509").unwrap();
        let script = render_runfile(&cfg, &req, &paths, 8, Path::new("/opt/fleet/fleet-node")).unwrap();

        assert!(script.starts_with("#!/bin/bash\n#SBATCH --partition=gpu\n"));
        assert!(script.contains("#SBATCH -o /shared/logs/solar_20240903_070509.log\n"));
        assert!(script.contains("#SBATCH --job-name=solar-20240903_070509\n"));
        assert!(script.contains("#SBATCH --nodes=2\n#SBATCH --ntasks=2\n"));
        assert!(script.contains("#SBATCH --gpus-per-task=8\n"));
        assert!(script.contains("export TIMEOUT_SECONDS=7200\n"));
        assert!(script.contains("echo \"Nodes: $SLURM_JOB_NODELIST\""));
        assert!(script.contains(
            "srun -l /opt/fleet/fleet-node --model upstage/solar-pro-preview-instruct \
             --tensor-parallel-size 2 --lora-path '/ckpt/it'\\''s lora'\n"
        ));
        assert_eq!(paths.runfile, Path::new("/shared/scripts/solar_20240903_070509.slurm"));
    }

    #[tokio::test]
    async fn test_queue_status_reports_failure() {
        let failing = SlurmQueue {
            squeue: "false".to_string(),
            ..Default::default()
        };
        assert!(failing.status().await.is_err());

        let listing = SlurmQueue {
            squeue: "echo".to_string(),
            ..Default::default()
        };
        assert_eq!(listing.status().await.unwrap().trim(), "--me");
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(parse_job_id("Submitted batch job 123456\n").as_deref(), Some("123456"));
        assert_eq!(parse_job_id("sbatch: error: invalid partition"), None);
    }

    #[tokio::test]
    async fn test_submit_job_writes_runfile_and_submits() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let queue = RecordingQueue::default();

        let sub = submit_job(&cfg, &request(), 8, "20240903_070509", Path::new("fleet-node"), &queue, &StaticProbe(true))
            .await
            .unwrap();

        assert_eq!(sub.job_id, "4242");
        assert!(sub.paths.runfile.is_file());
        assert_eq!(*queue.submitted.lock().unwrap(), vec![sub.paths.runfile.clone()]);
    }

    #[tokio::test]
    async fn test_invalid_request_never_submits() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let queue = RecordingQueue::default();
        let mut req = request();
        req.model = String::new();

        let res = submit_job(&cfg, &req, 8, "x", Path::new("fleet-node"), &queue, &StaticProbe(true)).await;
        assert!(res.is_err());
        assert!(queue.submitted.lock().unwrap().is_empty());
        assert!(!dir.path().join("scripts").exists());
    }

    #[tokio::test]
    async fn test_failed_access_check_never_submits() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let queue = RecordingQueue::default();
        let mut req = request();
        req.check_access = true;

        let err = submit_job(&cfg, &req, 8, "x", Path::new("fleet-node"), &queue, &StaticProbe(false))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("not found"));
        assert!(queue.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_name_and_execution_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let queue = RecordingQueue::default();

        submit_job(&cfg, &request(), 8, "20240903_070509", Path::new("fleet-node"), &queue, &StaticProbe(true))
            .await
            .unwrap();
        let second =
            submit_job(&cfg, &request(), 8, "20240903_070509", Path::new("fleet-node"), &queue, &StaticProbe(true))
                .await;
        assert!(second.is_err());
        assert_eq!(queue.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_nodes_reads_log_header() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("job.log");
        std::fs::write(&log, "Nodes: gpu[01-02]\nMaster addr: gpu01\n").unwrap();

        let nodes = wait_for_nodes(&log, 2, Duration::from_millis(10)).await.unwrap();
        assert_eq!(nodes, vec!["gpu01", "gpu02"]);
    }
}
