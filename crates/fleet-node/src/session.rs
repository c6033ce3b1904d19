use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;

use fleet_common::shell;

/// One window in the node's session, running a single process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneSpec {
    pub name: String,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub argv: Vec<String>,
    /// Pane output is appended here in addition to being shown on attach.
    pub log_path: Option<PathBuf>,
}

/// A terminal multiplexer that hosts the node's server processes.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Destroy any session of the same name (and its processes) and start an empty one.
    /// Intentionally destructive: a node only ever runs one generation of servers.
    async fn reset(&self) -> anyhow::Result<()>;

    /// Open a new pane running `pane.argv`, with its log attached before the process
    /// starts. The pane stays open after the process exits.
    async fn spawn_pane(&self, pane: &PaneSpec) -> anyhow::Result<()>;

    /// Kill the session and everything running in it.
    async fn teardown(&self) -> anyhow::Result<()>;
}

/// tmux on a private socket, one session per node.
pub struct TmuxSession {
    bin: String,
    socket: PathBuf,
    name: String,
}

impl TmuxSession {
    pub fn new(socket: PathBuf, name: impl Into<String>) -> Self {
        Self {
            bin: "tmux".to_string(),
            socket,
            name: name.into(),
        }
    }

    /// Command an operator runs to look at the panes.
    pub fn attach_hint(&self) -> String {
        format!(
            "tmux -S {} attach -t {}",
            shell::quote(&self.socket.display().to_string()),
            shell::quote(&self.name)
        )
    }

    fn command(&self, args: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-S").arg(&self.socket).args(args);
        cmd
    }

    async fn run(&self, args: Vec<OsString>) -> anyhow::Result<Output> {
        let output = self.command(&args).output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "tmux {:?} failed ({}): {}",
                args,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output)
    }

    /// Like `run`, for commands that fail harmlessly when there is nothing to act on.
    async fn run_quiet(&self, args: Vec<OsString>) {
        if let Err(e) = self.command(&args).output().await {
            tracing::debug!(error=%e, "tmux command could not be started");
        }
    }
}

fn os_args<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    args.into_iter().map(Into::into).collect()
}

/// Holds a fresh window open until the real command replaces it.
const PLACEHOLDER: [&str; 2] = ["sleep", "86400"];

/// `sun_path` is 108 bytes including the trailing NUL on Linux.
pub const MAX_SOCKET_PATH: usize = 107;

/// Arguments for `tmux new-window`, opening the pane on a placeholder so its log can be
/// attached before the server writes anything.
pub fn new_window_args(session: &str, pane: &PaneSpec) -> Vec<OsString> {
    let mut args = os_args(["new-window", "-d", "-t"]);
    args.push(format!("{session}:").into());
    args.extend(os_args(["-n", pane.name.as_str(), "-c"]));
    args.push(pane.cwd.clone().into());
    args.push("--".into());
    args.extend(os_args(PLACEHOLDER));
    args
}

/// Arguments for `tmux respawn-pane`; the program is passed as separate words so tmux
/// executes it directly instead of through `sh -c`.
pub fn respawn_args(target: &str, pane: &PaneSpec) -> Vec<OsString> {
    let mut args = os_args(["respawn-pane", "-k", "-t", target, "-c"]);
    args.push(pane.cwd.clone().into());
    for (k, v) in &pane.env {
        args.push("-e".into());
        args.push(format!("{k}={v}").into());
    }
    args.push("--".into());
    args.extend(pane.argv.iter().map(OsString::from));
    args
}

#[async_trait]
impl Multiplexer for TmuxSession {
    async fn reset(&self) -> anyhow::Result<()> {
        let len = self.socket.as_os_str().len();
        if len > MAX_SOCKET_PATH {
            anyhow::bail!(
                "tmux socket path {} is {len} bytes, over the {MAX_SOCKET_PATH} byte limit; \
                 set TMUX_SOCKET_DIR to a shorter directory",
                self.socket.display()
            );
        }
        if let Some(parent) = self.socket.parent() {
            fs::create_dir_all(parent).await?;
        }

        if fs::try_exists(&self.socket).await.unwrap_or(false) {
            tracing::info!(socket=%self.socket.display(), session=%self.name, "resetting existing session");
            self.run_quiet(os_args(["kill-session", "-t", self.name.as_str()]))
                .await;
            self.run_quiet(os_args(["kill-server"])).await;
            // A server that died uncleanly leaves the socket behind; tmux refuses to reuse it.
            if fs::try_exists(&self.socket).await.unwrap_or(false) {
                tracing::info!(socket=%self.socket.display(), "removing stale tmux socket");
                fs::remove_file(&self.socket).await?;
            }
        }

        self.run(os_args([
            "new-session",
            "-d",
            "-s",
            self.name.as_str(),
            "-n",
            "control",
        ]))
        .await?;
        self.run(os_args(["set-option", "-g", "remain-on-exit", "on"]))
            .await?;
        Ok(())
    }

    async fn spawn_pane(&self, pane: &PaneSpec) -> anyhow::Result<()> {
        self.run(new_window_args(&self.name, pane)).await?;
        let target = format!("{}:{}", self.name, pane.name);

        if let Some(log_path) = &pane.log_path {
            if let Some(parent) = log_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let sink = format!("cat >> {}", shell::quote(&log_path.display().to_string()));
            self.run(os_args(["pipe-pane", "-o", "-t", target.as_str(), sink.as_str()]))
                .await?;
        }

        // A server that exits right away still leaves its pane behind (remain-on-exit).
        self.run(respawn_args(&target, pane)).await?;
        Ok(())
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        tracing::info!(session=%self.name, "tearing down session");
        self.run_quiet(os_args(["kill-server"])).await;
        if fs::try_exists(&self.socket).await.unwrap_or(false) {
            fs::remove_file(&self.socket).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn pane(argv: &[&str], log_path: Option<PathBuf>) -> PaneSpec {
        PaneSpec {
            name: "slot-1".to_string(),
            cwd: PathBuf::from("/work"),
            env: vec![("CUDA_VISIBLE_DEVICES".to_string(), "2,3".to_string())],
            argv: argv.iter().map(|a| a.to_string()).collect(),
            log_path,
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_window_opens_on_placeholder() {
        let pane = pane(&["vllm", "serve", "a b"], None);
        assert_eq!(
            strings(new_window_args("vllm", &pane)),
            vec!["new-window", "-d", "-t", "vllm:", "-n", "slot-1", "-c", "/work", "--", "sleep", "86400"]
        );
    }

    #[test]
    fn test_respawn_args() {
        let pane = pane(&["vllm", "serve", "a b"], None);
        assert_eq!(
            strings(respawn_args("vllm:slot-1", &pane)),
            vec![
                "respawn-pane", "-k", "-t", "vllm:slot-1", "-c", "/work", "-e",
                "CUDA_VISIBLE_DEVICES=2,3", "--", "vllm", "serve", "a b",
            ]
        );
    }

    #[test]
    fn test_attach_hint() {
        let session = TmuxSession::new(PathBuf::from("/logs/tmux/vllm-n1.sock"), "vllm");
        assert_eq!(session.attach_hint(), "tmux -S /logs/tmux/vllm-n1.sock attach -t vllm");
    }

    #[tokio::test]
    async fn test_teardown_removes_leftover_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vllm-n1.sock");
        std::fs::write(&socket, b"").unwrap();

        let mut session = TmuxSession::new(socket.clone(), "vllm");
        // Any binary works here: kill-server failures are ignored.
        session.bin = "true".to_string();
        session.teardown().await.unwrap();
        assert!(!socket.exists());
    }

    /// Shell script standing in for tmux that records each invocation.
    #[cfg(unix)]
    fn recording_bin(dir: &Path) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let calls = dir.join("calls");
        let bin = dir.join("fake-tmux");
        std::fs::write(&bin, format!("#!/bin/sh\necho \"$@\" >> {}\n", calls.display())).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        (bin, calls)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reset_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let (bin, calls) = recording_bin(dir.path());
        let socket = dir.path().join("vllm-n1.sock");
        std::fs::write(&socket, b"").unwrap();

        let mut session = TmuxSession::new(socket.clone(), "vllm");
        session.bin = bin.display().to_string();
        session.reset().await.unwrap();

        assert!(!socket.exists());
        let calls = std::fs::read_to_string(calls).unwrap();
        let ops: Vec<&str> = calls
            .lines()
            .map(|l| l.split_whitespace().nth(2).unwrap_or_default())
            .collect();
        assert_eq!(ops, vec!["kill-session", "kill-server", "new-session", "set-option"]);
        assert!(calls.contains("set-option -g remain-on-exit on"));
    }

    #[tokio::test]
    async fn test_reset_rejects_long_socket_path() {
        let long = PathBuf::from("/").join("d".repeat(MAX_SOCKET_PATH)).join("vllm-n1.sock");
        let mut session = TmuxSession::new(long, "vllm");
        session.bin = "false".to_string();

        let err = session.reset().await.unwrap_err();
        assert!(err.to_string().contains("TMUX_SOCKET_DIR"));
    }

    fn tmux_available() -> bool {
        std::process::Command::new("tmux")
            .arg("-V")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn wait_for_log(path: &Path, needle: &str) -> String {
        for _ in 0..50 {
            let body = std::fs::read_to_string(path).unwrap_or_default();
            if body.contains(needle) {
                return body;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        std::fs::read_to_string(path).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_log_captures_first_output_line() {
        if !tmux_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let session = TmuxSession::new(dir.path().join("t.sock"), "fleet-test");
        session.reset().await.unwrap();

        let log = dir.path().join("slot.log");
        let mut spec = pane(&["sh", "-c", "echo STARTUP-LINE; sleep 1; echo LATER-LINE"], Some(log.clone()));
        spec.cwd = dir.path().to_path_buf();
        session.spawn_pane(&spec).await.unwrap();

        let body = wait_for_log(&log, "LATER-LINE").await;
        session.teardown().await.unwrap();
        assert!(body.contains("STARTUP-LINE"), "log was {body:?}");
        assert!(body.contains("LATER-LINE"), "log was {body:?}");
    }

    #[tokio::test]
    async fn test_missing_program_leaves_idle_pane() {
        if !tmux_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let session = TmuxSession::new(dir.path().join("t.sock"), "fleet-test");
        session.reset().await.unwrap();

        let mut spec = pane(&["/no/such/vllm"], Some(dir.path().join("slot.log")));
        spec.cwd = dir.path().to_path_buf();
        let res = session.spawn_pane(&spec).await;
        session.teardown().await.unwrap();
        assert!(res.is_ok(), "{res:?}");
    }
}
