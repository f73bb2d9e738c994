//! Process execution utilities
//!
//! Provides helpers for running the external tools (yt-dlp, ffmpeg, biliup):
//! - timeouts and cancellation for short-lived commands
//! - line-by-line output streaming for long-running ones
//! - best-effort termination of a running tool and everything it spawned

use std::ffi::OsStr;
use std::process::{ExitStatus, Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::{AppError, AppResult};

/// Hides the console window tools would otherwise open on Windows.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Builds a command for an external tool with stdin detached.
pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null());
    #[cfg(windows)]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Run an async Command with a timeout.
///
/// Returns the process Output on success, `Timeout` when the deadline passes
/// (the child is killed), or `ToolMissing`/`Io` when it cannot start.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration, tool: &str) -> AppResult<Output> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(AppError::spawn(tool, e)),
        Err(_) => Err(AppError::Timeout {
            tool: tool.to_string(),
            secs: timeout.as_secs(),
        }),
    }
}

/// Runs a command to completion and turns a non-zero exit into `ToolFailed`.
pub async fn run_checked(cmd: &mut Command, tool: &str) -> AppResult<Output> {
    let output = cmd.output().await.map_err(|e| AppError::spawn(tool, e))?;
    if !output.status.success() {
        return Err(AppError::tool_failed(tool, &output));
    }
    Ok(output)
}

/// Runs a command until it finishes or `token` fires.
///
/// `Ok(None)` means the token fired first; the child is killed on drop.
pub async fn run_cancellable(cmd: &mut Command, token: &CancellationToken, tool: &str) -> AppResult<Option<Output>> {
    if token.is_cancelled() {
        return Ok(None);
    }
    cmd.kill_on_drop(true);
    tokio::select! {
        output = cmd.output() => output.map(Some).map_err(|e| AppError::spawn(tool, e)),
        _ = token.cancelled() => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of tool output, lossily decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Merges the child's piped stdout and stderr into one line channel.
///
/// The receiver yields `None` once both pipes are closed. Pipes that were not
/// configured as `Stdio::piped()` are skipped.
pub fn stream_output(child: &mut Child) -> mpsc::UnboundedReceiver<OutputLine> {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        pump(stdout, OutputStream::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        pump(stderr, OutputStream::Stderr, tx);
    }
    rx
}

fn pump<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf)
                        .trim_end_matches(|c| c == '\r' || c == '\n')
                        .to_string();
                    if tx.send(OutputLine { stream, text }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::debug!("Output pipe closed with error: {}", e);
                    break;
                }
            }
        }
    });
}

/// Waits for the child, killing it first if `kill_switch` fires.
pub async fn wait_or_kill(child: &mut Child, kill_switch: &CancellationToken) -> std::io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status,
        _ = kill_switch.cancelled() => {
            if let Err(e) = child.start_kill() {
                log::debug!("start_kill failed (process already gone?): {}", e);
            }
            child.wait().await
        }
    }
}

/// What the controller keeps about a running external tool.
///
/// `kill_switch` is observed by the worker that owns the `Child`; cancelling it
/// makes the worker kill and reap its direct child.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_switch: CancellationToken,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>, kill_switch: CancellationToken) -> Self {
        Self { pid, kill_switch }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn kill_switch(&self) -> &CancellationToken {
        &self.kill_switch
    }

    pub fn is_killed(&self) -> bool {
        self.kill_switch.is_cancelled()
    }
}

/// Best-effort termination backend.
///
/// Implementations never fail: whatever could not be killed is logged and
/// the number of processes actually signalled is returned.
pub trait ProcessTerminator: Send + Sync {
    fn name(&self) -> &'static str;

    fn terminate(&self, handle: &ProcessHandle) -> usize;
}

/// Kills the process and all its descendants, children first.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeTerminator;

impl TreeTerminator {
    /// `root` followed by its descendants in breadth-first order.
    fn collect_tree(sys: &System, root: Pid) -> Vec<Pid> {
        let mut tree = vec![root];
        let mut i = 0;
        while i < tree.len() {
            let parent = tree[i];
            for (pid, process) in sys.processes() {
                if process.parent() == Some(parent) && !tree.contains(pid) {
                    tree.push(*pid);
                }
            }
            i += 1;
        }
        tree
    }
}

impl ProcessTerminator for TreeTerminator {
    fn name(&self) -> &'static str {
        "process-tree"
    }

    fn terminate(&self, handle: &ProcessHandle) -> usize {
        handle.kill_switch.cancel();
        let Some(root) = handle.pid else {
            return 0;
        };

        let sys = System::new_with_specifics(RefreshKind::new().with_processes(ProcessRefreshKind::new()));
        let tree = Self::collect_tree(&sys, Pid::from_u32(root));

        let mut killed = 0;
        for pid in tree.iter().rev() {
            match sys.process(*pid) {
                Some(process) if process.kill() => killed += 1,
                Some(_) => log::warn!("Failed to kill pid {} (tree of {})", pid, root),
                None => log::debug!("Pid {} already exited", pid),
            }
        }
        log::info!("🛑 Terminated {} process(es) in tree of pid {}", killed, root);
        killed
    }
}

/// Kills only the direct child through the owning worker's kill switch.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectTerminator;

impl ProcessTerminator for DirectTerminator {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn terminate(&self, handle: &ProcessHandle) -> usize {
        handle.kill_switch.cancel();
        match handle.pid {
            Some(pid) => {
                log::info!("🛑 Requested kill of pid {}", pid);
                1
            }
            None => 0,
        }
    }
}

/// Tree termination when the platform exposes a process table, direct kill otherwise.
pub fn default_terminator() -> Arc<dyn ProcessTerminator> {
    if sysinfo::IS_SUPPORTED_SYSTEM {
        Arc::new(TreeTerminator)
    } else {
        Arc::new(DirectTerminator)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_checked_success_and_failure() {
        let out = run_checked(command("sh").args(["-c", "echo hello"]), "sh").await.unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");

        let err = run_checked(command("sh").args(["-c", "echo boom >&2; exit 3"]), "sh")
            .await
            .unwrap_err();
        match err {
            AppError::ToolFailed { tool, code, output } => {
                assert_eq!(tool, "sh");
                assert_eq!(code, Some(3));
                assert_eq!(output, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_missing() {
        let err = run_checked(&mut command("definitely-not-a-real-tool-4242"), "fake")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ToolMissing { .. }));
    }

    #[tokio::test]
    async fn test_run_with_timeout_expires() {
        let err = run_with_timeout(command("sleep").arg("5"), Duration::from_millis(100), "sleep")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout { ref tool, .. } if tool == "sleep"));
    }

    #[tokio::test]
    async fn test_run_cancellable_returns_none_when_cancelled() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let started = std::time::Instant::now();
        let result = run_cancellable(command("sleep").arg("5"), &token, "sleep").await.unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_stream_output_merges_both_pipes() {
        let mut child = command("sh")
            .args(["-c", "echo out1; echo err1 >&2; echo out2"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let mut rx = stream_output(&mut child);
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        child.wait().await.unwrap();

        let stdout: Vec<_> = lines
            .iter()
            .filter(|l| l.stream == OutputStream::Stdout)
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(stdout, vec!["out1", "out2"]);
        assert!(lines.iter().any(|l| l.stream == OutputStream::Stderr && l.text == "err1"));
    }

    #[tokio::test]
    async fn test_wait_or_kill_honours_kill_switch() {
        let mut child = command("sleep").arg("30").spawn().unwrap();
        let kill = CancellationToken::new();
        kill.cancel();
        let status = wait_or_kill(&mut child, &kill).await.unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_direct_terminator_without_pid_does_nothing() {
        let handle = ProcessHandle::new(None, CancellationToken::new());
        assert_eq!(DirectTerminator.terminate(&handle), 0);
        assert!(handle.is_killed());
    }

    #[tokio::test]
    async fn test_tree_terminator_kills_child() {
        let mut child = command("sleep").arg("30").spawn().unwrap();
        let handle = ProcessHandle::new(child.id(), CancellationToken::new());
        let killed = TreeTerminator.terminate(&handle);
        assert!(killed >= 1);
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }
}
