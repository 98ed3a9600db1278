//! Commit enumeration through the `git` command line.
//!
//! Every child process is spawned with `kill_on_drop`, so abandoning a call
//! on cancellation tears the subprocess down with it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::domain::models::{validate_commit_sha, CommitRange, LogEntry};
use crate::error::{AppError, Result};

/// Subject and body glued together; `-z` separates commits with NUL since
/// bodies contain newlines.
const LOG_FORMAT: &str = "--format=format:%H %s%b";

#[async_trait]
pub trait CommitLog: Send + Sync {
    /// Full object id of the working copy's HEAD.
    async fn resolve_head(&self, dir: &Path, cancel: &CancellationToken) -> Result<String>;

    /// Commits in `range`, newest first, each with its subject+body message.
    async fn log_with_messages(
        &self,
        dir: &Path,
        range: &CommitRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<LogEntry>>;
}

pub struct GitCli {
    git_binary: PathBuf,
}

impl GitCli {
    pub fn new(git_binary: impl Into<PathBuf>) -> Self {
        Self {
            git_binary: git_binary.into(),
        }
    }

    fn command(&self, dir: &Path, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.git_binary);
        cmd.current_dir(dir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait]
impl CommitLog for GitCli {
    async fn resolve_head(&self, dir: &Path, cancel: &CancellationToken) -> Result<String> {
        let args = vec!["rev-parse".to_string(), "HEAD".to_string()];
        let child = self.command(dir, &args).spawn()?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            output = child.wait_with_output() => output?,
        };

        if !output.status.success() {
            return Err(AppError::git(
                "rev-parse",
                failure_message(output.status, &output.stderr),
            ));
        }

        let head = String::from_utf8_lossy(&output.stdout).trim().to_string();
        validate_commit_sha(&head)?;
        Ok(head)
    }

    async fn log_with_messages(
        &self,
        dir: &Path,
        range: &CommitRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<LogEntry>> {
        let args = log_args(range);
        tracing::debug!(dir = %dir.display(), args = ?args, "[GIT] Running git log");

        let mut child = self.command(dir, &args).spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::git("log", "stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::git("log", "stderr was not captured"))?;

        let run = async {
            // Drain stderr alongside stdout so a chatty git cannot stall on a full pipe.
            let (entries, stderr) = tokio::try_join!(read_log_records(stdout), read_to_end(stderr))?;
            let status = child.wait().await?;
            Ok::<_, AppError>((entries, stderr, status))
        };

        let (entries, stderr, status) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            result = run => result?,
        };

        if !status.success() {
            return Err(AppError::git("log", failure_message(status, &stderr)));
        }

        Ok(entries)
    }
}

fn log_args(range: &CommitRange) -> Vec<String> {
    vec![
        "log".to_string(),
        LOG_FORMAT.to_string(),
        "-z".to_string(),
        range.as_rev_arg(),
        "--".to_string(),
    ]
}

/// Read NUL-delimited `"<sha> <message>"` records as they stream in.
async fn read_log_records<R: AsyncRead + Unpin>(reader: R) -> Result<Vec<LogEntry>> {
    let mut reader = BufReader::new(reader);
    let mut entries = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = reader.read_until(b'\0', &mut buf).await?;
        if n == 0 {
            break;
        }
        if buf.last() == Some(&b'\0') {
            buf.pop();
        }
        if buf.is_empty() {
            continue;
        }
        entries.push(LogEntry::parse(&String::from_utf8_lossy(&buf))?);
    }

    Ok(entries)
}

async fn read_to_end<R: AsyncRead + Unpin>(mut reader: R) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

fn failure_message(status: ExitStatus, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with {}", status)
    } else {
        format!("exited with {}: {}", status, stderr)
    }
}
