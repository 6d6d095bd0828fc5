//! [`ExecContext`] backed by the host's `sh`. Lets the shell file helpers and
//! the sync engine run against host directories without a container engine.

use async_trait::async_trait;
use ds_common::{ExecContext, Result, SnapshotError};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct LocalShell {
    working_dir: Option<PathBuf>,
}

impl LocalShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(working_dir.into()),
        }
    }

    fn command(&self, command: &str) -> Command {
        // Fold stderr into stdout so output keeps its original interleaving
        let script = format!("exec 2>&1\n{command}");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

fn check_status(command: &str, status: std::process::ExitStatus, output: String) -> Result<String> {
    if status.success() {
        return Ok(output);
    }
    Err(SnapshotError::CommandFailed {
        command: command.to_string(),
        exit_code: status.code().map(i64::from).unwrap_or(-1),
        output,
    })
}

#[async_trait]
impl ExecContext for LocalShell {
    async fn run(&self, command: &str) -> Result<String> {
        debug!(%command, "Running local command");
        let output = self
            .command(command)
            .stdin(Stdio::null())
            .output()
            .await?;
        let text = String::from_utf8_lossy(&output.stdout).to_string();
        check_status(command, output.status, text)
    }

    async fn run_streaming(
        &self,
        command: &str,
        on_output: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<()> {
        debug!(%command, "Streaming local command");
        let mut child = self
            .command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SnapshotError::Internal("child stdout not captured".to_string()))?;

        let mut buf = [0u8; 4096];
        let mut last_chunk = String::new();
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let text = String::from_utf8_lossy(&buf[..n]);
            on_output(&text);
            last_chunk = text.into_owned();
        }

        let status = child.wait().await?;
        check_status(command, status, last_chunk).map(|_| ())
    }
}
