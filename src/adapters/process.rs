//! Child-process runner shared by the subprocess adapters.
//!
//! Output of the child is forwarded line by line to the log for
//! observability. Only the exit status decides success.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Run a command to completion.
///
/// Exit code 0 is success; a non-zero code, a signal or a spawn failure is an
/// error. No timeout is applied.
pub async fn run_tool(tool: &str, mut command: Command) -> Result<()> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to spawn {}", tool))?;

    let stdout = child.stdout.take().map(|out| tokio::spawn(forward(tool.to_string(), out)));
    let stderr = child.stderr.take().map(|err| tokio::spawn(forward(tool.to_string(), err)));

    let status = child
        .wait()
        .await
        .with_context(|| format!("Failed to wait for {}", tool))?;

    for task in [stdout, stderr].into_iter().flatten() {
        let _ = task.await;
    }

    if !status.success() {
        match status.code() {
            Some(code) => anyhow::bail!("{} exited with code {}", tool, code),
            None => anyhow::bail!("{} was terminated by a signal", tool),
        }
    }

    info!(tool, "Tool finished");
    Ok(())
}

async fn forward<R: AsyncRead + Unpin>(tool: String, stream: R) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end();
        if !line.is_empty() {
            debug!(tool = %tool, "{}", line);
        }
    }
}
