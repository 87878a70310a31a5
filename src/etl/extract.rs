//! The external dump process as the extraction source

use crate::dump::DumpBinary;
use eyre::{Context, Result, bail, eyre};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// A dump invocation for one table, ready to spawn
#[derive(Debug, Clone)]
pub struct DumpCommand {
    binary: DumpBinary,
    args: Vec<String>,
}

impl DumpCommand {
    pub fn new(binary: &DumpBinary, args: Vec<String>) -> Self {
        Self {
            binary: binary.clone(),
            args,
        }
    }

    /// Start the process with piped standard output and error
    ///
    /// The process is killed if the returned handle is dropped before it exits.
    pub fn spawn(&self) -> Result<DumpProcess> {
        let mut child = Command::new(self.binary.path())
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.binary.path().display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| eyre!("dump process has no stdout pipe"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| eyre!("dump process has no stderr pipe"))?;

        Ok(DumpProcess {
            child,
            stdout: Some(stdout),
            stderr: Some(stderr),
        })
    }
}

/// A running dump process
#[derive(Debug)]
pub struct DumpProcess {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl DumpProcess {
    /// Buffered standard output; can be taken once
    pub fn take_stdout(&mut self) -> Result<BufReader<ChildStdout>> {
        self.stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| eyre!("dump stdout already taken"))
    }

    /// Standard error; can be taken once
    pub fn take_stderr(&mut self) -> Result<ChildStderr> {
        self.stderr
            .take()
            .ok_or_else(|| eyre!("dump stderr already taken"))
    }

    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Ask the process to terminate without waiting for it
    pub fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            log::debug!("Could not kill dump process: {}", e);
        }
    }
}

/// Watch the dump's standard error
///
/// Any non-empty line means the dump failed and ends monitoring with an
/// error. Returns `Ok` once the stream closes cleanly.
pub async fn monitor_stderr<R>(stderr: R, table: &str) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("Failed to read dump errors for {}", table))?
    {
        let line = line.trim();
        if !line.is_empty() {
            bail!("There was an error while running mysqldump for {}: {}", table, line);
        }
    }
    Ok(())
}
