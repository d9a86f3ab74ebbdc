//! External command invocation shared by the executor, reviewer and
//! post-merge adapters.
//!
//! Commands are configured as a single shell-like string and split with
//! `shlex`; no shell is involved in running them.

use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Bytes of stderr kept in error messages.
const STDERR_TAIL: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = shlex::split(raw)
            .with_context(|| format!("unbalanced quoting in command {raw:?}"))?
            .into_iter();
        let Some(program) = parts.next() else {
            bail!("empty command");
        };
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Run in `cwd` with `stdin` piped in; returns stdout on a zero exit.
    ///
    /// The child is killed if the returned future is dropped, so callers can
    /// bound it with `tokio::time::timeout`.
    pub async fn run(&self, cwd: &Path, envs: &[(&str, String)], stdin: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(cwd)
            .envs(envs.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        // Feed stdin while draining stdout/stderr; a child that echoes more
        // than a pipe buffer before reading all input would otherwise stall.
        let pipe = child.stdin.take();
        let feed = async move {
            let Some(mut pipe) = pipe else {
                return Ok::<(), std::io::Error>(());
            };
            match pipe.write_all(stdin).await {
                // A child that never reads stdin closes the pipe early; that is fine.
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.with_context(|| format!("failed to wait for {}", self.program))?;
        fed.context("failed to write command stdin")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail = stderr.get(start..).unwrap_or(&stderr).trim();
            bail!("{} exited with {}: {}", self.program, output.status, tail);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", shlex::try_quote(arg).map_err(|_| std::fmt::Error)?)?;
        }
        Ok(())
    }
}
