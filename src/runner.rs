/// Command execution: run a shell-interpreted command string, optionally
/// feeding it stdin, and report captured stdout plus exit code.
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Result of running a watch or action command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code (None if it never started, was killed by a signal,
    /// or timed out).
    pub exit_code: Option<i32>,
    /// Captured stdout, lossily decoded.
    pub output: String,
}

impl CommandOutput {
    fn failed() -> Self {
        Self {
            exit_code: None,
            output: String::new(),
        }
    }
}

/// Executes command strings. The watchdog only talks to commands through this.
pub trait CommandRunner {
    /// Run `command` to completion. `Some(input)` is written to its stdin;
    /// `None` leaves stdin untouched. Never fails: errors become an output
    /// with `exit_code: None`.
    fn run(&self, command: &str, input: Option<&[u8]>)
        -> impl Future<Output = CommandOutput> + Send;
}

/// Errors that can occur while running a command.
#[derive(Debug)]
pub enum RunError {
    /// Failed to spawn the shell.
    Spawn { source: std::io::Error },
    /// Failed to read from the child or wait for it.
    Io { source: std::io::Error },
    /// The command outlived the configured timeout and was killed.
    Timeout { after: Duration },
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Spawn { source } => write!(f, "failed to spawn shell: {}", source),
            RunError::Io { source } => write!(f, "I/O error while running command: {}", source),
            RunError::Timeout { after } => {
                write!(f, "command timed out after {}s", after.as_secs())
            }
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Spawn { source } => Some(source),
            RunError::Io { source } => Some(source),
            RunError::Timeout { .. } => None,
        }
    }
}

/// Production runner: hands the command string to `sh -c`, so pipelines,
/// redirection and other shell syntax work as typed on the command line.
pub struct ShellRunner {
    shell: PathBuf,
    timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            shell: PathBuf::from("sh"),
            timeout,
        }
    }

    /// Use a different shell binary (must accept `-c <command>`).
    #[cfg(test)]
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    async fn execute(&self, command: &str, input: Option<&[u8]>) -> Result<CommandOutput, RunError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if self.timeout.is_some() {
            // New process group so a timeout can kill pipelines too. Without a
            // timeout the child stays in our group: a background group reading
            // the terminal would be stopped by SIGTTIN and never exit.
            cmd.process_group(0);
        }
        let mut child = cmd.spawn().map_err(|e| RunError::Spawn { source: e })?;

        let pid = child.id();
        tracing::debug!(pid = ?pid, command, "command started");

        // Some commands refuse to run on zero bytes of input
        let payload: &[u8] = match input {
            Some([]) => b"\n",
            Some(bytes) => bytes,
            None => &[],
        };

        let collect = async {
            let stdin = child.stdin.take();
            let stdout = child.stdout.take();

            let write = async move {
                if let Some(mut stdin) = stdin {
                    if let Err(e) = stdin.write_all(payload).await {
                        // The child may exit without reading everything
                        if e.kind() != std::io::ErrorKind::BrokenPipe {
                            tracing::debug!(error = %e, "failed to write command input");
                        }
                    }
                }
            };
            let read = async move {
                let mut buf = Vec::new();
                if let Some(mut stdout) = stdout {
                    stdout.read_to_end(&mut buf).await?;
                }
                Ok::<_, std::io::Error>(buf)
            };

            let ((), stdout) = tokio::join!(write, read);
            let stdout = stdout.map_err(|e| RunError::Io { source: e })?;
            let status = child.wait().await.map_err(|e| RunError::Io { source: e })?;

            Ok(CommandOutput {
                exit_code: status.code(),
                output: String::from_utf8_lossy(&stdout).into_owned(),
            })
        };

        match self.timeout {
            None => collect.await,
            Some(limit) => match tokio::time::timeout(limit, collect).await {
                Ok(result) => result,
                Err(_) => {
                    if let Some(pid) = pid {
                        kill_process_group(pid);
                    }
                    Err(RunError::Timeout { after: limit })
                }
            },
        }
    }
}

impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, input: Option<&[u8]>) -> CommandOutput {
        let start = Instant::now();
        match self.execute(command, input).await {
            Ok(output) => {
                tracing::debug!(
                    command,
                    exit_code = ?output.exit_code,
                    output_bytes = output.output.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "command completed"
                );
                output
            }
            Err(e) => {
                tracing::warn!(command, error = %e, "command did not complete");
                CommandOutput::failed()
            }
        }
    }
}

fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // ESRCH: the group already exited
        tracing::debug!(pid, error = %e, "failed to kill command process group");
    }
}
