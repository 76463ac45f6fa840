use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound on how much stderr is carried inside an error message.
const STDERR_TAIL_BYTES: usize = 512;

/// How often a running child is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocationError {
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("'{program}' exited with code {code}: {stderr}")]
    ExitCode {
        program: String,
        code: i32,
        stderr: String,
    },
    #[error("'{program}' terminated by signal {signal}")]
    Signal { program: String, signal: i32 },
    #[error("'{program}' exited abnormally")]
    Abnormal { program: String },
    #[error("I/O error while running '{program}': {reason}")]
    Io { program: String, reason: String },
    #[error("'{program}' produced unexpected output: {reason}")]
    BadOutput { program: String, reason: String },
    #[error("'{program}' did not produce {path:?}")]
    MissingOutput { program: String, path: PathBuf },
}

impl ToolInvocationError {
    pub fn io(program: &str, err: std::io::Error) -> Self {
        ToolInvocationError::Io {
            program: program.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Removes a leftover output file so a tool that exits cleanly without
/// writing anything cannot be mistaken for one that produced `path`.
pub fn remove_stale_output(program: &str, path: &Path) -> Result<(), ToolInvocationError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ToolInvocationError::Io {
            program: program.to_string(),
            reason: format!("failed to remove stale {path:?}: {e}"),
        }),
    }
}

/// Where the child's standard output goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StdoutTarget {
    /// Collected into [`ProcessOutput::stdout`].
    Capture,
    /// Written straight to a file, for tools that stream their product to stdout.
    File(PathBuf),
    #[default]
    Discard,
}

/// A fully assembled external tool call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdout: StdoutTarget,
    pub working_dir: Option<PathBuf>,
}

impl ToolInvocation {
    /// Builds an invocation from a command prefix (program plus fixed leading
    /// arguments) followed by call-specific arguments.
    pub fn from_command(command: &[String], args: Vec<String>) -> Self {
        let (program, prefix) = match command.split_first() {
            Some((program, prefix)) => (program.clone(), prefix.to_vec()),
            None => (String::new(), Vec::new()),
        };
        let mut all_args = prefix;
        all_args.extend(args);
        Self {
            program,
            args: all_args,
            stdout: StdoutTarget::Discard,
            working_dir: None,
        }
    }

    pub fn with_stdout(mut self, stdout: StdoutTarget) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

/// Runs external tools on behalf of the adapters.
///
/// Every adapter is written against this trait, so the process boundary can
/// be swapped for an in-process double in tests.
pub trait ToolExecutor: Send + Sync {
    fn run(
        &self,
        invocation: &ToolInvocation,
        timeout: Duration,
    ) -> Result<ProcessOutput, ToolInvocationError>;
}

/// Spawns real processes and enforces a wall-clock timeout on each.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        CommandExecutor
    }

    fn wait_with_timeout(
        &self,
        program: &str,
        mut child: Child,
        timeout: Duration,
    ) -> Result<ExitStatus, ToolInvocationError> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start_time.elapsed() > timeout {
                        warn!(program, ?timeout, "tool timed out, killing");
                        if let Err(e) = child.kill() {
                            return Err(ToolInvocationError::Io {
                                program: program.to_string(),
                                reason: format!("failed to kill timed-out process: {e}"),
                            });
                        }
                        let _ = child.wait();
                        return Err(ToolInvocationError::Timeout {
                            program: program.to_string(),
                            timeout,
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(ToolInvocationError::io(program, e)),
            }
        }
    }
}

fn read_back(program: &str, file: &mut File) -> Result<Vec<u8>, ToolInvocationError> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut buf))
        .map_err(|e| ToolInvocationError::io(program, e))?;
    Ok(buf)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

fn describe_failure(program: &str, status: ExitStatus, stderr: &[u8]) -> ToolInvocationError {
    if let Some(code) = status.code() {
        return ToolInvocationError::ExitCode {
            program: program.to_string(),
            code,
            stderr: stderr_tail(stderr),
        };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ToolInvocationError::Signal {
                program: program.to_string(),
                signal,
            };
        }
    }
    ToolInvocationError::Abnormal {
        program: program.to_string(),
    }
}

impl ToolExecutor for CommandExecutor {
    fn run(
        &self,
        invocation: &ToolInvocation,
        timeout: Duration,
    ) -> Result<ProcessOutput, ToolInvocationError> {
        let program = invocation.program.as_str();
        if program.is_empty() {
            return Err(ToolInvocationError::Spawn {
                program: String::new(),
                reason: "empty command".to_string(),
            });
        }
        debug!(command = %invocation.command_line(), ?timeout, "running tool");

        let mut cmd = Command::new(program);
        cmd.args(&invocation.args);
        if let Some(cwd) = &invocation.working_dir {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null());

        // Anonymous temp files instead of pipes, so a chatty tool can never
        // block on a full pipe while we poll for its exit.
        let mut stderr_file =
            tempfile::tempfile().map_err(|e| ToolInvocationError::io(program, e))?;
        cmd.stderr(Stdio::from(
            stderr_file
                .try_clone()
                .map_err(|e| ToolInvocationError::io(program, e))?,
        ));

        let mut captured_stdout: Option<File> = None;
        match &invocation.stdout {
            StdoutTarget::Capture => {
                let file = tempfile::tempfile().map_err(|e| ToolInvocationError::io(program, e))?;
                cmd.stdout(Stdio::from(
                    file.try_clone()
                        .map_err(|e| ToolInvocationError::io(program, e))?,
                ));
                captured_stdout = Some(file);
            }
            StdoutTarget::File(path) => {
                let file = File::create(path).map_err(|e| ToolInvocationError::Io {
                    program: program.to_string(),
                    reason: format!("failed to create {path:?}: {e}"),
                })?;
                cmd.stdout(Stdio::from(file));
            }
            StdoutTarget::Discard => {
                cmd.stdout(Stdio::null());
            }
        }

        let start_time = Instant::now();
        let child = cmd.spawn().map_err(|e| ToolInvocationError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;
        // Drop our copies of the redirected handles now that the child owns them.
        drop(cmd);

        let status = self.wait_with_timeout(program, child, timeout)?;
        let elapsed = start_time.elapsed();

        let stderr = read_back(program, &mut stderr_file)?;
        let stdout = match captured_stdout.as_mut() {
            Some(file) => read_back(program, file)?,
            None => Vec::new(),
        };

        if !status.success() {
            return Err(describe_failure(program, status, &stderr));
        }

        Ok(ProcessOutput {
            stdout,
            stderr,
            exit_code: status.code(),
            elapsed,
        })
    }
}
