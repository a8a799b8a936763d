//! Sandboxes and the processes started inside them

use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::file::SandboxFile;
use crate::poll::{Poll, PollOptions, poll_until, retry_transient};
use crate::proto::{self, GenericStatus, method};
use crate::stream::{OutputStream, StdinWriter, StreamKind};

/// Largest total command-line size accepted by the platform.
const ARG_MAX_BYTES: usize = 1 << 16;

/// Exit code reported for a sandbox killed by its own timeout.
const EXIT_TIMEOUT: i32 = 124;
/// Exit code reported for a terminated sandbox.
const EXIT_TERMINATED: i32 = 137;

/// What happens to one of a process's output streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stdio {
    /// Buffer output for the local reader.
    #[default]
    Pipe,
    /// Have the platform discard output; the local reader is empty.
    Ignore,
}

impl Stdio {
    fn config(self) -> proto::StdioConfig {
        match self {
            Stdio::Pipe => proto::StdioConfig::Pipe,
            Stdio::Ignore => proto::StdioConfig::Devnull,
        }
    }
}

/// Launch parameters for [`Sandbox::exec`].
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Standard output handling.
    pub stdout: Stdio,
    /// Standard error handling.
    pub stderr: Stdio,
    /// Working directory inside the sandbox.
    pub workdir: Option<String>,
    /// Wall-clock limit; must be a whole number of seconds.
    pub timeout: Option<Duration>,
    /// Secrets injected into the process environment.
    pub secret_ids: Vec<String>,
    /// Run under a pseudo-terminal. Output is combined on stdout.
    pub pty: bool,
}

/// A running or finished sandbox.
///
/// The `stdin`, `stdout` and `stderr` fields are the sandbox entrypoint's own
/// streams; processes started with [`Sandbox::exec`] have their own.
#[derive(Debug)]
pub struct Sandbox {
    client: Client,
    sandbox_id: String,
    task_id: OnceCell<String>,
    /// Entrypoint standard input.
    pub stdin: StdinWriter,
    /// Entrypoint standard output.
    pub stdout: OutputStream,
    /// Entrypoint standard error.
    pub stderr: OutputStream,
}

impl Sandbox {
    pub(crate) fn new(client: Client, sandbox_id: String) -> Self {
        Self {
            stdin: StdinWriter::sandbox(client.clone(), sandbox_id.clone()),
            stdout: OutputStream::sandbox(client.clone(), StreamKind::Stdout, sandbox_id.clone()),
            stderr: OutputStream::sandbox(client.clone(), StreamKind::Stderr, sandbox_id.clone()),
            client,
            sandbox_id,
            task_id: OnceCell::new(),
        }
    }

    /// Sandbox id.
    pub fn id(&self) -> &str {
        &self.sandbox_id
    }

    async fn task_id(&self) -> Result<&str> {
        let task_id = self
            .task_id
            .get_or_try_init(|| async {
                let request = proto::SandboxGetTaskIdRequest {
                    sandbox_id: self.sandbox_id.clone(),
                    timeout: None,
                    wait_until_ready: true,
                };
                let response: proto::SandboxGetTaskIdResponse = self
                    .client
                    .unary(method::SANDBOX_GET_TASK_ID, &request)
                    .await?;

                if let Some(result) = response.task_result {
                    if result.status() != GenericStatus::Unspecified {
                        return Err(Error::Remote {
                            message: format!(
                                "sandbox {} already finished with status {:?}",
                                self.sandbox_id,
                                result.status()
                            ),
                        });
                    }
                }
                let task_id = response.task_id.ok_or_else(|| Error::Remote {
                    message: format!("sandbox {} has no running task", self.sandbox_id),
                })?;
                debug!(sandbox_id = %self.sandbox_id, %task_id, "resolved sandbox task");
                Ok::<_, Error>(task_id)
            })
            .await?;
        Ok(task_id)
    }

    /// Start `command` inside the sandbox.
    ///
    /// The process is running once this returns; its streams and exit code
    /// are available on the returned handle.
    pub async fn exec<I, S>(&self, command: I, options: ExecOptions) -> Result<ContainerProcess>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command_args: Vec<String> = command.into_iter().map(Into::into).collect();
        validate_exec(&command_args, &options)?;

        let task_id = self.task_id().await?.to_string();
        let exec_id = Uuid::new_v4().to_string();
        let timeout_secs = options
            .timeout
            .map(|timeout| u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX));

        let pty_info = options.pty.then(|| proto::PtyInfo {
            enabled: true,
            winsz_rows: 24,
            winsz_cols: 80,
            env_term: "xterm-256color".to_string(),
            env_colorterm: "truecolor".to_string(),
            no_terminate_on_idle_stdin: true,
        });
        let stderr = if options.pty {
            Stdio::Ignore
        } else {
            options.stderr
        };

        let request = proto::TaskExecStartRequest {
            task_id: task_id.clone(),
            exec_id: exec_id.clone(),
            command_args,
            stdout_config: options.stdout.config() as i32,
            stderr_config: stderr.config() as i32,
            workdir: options.workdir.clone(),
            secret_ids: options.secret_ids.clone(),
            pty_info,
            timeout_secs,
        };
        let client = &self.client;
        let cancel = CancellationToken::new();
        let _: proto::Empty = retry_transient(&format!("exec in {task_id}"), &cancel, || {
            client.call(method::TASK_EXEC_START, &request, None, &cancel)
        })
        .await?;

        debug!(
            sandbox_id = %self.sandbox_id,
            %task_id,
            %exec_id,
            args = ?request.command_args,
            "started process"
        );
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        Ok(ContainerProcess::new(
            self.client.clone(),
            task_id,
            exec_id,
            options.stdout,
            stderr,
            deadline,
        ))
    }

    /// Wait for the sandbox to finish and return its exit code.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<i32> {
        let client = &self.client;
        let sandbox_id = self.sandbox_id.as_str();
        let operation = format!("wait for sandbox {sandbox_id}");

        let exit_code = poll_until(&operation, client.poll_options(None), cancel, move |wait| {
            let request = proto::SandboxWaitRequest {
                sandbox_id: sandbox_id.to_string(),
                timeout: wait.as_secs_f32(),
            };
            async move {
                let response: proto::SandboxWaitResponse = client
                    .call(
                        method::SANDBOX_WAIT,
                        &request,
                        Some(PollOptions::rpc_timeout(wait)),
                        cancel,
                    )
                    .await?;
                Ok(match sandbox_exit_code(response.result.as_ref()) {
                    Some(code) => Poll::Ready(code),
                    None => Poll::Pending,
                })
            }
        })
        .await?;

        debug!(sandbox_id, exit_code, "sandbox finished");
        Ok(exit_code)
    }

    /// Check once whether the sandbox has finished.
    pub async fn poll(&self) -> Result<Option<i32>> {
        let request = proto::SandboxWaitRequest {
            sandbox_id: self.sandbox_id.clone(),
            timeout: 0.0,
        };
        let response: proto::SandboxWaitResponse =
            self.client.unary(method::SANDBOX_WAIT, &request).await?;
        Ok(sandbox_exit_code(response.result.as_ref()))
    }

    /// Stop the sandbox and every process in it.
    pub async fn terminate(&self) -> Result<()> {
        let request = proto::SandboxTerminateRequest {
            sandbox_id: self.sandbox_id.clone(),
        };
        let _: proto::Empty = self
            .client
            .unary(method::SANDBOX_TERMINATE, &request)
            .await?;
        debug!(sandbox_id = %self.sandbox_id, "terminated sandbox");
        Ok(())
    }

    /// Open a file in the sandbox filesystem with an `fopen`-style mode.
    pub async fn open(&self, path: &str, mode: &str) -> Result<SandboxFile> {
        let task_id = self.task_id().await?.to_string();
        SandboxFile::open(self.client.clone(), task_id, path, mode).await
    }
}

fn validate_exec(command_args: &[String], options: &ExecOptions) -> Result<()> {
    if command_args.is_empty() {
        return Err(Error::InvalidArgument("command must not be empty".to_string()));
    }
    let total: usize = command_args.iter().map(|arg| arg.len() + 1).sum();
    if total > ARG_MAX_BYTES {
        return Err(Error::InvalidArgument(format!(
            "command is {total} bytes; the limit is {ARG_MAX_BYTES}"
        )));
    }
    if let Some(timeout) = options.timeout {
        if timeout.is_zero() || timeout.subsec_nanos() != 0 {
            return Err(Error::InvalidArgument(format!(
                "exec timeout must be a positive whole number of seconds, got {timeout:?}"
            )));
        }
    }
    Ok(())
}

fn sandbox_exit_code(result: Option<&proto::GenericResult>) -> Option<i32> {
    let result = result?;
    match result.status() {
        GenericStatus::Unspecified => None,
        GenericStatus::Timeout => Some(EXIT_TIMEOUT),
        GenericStatus::Terminated => Some(EXIT_TERMINATED),
        _ => Some(result.exitcode),
    }
}

/// A process started with [`Sandbox::exec`].
///
/// The stream fields are public so they can be moved to separate tasks while
/// the handle itself is used to wait for the exit code.
#[derive(Debug)]
pub struct ContainerProcess {
    /// Standard input.
    pub stdin: StdinWriter,
    /// Standard output, or combined terminal output under a PTY.
    pub stdout: OutputStream,
    /// Standard error.
    pub stderr: OutputStream,
    client: Client,
    task_id: String,
    exec_id: String,
    deadline: Option<Instant>,
    exit_code: OnceCell<i32>,
}

impl ContainerProcess {
    fn new(
        client: Client,
        task_id: String,
        exec_id: String,
        stdout: Stdio,
        stderr: Stdio,
        deadline: Option<Instant>,
    ) -> Self {
        let output = |kind, stdio| match stdio {
            Stdio::Pipe => OutputStream::exec(
                client.clone(),
                kind,
                task_id.clone(),
                exec_id.clone(),
                deadline,
            ),
            Stdio::Ignore => {
                OutputStream::ignored(client.clone(), kind, task_id.clone(), exec_id.clone())
            }
        };

        let stdout = output(StreamKind::Stdout, stdout);
        let stderr = output(StreamKind::Stderr, stderr);

        Self {
            stdin: StdinWriter::exec(client.clone(), task_id.clone(), exec_id.clone()),
            stdout,
            stderr,
            client,
            task_id,
            exec_id,
            deadline,
            exit_code: OnceCell::new(),
        }
    }

    /// Client-generated exec id.
    pub fn exec_id(&self) -> &str {
        &self.exec_id
    }

    /// Wait for the process to exit and return its exit code.
    ///
    /// A non-zero exit is not an error. The code is cached, so later calls
    /// return without an RPC.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<i32> {
        let exit_code = self
            .exit_code
            .get_or_try_init(|| self.wait_remote(cancel))
            .await?;
        Ok(*exit_code)
    }

    async fn wait_remote(&self, cancel: &CancellationToken) -> Result<i32> {
        let client = &self.client;
        let (task_id, exec_id) = (self.task_id.as_str(), self.exec_id.as_str());
        let operation = format!("wait for exec {exec_id}");

        let timeout = match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(Error::DeadlineExceeded {
                        operation,
                        timeout: Duration::ZERO,
                    });
                }
                Some(remaining)
            }
            None => None,
        };

        let exit_code = poll_until(&operation, client.poll_options(timeout), cancel, move |wait| {
            let request = proto::TaskExecWaitRequest {
                task_id: task_id.to_string(),
                exec_id: exec_id.to_string(),
                timeout: wait.as_secs_f32(),
            };
            async move {
                let response: proto::TaskExecWaitResponse = client
                    .call(
                        method::TASK_EXEC_WAIT,
                        &request,
                        Some(PollOptions::rpc_timeout(wait)),
                        cancel,
                    )
                    .await?;
                Ok(match response.exit_code {
                    Some(code) => Poll::Ready(code),
                    None => Poll::Pending,
                })
            }
        })
        .await?;

        debug!(task_id, exec_id, exit_code, "process exited");
        Ok(exit_code)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_rejected() {
        let err = validate_exec(&[], &ExecOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_oversized_command_rejected() {
        let args = vec!["echo".to_string(), "x".repeat(ARG_MAX_BYTES)];
        let err = validate_exec(&args, &ExecOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(ref msg) if msg.contains("limit")));
    }

    #[test]
    fn test_fractional_timeout_rejected() {
        let options = ExecOptions {
            timeout: Some(Duration::from_millis(1500)),
            ..Default::default()
        };
        let err = validate_exec(&["sleep".to_string()], &options).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let options = ExecOptions {
            timeout: Some(Duration::from_secs(3)),
            ..Default::default()
        };
        validate_exec(&["sleep".to_string()], &options).unwrap();
    }

    #[test]
    fn test_sandbox_exit_codes() {
        let result = |status: GenericStatus, exitcode| proto::GenericResult {
            status: status as i32,
            exitcode,
            ..Default::default()
        };

        assert_eq!(sandbox_exit_code(None), None);
        assert_eq!(sandbox_exit_code(Some(&result(GenericStatus::Unspecified, 0))), None);
        assert_eq!(sandbox_exit_code(Some(&result(GenericStatus::Success, 0))), Some(0));
        assert_eq!(sandbox_exit_code(Some(&result(GenericStatus::Failure, 3))), Some(3));
        assert_eq!(sandbox_exit_code(Some(&result(GenericStatus::Timeout, 0))), Some(124));
        assert_eq!(sandbox_exit_code(Some(&result(GenericStatus::Terminated, 0))), Some(137));
    }

    #[test]
    fn test_stdio_negotiates_devnull() {
        assert_eq!(Stdio::Pipe.config(), proto::StdioConfig::Pipe);
        assert_eq!(Stdio::Ignore.config(), proto::StdioConfig::Devnull);
    }
}
