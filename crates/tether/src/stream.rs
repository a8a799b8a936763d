//! Process and sandbox standard streams

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tracing::{debug, trace};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::poll::{Poll, PollOptions, poll_until, retry_transient};
use crate::proto::{self, method};

/// Which output stream a reader is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Standard output, or the combined terminal output under a PTY.
    Stdout,
    /// Standard error.
    Stderr,
}

impl StreamKind {
    fn file_descriptor(self) -> proto::FileDescriptor {
        match self {
            StreamKind::Stdout => proto::FileDescriptor::Stdout,
            StreamKind::Stderr => proto::FileDescriptor::Stderr,
        }
    }

    fn name(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

#[derive(Debug)]
enum Source {
    Exec {
        task_id: String,
        exec_id: String,
        offset: u64,
    },
    Sandbox {
        sandbox_id: String,
        last_entry_id: String,
    },
}

/// Forward-only reader over one remote output stream.
///
/// Each fetch is a poll-loop attempt against the platform; chunks are
/// returned in arrival order until end-of-stream. Reading incrementally and
/// reading everything at once observe the same bytes.
#[derive(Debug)]
pub struct OutputStream {
    client: Client,
    kind: StreamKind,
    source: Source,
    deadline: Option<Instant>,
    pending: VecDeque<Bytes>,
    finished: bool,
}

impl OutputStream {
    pub(crate) fn exec(
        client: Client,
        kind: StreamKind,
        task_id: String,
        exec_id: String,
        deadline: Option<Instant>,
    ) -> Self {
        Self::with_source(
            client,
            kind,
            Source::Exec {
                task_id,
                exec_id,
                offset: 0,
            },
            deadline,
        )
    }

    pub(crate) fn sandbox(client: Client, kind: StreamKind, sandbox_id: String) -> Self {
        Self::with_source(
            client,
            kind,
            Source::Sandbox {
                sandbox_id,
                last_entry_id: "0-0".to_string(),
            },
            None,
        )
    }

    /// A stream the platform was told to discard; it is empty and issues no
    /// RPCs.
    pub(crate) fn ignored(
        client: Client,
        kind: StreamKind,
        task_id: String,
        exec_id: String,
    ) -> Self {
        let mut stream = Self::exec(client, kind, task_id, exec_id, None);
        stream.finished = true;
        stream
    }

    fn with_source(
        client: Client,
        kind: StreamKind,
        source: Source,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            client,
            kind,
            source,
            deadline,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Which stream this reader is bound to.
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Next chunk of output, or `None` once the stream has ended.
    pub async fn next_chunk(&mut self, cancel: &CancellationToken) -> Result<Option<Bytes>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }
            if self.finished {
                return Ok(None);
            }
            self.fetch(cancel).await?;
        }
    }

    /// Read until end-of-stream.
    pub async fn read_to_end(&mut self, cancel: &CancellationToken) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next_chunk(cancel).await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Read until end-of-stream and decode as UTF-8.
    pub async fn read_to_string(&mut self, cancel: &CancellationToken) -> Result<String> {
        let bytes = self.read_to_end(cancel).await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            Error::Serialization(format!("{} is not valid UTF-8: {e}", self.kind.name()))
        })
    }

    /// Adapt into a [`Stream`] of chunks.
    pub fn into_stream(
        self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Bytes>> + Send {
        futures::stream::try_unfold((self, cancel), |(mut stream, cancel)| async move {
            let chunk = stream.next_chunk(&cancel).await?;
            Ok(chunk.map(|chunk| (chunk, (stream, cancel))))
        })
    }

    fn poll_options(&self) -> Result<PollOptions> {
        let timeout = self
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        if timeout == Some(Duration::ZERO) {
            return Err(Error::DeadlineExceeded {
                operation: format!("read {}", self.kind.name()),
                timeout: Duration::ZERO,
            });
        }
        Ok(self.client.poll_options(timeout))
    }

    async fn fetch(&mut self, cancel: &CancellationToken) -> Result<()> {
        let options = self.poll_options()?;
        let client = &self.client;
        let file_descriptor = self.kind.file_descriptor() as i32;
        let kind = self.kind;

        match &mut self.source {
            Source::Exec {
                task_id,
                exec_id,
                offset,
            } => {
                let operation = format!("read {} of exec {exec_id}", kind.name());
                let (task_id, exec_id, start) = (task_id.as_str(), exec_id.as_str(), *offset);
                let response = poll_until(&operation, options, cancel, move |wait| {
                    let request = proto::TaskExecStdioReadRequest {
                        task_id: task_id.to_string(),
                        exec_id: exec_id.to_string(),
                        offset: start,
                        file_descriptor,
                        timeout: wait.as_secs_f32(),
                    };
                    async move {
                        let response: proto::TaskExecStdioReadResponse = client
                            .call(
                                method::TASK_EXEC_STDIO_READ,
                                &request,
                                Some(PollOptions::rpc_timeout(wait)),
                                cancel,
                            )
                            .await?;
                        let done = !response.data.is_empty()
                            || response.eof
                            || response.error.is_some();
                        Ok(if done { Poll::Ready(response) } else { Poll::Pending })
                    }
                })
                .await?;

                if let Some(error) = response.error {
                    return Err(Error::Remote {
                        message: format!("{operation}: {}", error.error_message),
                    });
                }
                trace!(
                    exec_id,
                    fd = kind.name(),
                    offset = start,
                    len = response.data.len(),
                    eof = response.eof,
                    "stdio batch"
                );
                *offset += response.data.len() as u64;
                if !response.data.is_empty() {
                    self.pending.push_back(Bytes::from(response.data));
                }
                self.finished = response.eof;
            }
            Source::Sandbox {
                sandbox_id,
                last_entry_id,
            } => {
                let operation = format!("read {} of sandbox {sandbox_id}", kind.name());
                let (sandbox_id_ref, cursor) = (sandbox_id.as_str(), last_entry_id.as_str());
                let response = poll_until(&operation, options, cancel, move |wait| {
                    let request = proto::SandboxGetLogsRequest {
                        sandbox_id: sandbox_id_ref.to_string(),
                        file_descriptor,
                        timeout: wait.as_secs_f32(),
                        last_entry_id: cursor.to_string(),
                    };
                    async move {
                        let response: proto::SandboxGetLogsResponse = client
                            .call(
                                method::SANDBOX_GET_LOGS,
                                &request,
                                Some(PollOptions::rpc_timeout(wait)),
                                cancel,
                            )
                            .await?;
                        let done = !response.items.is_empty() || response.eof;
                        Ok(if done { Poll::Ready(response) } else { Poll::Pending })
                    }
                })
                .await?;

                if !response.entry_id.is_empty() {
                    *last_entry_id = response.entry_id;
                }
                self.pending.extend(
                    response
                        .items
                        .into_iter()
                        .filter(|item| !item.is_empty())
                        .map(Bytes::from),
                );
                self.finished = response.eof;
            }
        }

        if self.finished {
            debug!(fd = kind.name(), "output stream reached end");
        }
        Ok(())
    }
}

#[derive(Debug)]
enum Target {
    Exec {
        task_id: String,
        exec_id: String,
        offset: u64,
    },
    Sandbox {
        sandbox_id: String,
        index: u32,
    },
}

/// Writer for a remote process's standard input.
///
/// Every write is one RPC, issued in call order. [`StdinWriter::close`]
/// signals end-of-input; writes after it fail locally.
#[derive(Debug)]
pub struct StdinWriter {
    client: Client,
    target: Target,
    closed: bool,
}

impl StdinWriter {
    pub(crate) fn exec(client: Client, task_id: String, exec_id: String) -> Self {
        Self {
            client,
            target: Target::Exec {
                task_id,
                exec_id,
                offset: 0,
            },
            closed: false,
        }
    }

    pub(crate) fn sandbox(client: Client, sandbox_id: String) -> Self {
        Self {
            client,
            target: Target::Sandbox {
                sandbox_id,
                index: 1,
            },
            closed: false,
        }
    }

    /// Whether end-of-input has been sent.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send `data` to the process.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidHandle("stdin is closed".to_string()));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.send(data, false).await
    }

    /// Signal end-of-input. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.send(&[], true).await?;
        self.closed = true;
        Ok(())
    }

    async fn send(&mut self, data: &[u8], eof: bool) -> Result<()> {
        let client = &self.client;
        let cancel = CancellationToken::new();

        match &mut self.target {
            Target::Exec {
                task_id,
                exec_id,
                offset,
            } => {
                let request = proto::TaskExecStdinWriteRequest {
                    task_id: task_id.clone(),
                    exec_id: exec_id.clone(),
                    offset: *offset,
                    data: data.to_vec(),
                    eof,
                };
                let operation = format!("write stdin of exec {exec_id}");
                let _: proto::Empty = retry_transient(&operation, &cancel, || {
                    client.call(method::TASK_EXEC_STDIN_WRITE, &request, None, &cancel)
                })
                .await?;
                *offset += data.len() as u64;
            }
            Target::Sandbox { sandbox_id, index } => {
                let request = proto::SandboxStdinWriteRequest {
                    sandbox_id: sandbox_id.clone(),
                    input: data.to_vec(),
                    index: *index,
                    eof,
                };
                let operation = format!("write stdin of sandbox {sandbox_id}");
                let result: Result<proto::Empty> = retry_transient(&operation, &cancel, || {
                    client.call(method::SANDBOX_STDIN_WRITE, &request, None, &cancel)
                })
                .await;
                match result {
                    Ok(_) => {}
                    // The sandbox already saw end-of-input.
                    Err(err) if eof && err.code() == Some(Code::FailedPrecondition) => {}
                    Err(err) => return Err(err),
                }
                *index += 1;
            }
        }
        Ok(())
    }
}
