//! Files inside a sandbox filesystem.
//!
//! Every operation is a short-lived remote exec addressed by a
//! server-assigned descriptor: one `ContainerFilesystemExec` call starts it
//! and its output is drained through the poll loop until end-of-output. The
//! file position is tracked here and sent explicitly with each read and
//! write.

use std::fmt;
use std::io::SeekFrom;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::poll::{Poll, PollOptions, poll_until};
use crate::proto::{self, FilesystemRequest, SystemErrorCode, method};

/// Largest read or write issued in one RPC.
const MAX_CHUNK_BYTES: usize = 16 * 1024 * 1024;

/// Parsed `fopen`-style mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    base: char,
    plus: bool,
    binary: bool,
}

impl OpenMode {
    /// Whether reads are allowed.
    pub fn is_readable(&self) -> bool {
        self.base == 'r' || self.plus
    }

    /// Whether writes are allowed.
    pub fn is_writable(&self) -> bool {
        self.base != 'r' || self.plus
    }

    /// Whether every write goes to the end of the file.
    pub fn is_append(&self) -> bool {
        self.base == 'a'
    }

    /// Whether the file was opened in binary mode.
    pub fn is_binary(&self) -> bool {
        self.binary
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("invalid file mode '{mode}'"));

        let mut chars = mode.chars();
        let base = match chars.next() {
            Some(c @ ('r' | 'w' | 'a' | 'x')) => c,
            _ => return Err(invalid()),
        };
        let (mut plus, mut binary) = (false, false);
        for c in chars {
            match c {
                '+' if !plus => plus = true,
                'b' if !binary => binary = true,
                _ => return Err(invalid()),
            }
        }
        Ok(Self { base, plus, binary })
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        if self.plus {
            f.write_str("+")?;
        }
        if self.binary {
            f.write_str("b")?;
        }
        Ok(())
    }
}

/// Collected output of one filesystem exec.
#[derive(Debug, Default)]
struct FsOutput {
    data: BytesMut,
    position: Option<u64>,
    bytes_written: Option<u64>,
}

/// An open file in a sandbox.
///
/// Operations on one handle must not overlap; `&mut self` receivers enforce
/// that. Once closed, every operation except [`SandboxFile::close`] fails
/// locally.
#[derive(Debug)]
pub struct SandboxFile {
    client: Client,
    task_id: String,
    path: String,
    fd: String,
    mode: OpenMode,
    position: u64,
    closed: bool,
}

impl SandboxFile {
    pub(crate) async fn open(
        client: Client,
        task_id: String,
        path: &str,
        mode: &str,
    ) -> Result<Self> {
        let mode: OpenMode = mode.parse()?;
        let request = FilesystemRequest::Open(proto::ContainerFileOpenRequest {
            path: path.to_string(),
            mode: mode.to_string(),
        });
        let (exec, _) = run(&client, &task_id, request, &format!("open {path}")).await?;

        let fd = exec.file_descriptor.ok_or_else(|| Error::Remote {
            message: format!("open {path}: no file descriptor returned"),
        })?;
        debug!(%task_id, path, %mode, %fd, "opened file");

        Ok(Self {
            client,
            task_id,
            path: path.to_string(),
            fd,
            mode,
            position: 0,
            closed: false,
        })
    }

    /// Path the file was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Mode the file was opened with.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Current client-side position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether the handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read up to `n` bytes, or to end-of-file when `n` is `None`.
    ///
    /// Fewer than `n` bytes come back only at end-of-file.
    pub async fn read(&mut self, n: Option<usize>) -> Result<Bytes> {
        self.check_open("read")?;
        if !self.mode.is_readable() {
            return Err(Error::InvalidHandle(format!(
                "{} is not open for reading (mode '{}')",
                self.path, self.mode
            )));
        }

        let mut out = BytesMut::new();
        loop {
            let want = match n {
                Some(n) => n.saturating_sub(out.len()).min(MAX_CHUNK_BYTES),
                None => MAX_CHUNK_BYTES,
            };
            if want == 0 {
                break;
            }

            let request = FilesystemRequest::Read(proto::ContainerFileReadRequest {
                file_descriptor: self.fd.clone(),
                n: u32::try_from(want).ok(),
                offset: Some(self.position),
            });
            let operation = format!("read {}", self.path);
            let (_, output) = run(&self.client, &self.task_id, request, &operation).await?;

            if output.data.is_empty() {
                break;
            }
            self.position += output.data.len() as u64;
            out.extend_from_slice(&output.data);
        }

        trace!(fd = %self.fd, len = out.len(), position = self.position, "read");
        Ok(out.freeze())
    }

    /// Read to end-of-file as UTF-8 text.
    pub async fn read_to_string(&mut self) -> Result<String> {
        self.check_open("read")?;
        if self.mode.is_binary() {
            return Err(Error::InvalidArgument(format!(
                "{} is open in binary mode '{}'",
                self.path, self.mode
            )));
        }
        let bytes = self.read(None).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Serialization(format!("{} is not valid UTF-8: {e}", self.path)))
    }

    /// Write all of `data`, returning its length.
    ///
    /// In append mode the data lands at the end of the file regardless of
    /// the current position.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_open("write")?;
        if !self.mode.is_writable() {
            return Err(Error::InvalidHandle(format!(
                "{} is not open for writing (mode '{}')",
                self.path, self.mode
            )));
        }

        let operation = format!("write {}", self.path);
        let mut remaining = data;
        while !remaining.is_empty() {
            let chunk = &remaining[..remaining.len().min(MAX_CHUNK_BYTES)];
            let request = FilesystemRequest::Write(proto::ContainerFileWriteRequest {
                file_descriptor: self.fd.clone(),
                data: chunk.to_vec(),
                offset: (!self.mode.is_append()).then_some(self.position),
            });
            let (_, output) = run(&self.client, &self.task_id, request, &operation).await?;

            let written = output
                .bytes_written
                .map_or(chunk.len(), |n| usize::try_from(n).unwrap_or(usize::MAX))
                .min(chunk.len());
            if written == 0 {
                return Err(Error::filesystem(
                    operation,
                    SystemErrorCode::Io,
                    "write made no progress",
                ));
            }

            self.position = match output.position {
                Some(position) if self.mode.is_append() => position,
                _ => self.position + written as u64,
            };
            remaining = &remaining[written..];
        }

        trace!(fd = %self.fd, len = data.len(), position = self.position, "wrote");
        Ok(data.len())
    }

    /// Reposition the handle, returning the new position.
    ///
    /// `Start` and `Current` are resolved locally; `End` asks the platform
    /// for the file's length.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_open("seek")?;
        let negative = || {
            Error::InvalidArgument(format!("seek on {} before start of file", self.path))
        };

        self.position = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => self
                .position
                .checked_add_signed(delta)
                .ok_or_else(negative)?,
            SeekFrom::End(delta) => {
                let request = FilesystemRequest::Seek(proto::ContainerFileSeekRequest {
                    file_descriptor: self.fd.clone(),
                    offset: delta,
                    whence: proto::SeekWhence::End as i32,
                });
                let operation = format!("seek {}", self.path);
                let (_, output) = run(&self.client, &self.task_id, request, &operation).await?;
                output.position.ok_or_else(|| Error::Remote {
                    message: format!("{operation}: no position returned"),
                })?
            }
        };
        Ok(self.position)
    }

    /// Make written data durable on the remote side.
    pub async fn flush(&mut self) -> Result<()> {
        self.check_open("flush")?;
        let request = FilesystemRequest::Flush(proto::ContainerFileFlushRequest {
            file_descriptor: self.fd.clone(),
        });
        run(&self.client, &self.task_id, request, &format!("flush {}", self.path)).await?;
        Ok(())
    }

    /// Release the remote descriptor. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let request = FilesystemRequest::Close(proto::ContainerFileCloseRequest {
            file_descriptor: self.fd.clone(),
        });
        run(&self.client, &self.task_id, request, &format!("close {}", self.path)).await?;
        self.closed = true;
        debug!(fd = %self.fd, path = %self.path, "closed file");
        Ok(())
    }

    fn check_open(&self, operation: &str) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidHandle(format!(
                "{operation} on closed file {}",
                self.path
            )));
        }
        Ok(())
    }
}

/// Start one filesystem exec and drain its output.
async fn run(
    client: &Client,
    task_id: &str,
    request: FilesystemRequest,
    operation: &str,
) -> Result<(proto::ContainerFilesystemExecResponse, FsOutput)> {
    let exec: proto::ContainerFilesystemExecResponse = client
        .unary(
            method::CONTAINER_FILESYSTEM_EXEC,
            &proto::ContainerFilesystemExecRequest {
                task_id: task_id.to_string(),
                request: Some(request),
            },
        )
        .await?;

    let cancel = &CancellationToken::new();
    let options = client.poll_options(Some(client.config().rpc_timeout));
    let exec_id = exec.exec_id.as_str();
    let mut output = FsOutput::default();

    loop {
        let response = poll_until(operation, options, cancel, move |wait| {
            let request = proto::ContainerFilesystemExecGetOutputRequest {
                exec_id: exec_id.to_string(),
                timeout: wait.as_secs_f32(),
            };
            async move {
                let response: proto::ContainerFilesystemExecGetOutputResponse = client
                    .call(
                        method::CONTAINER_FILESYSTEM_EXEC_GET_OUTPUT,
                        &request,
                        Some(PollOptions::rpc_timeout(wait)),
                        cancel,
                    )
                    .await?;
                let idle = response.output.is_empty()
                    && !response.eof
                    && response.error.is_none()
                    && response.position.is_none()
                    && response.bytes_written.is_none();
                Ok(if idle { Poll::Pending } else { Poll::Ready(response) })
            }
        })
        .await?;

        if let Some(error) = response.error {
            return Err(Error::filesystem(
                operation,
                error.error_code(),
                error.error_message,
            ));
        }
        for chunk in response.output {
            output.data.extend_from_slice(&chunk);
        }
        output.position = response.position.or(output.position);
        output.bytes_written = response.bytes_written.or(output.bytes_written);

        if response.eof {
            return Ok((exec, output));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        let mode: OpenMode = "r".parse().unwrap();
        assert!(mode.is_readable() && !mode.is_writable() && !mode.is_binary());

        let mode: OpenMode = "w".parse().unwrap();
        assert!(!mode.is_readable() && mode.is_writable());

        let mode: OpenMode = "a+b".parse().unwrap();
        assert!(mode.is_readable() && mode.is_writable() && mode.is_append() && mode.is_binary());

        let mode: OpenMode = "rb+".parse().unwrap();
        assert_eq!(mode.to_string(), "r+b");

        let mode: OpenMode = "x".parse().unwrap();
        assert!(mode.is_writable() && !mode.is_append());
    }

    #[test]
    fn test_invalid_modes_rejected() {
        for mode in ["", "q", "rw", "r++", "bb", "wbb", "+r", "rt"] {
            let err = mode.parse::<OpenMode>().unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{mode} accepted");
        }
    }
}
