//! Shared fixtures: tracing setup and an in-memory sandbox platform.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use tokio::time::Instant;
use tonic::Status;

use tether::proto::{self, FilesystemRequest, SystemErrorCode, method};
use tether::{Client, ClientConfig, RpcChannel};

pub const SANDBOX_ID: &str = "sb-fake";
pub const TASK_ID: &str = "ta-fake";

/// Bytes handed out per stdio read, so output arrives in several batches.
const STDIO_BATCH: usize = 5;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("tether=debug")
            .with_test_writer()
            .init();
    });
}

/// A simulated process.
#[derive(Debug, Default)]
struct FakeProcess {
    command: Vec<String>,
    stdin: Vec<u8>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
}

impl FakeProcess {
    fn start(command: Vec<String>) -> Self {
        let mut process = Self {
            command,
            ..Default::default()
        };
        let args = &process.command[1..];
        match process.command[0].as_str() {
            "cat" => {}
            "echo" => {
                process.stdout = format!("{}\n", args.join(" ")).into_bytes();
                process.exit_code = Some(0);
            }
            "seq" => {
                let n: u32 = args.first().and_then(|n| n.parse().ok()).unwrap_or(0);
                process.stdout = (1..=n).map(|i| format!("{i}\n")).collect::<String>().into_bytes();
                process.exit_code = Some(0);
            }
            "fail" => {
                process.stderr = b"boom\n".to_vec();
                process.exit_code = Some(args.first().and_then(|c| c.parse().ok()).unwrap_or(1));
            }
            other => {
                process.stderr = format!("{other}: command not found\n").into_bytes();
                process.exit_code = Some(127);
            }
        }
        process
    }
}

#[derive(Debug)]
struct OpenFile {
    path: String,
}

#[derive(Debug, Default)]
struct PlatformState {
    processes: HashMap<String, FakeProcess>,
    files: HashMap<String, Vec<u8>>,
    fds: HashMap<String, OpenFile>,
    fs_outputs: HashMap<String, proto::ContainerFilesystemExecGetOutputResponse>,
    next_id: u64,
    calls: Vec<&'static str>,
}

/// An in-memory sandbox answering the exec, stdio, wait and filesystem RPCs.
#[derive(Debug, Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> Client {
        Client::new(Arc::new(self.clone()), ClientConfig::default())
    }

    /// Seed a file.
    pub fn put_file(&self, path: &str, contents: &[u8]) {
        self.lock().files.insert(path.to_string(), contents.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// What a process received on stdin.
    pub fn stdin_of(&self, exec_id: &str) -> Vec<u8> {
        self.lock()
            .processes
            .get(exec_id)
            .map(|p| p.stdin.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|m| **m == method).count()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exec_start(&self, req: proto::TaskExecStartRequest) -> Result<proto::Empty, Status> {
        if req.task_id != TASK_ID {
            return Err(Status::not_found(format!("task {}", req.task_id)));
        }
        if req.command_args.is_empty() {
            return Err(Status::invalid_argument("empty command"));
        }
        let mut state = self.lock();
        if state.processes.contains_key(&req.exec_id) {
            return Err(Status::already_exists(req.exec_id));
        }
        state
            .processes
            .insert(req.exec_id, FakeProcess::start(req.command_args));
        Ok(proto::Empty {})
    }

    fn stdin_write(&self, req: proto::TaskExecStdinWriteRequest) -> Result<proto::Empty, Status> {
        let mut state = self.lock();
        let process = state
            .processes
            .get_mut(&req.exec_id)
            .ok_or_else(|| Status::not_found(req.exec_id.clone()))?;
        if req.offset != process.stdin.len() as u64 {
            return Err(Status::invalid_argument(format!(
                "write at offset {} but {} bytes received",
                req.offset,
                process.stdin.len()
            )));
        }
        process.stdin.extend_from_slice(&req.data);
        if req.eof && process.command[0] == "cat" {
            process.stdout = process.stdin.clone();
            process.exit_code = Some(0);
        }
        Ok(proto::Empty {})
    }

    fn stdio_read(
        &self,
        req: &proto::TaskExecStdioReadRequest,
    ) -> Result<proto::TaskExecStdioReadResponse, Status> {
        let state = self.lock();
        let process = state
            .processes
            .get(&req.exec_id)
            .ok_or_else(|| Status::not_found(req.exec_id.clone()))?;
        let buffer = if req.file_descriptor == proto::FileDescriptor::Stderr as i32 {
            &process.stderr
        } else {
            &process.stdout
        };

        let start = (req.offset as usize).min(buffer.len());
        let end = (start + STDIO_BATCH).min(buffer.len());
        Ok(proto::TaskExecStdioReadResponse {
            data: buffer[start..end].to_vec(),
            eof: process.exit_code.is_some() && end == buffer.len(),
            error: None,
        })
    }

    fn exec_wait(
        &self,
        req: &proto::TaskExecWaitRequest,
    ) -> Result<proto::TaskExecWaitResponse, Status> {
        let state = self.lock();
        let process = state
            .processes
            .get(&req.exec_id)
            .ok_or_else(|| Status::not_found(req.exec_id.clone()))?;
        Ok(proto::TaskExecWaitResponse {
            exit_code: process.exit_code,
        })
    }

    fn fs_exec(
        &self,
        req: proto::ContainerFilesystemExecRequest,
    ) -> Result<proto::ContainerFilesystemExecResponse, Status> {
        let mut state = self.lock();
        state.next_id += 1;
        let exec_id = format!("fs-{}", state.next_id);
        let mut file_descriptor = None;

        let outcome = match req.request {
            Some(FilesystemRequest::Open(open)) => {
                let exists = state.files.contains_key(&open.path);
                let result = match open.mode.chars().next() {
                    Some('r') if !exists => {
                        Err((SystemErrorCode::Noent, "No such file or directory"))
                    }
                    Some('x') if exists => Err((SystemErrorCode::Exist, "File exists")),
                    Some('w' | 'x') => {
                        state.files.insert(open.path.clone(), Vec::new());
                        Ok(())
                    }
                    Some('a') => {
                        state.files.entry(open.path.clone()).or_default();
                        Ok(())
                    }
                    _ => Ok(()),
                };
                result.map(|()| {
                    let fd = format!("fd-{}", state.next_id);
                    state.fds.insert(fd.clone(), OpenFile { path: open.path });
                    file_descriptor = Some(fd);
                    FsResult::default()
                })
            }
            Some(FilesystemRequest::Read(read)) => {
                state.open_file(&read.file_descriptor).map(|contents| {
                    let start = (read.offset.unwrap_or(0) as usize).min(contents.len());
                    let end = match read.n {
                        Some(n) => (start + n as usize).min(contents.len()),
                        None => contents.len(),
                    };
                    let data = &contents[start..end];
                    let mid = data.len() / 2;
                    FsResult {
                        output: vec![data[..mid].to_vec(), data[mid..].to_vec()],
                        ..Default::default()
                    }
                })
            }
            Some(FilesystemRequest::Write(write)) => {
                let path = state.fds.get(&write.file_descriptor).map(|f| f.path.clone());
                match path {
                    Some(path) => {
                        let contents = state.files.entry(path).or_default();
                        let start = write.offset.map_or(contents.len(), |o| o as usize);
                        let end = start + write.data.len();
                        if contents.len() < end {
                            contents.resize(end, 0);
                        }
                        contents[start..end].copy_from_slice(&write.data);
                        Ok(FsResult {
                            position: Some(end as u64),
                            bytes_written: Some(write.data.len() as u64),
                            ..Default::default()
                        })
                    }
                    None => Err((SystemErrorCode::Badf, "Bad file descriptor")),
                }
            }
            Some(FilesystemRequest::Seek(seek)) => {
                state.open_file(&seek.file_descriptor).map(|contents| {
                    let base = if seek.whence == proto::SeekWhence::End as i32 {
                        contents.len() as i64
                    } else {
                        0
                    };
                    FsResult {
                        position: Some((base + seek.offset).max(0) as u64),
                        ..Default::default()
                    }
                })
            }
            Some(FilesystemRequest::Flush(flush)) => {
                state.open_file(&flush.file_descriptor).map(|_| FsResult::default())
            }
            Some(FilesystemRequest::Close(close)) => {
                match state.fds.remove(&close.file_descriptor) {
                    Some(_) => Ok(FsResult::default()),
                    None => Err((SystemErrorCode::Badf, "Bad file descriptor")),
                }
            }
            None => return Err(Status::invalid_argument("missing filesystem request")),
        };

        let output = match outcome {
            Ok(result) => proto::ContainerFilesystemExecGetOutputResponse {
                output: result.output,
                eof: true,
                error: None,
                position: result.position,
                bytes_written: result.bytes_written,
            },
            Err((code, message)) => proto::ContainerFilesystemExecGetOutputResponse {
                eof: true,
                error: Some(proto::SystemErrorMessage {
                    error_code: code as i32,
                    error_message: message.to_string(),
                }),
                ..Default::default()
            },
        };
        state.fs_outputs.insert(exec_id.clone(), output);

        Ok(proto::ContainerFilesystemExecResponse {
            exec_id,
            file_descriptor,
        })
    }

    fn fs_output(
        &self,
        req: proto::ContainerFilesystemExecGetOutputRequest,
    ) -> Result<proto::ContainerFilesystemExecGetOutputResponse, Status> {
        self.lock()
            .fs_outputs
            .remove(&req.exec_id)
            .ok_or_else(|| Status::not_found(format!("exec {}", req.exec_id)))
    }
}

#[derive(Debug, Default)]
struct FsResult {
    output: Vec<Vec<u8>>,
    position: Option<u64>,
    bytes_written: Option<u64>,
}

impl PlatformState {
    fn open_file(&self, fd: &str) -> Result<&Vec<u8>, (SystemErrorCode, &'static str)> {
        self.fds
            .get(fd)
            .and_then(|file| self.files.get(&file.path))
            .ok_or((SystemErrorCode::Badf, "Bad file descriptor"))
    }
}

fn decode<M: Message + Default>(body: Bytes) -> Result<M, Status> {
    M::decode(body).map_err(|e| Status::invalid_argument(e.to_string()))
}

fn encode<M: Message>(message: &M) -> Result<Bytes, Status> {
    Ok(Bytes::from(message.encode_to_vec()))
}

/// Keeps a pending long-poll from spinning without yielding.
async fn idle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[async_trait]
impl RpcChannel for FakePlatform {
    async fn invoke(
        &self,
        method: &'static str,
        request: Bytes,
        _deadline: Option<Instant>,
    ) -> Result<Bytes, Status> {
        self.lock().calls.push(method);

        match method {
            method::SANDBOX_GET_TASK_ID => {
                let req: proto::SandboxGetTaskIdRequest = decode(request)?;
                if req.sandbox_id != SANDBOX_ID {
                    return Err(Status::not_found(req.sandbox_id));
                }
                encode(&proto::SandboxGetTaskIdResponse {
                    task_id: Some(TASK_ID.to_string()),
                    task_result: None,
                })
            }
            method::SANDBOX_WAIT => {
                let req: proto::SandboxWaitRequest = decode(request)?;
                if req.sandbox_id != SANDBOX_ID {
                    return Err(Status::not_found(req.sandbox_id));
                }
                encode(&proto::SandboxWaitResponse { result: None })
            }
            method::TASK_EXEC_START => encode(&self.exec_start(decode(request)?)?),
            method::TASK_EXEC_STDIN_WRITE => encode(&self.stdin_write(decode(request)?)?),
            method::TASK_EXEC_STDIO_READ => {
                let req: proto::TaskExecStdioReadRequest = decode(request)?;
                let response = self.stdio_read(&req)?;
                if response.data.is_empty() && !response.eof {
                    idle().await;
                }
                encode(&response)
            }
            method::TASK_EXEC_WAIT => {
                let req: proto::TaskExecWaitRequest = decode(request)?;
                let response = self.exec_wait(&req)?;
                if response.exit_code.is_none() {
                    idle().await;
                }
                encode(&response)
            }
            method::CONTAINER_FILESYSTEM_EXEC => encode(&self.fs_exec(decode(request)?)?),
            method::CONTAINER_FILESYSTEM_EXEC_GET_OUTPUT => {
                encode(&self.fs_output(decode(request)?)?)
            }
            other => Err(Status::unimplemented(format!("unexpected call to {other}"))),
        }
    }
}
