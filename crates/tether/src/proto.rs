//! Control-plane wire messages.
//!
//! Messages are declared with prost derives directly; the RPC method names in
//! [`method`] are the message-name prefixes of the matching request types.

#![allow(missing_docs)]
#![allow(clippy::doc_markdown)]

/// RPC method names on the control-plane service.
pub mod method {
    pub const FUNCTION_GET: &str = "FunctionGet";
    pub const FUNCTION_MAP: &str = "FunctionMap";
    pub const FUNCTION_GET_OUTPUTS: &str = "FunctionGetOutputs";
    pub const FUNCTION_RETRY_INPUTS: &str = "FunctionRetryInputs";
    pub const FUNCTION_CALL_CANCEL: &str = "FunctionCallCancel";
    pub const SANDBOX_GET_TASK_ID: &str = "SandboxGetTaskId";
    pub const SANDBOX_WAIT: &str = "SandboxWait";
    pub const SANDBOX_TERMINATE: &str = "SandboxTerminate";
    pub const SANDBOX_STDIN_WRITE: &str = "SandboxStdinWrite";
    pub const SANDBOX_GET_LOGS: &str = "SandboxGetLogs";
    pub const TASK_EXEC_START: &str = "TaskExecStart";
    pub const TASK_EXEC_STDIN_WRITE: &str = "TaskExecStdinWrite";
    pub const TASK_EXEC_STDIO_READ: &str = "TaskExecStdioRead";
    pub const TASK_EXEC_WAIT: &str = "TaskExecWait";
    pub const CONTAINER_FILESYSTEM_EXEC: &str = "ContainerFilesystemExec";
    pub const CONTAINER_FILESYSTEM_EXEC_GET_OUTPUT: &str = "ContainerFilesystemExecGetOutput";
}

// ============================================================================
// Shared
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DataFormat {
    Unspecified = 0,
    Pickle = 1,
    Asgi = 2,
    GeneratorDone = 3,
    Cbor = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum GenericStatus {
    Unspecified = 0,
    Success = 1,
    Failure = 2,
    Terminated = 3,
    Timeout = 4,
    InitFailure = 5,
    InternalFailure = 6,
}

/// Terminal outcome of a function input or a sandbox.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GenericResult {
    #[prost(enumeration = "GenericStatus", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub exception: String,
    #[prost(int32, tag = "3")]
    pub exitcode: i32,
    #[prost(string, tag = "4")]
    pub traceback: String,
    #[prost(bytes = "vec", tag = "5")]
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SystemErrorCode {
    Unspecified = 0,
    Perm = 1,
    Noent = 2,
    Io = 5,
    Badf = 9,
    Acces = 13,
    Exist = 17,
    Notdir = 20,
    Isdir = 21,
    Inval = 22,
    Nospc = 28,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemErrorMessage {
    #[prost(enumeration = "SystemErrorCode", tag = "1")]
    pub error_code: i32,
    #[prost(string, tag = "2")]
    pub error_message: String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}

// ============================================================================
// Functions
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FunctionCallInvocationType {
    Unspecified = 0,
    Async = 1,
    Sync = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FunctionCallType {
    Unspecified = 0,
    Unary = 1,
    Map = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionGetRequest {
    #[prost(string, tag = "1")]
    pub app_name: String,
    #[prost(string, tag = "2")]
    pub object_tag: String,
    #[prost(string, tag = "3")]
    pub environment_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionHandleMetadata {
    #[prost(string, tag = "1")]
    pub function_name: String,
    #[prost(enumeration = "DataFormat", repeated, tag = "2")]
    pub supported_input_formats: Vec<i32>,
    #[prost(string, tag = "3")]
    pub web_url: String,
    #[prost(bool, tag = "4")]
    pub use_method_name: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionGetResponse {
    #[prost(string, tag = "1")]
    pub function_id: String,
    #[prost(message, optional, tag = "2")]
    pub handle_metadata: Option<FunctionHandleMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionInput {
    #[prost(bytes = "vec", tag = "1")]
    pub args: Vec<u8>,
    #[prost(enumeration = "DataFormat", tag = "2")]
    pub data_format: i32,
    #[prost(string, optional, tag = "3")]
    pub method_name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionPutInputsItem {
    #[prost(int32, tag = "1")]
    pub idx: i32,
    #[prost(message, optional, tag = "2")]
    pub input: Option<FunctionInput>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionMapRequest {
    #[prost(string, tag = "1")]
    pub function_id: String,
    #[prost(enumeration = "FunctionCallType", tag = "2")]
    pub function_call_type: i32,
    #[prost(enumeration = "FunctionCallInvocationType", tag = "3")]
    pub function_call_invocation_type: i32,
    #[prost(message, repeated, tag = "4")]
    pub pipelined_inputs: Vec<FunctionPutInputsItem>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionPutInputsResponseItem {
    #[prost(int32, tag = "1")]
    pub idx: i32,
    #[prost(string, tag = "2")]
    pub input_id: String,
    #[prost(string, tag = "3")]
    pub input_jwt: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionMapResponse {
    #[prost(string, tag = "1")]
    pub function_call_id: String,
    #[prost(message, repeated, tag = "2")]
    pub pipelined_inputs: Vec<FunctionPutInputsResponseItem>,
    #[prost(string, tag = "3")]
    pub function_call_jwt: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionGetOutputsRequest {
    #[prost(string, tag = "1")]
    pub function_call_id: String,
    #[prost(int32, tag = "2")]
    pub max_values: i32,
    /// Server-side wait in seconds.
    #[prost(float, tag = "3")]
    pub timeout: f32,
    #[prost(string, tag = "4")]
    pub last_entry_id: String,
    #[prost(bool, tag = "5")]
    pub clear_on_success: bool,
    /// Unix seconds at which the request was issued.
    #[prost(double, tag = "6")]
    pub requested_at: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionGetOutputsItem {
    #[prost(message, optional, tag = "1")]
    pub result: Option<GenericResult>,
    #[prost(int32, tag = "2")]
    pub idx: i32,
    #[prost(enumeration = "DataFormat", tag = "3")]
    pub data_format: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionGetOutputsResponse {
    #[prost(message, repeated, tag = "1")]
    pub outputs: Vec<FunctionGetOutputsItem>,
    #[prost(string, tag = "2")]
    pub last_entry_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionRetryInputsItem {
    #[prost(string, tag = "1")]
    pub input_jwt: String,
    #[prost(message, optional, tag = "2")]
    pub input: Option<FunctionInput>,
    #[prost(uint32, tag = "3")]
    pub retry_count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionRetryInputsRequest {
    #[prost(string, tag = "1")]
    pub function_call_jwt: String,
    #[prost(message, repeated, tag = "2")]
    pub inputs: Vec<FunctionRetryInputsItem>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionRetryInputsResponse {
    #[prost(string, repeated, tag = "1")]
    pub input_jwts: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FunctionCallCancelRequest {
    #[prost(string, tag = "1")]
    pub function_call_id: String,
    #[prost(bool, tag = "2")]
    pub terminate_containers: bool,
}

// ============================================================================
// Sandboxes
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FileDescriptor {
    Unspecified = 0,
    Stdout = 1,
    Stderr = 2,
    Info = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxGetTaskIdRequest {
    #[prost(string, tag = "1")]
    pub sandbox_id: String,
    #[prost(float, optional, tag = "2")]
    pub timeout: Option<f32>,
    #[prost(bool, tag = "3")]
    pub wait_until_ready: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxGetTaskIdResponse {
    #[prost(string, optional, tag = "1")]
    pub task_id: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub task_result: Option<GenericResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxWaitRequest {
    #[prost(string, tag = "1")]
    pub sandbox_id: String,
    #[prost(float, tag = "2")]
    pub timeout: f32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxWaitResponse {
    #[prost(message, optional, tag = "1")]
    pub result: Option<GenericResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxTerminateRequest {
    #[prost(string, tag = "1")]
    pub sandbox_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxStdinWriteRequest {
    #[prost(string, tag = "1")]
    pub sandbox_id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub input: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub index: u32,
    #[prost(bool, tag = "4")]
    pub eof: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxGetLogsRequest {
    #[prost(string, tag = "1")]
    pub sandbox_id: String,
    #[prost(enumeration = "FileDescriptor", tag = "2")]
    pub file_descriptor: i32,
    #[prost(float, tag = "3")]
    pub timeout: f32,
    #[prost(string, tag = "4")]
    pub last_entry_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxGetLogsResponse {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub items: Vec<Vec<u8>>,
    #[prost(string, tag = "2")]
    pub entry_id: String,
    #[prost(bool, tag = "3")]
    pub eof: bool,
}

// ============================================================================
// Container processes
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StdioConfig {
    Unspecified = 0,
    Pipe = 1,
    Devnull = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PtyInfo {
    #[prost(bool, tag = "1")]
    pub enabled: bool,
    #[prost(uint32, tag = "2")]
    pub winsz_rows: u32,
    #[prost(uint32, tag = "3")]
    pub winsz_cols: u32,
    #[prost(string, tag = "4")]
    pub env_term: String,
    #[prost(string, tag = "5")]
    pub env_colorterm: String,
    #[prost(bool, tag = "6")]
    pub no_terminate_on_idle_stdin: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskExecStartRequest {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(string, tag = "2")]
    pub exec_id: String,
    #[prost(string, repeated, tag = "3")]
    pub command_args: Vec<String>,
    #[prost(enumeration = "StdioConfig", tag = "4")]
    pub stdout_config: i32,
    #[prost(enumeration = "StdioConfig", tag = "5")]
    pub stderr_config: i32,
    #[prost(string, optional, tag = "6")]
    pub workdir: Option<String>,
    #[prost(string, repeated, tag = "7")]
    pub secret_ids: Vec<String>,
    #[prost(message, optional, tag = "8")]
    pub pty_info: Option<PtyInfo>,
    #[prost(uint32, optional, tag = "9")]
    pub timeout_secs: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskExecStdinWriteRequest {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(string, tag = "2")]
    pub exec_id: String,
    #[prost(uint64, tag = "3")]
    pub offset: u64,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
    #[prost(bool, tag = "5")]
    pub eof: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskExecStdioReadRequest {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(string, tag = "2")]
    pub exec_id: String,
    #[prost(uint64, tag = "3")]
    pub offset: u64,
    #[prost(enumeration = "FileDescriptor", tag = "4")]
    pub file_descriptor: i32,
    #[prost(float, tag = "5")]
    pub timeout: f32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskExecStdioReadResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(bool, tag = "2")]
    pub eof: bool,
    #[prost(message, optional, tag = "3")]
    pub error: Option<SystemErrorMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskExecWaitRequest {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(string, tag = "2")]
    pub exec_id: String,
    #[prost(float, tag = "3")]
    pub timeout: f32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskExecWaitResponse {
    #[prost(int32, optional, tag = "1")]
    pub exit_code: Option<i32>,
}

// ============================================================================
// Container filesystem
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SeekWhence {
    Set = 0,
    Cur = 1,
    End = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerFileOpenRequest {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(string, tag = "2")]
    pub mode: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerFileReadRequest {
    #[prost(string, tag = "1")]
    pub file_descriptor: String,
    #[prost(uint32, optional, tag = "2")]
    pub n: Option<u32>,
    #[prost(uint64, optional, tag = "3")]
    pub offset: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerFileWriteRequest {
    #[prost(string, tag = "1")]
    pub file_descriptor: String,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(uint64, optional, tag = "3")]
    pub offset: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerFileSeekRequest {
    #[prost(string, tag = "1")]
    pub file_descriptor: String,
    #[prost(int64, tag = "2")]
    pub offset: i64,
    #[prost(enumeration = "SeekWhence", tag = "3")]
    pub whence: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerFileFlushRequest {
    #[prost(string, tag = "1")]
    pub file_descriptor: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerFileCloseRequest {
    #[prost(string, tag = "1")]
    pub file_descriptor: String,
}

/// One filesystem operation, executed remotely as a short-lived exec.
#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum FilesystemRequest {
    #[prost(message, tag = "2")]
    Open(ContainerFileOpenRequest),
    #[prost(message, tag = "3")]
    Read(ContainerFileReadRequest),
    #[prost(message, tag = "4")]
    Write(ContainerFileWriteRequest),
    #[prost(message, tag = "5")]
    Seek(ContainerFileSeekRequest),
    #[prost(message, tag = "6")]
    Flush(ContainerFileFlushRequest),
    #[prost(message, tag = "7")]
    Close(ContainerFileCloseRequest),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerFilesystemExecRequest {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(oneof = "FilesystemRequest", tags = "2, 3, 4, 5, 6, 7")]
    pub request: Option<FilesystemRequest>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerFilesystemExecResponse {
    #[prost(string, tag = "1")]
    pub exec_id: String,
    #[prost(string, optional, tag = "2")]
    pub file_descriptor: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerFilesystemExecGetOutputRequest {
    #[prost(string, tag = "1")]
    pub exec_id: String,
    #[prost(float, tag = "2")]
    pub timeout: f32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerFilesystemExecGetOutputResponse {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub output: Vec<Vec<u8>>,
    #[prost(bool, tag = "2")]
    pub eof: bool,
    #[prost(message, optional, tag = "3")]
    pub error: Option<SystemErrorMessage>,
    #[prost(uint64, optional, tag = "4")]
    pub position: Option<u64>,
    #[prost(uint64, optional, tag = "5")]
    pub bytes_written: Option<u64>,
}
