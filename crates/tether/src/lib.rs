//! Tether: remote invocation and streaming I/O client
//!
//! Tether drives compute hosted by a remote execution platform over a
//! control-plane RPC channel. It covers three kinds of long-running remote
//! work, each represented as a bounded sequence of short RPCs:
//!
//! - [`Function`] / [`FunctionCall`]: invoke a remote function and collect its
//!   result, either directly or through a deferred handle.
//! - [`ContainerProcess`]: a process started inside a [`Sandbox`], with its
//!   stdin, stdout and stderr multiplexed across RPC calls.
//! - [`SandboxFile`]: descriptor-based random access to a file inside a
//!   sandbox filesystem.
//!
//! All waiting goes through one primitive, the poll loop in [`poll`], which
//! chains attempts no longer than the platform's per-call ceiling until a
//! result arrives, the caller's deadline passes, or the caller cancels.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether::{Client, ClientConfig, ExecOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = Client::connect(ClientConfig::load()?).await?;
//! let sandbox = client.sandbox_from_id("sb-123").await?;
//!
//! let mut process = sandbox.exec(["cat"], ExecOptions::default()).await?;
//! process.stdin.write(b"hello").await?;
//! process.stdin.close().await?;
//!
//! let cancel = CancellationToken::new();
//! let output = process.stdout.read_to_end(&cancel).await?;
//! assert_eq!(process.wait(&cancel).await?, 0);
//! ```

pub mod channel;
mod client;
mod config;
mod error;
mod file;
mod function;
pub mod poll;
pub mod proto;
mod sandbox;
mod serializer;
mod stream;
pub mod testing;

pub use channel::{GrpcChannel, RpcChannel};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use file::{OpenMode, SandboxFile};
pub use function::{Function, FunctionCall, GetOptions};
pub use poll::PollOptions;
pub use sandbox::{ContainerProcess, ExecOptions, Sandbox, Stdio};
pub use serializer::{CborSerializer, Serializer, Value};
pub use stream::{OutputStream, StdinWriter, StreamKind};

// Re-exported so callers can build cancellation tokens without naming the crate.
pub use tokio_util::sync::CancellationToken;
