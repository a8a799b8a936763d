//! The shared client handle

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use prost::Message;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, trace};

use crate::channel::{GrpcChannel, RpcChannel};
use crate::config::{ClientConfig, clamp_attempt_cap};
use crate::error::{Error, Result};
use crate::function::{Function, FunctionCall};
use crate::poll::PollOptions;
use crate::proto::{self, method};
use crate::sandbox::Sandbox;

/// Handle to the control plane.
///
/// Cheap to clone; every [`Function`], [`FunctionCall`] and [`Sandbox`] keeps
/// one. Dropping handles does not stop remote work.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    channel: Arc<dyn RpcChannel>,
    config: ClientConfig,
    shutdown: CancellationToken,
}

impl Client {
    /// Build a client over an existing channel.
    pub fn new(channel: Arc<dyn RpcChannel>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                channel,
                config,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Connect a gRPC channel using `config`.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let channel = GrpcChannel::connect(&config).await?;
        Ok(Self::new(Arc::new(channel), config))
    }

    /// The resolved configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Abort every wait in progress on this client and its clones.
    ///
    /// Subsequent calls fail with [`Error::Cancelled`].
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Poll options for `timeout` with the configured attempt cap.
    pub(crate) fn poll_options(&self, timeout: Option<Duration>) -> PollOptions {
        PollOptions {
            timeout,
            attempt_cap: clamp_attempt_cap(self.inner.config.poll_attempt_cap),
        }
    }

    /// Issue one typed RPC.
    ///
    /// `timeout` bounds this call alone and defaults to the configured
    /// `rpc_timeout`. Cancellation of `cancel` or of the client aborts the
    /// call without waiting for the channel.
    pub(crate) async fn call<Req, Resp>(
        &self,
        method: &'static str,
        request: &Req,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let timeout = timeout.unwrap_or(self.inner.config.rpc_timeout);
        let deadline = Instant::now() + timeout;
        let body = Bytes::from(request.encode_to_vec());
        trace!(method, ?timeout, "rpc");

        let invoke = self.inner.channel.invoke(method, body, Some(deadline));
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(method)),
            _ = self.inner.shutdown.cancelled() => return Err(Error::cancelled(method)),
            result = tokio::time::timeout_at(deadline, invoke) => match result {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(status)) => return Err(Error::from_status(method, status)),
                Err(_) => {
                    return Err(Error::from_status(
                        method,
                        Status::deadline_exceeded(format!("no response within {timeout:?}")),
                    ));
                }
            },
        };

        Resp::decode(response).map_err(|source| Error::Decode {
            operation: method.to_string(),
            source,
        })
    }

    /// Issue one typed RPC with the default timeout and no caller cancellation.
    pub(crate) async fn unary<Req, Resp>(&self, method: &'static str, request: &Req) -> Result<Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        self.call(method, request, None, &CancellationToken::new())
            .await
    }

    /// Look up a deployed function by app and function name.
    ///
    /// `environment` falls back to the configured environment.
    pub async fn function_from_name(
        &self,
        app_name: &str,
        name: &str,
        environment: Option<&str>,
    ) -> Result<Function> {
        if name.contains('.') {
            return Err(Error::InvalidArgument(format!(
                "'{name}' names a class method; only plain functions can be looked up"
            )));
        }

        let request = proto::FunctionGetRequest {
            app_name: app_name.to_string(),
            object_tag: name.to_string(),
            environment_name: environment
                .map(str::to_string)
                .or_else(|| self.inner.config.environment.clone())
                .unwrap_or_default(),
        };
        let response: proto::FunctionGetResponse = self
            .unary(method::FUNCTION_GET, &request)
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => {
                    Error::NotFound(format!("function '{app_name}/{name}' not found"))
                }
                other => other,
            })?;

        debug!(function_id = %response.function_id, app_name, name, "resolved function");
        Ok(Function::new(
            self.clone(),
            response.function_id,
            response.handle_metadata.unwrap_or_default(),
        ))
    }

    /// Rebuild a handle for a function call spawned earlier.
    pub fn function_call_from_id(&self, function_call_id: impl Into<String>) -> FunctionCall {
        FunctionCall::new(self.clone(), function_call_id.into())
    }

    /// Attach to a running or finished sandbox.
    pub async fn sandbox_from_id(&self, sandbox_id: &str) -> Result<Sandbox> {
        let request = proto::SandboxWaitRequest {
            sandbox_id: sandbox_id.to_string(),
            timeout: 0.0,
        };
        let _: proto::SandboxWaitResponse = self
            .unary(method::SANDBOX_WAIT, &request)
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("sandbox '{sandbox_id}' not found")),
                other => other,
            })?;

        Ok(Sandbox::new(self.clone(), sandbox_id.to_string()))
    }
}
