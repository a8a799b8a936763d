//! Remote function invocation

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::poll::{Poll, PollOptions, poll_until};
use crate::proto::{self, GenericStatus, method};
use crate::serializer::{CborSerializer, Serializer, Value};

/// Largest encoded argument payload sent inline.
const MAX_INPUT_BYTES: usize = 2 * 1024 * 1024;

/// Attempts made for an input the platform failed internally.
const MAX_INTERNAL_FAILURE_RETRIES: u32 = 8;

/// A deployed function, resolved by [`Client::function_from_name`].
#[derive(Debug, Clone)]
pub struct Function {
    client: Client,
    function_id: String,
    metadata: proto::FunctionHandleMetadata,
    serializer: Arc<dyn Serializer>,
}

impl Function {
    pub(crate) fn new(
        client: Client,
        function_id: String,
        metadata: proto::FunctionHandleMetadata,
    ) -> Self {
        Self {
            client,
            function_id,
            metadata,
            serializer: Arc::new(CborSerializer),
        }
    }

    /// Server-assigned function id.
    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    /// Function name as registered with the platform.
    pub fn name(&self) -> &str {
        &self.metadata.function_name
    }

    /// Replace the argument/result serializer.
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Call the function and wait for its result.
    ///
    /// Inputs the platform fails internally are resubmitted a bounded number
    /// of times before the failure is returned.
    pub async fn remote(
        &self,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let input = self.build_input(args, kwargs)?;
        let mut invocation = Invocation::create(
            &self.client,
            &self.function_id,
            input,
            proto::FunctionCallInvocationType::Sync,
        )
        .await?;

        let mut retries = 0;
        loop {
            let output = invocation.await_output(None, cancel).await?;
            match decode_output(output, self.serializer.as_ref()) {
                Err(Error::InternalFailure(message)) if retries < MAX_INTERNAL_FAILURE_RETRIES => {
                    retries += 1;
                    warn!(
                        function_call_id = %invocation.function_call_id,
                        retries,
                        %message,
                        "input failed internally, retrying"
                    );
                    invocation.retry(retries).await?;
                }
                result => return result,
            }
        }
    }

    /// Start the function without waiting for it.
    pub async fn spawn(
        &self,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
    ) -> Result<FunctionCall> {
        let input = self.build_input(args, kwargs)?;
        let invocation = Invocation::create(
            &self.client,
            &self.function_id,
            input,
            proto::FunctionCallInvocationType::Async,
        )
        .await?;

        Ok(FunctionCall {
            client: self.client.clone(),
            function_call_id: invocation.function_call_id,
            serializer: self.serializer.clone(),
        })
    }

    fn build_input(
        &self,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
    ) -> Result<proto::FunctionInput> {
        if !self.metadata.web_url.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "function '{}' is a web endpoint and must be called over HTTP",
                self.name()
            )));
        }
        let format = self.serializer.format();
        if !self.metadata.supported_input_formats().any(|f| f == format) {
            return Err(Error::InvalidArgument(format!(
                "function '{}' does not accept {format:?} inputs",
                self.name()
            )));
        }

        let args = self.serializer.encode_args(args, kwargs)?;
        if args.len() > MAX_INPUT_BYTES {
            return Err(Error::InvalidArgument(format!(
                "encoded arguments are {} bytes; the limit is {MAX_INPUT_BYTES}",
                args.len()
            )));
        }

        Ok(proto::FunctionInput {
            args,
            data_format: format as i32,
            method_name: None,
        })
    }
}

/// Handle to a spawned function call.
///
/// Only the id is held locally, so a handle rebuilt with
/// [`Client::function_call_from_id`] behaves the same as the original.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    client: Client,
    function_call_id: String,
    serializer: Arc<dyn Serializer>,
}

/// Options for [`FunctionCall::get`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// `None` waits indefinitely; zero checks once without blocking.
    pub timeout: Option<Duration>,
}

impl GetOptions {
    /// Wait at most `timeout`.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

impl FunctionCall {
    pub(crate) fn new(client: Client, function_call_id: String) -> Self {
        Self {
            client,
            function_call_id,
            serializer: Arc::new(CborSerializer),
        }
    }

    /// Opaque call id.
    pub fn id(&self) -> &str {
        &self.function_call_id
    }

    /// Replace the result serializer.
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Wait for the call's result.
    ///
    /// A timeout or cancellation abandons only the local wait; the remote
    /// call keeps running until [`FunctionCall::cancel`].
    pub async fn get(&self, options: GetOptions, cancel: &CancellationToken) -> Result<Value> {
        let invocation = Invocation::from_function_call_id(&self.client, &self.function_call_id);
        let output = invocation.await_output(options.timeout, cancel).await?;
        decode_output(output, self.serializer.as_ref())
    }

    /// Cancel the call. Cancelling a finished or already cancelled call
    /// succeeds.
    pub async fn cancel(&self, terminate_containers: bool) -> Result<()> {
        let request = proto::FunctionCallCancelRequest {
            function_call_id: self.function_call_id.clone(),
            terminate_containers,
        };
        let _: proto::Empty = self
            .client
            .unary(method::FUNCTION_CALL_CANCEL, &request)
            .await?;
        debug!(
            function_call_id = %self.function_call_id,
            terminate_containers,
            "cancelled function call"
        );
        Ok(())
    }
}

/// One server-side execution attempt of a function input.
#[derive(Debug)]
struct Invocation<'a> {
    client: &'a Client,
    function_call_id: String,
    input: Option<proto::FunctionInput>,
    function_call_jwt: String,
    input_jwt: String,
}

impl<'a> Invocation<'a> {
    async fn create(
        client: &'a Client,
        function_id: &str,
        input: proto::FunctionInput,
        invocation_type: proto::FunctionCallInvocationType,
    ) -> Result<Self> {
        let request = proto::FunctionMapRequest {
            function_id: function_id.to_string(),
            function_call_type: proto::FunctionCallType::Unary as i32,
            function_call_invocation_type: invocation_type as i32,
            pipelined_inputs: vec![proto::FunctionPutInputsItem {
                idx: 0,
                input: Some(input.clone()),
            }],
        };
        let response: proto::FunctionMapResponse =
            client.unary(method::FUNCTION_MAP, &request).await?;

        let input_jwt = response
            .pipelined_inputs
            .into_iter()
            .next()
            .map(|item| item.input_jwt)
            .ok_or_else(|| Error::Remote {
                message: format!(
                    "function call {} was created without an input",
                    response.function_call_id
                ),
            })?;

        debug!(
            function_id,
            function_call_id = %response.function_call_id,
            ?invocation_type,
            "created function call"
        );
        Ok(Self {
            client,
            function_call_id: response.function_call_id,
            input: Some(input),
            function_call_jwt: response.function_call_jwt,
            input_jwt,
        })
    }

    fn from_function_call_id(client: &'a Client, function_call_id: &str) -> Self {
        Self {
            client,
            function_call_id: function_call_id.to_string(),
            input: None,
            function_call_jwt: String::new(),
            input_jwt: String::new(),
        }
    }

    async fn await_output(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<proto::FunctionGetOutputsItem> {
        let client = self.client;
        let function_call_id = self.function_call_id.as_str();
        let operation = format!("FunctionCall.get {function_call_id}");

        poll_until(&operation, client.poll_options(timeout), cancel, move |wait| {
            let request = proto::FunctionGetOutputsRequest {
                function_call_id: function_call_id.to_string(),
                max_values: 1,
                timeout: wait.as_secs_f32(),
                last_entry_id: "0-0".to_string(),
                clear_on_success: true,
                requested_at: unix_now(),
            };
            async move {
                let response: proto::FunctionGetOutputsResponse = client
                    .call(
                        method::FUNCTION_GET_OUTPUTS,
                        &request,
                        Some(PollOptions::rpc_timeout(wait)),
                        cancel,
                    )
                    .await?;
                Ok(match response.outputs.into_iter().next() {
                    Some(output) => Poll::Ready(output),
                    None => Poll::Pending,
                })
            }
        })
        .await
    }

    async fn retry(&mut self, retry_count: u32) -> Result<()> {
        let Some(input) = self.input.clone() else {
            return Err(Error::InvalidHandle(format!(
                "function call {} has no local input to resubmit",
                self.function_call_id
            )));
        };
        let request = proto::FunctionRetryInputsRequest {
            function_call_jwt: self.function_call_jwt.clone(),
            inputs: vec![proto::FunctionRetryInputsItem {
                input_jwt: self.input_jwt.clone(),
                input: Some(input),
                retry_count,
            }],
        };
        let response: proto::FunctionRetryInputsResponse = self
            .client
            .unary(method::FUNCTION_RETRY_INPUTS, &request)
            .await?;

        if let Some(jwt) = response.input_jwts.into_iter().next() {
            self.input_jwt = jwt;
        }
        Ok(())
    }
}

fn decode_output(
    output: proto::FunctionGetOutputsItem,
    serializer: &dyn Serializer,
) -> Result<Value> {
    let data_format = output.data_format();
    let Some(result) = output.result else {
        return Err(Error::Remote {
            message: "received empty result".to_string(),
        });
    };

    match result.status() {
        GenericStatus::Success => {
            if data_format != serializer.format() {
                return Err(Error::Serialization(format!(
                    "result arrived as {data_format:?}, expected {:?}",
                    serializer.format()
                )));
            }
            serializer.decode(&result.data)
        }
        GenericStatus::Timeout => Err(Error::FunctionTimeout(result.exception)),
        GenericStatus::InternalFailure => Err(Error::InternalFailure(result.exception)),
        status => {
            let message = if result.exception.is_empty() {
                format!("remote call finished with status {status:?}")
            } else if result.traceback.is_empty() {
                result.exception
            } else {
                format!("{}\n{}", result.exception, result.traceback)
            };
            Err(Error::Remote { message })
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
