//! A scripted RPC channel for tests.
//!
//! [`MockChannel`] answers each control-plane method from a FIFO queue of
//! handlers registered ahead of time. A call with no handler left fails with
//! `Unimplemented` ("unexpected call to ...") instead of returning a default
//! message, and [`MockChannel::assert_exhausted`] reports both unexpected
//! calls and handlers that were never used.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use tokio::time::Instant;
use tonic::Status;

use crate::channel::RpcChannel;
use crate::client::Client;
use crate::config::ClientConfig;

type Handler = Box<dyn FnOnce(Bytes) -> Result<Bytes, Status> + Send>;

#[derive(Default)]
struct MockState {
    handlers: HashMap<&'static str, VecDeque<Handler>>,
    calls: Vec<&'static str>,
    unexpected: Vec<&'static str>,
}

/// Scripted [`RpcChannel`] double. Clones share one script.
#[derive(Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
}

impl fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let pending: HashMap<_, _> = state
            .handlers
            .iter()
            .map(|(method, queue)| (*method, queue.len()))
            .collect();
        f.debug_struct("MockChannel")
            .field("pending", &pending)
            .field("calls", &state.calls.len())
            .finish_non_exhaustive()
    }
}

impl MockChannel {
    /// An empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// A client over this channel with default configuration.
    pub fn client(&self) -> Client {
        self.client_with(ClientConfig::default())
    }

    /// A client over this channel with `config`.
    pub fn client_with(&self, config: ClientConfig) -> Client {
        Client::new(Arc::new(self.clone()), config)
    }

    /// Queue `handler` to answer the next unanswered call to `method`.
    pub fn handle_unary<Req, Resp>(
        &self,
        method: &'static str,
        handler: impl FnOnce(Req) -> Result<Resp, Status> + Send + 'static,
    ) where
        Req: Message + Default + 'static,
        Resp: Message + 'static,
    {
        let handler: Handler = Box::new(move |body: Bytes| {
            let request = Req::decode(body).map_err(|e| {
                Status::invalid_argument(format!("{method}: malformed request: {e}"))
            })?;
            handler(request).map(|response| Bytes::from(response.encode_to_vec()))
        });
        self.lock()
            .handlers
            .entry(method)
            .or_default()
            .push_back(handler);
    }

    /// Methods called so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    /// Panic if any call went unanswered or any handler went unused.
    pub fn assert_exhausted(&self) {
        let state = self.lock();
        let mut problems = Vec::new();
        for method in &state.unexpected {
            problems.push(format!("unexpected call to {method}"));
        }
        for (method, queue) in &state.handlers {
            if !queue.is_empty() {
                problems.push(format!("{} unused handler(s) for {method}", queue.len()));
            }
        }
        if !problems.is_empty() {
            problems.sort();
            panic!("mock channel not exhausted:\n  {}", problems.join("\n  "));
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RpcChannel for MockChannel {
    async fn invoke(
        &self,
        method: &'static str,
        request: Bytes,
        _deadline: Option<Instant>,
    ) -> Result<Bytes, Status> {
        let handler = {
            let mut state = self.lock();
            state.calls.push(method);
            let handler = state.handlers.get_mut(method).and_then(VecDeque::pop_front);
            if handler.is_none() {
                state.unexpected.push(method);
            }
            handler
        };

        match handler {
            Some(handler) => handler(request),
            None => Err(Status::unimplemented(format!("unexpected call to {method}"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::proto::{self, method};

    #[tokio::test]
    async fn test_handlers_answer_in_fifo_order() {
        let mock = MockChannel::new();
        for id in ["first", "second"] {
            mock.handle_unary::<proto::SandboxWaitRequest, proto::SandboxWaitResponse>(
                method::SANDBOX_WAIT,
                move |req| {
                    assert_eq!(req.sandbox_id, id);
                    Ok(proto::SandboxWaitResponse::default())
                },
            );
        }
        let client = mock.client();

        for id in ["first", "second"] {
            let request = proto::SandboxWaitRequest {
                sandbox_id: id.into(),
                timeout: 0.0,
            };
            let _: proto::SandboxWaitResponse =
                client.unary(method::SANDBOX_WAIT, &request).await.unwrap();
        }
        assert_eq!(mock.calls(), vec![method::SANDBOX_WAIT, method::SANDBOX_WAIT]);
        mock.assert_exhausted();
    }

    #[tokio::test]
    async fn test_unscripted_call_fails_loudly() {
        let mock = MockChannel::new();
        let err = mock
            .client()
            .unary::<_, proto::Empty>(
                method::SANDBOX_TERMINATE,
                &proto::SandboxTerminateRequest::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some(tonic::Code::Unimplemented));
        assert!(err.to_string().contains("unexpected call to SandboxTerminate"));
        assert!(!matches!(err, Error::NotFound(_)));
    }

    #[test]
    #[should_panic(expected = "unexpected call to SandboxTerminate")]
    fn test_assert_exhausted_reports_unexpected_calls() {
        let mock = MockChannel::new();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let _ = runtime.block_on(mock.invoke(method::SANDBOX_TERMINATE, Bytes::new(), None));
        mock.assert_exhausted();
    }

    #[test]
    #[should_panic(expected = "1 unused handler(s) for SandboxWait")]
    fn test_assert_exhausted_reports_unused_handlers() {
        let mock = MockChannel::new();
        mock.handle_unary::<proto::SandboxWaitRequest, proto::SandboxWaitResponse>(
            method::SANDBOX_WAIT,
            |_| Ok(proto::SandboxWaitResponse::default()),
        );
        mock.assert_exhausted();
    }
}
