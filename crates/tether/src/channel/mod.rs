//! The RPC channel seam.
//!
//! Everything above this module speaks typed prost messages; a channel only
//! moves encoded request bytes to a named control-plane method and returns the
//! encoded response. [`GrpcChannel`] is the production transport and
//! [`MockChannel`](crate::testing::MockChannel) the scripted test double.

mod grpc;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tonic::Status;

pub use grpc::GrpcChannel;

/// Unary request/response transport to the control plane.
#[async_trait]
pub trait RpcChannel: Send + Sync + Debug {
    /// Send `request` to `method` and return the encoded response.
    ///
    /// `deadline` is advisory for the transport; the caller enforces it
    /// independently.
    async fn invoke(
        &self,
        method: &'static str,
        request: Bytes,
        deadline: Option<Instant>,
    ) -> Result<Bytes, Status>;
}
