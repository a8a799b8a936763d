//! gRPC transport over tonic

use std::fmt;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes};
use tokio::time::Instant;
use tonic::Status;
use tonic::client::Grpc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{AsciiMetadataValue, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, trace};

use super::RpcChannel;
use crate::config::ClientConfig;
use crate::error::{Error, Result};

const SERVICE: &str = "tether.client.v1.ControlPlane";

/// Control-plane channel backed by a tonic HTTP/2 connection.
#[derive(Clone)]
pub struct GrpcChannel {
    channel: Channel,
    credentials: Option<(AsciiMetadataValue, AsciiMetadataValue)>,
}

impl fmt::Debug for GrpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcChannel")
            .field("authenticated", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

impl GrpcChannel {
    /// Connect to the endpoint named in `config`.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let credentials = match (&config.token_id, &config.token_secret) {
            (Some(id), Some(secret)) => Some((metadata_value(id)?, metadata_value(secret)?)),
            (None, None) => None,
            _ => {
                return Err(Error::Config(
                    "token_id and token_secret must be set together".to_string(),
                ));
            }
        };

        let mut endpoint = Endpoint::from_shared(config.server_url.clone())
            .map_err(|e| Error::Config(format!("invalid server url {}: {e}", config.server_url)))?
            .connect_timeout(config.rpc_timeout);
        if config.server_url.starts_with("https://") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| Error::Config(format!("tls setup failed: {e}")))?;
        }

        let channel = endpoint.connect().await.map_err(|e| Error::Rpc {
            operation: format!("connect {}", config.server_url),
            status: Status::unavailable(e.to_string()),
        })?;
        debug!(server_url = %config.server_url, "connected to control plane");

        Ok(Self {
            channel,
            credentials,
        })
    }
}

fn metadata_value(value: &str) -> Result<AsciiMetadataValue> {
    MetadataValue::try_from(value)
        .map_err(|e| Error::Config(format!("credential is not valid header text: {e}")))
}

#[async_trait]
impl RpcChannel for GrpcChannel {
    async fn invoke(
        &self,
        method: &'static str,
        request: Bytes,
        deadline: Option<Instant>,
    ) -> Result<Bytes, Status> {
        let path = PathAndQuery::try_from(format!("/{SERVICE}/{method}"))
            .map_err(|e| Status::internal(format!("invalid method path: {e}")))?;

        let mut request = tonic::Request::new(request);
        if let Some(deadline) = deadline {
            request.set_timeout(deadline.saturating_duration_since(Instant::now()));
        }
        let metadata = request.metadata_mut();
        metadata.insert(
            "x-tether-client-version",
            MetadataValue::from_static(env!("CARGO_PKG_VERSION")),
        );
        if let Some((id, secret)) = &self.credentials {
            metadata.insert("x-tether-token-id", id.clone());
            metadata.insert("x-tether-token-secret", secret.clone());
        }

        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("channel not ready: {e}")))?;
        trace!(method, "sending request");
        let response = grpc.unary(request, path, RawCodec).await?;
        Ok(response.into_inner())
    }
}

/// Passes already-encoded message bytes straight through.
#[derive(Debug, Clone, Copy, Default)]
struct RawCodec;

impl Codec for RawCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = RawCodec;
    type Decoder = RawCodec;

    fn encoder(&mut self) -> Self::Encoder {
        RawCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawCodec
    }
}

impl Encoder for RawCodec {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Bytes, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for RawCodec {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Bytes>, Status> {
        let len = src.remaining();
        Ok(Some(src.copy_to_bytes(len)))
    }
}
