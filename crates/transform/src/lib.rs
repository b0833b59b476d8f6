// SPDX-License-Identifier: Apache-2.0

//! Transformer plugin clients.
//!
//! A [`TransformerClient`] is the engine's uniform call site for one
//! transformer, whether it lives behind a gRPC boundary or inside the engine
//! process. The router holds one client per stage and does not care which
//! transport backs it.

use futures::stream::BoxStream;
use quanta_proto::{
    HealthResponse, MetadataResponse, TransformRequest, TransformResponse,
};

pub mod grpc;
pub mod inproc;

pub use grpc::GrpcClient;
pub use inproc::{InProcessClient, Transformer};

/// All errors that can occur when talking to a transformer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The transformer endpoint could not be dialled.
    #[error("failed to connect to transformer at `{address}`: {error}")]
    Connect {
        /// The dial address.
        address: String,
        /// The underlying transport error.
        error: tonic::transport::Error,
    },

    /// A call failed in transit or was rejected by the transformer.
    #[error("transformer call failed: {0}")]
    Status(#[from] tonic::Status),

    /// A call exceeded its per-stage timeout.
    #[error("transformer call exceeded its {0:?} timeout")]
    Deadline(std::time::Duration),

    /// The client does not support streaming.
    #[error("streaming is not supported by this transformer client")]
    StreamingUnsupported,
}

impl Error {
    /// Whether this error is the stable unsupported-operation kind.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::StreamingUnsupported)
    }
}

/// Outbound request stream of a bidirectional transform call.
pub type RequestStream = BoxStream<'static, TransformRequest>;

/// Inbound response stream of a bidirectional transform call.
pub type ResponseStream = tonic::Streaming<TransformResponse>;

/// Uniform call site for one transformer.
#[async_trait::async_trait]
pub trait TransformerClient: Send + Sync {
    /// Fetches the transformer's self-description.
    async fn metadata(&self) -> Result<MetadataResponse, Error>;

    /// Probes the transformer's health.
    async fn health(&self) -> Result<HealthResponse, Error>;

    /// Applies the transformer to one request.
    async fn transform(&self, request: TransformRequest) -> Result<TransformResponse, Error>;

    /// Opens a bidirectional transform stream. Clients without a streaming
    /// transport fail with [`Error::StreamingUnsupported`].
    async fn transform_stream(&self, requests: RequestStream) -> Result<ResponseStream, Error>;

    /// Releases transport resources. Idempotent.
    async fn close(&self) -> Result<(), Error>;
}
