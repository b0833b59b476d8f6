// SPDX-License-Identifier: Apache-2.0

//! gRPC transformer client.
//!
//! Calls are assembled directly on a [`tonic::client::Grpc`] handle with a
//! prost codec and static method paths, so the crate carries no generated
//! stubs and no build-time protoc dependency. Each call clones the underlying
//! channel, which is cheap and keeps the client shareable without a lock.

use crate::{Error, RequestStream, ResponseStream, TransformerClient};
use http::uri::PathAndQuery;
use quanta_proto::transform_service::{
    HEALTH_PATH, METADATA_PATH, TRANSFORM_PATH, TRANSFORM_STREAM_PATH,
};
use quanta_proto::{
    HealthRequest, HealthResponse, MetadataRequest, MetadataResponse, TransformRequest,
    TransformResponse,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tonic::client::Grpc;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tonic_prost::ProstCodec;

/// Client for a transformer reached over gRPC.
pub struct GrpcClient {
    address: String,
    channel: Channel,
    closed: AtomicBool,
}

impl GrpcClient {
    /// Dials a transformer service at `address` (`host:port`, or a full URI).
    pub async fn connect(address: &str) -> Result<Self, Error> {
        let uri = if address.contains("://") {
            address.to_owned()
        } else {
            format!("http://{address}")
        };
        let endpoint = Endpoint::new(uri).map_err(|error| Error::Connect {
            address: address.to_owned(),
            error,
        })?;
        let channel = endpoint.connect().await.map_err(|error| Error::Connect {
            address: address.to_owned(),
            error,
        })?;
        Ok(GrpcClient {
            address: address.to_owned(),
            channel,
            closed: AtomicBool::new(false),
        })
    }

    /// The address this client was dialled with.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    fn grpc(&self) -> Result<Grpc<Channel>, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Status(Status::cancelled(
                "transformer client is closed",
            )));
        }
        Ok(Grpc::new(self.channel.clone()))
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, Error>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.grpc()?;
        grpc.ready()
            .await
            .map_err(|error| Status::unknown(format!("service was not ready: {error}")))?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(
                Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait::async_trait]
impl TransformerClient for GrpcClient {
    async fn metadata(&self) -> Result<MetadataResponse, Error> {
        self.unary(METADATA_PATH, MetadataRequest {}).await
    }

    async fn health(&self) -> Result<HealthResponse, Error> {
        self.unary(HEALTH_PATH, HealthRequest {}).await
    }

    async fn transform(&self, request: TransformRequest) -> Result<TransformResponse, Error> {
        self.unary(TRANSFORM_PATH, request).await
    }

    async fn transform_stream(&self, requests: RequestStream) -> Result<ResponseStream, Error> {
        let mut grpc = self.grpc()?;
        grpc.ready()
            .await
            .map_err(|error| Status::unknown(format!("service was not ready: {error}")))?;
        let codec: ProstCodec<TransformRequest, TransformResponse> = ProstCodec::default();
        let response = grpc
            .streaming(
                Request::new(requests),
                PathAndQuery::from_static(TRANSFORM_STREAM_PATH),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
