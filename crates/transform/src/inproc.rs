// SPDX-License-Identifier: Apache-2.0

//! In-process transformer client.
//!
//! Adapts a transformer compiled into the engine to the uniform client
//! interface. Streaming has no in-process transport and fails with the stable
//! unsupported-operation error kind.

use crate::{Error, RequestStream, ResponseStream, TransformerClient};
use quanta_proto::{
    HealthResponse, MetadataResponse, TransformRequest, TransformResponse,
};
use std::sync::Arc;

/// A transformer living inside the engine process.
#[async_trait::async_trait]
pub trait Transformer: Send + Sync {
    /// Returns the transformer's self-description.
    async fn metadata(&self) -> Result<MetadataResponse, Error>;

    /// Probes the transformer's health.
    async fn health(&self) -> Result<HealthResponse, Error>;

    /// Applies the transformer to one request.
    async fn transform(&self, request: TransformRequest) -> Result<TransformResponse, Error>;
}

/// Client adapter over an in-process [`Transformer`].
pub struct InProcessClient {
    inner: Arc<dyn Transformer>,
}

impl InProcessClient {
    /// Wraps `inner` as a transformer client.
    pub fn new(inner: Arc<dyn Transformer>) -> Self {
        InProcessClient { inner }
    }
}

#[async_trait::async_trait]
impl TransformerClient for InProcessClient {
    async fn metadata(&self) -> Result<MetadataResponse, Error> {
        self.inner.metadata().await
    }

    async fn health(&self) -> Result<HealthResponse, Error> {
        self.inner.health().await
    }

    async fn transform(&self, request: TransformRequest) -> Result<TransformResponse, Error> {
        self.inner.transform(request).await
    }

    async fn transform_stream(&self, _requests: RequestStream) -> Result<ResponseStream, Error> {
        Err(Error::StreamingUnsupported)
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use quanta_proto::Status;

    struct Echo;

    #[async_trait::async_trait]
    impl Transformer for Echo {
        async fn metadata(&self) -> Result<MetadataResponse, Error> {
            Ok(MetadataResponse {
                name: "echo".to_owned(),
                version: "0.1.0".to_owned(),
                ..Default::default()
            })
        }

        async fn health(&self) -> Result<HealthResponse, Error> {
            Ok(HealthResponse {
                ok: true,
                details: "OK".to_owned(),
            })
        }

        async fn transform(&self, request: TransformRequest) -> Result<TransformResponse, Error> {
            Ok(TransformResponse {
                events: vec![quanta_proto::Event {
                    value: request.payload,
                    ..Default::default()
                }],
                status: Status::Ok as i32,
                error: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn delegates_to_the_wrapped_transformer() {
        let client = InProcessClient::new(Arc::new(Echo));
        assert_eq!(client.metadata().await.unwrap().name, "echo");
        assert!(client.health().await.unwrap().ok);

        let response = client
            .transform(TransformRequest {
                payload: b"hello".to_vec(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.events[0].value, b"hello");
    }

    #[tokio::test]
    async fn streaming_fails_with_the_stable_unsupported_kind() {
        let client = InProcessClient::new(Arc::new(Echo));
        let err = client
            .transform_stream(Box::pin(stream::empty()))
            .await
            .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let client = InProcessClient::new(Arc::new(Echo));
        client.close().await.unwrap();
        client.close().await.unwrap();
        // Still usable after close for the in-process variant.
        assert!(client.health().await.unwrap().ok);
    }
}
