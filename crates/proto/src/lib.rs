// SPDX-License-Identifier: Apache-2.0

//! Wire model for the `quanta.v1` protocol.
//!
//! The messages below are the protocol surface shared by the engine, the
//! transformer plugins and the sinks: [`Frame`] is one record in motion,
//! [`CheckpointToken`] identifies its source position, [`ConnectorAck`] closes
//! the loop from sink back to source, and the `Transform*` messages form the
//! request/response contract of the `quanta.v1.TransformService` RPC.
//!
//! Message and tag layout is maintained by hand in the shape `prost-build`
//! would emit, which keeps the crate free of a build-time protoc dependency
//! while staying wire compatible with independently generated plugin stubs.

use std::collections::HashMap;

/// One record in motion between source, transformers and sinks.
///
/// A frame's checkpoint token is set once by the source and never replaced:
/// frames derived from this frame by a transformer stage carry the same token
/// so upstream commit granularity is preserved.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Frame {
    /// Opaque record key.
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    /// Opaque record value.
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
    /// Record headers, name to raw value.
    #[prost(map = "string, bytes", tag = "3")]
    pub headers: HashMap<String, Vec<u8>>,
    /// Origin timestamp in milliseconds since the Unix epoch.
    #[prost(int64, tag = "4")]
    pub ts_unix_ms: i64,
    /// Source position of the record this frame was read from.
    #[prost(message, optional, tag = "5")]
    pub checkpoint: Option<CheckpointToken>,
}

/// Identity of a record's source position.
///
/// Tokens are compared by the value of their variant; multiple acks carrying
/// the same token must have the same effect as one.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckpointToken {
    /// The concrete position kind.
    #[prost(oneof = "checkpoint_token::Kind", tags = "1")]
    pub kind: Option<checkpoint_token::Kind>,
}

/// Nested types for [`CheckpointToken`].
pub mod checkpoint_token {
    /// The concrete position kind of a checkpoint token.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        /// A Kafka (topic, partition, offset) triple.
        #[prost(message, tag = "1")]
        Kafka(super::KafkaOffset),
    }
}

/// A Kafka source position.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KafkaOffset {
    /// Topic the record was read from.
    #[prost(string, tag = "1")]
    pub topic: String,
    /// Partition within the topic.
    #[prost(int32, tag = "2")]
    pub partition: i32,
    /// Offset within the partition.
    #[prost(int64, tag = "3")]
    pub offset: i64,
}

/// Acknowledgement emitted by a sink once a frame is durably processed.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectorAck {
    /// The source position being acknowledged.
    #[prost(message, optional, tag = "1")]
    pub checkpoint: Option<CheckpointToken>,
}

/// Request carried to a transformer stage.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransformRequest {
    /// Record payload handed to the transformer.
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
    /// Metadata derived from the record being transformed.
    #[prost(message, optional, tag = "2")]
    pub metadata: Option<EventMetadata>,
    /// Name of the stage issuing the request.
    #[prost(string, tag = "3")]
    pub stage: String,
}

/// Response returned by a transformer stage.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransformResponse {
    /// Zero or more output events produced from the input.
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<Event>,
    /// Outcome of the transformation.
    #[prost(enumeration = "Status", tag = "2")]
    pub status: i32,
    /// Optional error detail when `status` is `ERROR` or `RETRY`.
    #[prost(string, tag = "3")]
    pub error: String,
}

/// One output record produced by a transformer.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    /// Optional transformer-assigned identifier.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Output value bytes.
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
    /// Optional event metadata.
    #[prost(message, optional, tag = "3")]
    pub metadata: Option<EventMetadata>,
}

/// Metadata attached to transform requests and output events.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EventMetadata {
    /// Timestamp in milliseconds since the Unix epoch; zero means unset.
    #[prost(int64, tag = "1")]
    pub timestamp_ms: i64,
    /// Record headers, name to raw value.
    #[prost(map = "string, bytes", tag = "2")]
    pub headers: HashMap<String, Vec<u8>>,
    /// Source partition rendered as a string.
    #[prost(string, tag = "3")]
    pub source_partition: String,
    /// Source offset rendered as a string.
    #[prost(string, tag = "4")]
    pub source_offset: String,
    /// Free-form string attributes (e.g. `source.topic`).
    #[prost(map = "string, string", tag = "5")]
    pub attributes: HashMap<String, String>,
}

/// Outcome of a transformer invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Status {
    /// Forward the returned events downstream.
    Ok = 0,
    /// Consume the input without emitting anything; its token is acked.
    Drop = 1,
    /// The transformer failed; the call is retried per stage policy.
    Error = 2,
    /// The transformer asks for a retry; treated like `Error` by the router.
    Retry = 3,
}

/// Request for transformer self-description.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct MetadataRequest {}

/// Transformer self-description.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetadataResponse {
    /// Transformer name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Transformer version string.
    #[prost(string, tag = "2")]
    pub version: String,
    /// Protocol version the transformer speaks.
    #[prost(message, optional, tag = "3")]
    pub protocol_version: Option<PluginVersion>,
    /// Capability flags, name to value.
    #[prost(map = "string, string", tag = "4")]
    pub capabilities: HashMap<String, String>,
}

/// Semantic protocol version of a transformer plugin.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PluginVersion {
    /// Major version.
    #[prost(uint32, tag = "1")]
    pub major: u32,
    /// Minor version.
    #[prost(uint32, tag = "2")]
    pub minor: u32,
    /// Patch version.
    #[prost(uint32, tag = "3")]
    pub patch: u32,
}

/// Transformer health probe request.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct HealthRequest {}

/// Transformer health probe response.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthResponse {
    /// Whether the transformer considers itself healthy.
    #[prost(bool, tag = "1")]
    pub ok: bool,
    /// Optional human-readable detail.
    #[prost(string, tag = "2")]
    pub details: String,
}

/// Method paths of the `quanta.v1.TransformService`.
pub mod transform_service {
    /// Fully qualified service name.
    pub const SERVICE_NAME: &str = "quanta.v1.TransformService";
    /// Unary `Metadata` method path.
    pub const METADATA_PATH: &str = "/quanta.v1.TransformService/Metadata";
    /// Unary `Health` method path.
    pub const HEALTH_PATH: &str = "/quanta.v1.TransformService/Health";
    /// Unary `Transform` method path.
    pub const TRANSFORM_PATH: &str = "/quanta.v1.TransformService/Transform";
    /// Bidirectional `TransformStream` method path.
    pub const TRANSFORM_STREAM_PATH: &str = "/quanta.v1.TransformService/TransformStream";
}

impl CheckpointToken {
    /// Builds a token for a Kafka (topic, partition, offset) position.
    pub fn kafka(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        CheckpointToken {
            kind: Some(checkpoint_token::Kind::Kafka(KafkaOffset {
                topic: topic.into(),
                partition,
                offset,
            })),
        }
    }

    /// Returns the Kafka position if this token carries one.
    #[must_use]
    pub fn as_kafka(&self) -> Option<&KafkaOffset> {
        match &self.kind {
            Some(checkpoint_token::Kind::Kafka(offset)) => Some(offset),
            None => None,
        }
    }
}
