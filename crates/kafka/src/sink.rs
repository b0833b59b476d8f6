// SPDX-License-Identifier: Apache-2.0

//! Kafka producer sink.
//!
//! Writes frame key/value pairs to a single topic. The producer's delivery
//! report is awaited per push, so a push error surfaces to the router before
//! further frames are distributed. This sink does not emit acknowledgements;
//! pair it with an ack-aware sink when running in e2e commit mode.

use quanta_proto::Frame;
use quanta_sink::{Error as SinkError, SinkAdapter};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

const SINK_NAME: &str = "kafka";

/// Configuration of the Kafka producer sink.
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaSinkConfig {
    /// Bootstrap broker addresses.
    pub brokers: Vec<String>,
    /// Topic every frame is produced to.
    pub topic: String,
    /// Producer `acks` setting: 0, 1 or -1 (all).
    #[serde(default = "default_required_acks")]
    pub required_acks: i16,
}

fn default_required_acks() -> i16 {
    -1
}

struct ProducerState {
    producer: FutureProducer,
    topic: String,
}

/// Sink producing frames back into Kafka.
#[derive(Default)]
pub struct KafkaSinkDriver {
    state: OnceLock<ProducerState>,
}

#[async_trait::async_trait]
impl SinkAdapter for KafkaSinkDriver {
    fn configure(&self, options: serde_json::Value) -> Result<(), SinkError> {
        let config: KafkaSinkConfig =
            serde_json::from_value(options).map_err(|error| SinkError::Configuration {
                sink: SINK_NAME,
                error: error.to_string(),
            })?;

        let acks = match config.required_acks {
            -1 => "all".to_owned(),
            n => n.to_string(),
        };
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("acks", acks)
            .create()
            .map_err(|error| SinkError::Configuration {
                sink: SINK_NAME,
                error: error.to_string(),
            })?;

        self.state
            .set(ProducerState {
                producer,
                topic: config.topic,
            })
            .map_err(|_| SinkError::Configuration {
                sink: SINK_NAME,
                error: "sink is already configured".to_owned(),
            })
    }

    async fn push(&self, frame: &Frame) -> Result<(), SinkError> {
        let state = self.state.get().ok_or(SinkError::Configuration {
            sink: SINK_NAME,
            error: "sink is not configured".to_owned(),
        })?;

        let record = FutureRecord::to(&state.topic)
            .key(&frame.key)
            .payload(&frame.value);
        state
            .producer
            .send(record, Timeout::Never)
            .await
            .map_err(|(error, _)| SinkError::Push {
                sink: SINK_NAME,
                error: error.to_string(),
            })?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        if let Some(state) = self.state.get() {
            state
                .producer
                .flush(Timeout::After(Duration::from_secs(5)))
                .map_err(|error| SinkError::Push {
                    sink: SINK_NAME,
                    error: error.to_string(),
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_requires_brokers_and_topic() {
        let sink = KafkaSinkDriver::default();
        let err = sink
            .configure(serde_json::json!({ "topic": "out" }))
            .unwrap_err();
        assert!(matches!(err, SinkError::Configuration { .. }));
    }

    #[tokio::test]
    async fn push_before_configure_is_rejected() {
        let sink = KafkaSinkDriver::default();
        let frame = Frame::default();
        assert!(matches!(
            sink.push(&frame).await,
            Err(SinkError::Configuration { .. })
        ));
    }
}
