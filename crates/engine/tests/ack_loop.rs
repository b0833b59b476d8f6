// SPDX-License-Identifier: Apache-2.0

//! End-to-end ack routing: source → runner → sink → broadcast → source.

use parking_lot::Mutex;
use quanta_engine::Runner;
use quanta_kafka::{EmitFn, Error as SourceError, KafkaConfig, SourceAdapter};
use quanta_proto::{CheckpointToken, ConnectorAck, Frame};
use quanta_sink::SinkAdapter;
use quanta_sink::stdout::StdoutSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Source that emits one frame and waits for its acknowledgement to return.
struct OneShotSource {
    acked: Mutex<Vec<ConnectorAck>>,
    ack_seen: Notify,
}

impl OneShotSource {
    fn new() -> Arc<Self> {
        Arc::new(OneShotSource {
            acked: Mutex::new(Vec::new()),
            ack_seen: Notify::new(),
        })
    }
}

#[async_trait::async_trait]
impl SourceAdapter for OneShotSource {
    fn configure(&self, _config: KafkaConfig) -> Result<(), SourceError> {
        Ok(())
    }

    async fn run(&self, _cancel: CancellationToken, emit: EmitFn) -> Result<(), SourceError> {
        let notified = self.ack_seen.notified();
        let frame = Frame {
            key: Vec::new(),
            value: b"hello".to_vec(),
            headers: Default::default(),
            ts_unix_ms: 0,
            checkpoint: Some(CheckpointToken::kafka("t", 1, 42)),
        };
        emit(frame).await.map_err(|error| SourceError::Emit {
            error: error.to_string(),
        })?;

        tokio::time::timeout(Duration::from_secs(1), notified)
            .await
            .map_err(|_| SourceError::Emit {
                error: "ack never returned".to_owned(),
            })
    }

    fn on_ack(&self, ack: &ConnectorAck) {
        self.acked.lock().push(ack.clone());
        self.ack_seen.notify_one();
    }

    fn close(&self) {}
}

#[tokio::test]
async fn sink_ack_returns_to_the_source() {
    let source = OneShotSource::new();

    let sink = Arc::new(StdoutSink::default());
    sink.configure(serde_json::json!({ "ack_batch_size": 1 }))
        .unwrap();

    let mut runner = Runner::new();
    {
        let source = Arc::clone(&source);
        runner.subscribe_ack(Arc::new(move |ack| source.on_ack(ack)));
    }
    {
        let acks = runner.ack_broadcast();
        sink.bind_ack(Arc::new(move |token| acks.ack(&token)));
    }
    runner.set_source(Arc::clone(&source) as Arc<dyn SourceAdapter>);
    runner.add_sink(sink);

    let runner = Arc::new(runner);
    runner.run(CancellationToken::new()).await.unwrap();

    let acked = source.acked.lock();
    assert_eq!(acked.len(), 1);
    assert_eq!(
        acked[0].checkpoint,
        Some(CheckpointToken::kafka("t", 1, 42))
    );
}

/// Duplicate acks are broadcast verbatim; idempotence lives on the source
/// side, which here just records both.
#[tokio::test]
async fn duplicate_acks_are_delivered_to_the_subscriber() {
    let source = OneShotSource::new();
    let runner = Runner::new();
    {
        let source = Arc::clone(&source);
        runner.subscribe_ack(Arc::new(move |ack| source.on_ack(ack)));
    }

    let token = CheckpointToken::kafka("t", 0, 7);
    runner.ack(&token);
    runner.ack(&token);
    assert_eq!(source.acked.lock().len(), 2);
}
