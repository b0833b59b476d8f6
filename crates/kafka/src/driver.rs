// SPDX-License-Identifier: Apache-2.0

//! Kafka source driver.
//!
//! One consumer task drives the whole claim set: it reserves a back-pressure
//! credit before reading a record, emits the record as a [`Frame`] into the
//! pipeline and then either resolves its checkpoint immediately (`auto` mode)
//! or parks the resolver until the matching acknowledgement returns from the
//! sink side (`e2e` mode). Acknowledgements arrive over a bounded channel so
//! the consumer task stays the single writer of the pending-resolver map.

use crate::backpressure::Controller;
use crate::commit::{CommitManager, CommitResolver};
use crate::config::{CommitMode, KafkaConfig, StartFrom};
use crate::error::Error;
use crate::{EmitFn, SourceAdapter};
use parking_lot::Mutex;
use quanta_proto::{CheckpointToken, ConnectorAck, Frame};
use rdkafka::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    CommitMode as KafkaCommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::message::{BorrowedMessage, Headers as _, Message};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DRIVER_NAME: &str = "rdkafka";

/// Identity of one consumed record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordId {
    topic: String,
    partition: i32,
    offset: i64,
}

type PendingMap = Arc<Mutex<HashMap<RecordId, CommitResolver<RecordId>>>>;

/// Consumer context clearing the pending-resolver map when partitions are
/// revoked; the broker re-delivers those records under the new assignment.
struct DriverContext {
    pending: PendingMap,
}

impl ClientContext for DriverContext {}

impl ConsumerContext for DriverContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        if matches!(rebalance, Rebalance::Revoke(_)) {
            let dropped = {
                let mut pending = self.pending.lock();
                let count = pending.len();
                pending.clear();
                count
            };
            if dropped > 0 {
                info!(count = dropped, "rebalance: cleared pending ack resolvers");
            }
        }
    }
}

struct Inner {
    config: KafkaConfig,
    mode: CommitMode,
    consumer: StreamConsumer<DriverContext>,
    bp: Arc<Controller>,
    cp: Arc<CommitManager<RecordId>>,
    pending: PendingMap,
    ack_tx: flume::Sender<RecordId>,
    ack_rx: flume::Receiver<RecordId>,
    // Highest resolved offset per (topic, partition), awaiting the next flush.
    marked: Mutex<HashMap<(String, i32), i64>>,
}

/// Source driver consuming from Kafka through an rdkafka stream consumer.
#[derive(Default)]
pub struct RdKafkaDriver {
    inner: OnceLock<Inner>,
}

impl RdKafkaDriver {
    async fn consume(
        &self,
        inner: &Inner,
        cancel: &CancellationToken,
        emit: &EmitFn,
    ) -> Result<(), Error> {
        loop {
            if !inner.bp.try_acquire(1) {
                // No budget: do not read; drain acks until credits return.
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    ack = inner.ack_rx.recv_async() => {
                        if let Ok(rec) = ack {
                            self.handle_ack(inner, rec);
                        }
                    }
                }
                continue;
            }

            // One credit reserved for the next record.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        inner.bp.release(1);
                        return Ok(());
                    }
                    ack = inner.ack_rx.recv_async() => {
                        if let Ok(rec) = ack {
                            self.handle_ack(inner, rec);
                        }
                    }
                    msg = inner.consumer.recv() => {
                        match msg {
                            Ok(msg) => match self.process(inner, cancel, emit, &msg).await {
                                Ok(()) => {}
                                Err(Error::Cancelled) => return Ok(()),
                                Err(err) => return Err(err),
                            },
                            Err(err) => {
                                inner.bp.release(1);
                                return Err(err.into());
                            }
                        }
                        break;
                    }
                }
            }
        }
    }

    async fn process(
        &self,
        inner: &Inner,
        cancel: &CancellationToken,
        emit: &EmitFn,
        msg: &BorrowedMessage<'_>,
    ) -> Result<(), Error> {
        let rec = RecordId {
            topic: msg.topic().to_owned(),
            partition: msg.partition(),
            offset: msg.offset(),
        };

        let resolver = match inner.cp.track(cancel, rec.clone()).await {
            Ok(resolver) => resolver,
            Err(err) => {
                inner.bp.release(1);
                return Err(err);
            }
        };

        if let Err(error) = emit(frame_from(msg)).await {
            inner.bp.release(1);
            return Err(Error::Emit {
                error: error.to_string(),
            });
        }

        match inner.mode {
            CommitMode::Auto => {
                let (highest, due) = resolver.resolve();
                if let Some(highest) = &highest {
                    self.mark(inner, highest);
                }
                if due {
                    self.commit_marked(inner);
                }
                inner.bp.release(1);
            }
            CommitMode::E2e => {
                let _ = inner.pending.lock().insert(rec, resolver);
            }
        }
        Ok(())
    }

    fn handle_ack(&self, inner: &Inner, rec: RecordId) {
        let resolver = inner.pending.lock().remove(&rec);
        let Some(resolver) = resolver else {
            // Redundant ack for an already-released record.
            return;
        };
        let (highest, due) = resolver.resolve();
        if let Some(highest) = &highest {
            self.mark(inner, highest);
        }
        if due {
            self.commit_marked(inner);
        }
        inner.bp.release(1);
        debug!(
            topic = %rec.topic,
            partition = rec.partition,
            offset = rec.offset,
            "ack released"
        );
    }

    fn mark(&self, inner: &Inner, rec: &RecordId) {
        let mut marked = inner.marked.lock();
        let entry = marked
            .entry((rec.topic.clone(), rec.partition))
            .or_insert(rec.offset);
        *entry = (*entry).max(rec.offset);
    }

    fn commit_marked(&self, inner: &Inner) {
        let tpl = {
            let marked = inner.marked.lock();
            if marked.is_empty() {
                return;
            }
            let mut tpl = TopicPartitionList::new();
            for ((topic, partition), offset) in marked.iter() {
                if let Err(error) =
                    tpl.add_partition_offset(topic, *partition, Offset::Offset(offset + 1))
                {
                    warn!(%error, topic, partition, "skipping unrepresentable offset");
                }
            }
            tpl
        };
        if let Err(error) = inner.consumer.commit(&tpl, KafkaCommitMode::Async) {
            warn!(%error, "offset commit failed");
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for RdKafkaDriver {
    fn configure(&self, config: KafkaConfig) -> Result<(), Error> {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let consumer: StreamConsumer<DriverContext> = client_config(&config)
            .create_with_context(DriverContext {
                pending: Arc::clone(&pending),
            })?;

        let capacity = config.backpressure.capacity;
        let (ack_tx, ack_rx) = flume::bounded(capacity as usize);
        let inner = Inner {
            mode: config.commit_mode,
            bp: Controller::new(capacity, capacity / 10, config.backpressure.check_interval),
            cp: CommitManager::new(capacity, config.checkpoint.commit_interval),
            pending,
            ack_tx,
            ack_rx,
            marked: Mutex::new(HashMap::new()),
            consumer,
            config,
        };
        self.inner.set(inner).map_err(|_| Error::AlreadyConfigured {
            driver: DRIVER_NAME,
        })
    }

    async fn run(&self, cancel: CancellationToken, emit: EmitFn) -> Result<(), Error> {
        let inner = self.inner.get().ok_or(Error::NotConfigured {
            driver: DRIVER_NAME,
        })?;
        let topics: Vec<&str> = inner.config.topics.iter().map(String::as_str).collect();
        inner.consumer.subscribe(&topics)?;
        info!(
            topics = ?inner.config.topics,
            group = %inner.config.group_id,
            mode = ?inner.mode,
            "kafka driver consuming"
        );

        let result = self.consume(inner, &cancel, &emit).await;
        // Flush the latest safe offsets on the way out, best effort.
        self.commit_marked(inner);
        result
    }

    fn on_ack(&self, ack: &ConnectorAck) {
        let Some(inner) = self.inner.get() else {
            return;
        };
        let Some(kafka) = ack.checkpoint.as_ref().and_then(CheckpointToken::as_kafka) else {
            return;
        };
        enqueue_ack(
            &inner.ack_tx,
            &inner.ack_rx,
            RecordId {
                topic: kafka.topic.clone(),
                partition: kafka.partition,
                offset: kafka.offset,
            },
        );
    }

    fn close(&self) {
        if let Some(inner) = self.inner.get() {
            inner.consumer.unsubscribe();
            inner.bp.close();
        }
    }
}

/// Enqueues an ack identity, dropping the oldest pending ack when the channel
/// is full. Losing an ack only delays release until redelivery or refill, so
/// this is a recovery path, not a normal operating mode.
fn enqueue_ack(tx: &flume::Sender<RecordId>, rx: &flume::Receiver<RecordId>, rec: RecordId) {
    match tx.try_send(rec) {
        Ok(()) => {}
        Err(flume::TrySendError::Full(rec)) => {
            let _ = rx.try_recv();
            if let Err(
                flume::TrySendError::Full(rec) | flume::TrySendError::Disconnected(rec),
            ) = tx.try_send(rec)
            {
                warn!(
                    topic = %rec.topic,
                    partition = rec.partition,
                    offset = rec.offset,
                    "ack channel full; dropping ack"
                );
            }
        }
        Err(flume::TrySendError::Disconnected(_)) => {}
    }
}

fn frame_from<M: Message>(msg: &M) -> Frame {
    let mut headers = HashMap::new();
    if let Some(raw) = msg.headers() {
        for header in raw.iter() {
            let _ = headers.insert(
                header.key.to_owned(),
                header.value.map(<[u8]>::to_vec).unwrap_or_default(),
            );
        }
    }
    Frame {
        key: msg.key().map(<[u8]>::to_vec).unwrap_or_default(),
        value: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
        ts_unix_ms: msg.timestamp().to_millis().unwrap_or(0),
        checkpoint: Some(CheckpointToken::kafka(
            msg.topic(),
            msg.partition(),
            msg.offset(),
        )),
    }
}

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut cc = ClientConfig::new();
    let _ = cc
        .set("bootstrap.servers", config.brokers.join(","))
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "false")
        .set("enable.partition.eof", "false")
        .set(
            "auto.offset.reset",
            match config.start_from {
                StartFrom::Oldest => "earliest",
                StartFrom::Newest => "latest",
            },
        );
    if !config.version.is_empty() {
        let _ = cc.set("broker.version.fallback", &config.version);
    }
    let sasl = !config.sasl_user.is_empty();
    match (config.tls_enabled, sasl) {
        (true, true) => {
            let _ = cc.set("security.protocol", "sasl_ssl");
        }
        (true, false) => {
            let _ = cc.set("security.protocol", "ssl");
        }
        (false, true) => {
            let _ = cc.set("security.protocol", "sasl_plaintext");
        }
        (false, false) => {}
    }
    if sasl {
        let _ = cc
            .set("sasl.mechanisms", "PLAIN")
            .set("sasl.username", &config.sasl_user)
            .set("sasl.password", &config.sasl_pass);
    }
    cc
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::{OwnedHeaders, OwnedMessage, Timestamp};

    #[test]
    fn ack_overflow_drops_the_oldest() {
        let (tx, rx) = flume::bounded(2);
        let rec = |offset| RecordId {
            topic: "t".to_owned(),
            partition: 0,
            offset,
        };

        enqueue_ack(&tx, &rx, rec(1));
        enqueue_ack(&tx, &rx, rec(2));
        enqueue_ack(&tx, &rx, rec(3));

        let drained: Vec<i64> = rx.try_iter().map(|r| r.offset).collect();
        assert_eq!(drained, vec![2, 3], "oldest pending ack must be dropped");
    }

    #[test]
    fn frame_carries_the_record_identity() {
        let headers = OwnedHeaders::new().insert(rdkafka::message::Header {
            key: "trace",
            value: Some(b"abc".as_slice()),
        });
        let msg = OwnedMessage::new(
            Some(b"hello".to_vec()),
            Some(b"k1".to_vec()),
            "events".to_owned(),
            Timestamp::CreateTime(1_700_000_000_000),
            3,
            42,
            Some(headers),
        );

        let frame = frame_from(&msg);
        assert_eq!(frame.value, b"hello");
        assert_eq!(frame.key, b"k1");
        assert_eq!(frame.ts_unix_ms, 1_700_000_000_000);
        assert_eq!(frame.headers.get("trace").map(Vec::as_slice), Some(b"abc".as_slice()));
        let kafka = frame.checkpoint.as_ref().unwrap().as_kafka().unwrap();
        assert_eq!(
            (kafka.topic.as_str(), kafka.partition, kafka.offset),
            ("events", 3, 42)
        );
    }

    #[test]
    fn tombstone_records_produce_empty_payloads() {
        let msg = OwnedMessage::new(
            None,
            None,
            "events".to_owned(),
            Timestamp::NotAvailable,
            0,
            7,
            None,
        );
        let frame = frame_from(&msg);
        assert!(frame.value.is_empty());
        assert!(frame.key.is_empty());
        assert_eq!(frame.ts_unix_ms, 0);
    }

    #[test]
    fn client_config_maps_security_settings() {
        let mut config = KafkaConfig::default();
        config.brokers = vec!["b1:9092".to_owned(), "b2:9092".to_owned()];
        config.group_id = "g".to_owned();
        config.tls_enabled = true;
        config.sasl_user = "user".to_owned();
        config.sasl_pass = "pass".to_owned();
        config.start_from = StartFrom::Oldest;

        let cc = client_config(&config);
        assert_eq!(cc.get("bootstrap.servers"), Some("b1:9092,b2:9092"));
        assert_eq!(cc.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(cc.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(cc.get("enable.auto.commit"), Some("false"));
    }
}
