// SPDX-License-Identifier: Apache-2.0

//! Stdout reference sink.
//!
//! Logs every frame it receives and batches acknowledgements: tokens queue up
//! until the batch size is reached or a one-shot flush timer fires, whichever
//! comes first. The timer is armed only while no timer is scheduled, so bursty
//! pushes cannot pile up timer tasks.

use crate::{AckFn, Error, SinkAdapter};
use parking_lot::Mutex;
use quanta_proto::{CheckpointToken, Frame};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

const SINK_NAME: &str = "stdout";
const DEFAULT_VALUE_MAX_BYTES: usize = 120;

/// Configuration of the stdout sink.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StdoutConfig {
    /// Artificial delay before each push, in milliseconds.
    pub delay_ms: u64,
    /// Prepend a global sequence number to each record.
    pub print_counter: bool,
    /// Flush pending acks after this many frames; zero disables.
    pub ack_batch_size: usize,
    /// Flush pending acks after this many milliseconds; zero disables.
    pub ack_flush_ms: u64,
    /// Include the (truncated) record value in the output.
    pub print_value: bool,
    /// Maximum number of value bytes printed; zero means the default of 120.
    pub value_max_bytes: usize,
}

struct FlushState {
    pending: Vec<CheckpointToken>,
    timer: Option<tokio::task::JoinHandle<()>>,
}

/// Sink that logs frames and acks them in batches.
pub struct StdoutSink {
    config: Mutex<StdoutConfig>,
    ack: Mutex<Option<AckFn>>,
    state: Arc<Mutex<FlushState>>,
    seq: AtomicU64,
}

impl Default for StdoutSink {
    fn default() -> Self {
        StdoutSink {
            config: Mutex::new(StdoutConfig::default()),
            ack: Mutex::new(None),
            state: Arc::new(Mutex::new(FlushState {
                pending: Vec::new(),
                timer: None,
            })),
            seq: AtomicU64::new(0),
        }
    }
}

impl StdoutSink {
    /// Flushes every pending token through `ack` and disarms the timer.
    fn flush_locked(state: &mut FlushState, ack: &AckFn) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        for token in state.pending.drain(..) {
            ack(token);
        }
    }
}

#[async_trait::async_trait]
impl SinkAdapter for StdoutSink {
    fn configure(&self, options: serde_json::Value) -> Result<(), Error> {
        let config: StdoutConfig = serde_json::from_value(options).map_err(|error| {
            Error::Configuration {
                sink: SINK_NAME,
                error: error.to_string(),
            }
        })?;
        *self.config.lock() = config;
        Ok(())
    }

    async fn push(&self, frame: &Frame) -> Result<(), Error> {
        let config = *self.config.lock();
        if config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.delay_ms)).await;
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let kafka = frame.checkpoint.as_ref().and_then(CheckpointToken::as_kafka);
        let (topic, partition, offset) = kafka
            .map(|k| (k.topic.as_str(), k.partition, k.offset))
            .unwrap_or(("", 0, 0));
        let value = config.print_value.then(|| {
            let max = if config.value_max_bytes == 0 {
                DEFAULT_VALUE_MAX_BYTES
            } else {
                config.value_max_bytes
            };
            truncate_value(&frame.value, max)
        });
        match (config.print_counter, value) {
            (true, Some(value)) => {
                info!(target: "quanta::sink::stdout", seq, topic, partition, offset, %value, "frame");
            }
            (true, None) => {
                info!(target: "quanta::sink::stdout", seq, topic, partition, offset, "frame");
            }
            (false, Some(value)) => {
                info!(target: "quanta::sink::stdout", topic, partition, offset, %value, "frame");
            }
            (false, None) => {
                info!(target: "quanta::sink::stdout", topic, partition, offset, "frame");
            }
        }

        let ack = self.ack.lock().clone();
        let Some(ack) = ack else {
            return Ok(());
        };
        let Some(token) = frame.checkpoint.clone() else {
            return Ok(());
        };

        let mut state = self.state.lock();
        state.pending.push(token);

        if config.ack_batch_size > 0 && state.pending.len() >= config.ack_batch_size {
            Self::flush_locked(&mut state, &ack);
        } else if config.ack_flush_ms > 0 && state.timer.is_none() {
            let shared = Arc::clone(&self.state);
            let flush_after = Duration::from_millis(config.ack_flush_ms);
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(flush_after).await;
                let mut state = shared.lock();
                Self::flush_locked(&mut state, &ack);
            }));
        }
        Ok(())
    }

    fn bind_ack(&self, ack: AckFn) {
        *self.ack.lock() = Some(ack);
    }

    async fn close(&self) -> Result<(), Error> {
        let ack = self.ack.lock().clone();
        if let Some(ack) = ack {
            let mut state = self.state.lock();
            Self::flush_locked(&mut state, &ack);
        }
        Ok(())
    }
}

fn truncate_value(value: &[u8], max: usize) -> String {
    let cut = value.len().min(max);
    let mut rendered = String::from_utf8_lossy(&value[..cut]).into_owned();
    if cut < value.len() {
        rendered.push_str("...");
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(offset: i64) -> Frame {
        Frame {
            key: Vec::new(),
            value: b"hello".to_vec(),
            headers: Default::default(),
            ts_unix_ms: 0,
            checkpoint: Some(CheckpointToken::kafka("t", 1, offset)),
        }
    }

    fn counting_ack() -> (AckFn, Arc<Mutex<Vec<CheckpointToken>>>) {
        let acked = Arc::new(Mutex::new(Vec::new()));
        let sink_acked = Arc::clone(&acked);
        let ack: AckFn = Arc::new(move |token| sink_acked.lock().push(token));
        (ack, acked)
    }

    #[tokio::test]
    async fn batch_size_triggers_flush() {
        let sink = StdoutSink::default();
        sink.configure(serde_json::json!({ "ack_batch_size": 2 })).unwrap();
        let (ack, acked) = counting_ack();
        sink.bind_ack(ack);

        sink.push(&frame(1)).await.unwrap();
        assert!(acked.lock().is_empty());
        sink.push(&frame(2)).await.unwrap();
        assert_eq!(acked.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_timer_fires_once_and_rearms_on_next_push() {
        let sink = StdoutSink::default();
        sink.configure(serde_json::json!({ "ack_flush_ms": 50 })).unwrap();
        let (ack, acked) = counting_ack();
        sink.bind_ack(ack);

        sink.push(&frame(1)).await.unwrap();
        sink.push(&frame(2)).await.unwrap();
        assert!(acked.lock().is_empty());

        // Let the timer task register its sleep before moving the clock.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(acked.lock().len(), 2);

        sink.push(&frame(3)).await.unwrap();
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(acked.lock().len(), 3);
    }

    #[tokio::test]
    async fn close_flushes_whatever_is_pending() {
        let sink = StdoutSink::default();
        sink.configure(serde_json::json!({ "ack_batch_size": 100 })).unwrap();
        let (ack, acked) = counting_ack();
        sink.bind_ack(ack);

        sink.push(&frame(1)).await.unwrap();
        assert!(acked.lock().is_empty());
        sink.close().await.unwrap();
        assert_eq!(acked.lock().len(), 1);
    }

    #[tokio::test]
    async fn unbound_sink_never_queues_tokens() {
        let sink = StdoutSink::default();
        sink.configure(serde_json::json!({ "ack_batch_size": 1 })).unwrap();
        sink.push(&frame(1)).await.unwrap();
        assert!(sink.state.lock().pending.is_empty());
    }

    #[test]
    fn values_are_truncated_at_the_byte_budget() {
        assert_eq!(truncate_value(b"hello", 120), "hello");
        assert_eq!(truncate_value(b"hello world", 5), "hello...");
        let long = vec![b'a'; 200];
        let rendered = truncate_value(&long, DEFAULT_VALUE_MAX_BYTES);
        assert_eq!(rendered.len(), DEFAULT_VALUE_MAX_BYTES + 3);
    }
}
