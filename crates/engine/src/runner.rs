// SPDX-License-Identifier: Apache-2.0

//! Pipeline router.
//!
//! The runner owns the ordered stage list, the sink list and the ack
//! subscriber list. Frames flow source → stages → sinks; acknowledgements
//! flow sinks → subscribers (the source driver among them). The runner keeps
//! no state between frames: all durability state lives on the source side.
//!
//! Per-stage policy: a transport failure or an `ERROR`/`RETRY` status is
//! retried up to the stage's attempt budget with a fixed backoff; exhaustion
//! drops the frame and acks its token so the pipeline never stalls on a
//! poisoned record. `DROP` consumes the input and acks immediately. A stage
//! returning `OK` with zero events also acks the input, otherwise its
//! back-pressure credit would leak in e2e mode.

use crate::error::Error;
use parking_lot::Mutex;
use quanta_kafka::{EmitFn, SourceAdapter};
use quanta_proto::{
    CheckpointToken, ConnectorAck, Event, EventMetadata, Frame, Status, TransformRequest,
    TransformResponse,
};
use quanta_sink::SinkAdapter;
use quanta_transform::{Error as TransformError, TransformerClient};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Callback invoked for every acknowledgement broadcast by the runner.
pub type AckFn = Arc<dyn Fn(&ConnectorAck) + Send + Sync>;

/// Fan-out point for acknowledgements, shared between the runner and the
/// sinks bound to it.
///
/// Subscribers are invoked under a snapshot of the list (take the lock, copy,
/// release, iterate), so a subscriber may itself subscribe without deadlock.
#[derive(Clone, Default)]
pub struct AckBroadcast {
    subs: Arc<Mutex<Vec<AckFn>>>,
}

impl AckBroadcast {
    /// Subscribes `subscriber` to every acknowledgement.
    pub fn subscribe(&self, subscriber: AckFn) {
        self.subs.lock().push(subscriber);
    }

    /// Broadcasts an acknowledgement for `token` to every subscriber.
    pub fn ack(&self, token: &CheckpointToken) {
        let ack = ConnectorAck {
            checkpoint: Some(token.clone()),
        };
        let subscribers: Vec<AckFn> = self.subs.lock().clone();
        for subscriber in subscribers {
            subscriber(&ack);
        }
    }
}

/// One transformer invocation site with its retry and timeout policy.
pub struct Stage {
    /// Stage name, carried in every request.
    pub name: String,
    /// The transformer client backing this stage.
    pub client: Arc<dyn TransformerClient>,
    /// Per-call timeout; zero disables it.
    pub timeout: Duration,
    /// Number of retries after the initial attempt.
    pub attempts: u32,
    /// Sleep between attempts.
    pub backoff: Duration,
}

/// The pipeline router: source → stages → sinks, acks back.
#[derive(Default)]
pub struct Runner {
    source: Option<Arc<dyn SourceAdapter>>,
    stages: Vec<Stage>,
    sinks: Vec<Arc<dyn SinkAdapter>>,
    acks: AckBroadcast,
    cancel: OnceLock<CancellationToken>,
}

impl Runner {
    /// Creates an empty runner.
    #[must_use]
    pub fn new() -> Self {
        Runner::default()
    }

    /// Sets the record source.
    pub fn set_source(&mut self, source: Arc<dyn SourceAdapter>) {
        self.source = Some(source);
    }

    /// Appends a transformer stage; stages run in insertion order.
    pub fn add_stage(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    /// Appends a sink; sinks are pushed to in insertion order.
    pub fn add_sink(&mut self, sink: Arc<dyn SinkAdapter>) {
        self.sinks.push(sink);
    }

    /// Subscribes `subscriber` to every acknowledgement the runner broadcasts.
    pub fn subscribe_ack(&self, subscriber: AckFn) {
        self.acks.subscribe(subscriber);
    }

    /// Broadcasts an acknowledgement for `token` to every subscriber.
    pub fn ack(&self, token: &CheckpointToken) {
        self.acks.ack(token);
    }

    /// Returns a handle to the runner's ack fan-out, for binding into sinks.
    #[must_use]
    pub fn ack_broadcast(&self) -> AckBroadcast {
        self.acks.clone()
    }

    /// Number of configured transformer stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Number of configured sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Routes one frame through every stage and distributes the results to
    /// every sink. A sink error aborts distribution of the current frame.
    pub async fn push_frame(&self, frame: Frame) -> Result<(), Error> {
        let mut frames = vec![frame];
        for stage in &self.stages {
            let mut next = Vec::new();
            for input in std::mem::take(&mut frames) {
                let Some(response) = self.apply_stage(stage, &input).await else {
                    continue;
                };
                if response.events.is_empty() {
                    if response.status() == Status::Ok {
                        // OK with no output still consumes the input.
                        self.ack_input(&input);
                    }
                    continue;
                }
                next.extend(derive_frames(&input, response.events));
            }
            frames = next;
            if frames.is_empty() {
                return Ok(());
            }
        }

        for frame in &frames {
            for sink in &self.sinks {
                sink.push(frame).await?;
            }
        }
        Ok(())
    }

    /// Applies one stage to one input under the stage's retry/timeout policy.
    ///
    /// Returns `None` when the input was dropped at retry exhaustion (its
    /// token has been acked), `Some` otherwise. A `DROP` status comes back
    /// with its event list cleared and its token acked.
    async fn apply_stage(&self, stage: &Stage, input: &Frame) -> Option<TransformResponse> {
        let request = make_request(input, &stage.name);
        let mut attempt: u32 = 0;
        loop {
            let outcome = if stage.timeout > Duration::ZERO {
                match tokio::time::timeout(stage.timeout, stage.client.transform(request.clone()))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransformError::Deadline(stage.timeout)),
                }
            } else {
                stage.client.transform(request.clone()).await
            };

            match outcome {
                Ok(mut response) => match response.status() {
                    Status::Ok => return Some(response),
                    Status::Drop => {
                        debug!(stage = %stage.name, "transformer dropped frame");
                        self.ack_input(input);
                        response.events.clear();
                        return Some(response);
                    }
                    Status::Error | Status::Retry => {
                        if attempt < stage.attempts {
                            attempt += 1;
                            if self.backoff(stage.backoff).await {
                                self.ack_input(input);
                                return None;
                            }
                            continue;
                        }
                        warn!(
                            stage = %stage.name,
                            status = ?response.status(),
                            error = %response.error,
                            "retries exhausted; dropping frame"
                        );
                        self.ack_input(input);
                        return None;
                    }
                },
                Err(error) => {
                    if attempt < stage.attempts {
                        attempt += 1;
                        if self.backoff(stage.backoff).await {
                            self.ack_input(input);
                            return None;
                        }
                        continue;
                    }
                    warn!(
                        stage = %stage.name,
                        %error,
                        "retries exhausted; dropping frame"
                    );
                    self.ack_input(input);
                    return None;
                }
            }
        }
    }

    /// Sleeps for the stage backoff; returns whether the run was cancelled.
    async fn backoff(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return false;
        }
        match self.cancel.get() {
            Some(cancel) => {
                tokio::select! {
                    _ = cancel.cancelled() => true,
                    _ = tokio::time::sleep(duration) => false,
                }
            }
            None => {
                tokio::time::sleep(duration).await;
                false
            }
        }
    }

    fn ack_input(&self, frame: &Frame) {
        if let Some(token) = &frame.checkpoint {
            self.acks.ack(token);
        }
    }

    /// Drives the source until cancellation or a fatal source error.
    pub async fn run(self: &Arc<Self>, cancel: CancellationToken) -> Result<(), Error> {
        let source = self.source.clone().ok_or(Error::NoSource)?;
        let _ = self.cancel.set(cancel.clone());

        let runner = Arc::clone(self);
        let emit: EmitFn = Arc::new(move |frame| {
            let runner = Arc::clone(&runner);
            let future: quanta_kafka::EmitFuture = Box::pin(async move {
                runner.push_frame(frame).await.map_err(|error| {
                    Box::new(error) as Box<dyn std::error::Error + Send + Sync>
                })
            });
            future
        });
        source.run(cancel, emit).await.map_err(Error::from)
    }

    /// Closes the source, the stage clients and the sinks, in that order.
    pub async fn close(&self) -> Result<(), Error> {
        if let Some(source) = &self.source {
            source.close();
        }
        for stage in &self.stages {
            if let Err(error) = stage.client.close().await {
                warn!(stage = %stage.name, %error, "transformer client close failed");
            }
        }
        for sink in &self.sinks {
            sink.close().await?;
        }
        Ok(())
    }
}

/// Builds the stage request for one input frame.
fn make_request(frame: &Frame, stage: &str) -> TransformRequest {
    let kafka = frame.checkpoint.as_ref().and_then(CheckpointToken::as_kafka);
    let mut attributes = HashMap::new();
    if let Some(kafka) = kafka {
        let _ = attributes.insert("source.topic".to_owned(), kafka.topic.clone());
    }
    TransformRequest {
        payload: frame.value.clone(),
        metadata: Some(EventMetadata {
            timestamp_ms: frame.ts_unix_ms,
            headers: frame.headers.clone(),
            source_partition: kafka.map(|k| k.partition.to_string()).unwrap_or_default(),
            source_offset: kafka.map(|k| k.offset.to_string()).unwrap_or_default(),
            attributes,
        }),
        stage: stage.to_owned(),
    }
}

/// Derives one output frame per event.
///
/// Every derived frame carries the original frame's checkpoint token; ack
/// idempotence on the source side makes the first ack meaningful and the rest
/// no-ops, so fan-out keeps the one-credit-per-input accounting.
fn derive_frames(original: &Frame, events: Vec<Event>) -> Vec<Frame> {
    events
        .into_iter()
        .map(|event| {
            let metadata = event.metadata.unwrap_or_default();
            Frame {
                key: original.key.clone(),
                value: event.value,
                headers: if metadata.headers.is_empty() {
                    HashMap::new()
                } else {
                    metadata.headers
                },
                ts_unix_ms: if metadata.timestamp_ms > 0 {
                    metadata.timestamp_ms
                } else {
                    original.ts_unix_ms
                },
                checkpoint: original.checkpoint.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quanta_proto::{HealthResponse, MetadataResponse};
    use quanta_sink::AckFn as SinkAckFn;
    use quanta_transform::{InProcessClient, Transformer};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted transformer used to drive the router through its policies.
    struct Scripted {
        mode: &'static str,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mode: &'static str) -> Arc<Self> {
            Arc::new(Scripted {
                mode,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Transformer for Scripted {
        async fn metadata(&self) -> Result<MetadataResponse, TransformError> {
            Ok(MetadataResponse::default())
        }

        async fn health(&self) -> Result<HealthResponse, TransformError> {
            Ok(HealthResponse {
                ok: true,
                details: String::new(),
            })
        }

        async fn transform(
            &self,
            request: TransformRequest,
        ) -> Result<TransformResponse, TransformError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let echo = |payload: Vec<u8>| Event {
                value: payload,
                ..Default::default()
            };
            let response = match self.mode {
                "drop" => TransformResponse {
                    status: Status::Drop as i32,
                    ..Default::default()
                },
                "error-then-ok" if call == 1 => TransformResponse {
                    status: Status::Error as i32,
                    error: "first call fails".to_owned(),
                    ..Default::default()
                },
                "always-error" => TransformResponse {
                    status: Status::Error as i32,
                    error: "permanently broken".to_owned(),
                    ..Default::default()
                },
                "ok-no-events" => TransformResponse {
                    status: Status::Ok as i32,
                    ..Default::default()
                },
                "fanout2" => TransformResponse {
                    events: vec![echo(request.payload.clone()), echo(request.payload)],
                    status: Status::Ok as i32,
                    error: String::new(),
                },
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    TransformResponse {
                        events: vec![echo(request.payload)],
                        status: Status::Ok as i32,
                        error: String::new(),
                    }
                }
                _ => TransformResponse {
                    events: vec![echo(request.payload)],
                    status: Status::Ok as i32,
                    error: String::new(),
                },
            };
            Ok(response)
        }
    }

    /// Sink capturing pushed frames, acking each one when bound.
    #[derive(Default)]
    struct CaptureSink {
        pushed: Mutex<Vec<Frame>>,
        ack: Mutex<Option<SinkAckFn>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl SinkAdapter for CaptureSink {
        fn configure(&self, _options: serde_json::Value) -> Result<(), quanta_sink::Error> {
            Ok(())
        }

        async fn push(&self, frame: &Frame) -> Result<(), quanta_sink::Error> {
            if self.fail {
                return Err(quanta_sink::Error::Push {
                    sink: "capture",
                    error: "refused".to_owned(),
                });
            }
            self.pushed.lock().push(frame.clone());
            let ack = self.ack.lock().clone();
            if let (Some(ack), Some(token)) = (ack, frame.checkpoint.clone()) {
                ack(token);
            }
            Ok(())
        }

        fn bind_ack(&self, ack: SinkAckFn) {
            *self.ack.lock() = Some(ack);
        }

        async fn close(&self) -> Result<(), quanta_sink::Error> {
            Ok(())
        }
    }

    fn stage(name: &str, script: &Arc<Scripted>, attempts: u32) -> Stage {
        Stage {
            name: name.to_owned(),
            client: Arc::new(InProcessClient::new(
                Arc::clone(script) as Arc<dyn Transformer>
            )),
            timeout: Duration::from_millis(100),
            attempts,
            backoff: Duration::from_millis(1),
        }
    }

    fn input_frame() -> Frame {
        Frame {
            key: Vec::new(),
            value: b"hello".to_vec(),
            headers: HashMap::new(),
            ts_unix_ms: 0,
            checkpoint: Some(CheckpointToken::kafka("t", 1, 42)),
        }
    }

    /// Wires a runner with one capture sink and an ack counter.
    fn runner_with_sink(runner: &mut Runner) -> (Arc<CaptureSink>, Arc<Mutex<Vec<ConnectorAck>>>) {
        let sink = Arc::new(CaptureSink::default());
        runner.add_sink(Arc::clone(&sink) as Arc<dyn SinkAdapter>);

        let acks = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&acks);
        runner.subscribe_ack(Arc::new(move |ack| observed.lock().push(ack.clone())));
        (sink, acks)
    }

    #[tokio::test]
    async fn passthrough_reaches_the_sink_with_the_same_token() {
        let script = Scripted::new("ok");
        let mut runner = Runner::new();
        runner.add_stage(stage("t1", &script, 0));
        let (sink, _acks) = runner_with_sink(&mut runner);

        runner.push_frame(input_frame()).await.unwrap();

        let pushed = sink.pushed.lock();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].value, b"hello");
        assert_eq!(
            pushed[0].checkpoint,
            Some(CheckpointToken::kafka("t", 1, 42))
        );
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn drop_acks_and_pushes_nothing() {
        let script = Scripted::new("drop");
        let mut runner = Runner::new();
        runner.add_stage(stage("t1", &script, 0));
        let (sink, acks) = runner_with_sink(&mut runner);

        runner.push_frame(input_frame()).await.unwrap();

        assert!(sink.pushed.lock().is_empty());
        let acks = acks.lock();
        assert_eq!(acks.len(), 1);
        assert_eq!(
            acks[0].checkpoint,
            Some(CheckpointToken::kafka("t", 1, 42))
        );
    }

    #[tokio::test]
    async fn error_then_ok_retries_exactly_once() {
        let script = Scripted::new("error-then-ok");
        let mut runner = Runner::new();
        runner.add_stage(stage("t1", &script, 1));
        let (sink, _acks) = runner_with_sink(&mut runner);

        runner.push_frame(input_frame()).await.unwrap();

        assert_eq!(script.calls(), 2);
        let pushed = sink.pushed.lock();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].value, b"hello");
    }

    #[tokio::test]
    async fn fanout_shares_the_token_across_outputs() {
        let fanout = Scripted::new("fanout2");
        let passthrough = Scripted::new("ok");
        let mut runner = Runner::new();
        runner.add_stage(stage("s1", &fanout, 0));
        runner.add_stage(stage("s2", &passthrough, 0));
        let (sink, _acks) = runner_with_sink(&mut runner);

        runner.push_frame(input_frame()).await.unwrap();

        let pushed = sink.pushed.lock();
        assert_eq!(pushed.len(), 2);
        for frame in pushed.iter() {
            assert_eq!(frame.checkpoint, Some(CheckpointToken::kafka("t", 1, 42)));
        }
        assert_eq!(passthrough.calls(), 2, "stage two must see both derived frames");
    }

    #[tokio::test]
    async fn retry_exhaustion_acks_once_and_propagates_no_error() {
        let script = Scripted::new("always-error");
        let mut runner = Runner::new();
        runner.add_stage(stage("t1", &script, 2));
        let (sink, acks) = runner_with_sink(&mut runner);

        runner.push_frame(input_frame()).await.unwrap();

        assert_eq!(script.calls(), 3, "initial attempt plus two retries");
        assert!(sink.pushed.lock().is_empty());
        assert_eq!(acks.lock().len(), 1);
    }

    #[tokio::test]
    async fn ok_with_zero_events_still_acks_the_input() {
        let script = Scripted::new("ok-no-events");
        let mut runner = Runner::new();
        runner.add_stage(stage("t1", &script, 0));
        let (sink, acks) = runner_with_sink(&mut runner);

        runner.push_frame(input_frame()).await.unwrap();

        assert!(sink.pushed.lock().is_empty());
        assert_eq!(acks.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn per_stage_timeout_counts_as_a_transport_failure() {
        let script = Scripted::new("slow");
        let mut runner = Runner::new();
        let mut slow_stage = stage("t1", &script, 0);
        slow_stage.timeout = Duration::from_millis(5);
        runner.add_stage(slow_stage);
        let (sink, acks) = runner_with_sink(&mut runner);

        runner.push_frame(input_frame()).await.unwrap();

        assert!(sink.pushed.lock().is_empty());
        assert_eq!(acks.lock().len(), 1);
    }

    #[tokio::test]
    async fn sink_error_aborts_distribution() {
        let script = Scripted::new("ok");
        let mut runner = Runner::new();
        runner.add_stage(stage("t1", &script, 0));

        let failing = Arc::new(CaptureSink {
            fail: true,
            ..Default::default()
        });
        let second = Arc::new(CaptureSink::default());
        runner.add_sink(Arc::clone(&failing) as Arc<dyn SinkAdapter>);
        runner.add_sink(Arc::clone(&second) as Arc<dyn SinkAdapter>);

        assert!(runner.push_frame(input_frame()).await.is_err());
        assert!(second.pushed.lock().is_empty());
    }

    #[tokio::test]
    async fn no_stages_routes_straight_to_the_sinks() {
        let mut runner = Runner::new();
        let (sink, _acks) = runner_with_sink(&mut runner);
        runner.push_frame(input_frame()).await.unwrap();
        assert_eq!(sink.pushed.lock().len(), 1);
    }

    #[test]
    fn requests_carry_the_source_identity() {
        let request = make_request(&input_frame(), "t1");
        assert_eq!(request.stage, "t1");
        assert_eq!(request.payload, b"hello");
        let metadata = request.metadata.unwrap();
        assert_eq!(metadata.source_partition, "1");
        assert_eq!(metadata.source_offset, "42");
        assert_eq!(
            metadata.attributes.get("source.topic").map(String::as_str),
            Some("t")
        );
    }

    #[test]
    fn derived_frames_fall_back_to_the_original_timestamp() {
        let mut original = input_frame();
        original.ts_unix_ms = 1_000;
        let events = vec![
            Event {
                value: b"a".to_vec(),
                metadata: Some(EventMetadata {
                    timestamp_ms: 2_000,
                    ..Default::default()
                }),
                ..Default::default()
            },
            Event {
                value: b"b".to_vec(),
                ..Default::default()
            },
        ];

        let derived = derive_frames(&original, events);
        assert_eq!(derived[0].ts_unix_ms, 2_000);
        assert_eq!(derived[1].ts_unix_ms, 1_000);
        assert_eq!(derived[0].key, original.key);
        assert_eq!(derived[1].checkpoint, original.checkpoint);
    }
}
