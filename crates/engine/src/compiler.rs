// SPDX-License-Identifier: Apache-2.0

//! Pipeline compiler.
//!
//! Turns a pipeline description into a wired [`Runner`]: the source driver is
//! looked up in the source registry and configured, its ack handler is
//! subscribed to the runner's broadcast, transformer stages are dialled, and
//! sinks are looked up, configured and ack-bound in declared order.

use crate::error::Error;
use crate::runner::{Runner, Stage};
use quanta_config::{DebugSpec, PipelineSpec};
use quanta_sink::stdout::StdoutConfig;
use quanta_transform::GrpcClient;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Compiles the pipeline description at `path` into a runnable [`Runner`].
pub async fn compile(path: &Path) -> Result<Runner, Error> {
    let (spec, source_config) = quanta_config::load(path)?;
    if spec.source.kind != "kafka" {
        return Err(Error::UnsupportedSourceKind {
            kind: spec.source.kind,
        });
    }

    let kafka_config = quanta_kafka::config::load(source_config.as_deref())?;
    let source = quanta_kafka::new_adapter(&spec.source.driver)?;
    source.configure(kafka_config)?;

    let mut runner = Runner::new();
    {
        let source = Arc::clone(&source);
        runner.subscribe_ack(Arc::new(move |ack| source.on_ack(ack)));
    }
    runner.set_source(source);

    for transformer in &spec.transformers {
        match transformer.kind.as_str() {
            "grpc" => {
                let client = GrpcClient::connect(&transformer.address)
                    .await
                    .map_err(|error| Error::TransformerConnect {
                        stage: transformer.name.clone(),
                        error,
                    })?;
                runner.add_stage(Stage {
                    name: transformer.name.clone(),
                    client: Arc::new(client),
                    timeout: Duration::from_millis(transformer.timeout_ms),
                    attempts: transformer.retry_policy.attempts,
                    backoff: Duration::from_millis(transformer.retry_policy.backoff_ms),
                });
            }
            other => {
                return Err(Error::UnsupportedTransformerType {
                    stage: transformer.name.clone(),
                    kind: other.to_owned(),
                });
            }
        }
    }

    for name in &spec.sinks {
        let sink = quanta_sink::new_adapter(name)?;
        let options = sink_options(name, &spec)?;
        sink.configure(options)?;

        let acks = runner.ack_broadcast();
        sink.bind_ack(Arc::new(move |token| acks.ack(&token)));
        runner.add_sink(sink);
    }
    Ok(runner)
}

/// Builds the configuration block for the named sink.
fn sink_options(name: &str, spec: &PipelineSpec) -> Result<serde_json::Value, Error> {
    match name {
        "stdout" => {
            let config = stdout_config(&spec.debug);
            serde_json::to_value(config).map_err(|error| Error::InvalidSinkConfig {
                name: name.to_owned(),
                error,
            })
        }
        "kafka" => match &spec.sink_configs.kafka {
            Some(block) => {
                serde_json::to_value(block).map_err(|error| Error::InvalidSinkConfig {
                    name: name.to_owned(),
                    error,
                })
            }
            None => Err(Error::MissingSinkConfig {
                name: name.to_owned(),
            }),
        },
        _ => Err(Error::MissingSinkConfig {
            name: name.to_owned(),
        }),
    }
}

fn stdout_config(debug: &DebugSpec) -> StdoutConfig {
    StdoutConfig {
        delay_ms: debug.per_frame_delay_ms,
        print_counter: debug.print_counter,
        ack_batch_size: debug.ack_batch_size,
        ack_flush_ms: debug.ack_flush_ms,
        print_value: debug.print_value,
        value_max_bytes: debug.value_max_bytes,
    }
}
