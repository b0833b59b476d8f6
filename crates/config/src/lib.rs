// SPDX-License-Identifier: Apache-2.0

//! Declarative pipeline description for the quanta engine.
//!
//! A pipeline file names a source driver, an ordered chain of transformers,
//! an ordered list of sinks and a handful of debug knobs. The engine does not
//! care how the description was produced; this crate is the thin facade that
//! parses the YAML form, validates the schema version and resolves the source
//! config path relative to the pipeline file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

pub mod error;

pub use error::Error;

/// The only pipeline schema version this engine accepts.
pub const SUPPORTED_SCHEMA: &str = "v1";

/// A parsed pipeline description.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSpec {
    /// Declared schema version; an absent value means [`SUPPORTED_SCHEMA`].
    #[serde(default)]
    pub schema_version: String,
    /// The record source.
    pub source: SourceSpec,
    /// Ordered transformer chain applied between source and sinks.
    #[serde(default)]
    pub transformers: Vec<TransformerSpec>,
    /// Ordered sink names, looked up in the sink registry.
    #[serde(default)]
    pub sinks: Vec<String>,
    /// Optional per-sink configuration blocks.
    #[serde(default)]
    pub sink_configs: SinkConfigs,
    /// Debug knobs forwarded to debug-capable sinks.
    #[serde(default)]
    pub debug: DebugSpec,
}

/// Per-sink configuration blocks, keyed by sink name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SinkConfigs {
    /// Config block of the `kafka` sink.
    #[serde(default)]
    pub kafka: Option<serde_yaml::Value>,
}

/// The source section of a pipeline description.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    /// Source family; only `kafka` is accepted by this engine.
    pub kind: String,
    /// Driver factory name, looked up in the source registry.
    pub driver: String,
    /// Path of the driver config file. Relative paths are resolved against
    /// the directory containing the pipeline file.
    #[serde(default)]
    pub config: Option<PathBuf>,
}

/// One transformer stage.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformerSpec {
    /// Stage name, used in requests and diagnostics.
    pub name: String,
    /// Transport type; only `grpc` is accepted by this engine.
    #[serde(rename = "type")]
    pub kind: String,
    /// Dial address of the transformer service, `host:port`.
    #[serde(default)]
    pub address: String,
    /// Per-call timeout in milliseconds; zero disables the timeout.
    #[serde(default)]
    pub timeout_ms: u64,
    /// Retry policy applied to failed or retryable calls.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

/// Retry policy of a transformer stage.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    #[serde(default)]
    pub attempts: u32,
    /// Sleep between attempts, in milliseconds.
    #[serde(default)]
    pub backoff_ms: u64,
}

/// Debug knobs forwarded to debug-capable sinks.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DebugSpec {
    /// Artificial delay before each sink push, in milliseconds.
    #[serde(default)]
    pub per_frame_delay_ms: u64,
    /// Prepend a global sequence number to sink output.
    #[serde(default)]
    pub print_counter: bool,
    /// Flush pending acks after this many frames; zero disables.
    #[serde(default)]
    pub ack_batch_size: usize,
    /// Flush pending acks after this many milliseconds; zero disables.
    #[serde(default)]
    pub ack_flush_ms: u64,
    /// Include the (truncated) record value in sink output.
    #[serde(default)]
    pub print_value: bool,
    /// Maximum number of value bytes printed; defaults to 120 when unset.
    #[serde(default)]
    pub value_max_bytes: usize,
}

/// Loads a pipeline description from `path`.
///
/// Returns the parsed spec together with the source config path resolved to
/// an absolute-or-pipeline-relative location, if one was declared.
pub fn load(path: &Path) -> Result<(PipelineSpec, Option<PathBuf>), Error> {
    let raw = std::fs::read_to_string(path).map_err(|error| Error::Io {
        path: path.to_path_buf(),
        error,
    })?;
    let mut spec: PipelineSpec = serde_yaml::from_str(&raw).map_err(|error| Error::Parse {
        path: path.to_path_buf(),
        error,
    })?;

    if spec.schema_version.is_empty() {
        spec.schema_version = SUPPORTED_SCHEMA.to_owned();
    }
    if spec.schema_version != SUPPORTED_SCHEMA {
        return Err(Error::UnsupportedSchema {
            found: spec.schema_version,
            want: SUPPORTED_SCHEMA,
        });
    }

    let source_config = spec.source.config.clone().map(|config| {
        if config.is_absolute() {
            config
        } else {
            path.parent().unwrap_or_else(|| Path::new(".")).join(config)
        }
    });
    Ok((spec, source_config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn resolves_relative_source_config() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = write(
            dir.path(),
            "pipeline.yml",
            "schema_version: v1\n\
             source:\n  kind: kafka\n  driver: rdkafka\n  config: kafka_source.yml\n\
             transformers: []\n\
             sinks: [stdout]\n",
        );

        let (spec, config) = load(&pipeline).unwrap();
        assert_eq!(spec.schema_version, SUPPORTED_SCHEMA);
        assert_eq!(spec.source.driver, "rdkafka");
        assert_eq!(spec.sinks, vec!["stdout".to_owned()]);
        assert_eq!(config, Some(dir.path().join("kafka_source.yml")));
    }

    #[test]
    fn defaults_schema_version_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = write(
            dir.path(),
            "pipeline.yml",
            "source: { kind: kafka, driver: rdkafka }\nsinks: [stdout]\n",
        );

        let (spec, config) = load(&pipeline).unwrap();
        assert_eq!(spec.schema_version, SUPPORTED_SCHEMA);
        assert!(config.is_none());
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = write(
            dir.path(),
            "pipeline.yml",
            "schema_version: v999\nsource: { kind: kafka, driver: rdkafka }\nsinks: [stdout]\n",
        );

        match load(&pipeline) {
            Err(Error::UnsupportedSchema { found, want }) => {
                assert_eq!(found, "v999");
                assert_eq!(want, SUPPORTED_SCHEMA);
            }
            other => panic!("expected UnsupportedSchema, got {other:?}"),
        }
    }

    #[test]
    fn parses_transformer_retry_policy() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = write(
            dir.path(),
            "pipeline.yml",
            "schema_version: v1\n\
             source: { kind: kafka, driver: rdkafka }\n\
             transformers:\n\
             \x20 - name: uppercase\n\
             \x20   type: grpc\n\
             \x20   address: localhost:50052\n\
             \x20   timeout_ms: 250\n\
             \x20   retry_policy: { attempts: 2, backoff_ms: 10 }\n\
             sinks: [stdout]\n\
             debug: { print_counter: true, ack_batch_size: 8 }\n",
        );

        let (spec, _) = load(&pipeline).unwrap();
        assert_eq!(spec.transformers.len(), 1);
        let stage = &spec.transformers[0];
        assert_eq!(stage.kind, "grpc");
        assert_eq!(stage.timeout_ms, 250);
        assert_eq!(stage.retry_policy.attempts, 2);
        assert_eq!(stage.retry_policy.backoff_ms, 10);
        assert!(spec.debug.print_counter);
        assert_eq!(spec.debug.ack_batch_size, 8);
    }
}
