// SPDX-License-Identifier: Apache-2.0

//! Kafka source configuration.
//!
//! Loaded from a YAML file merged with environment variables using the
//! `QUANTA_KAFKA__` prefix and `__` as the nesting delimiter, e.g.
//! `QUANTA_KAFKA__BACKPRESSURE__CAPACITY=50000`. A missing file is not an
//! error; the environment and the defaults still apply.

use crate::error::Error;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// The only Kafka config schema version this engine accepts.
pub const SUPPORTED_SCHEMA: &str = "v1";

const ENV_PREFIX: &str = "QUANTA_KAFKA__";
const ENV_DELIMITER: &str = "__";

/// When offsets are committed back to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// Commit right after a record is emitted into the pipeline.
    #[default]
    Auto,
    /// Commit only once the record's acknowledgement returns from the sinks.
    E2e,
}

/// Where a fresh consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartFrom {
    /// Start from the oldest available offset.
    Oldest,
    /// Start from the newest offset.
    #[default]
    Newest,
}

/// Back-pressure budget for records in flight.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Maximum number of unresolved records in flight.
    pub capacity: i64,
    /// Refill cadence of the token bucket.
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        BackpressureConfig {
            capacity: 30_000,
            check_interval: Duration::from_millis(100),
        }
    }
}

/// Offset commit cadence.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Minimum interval between offset flushes.
    #[serde(with = "humantime_serde")]
    pub commit_interval: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig {
            commit_interval: Duration::from_secs(5),
        }
    }
}

/// Configuration of the Kafka source driver.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Bootstrap broker addresses.
    pub brokers: Vec<String>,
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Consumer group id.
    pub group_id: String,
    /// Where a fresh consumer group starts reading.
    pub start_from: StartFrom,
    /// Broker protocol version hint; empty lets the client negotiate.
    pub version: String,
    /// Enable TLS towards the brokers.
    pub tls_enabled: bool,
    /// SASL/PLAIN username; empty disables SASL.
    pub sasl_user: String,
    /// SASL/PLAIN password.
    pub sasl_pass: String,
    /// When offsets are committed.
    pub commit_mode: CommitMode,
    /// Back-pressure budget.
    pub backpressure: BackpressureConfig,
    /// Offset commit cadence.
    pub checkpoint: CheckpointConfig,
}

/// Loads the Kafka config from `path` (if given and present) merged with the
/// `QUANTA_KAFKA__` environment overlay.
pub fn load(path: Option<&Path>) -> Result<KafkaConfig, Error> {
    load_with_env(path, std::env::vars())
}

fn load_with_env(
    path: Option<&Path>,
    env: impl Iterator<Item = (String, String)>,
) -> Result<KafkaConfig, Error> {
    let mut root = match path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(raw) => {
                let value: serde_yaml::Value =
                    serde_yaml::from_str(&raw).map_err(|error| Error::ConfigParse { error })?;
                match value {
                    serde_yaml::Value::Mapping(mapping) => mapping,
                    serde_yaml::Value::Null => serde_yaml::Mapping::new(),
                    _ => {
                        return Err(Error::ConfigParse {
                            error: <serde_yaml::Error as serde::de::Error>::custom(
                                "kafka config must be a mapping",
                            ),
                        });
                    }
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                serde_yaml::Mapping::new()
            }
            Err(error) => {
                return Err(Error::ConfigIo {
                    path: path.to_path_buf(),
                    error,
                });
            }
        },
        None => serde_yaml::Mapping::new(),
    };

    // Schema version only applies when the YAML declares one.
    if let Some(serde_yaml::Value::String(version)) = root.remove("schema_version") {
        if version != SUPPORTED_SCHEMA {
            return Err(Error::UnsupportedSchema {
                found: version,
                want: SUPPORTED_SCHEMA,
            });
        }
    }

    for (key, value) in env {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<String> = stripped
            .split(ENV_DELIMITER)
            .map(str::to_lowercase)
            .collect();
        if segments.iter().any(String::is_empty) {
            continue;
        }
        overlay(&mut root, &segments, &value);
    }

    serde_yaml::from_value(serde_yaml::Value::Mapping(root))
        .map_err(|error| Error::ConfigParse { error })
}

/// Writes `raw` into the mapping at the nested path `segments`, creating
/// intermediate mappings as needed. Scalars are parsed as YAML so numbers,
/// booleans and lists keep their types.
fn overlay(root: &mut serde_yaml::Mapping, segments: &[String], raw: &str) {
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        let key = serde_yaml::Value::String(segment.clone());
        let slot = current
            .entry(key)
            .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
        if !slot.is_mapping() {
            *slot = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }
        let serde_yaml::Value::Mapping(next) = slot else {
            unreachable!("slot was just made a mapping");
        };
        current = next;
    }
    let leaf = segments[segments.len() - 1].clone();
    let value = serde_yaml::from_str(raw)
        .unwrap_or_else(|_| serde_yaml::Value::String(raw.to_owned()));
    let _ = current.insert(serde_yaml::Value::String(leaf), value);
}
