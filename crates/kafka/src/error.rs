// SPDX-License-Identifier: Apache-2.0

//! Errors for the Kafka source side.

use std::path::PathBuf;

/// All errors that can occur in the Kafka source driver and its helpers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No driver is registered under the requested name.
    #[error("unsupported kafka driver `{name}`")]
    UnknownDriver {
        /// The requested driver name.
        name: String,
    },

    /// The driver was asked to run before being configured.
    #[error("kafka driver `{driver}` is not configured")]
    NotConfigured {
        /// The driver name.
        driver: &'static str,
    },

    /// The driver was configured twice.
    #[error("kafka driver `{driver}` is already configured")]
    AlreadyConfigured {
        /// The driver name.
        driver: &'static str,
    },

    /// The driver config file could not be read.
    #[error("failed to read kafka config `{path}`: {error}")]
    ConfigIo {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// The underlying IO error.
        error: std::io::Error,
    },

    /// The driver config is not valid YAML or does not match the schema.
    #[error("invalid kafka config: {error}")]
    ConfigParse {
        /// The underlying deserialization error.
        error: serde_yaml::Error,
    },

    /// The driver config declares a schema version this engine does not speak.
    #[error("kafka schema_version `{found}` not supported (want `{want}`)")]
    UnsupportedSchema {
        /// The declared schema version.
        found: String,
        /// The supported schema version.
        want: &'static str,
    },

    /// A wrapper for client-library failures (broker, consumer, commit).
    #[error("kafka client error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// A frame could not be emitted into the pipeline.
    #[error("emit failed: {error}")]
    Emit {
        /// The downstream error, rendered.
        error: String,
    },

    /// A wait was interrupted by the top-level cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// The back-pressure controller was closed while waiting on it.
    #[error("back-pressure controller closed")]
    ControllerClosed,
}
