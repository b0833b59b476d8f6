// SPDX-License-Identifier: Apache-2.0

//! Errors for the pipeline engine.

/// All errors that can occur while compiling or running a pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A wrapper for pipeline description errors.
    #[error("pipeline config error: {0}")]
    Config(#[from] quanta_config::Error),

    /// A wrapper for source-side errors.
    #[error("source error: {0}")]
    Source(#[from] quanta_kafka::Error),

    /// A wrapper for sink errors.
    #[error("sink error: {0}")]
    Sink(#[from] quanta_sink::Error),

    /// The pipeline names a source family this engine does not speak.
    #[error("unsupported source kind `{kind}`")]
    UnsupportedSourceKind {
        /// The declared source kind.
        kind: String,
    },

    /// The pipeline names a transformer transport this engine does not speak.
    #[error("unsupported transformer type `{kind}` for stage `{stage}`")]
    UnsupportedTransformerType {
        /// The stage name.
        stage: String,
        /// The declared transport type.
        kind: String,
    },

    /// A transformer endpoint could not be dialled at compile time.
    #[error("stage `{stage}`: {error}")]
    TransformerConnect {
        /// The stage name.
        stage: String,
        /// The underlying client error.
        error: quanta_transform::Error,
    },

    /// A named sink has no configuration block.
    #[error("no config block for sink `{name}`")]
    MissingSinkConfig {
        /// The sink name.
        name: String,
    },

    /// A sink configuration block could not be re-encoded for the sink.
    #[error("invalid config block for sink `{name}`: {error}")]
    InvalidSinkConfig {
        /// The sink name.
        name: String,
        /// The underlying encoding error.
        error: serde_json::Error,
    },

    /// The runner was started without a source.
    #[error("no source configured")]
    NoSource,
}
