// SPDX-License-Identifier: Apache-2.0

//! Errors for pipeline description loading.

use std::path::PathBuf;

/// All errors that can occur while loading a pipeline description.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The pipeline file could not be read.
    #[error("failed to read pipeline file `{path}`: {error}")]
    Io {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// The underlying IO error.
        error: std::io::Error,
    },

    /// The pipeline file is not valid YAML or does not match the schema.
    #[error("failed to parse pipeline file `{path}`: {error}")]
    Parse {
        /// Path of the file that could not be parsed.
        path: PathBuf,
        /// The underlying deserialization error.
        error: serde_yaml::Error,
    },

    /// The pipeline file declares a schema version this engine does not speak.
    #[error("pipeline schema_version `{found}` not supported (want `{want}`)")]
    UnsupportedSchema {
        /// The declared schema version.
        found: String,
        /// The supported schema version.
        want: &'static str,
    },
}
