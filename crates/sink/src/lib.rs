// SPDX-License-Identifier: Apache-2.0

//! Sink adapters.
//!
//! A sink receives fully transformed frames from the router and, once a frame
//! is durably processed, hands its checkpoint token back through the bound ack
//! callback. Adapters are looked up by name in a process-wide registry
//! populated explicitly at start-up.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use quanta_proto::{CheckpointToken, Frame};
use std::collections::HashMap;
use std::sync::Arc;

pub mod stdout;

/// Callback through which a sink emits acknowledgements upstream.
pub type AckFn = Arc<dyn Fn(CheckpointToken) + Send + Sync>;

/// All errors that can occur in sink adapters.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No sink is registered under the requested name.
    #[error("unknown sink `{name}`")]
    UnknownSink {
        /// The requested sink name.
        name: String,
    },

    /// The sink rejected its configuration.
    #[error("sink `{sink}` configuration error: {error}")]
    Configuration {
        /// The sink name.
        sink: &'static str,
        /// The reason the configuration was rejected.
        error: String,
    },

    /// A frame could not be written.
    #[error("sink `{sink}` push failed: {error}")]
    Push {
        /// The sink name.
        sink: &'static str,
        /// The underlying failure, rendered.
        error: String,
    },
}

/// A sink driver.
///
/// `configure` is called once before the first push. Sinks that emit
/// acknowledgements override `bind_ack`; the default ignores the callback,
/// which is the correct behavior for fire-and-forget sinks.
#[async_trait::async_trait]
pub trait SinkAdapter: Send + Sync {
    /// Applies sink-specific options.
    fn configure(&self, options: serde_json::Value) -> Result<(), Error>;

    /// Writes one frame.
    async fn push(&self, frame: &Frame) -> Result<(), Error>;

    /// Binds the upstream ack callback. Called before the first push.
    fn bind_ack(&self, _ack: AckFn) {}

    /// Flushes pending work and releases resources.
    async fn close(&self) -> Result<(), Error>;
}

/// Factory producing an unconfigured sink adapter.
pub type SinkFactory = fn() -> Arc<dyn SinkAdapter>;

static REGISTRY: Lazy<RwLock<HashMap<String, SinkFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a sink factory under `name`.
///
/// Registration happens explicitly at process start-up, before the engine is
/// compiled; later registrations replace earlier ones.
pub fn register(name: &str, factory: SinkFactory) {
    let _ = REGISTRY.write().insert(name.to_owned(), factory);
}

/// Instantiates the sink registered under `name`.
pub fn new_adapter(name: &str) -> Result<Arc<dyn SinkAdapter>, Error> {
    match REGISTRY.read().get(name) {
        Some(factory) => Ok(factory()),
        None => Err(Error::UnknownSink {
            name: name.to_owned(),
        }),
    }
}
