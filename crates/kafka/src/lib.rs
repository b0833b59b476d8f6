// SPDX-License-Identifier: Apache-2.0

//! Kafka source side of the quanta engine.
//!
//! The source driver consumes records from a consumer-group claim, emits them
//! into the pipeline as frames and commits offsets back to the broker. Three
//! cooperating pieces keep that safe under concurrency and failure: the
//! [`backpressure::Controller`] bounds how many records are in flight end to
//! end, the [`checkpoint`] trackers report the highest offset whose prefix has
//! fully resolved, and the [`commit::CommitManager`] throttles how often that
//! offset is flushed.
//!
//! Drivers are looked up by name in a process-wide registry populated
//! explicitly at start-up.

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use quanta_proto::{ConnectorAck, Frame};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod backpressure;
pub mod checkpoint;
pub mod commit;
pub mod config;
pub mod driver;
pub mod error;
pub mod sink;

pub use config::{CommitMode, KafkaConfig};
pub use error::Error;

/// Future returned by an emit callback.
pub type EmitFuture = BoxFuture<'static, Result<(), Box<dyn std::error::Error + Send + Sync>>>;

/// Callback through which a source driver pushes frames into the pipeline.
pub type EmitFn = Arc<dyn Fn(Frame) -> EmitFuture + Send + Sync>;

/// A source driver: consumes records, emits frames, routes acks back into its
/// commit machinery.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Applies the configuration; must be called exactly once before `run`.
    fn configure(&self, config: KafkaConfig) -> Result<(), Error>;

    /// Consumes records until cancelled or a fatal error occurs. Cancellation
    /// is a normal return.
    async fn run(&self, cancel: CancellationToken, emit: EmitFn) -> Result<(), Error>;

    /// Routes one sink acknowledgement back into the driver. Never blocks.
    fn on_ack(&self, ack: &ConnectorAck);

    /// Releases broker resources and wakes any blocked waiters.
    fn close(&self);
}

/// Factory producing an unconfigured source adapter.
pub type SourceFactory = fn() -> Arc<dyn SourceAdapter>;

static REGISTRY: Lazy<RwLock<HashMap<String, SourceFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a source driver factory under `name`.
///
/// Registration happens explicitly at process start-up, before the engine is
/// compiled; later registrations replace earlier ones.
pub fn register(name: &str, factory: SourceFactory) {
    let _ = REGISTRY.write().insert(name.to_owned(), factory);
}

/// Instantiates the source driver registered under `name`.
pub fn new_adapter(name: &str) -> Result<Arc<dyn SourceAdapter>, Error> {
    match REGISTRY.read().get(name) {
        Some(factory) => Ok(factory()),
        None => Err(Error::UnknownDriver {
            name: name.to_owned(),
        }),
    }
}
