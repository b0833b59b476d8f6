// SPDX-License-Identifier: Apache-2.0

//! Quanta engine binary.
//!
//! Initialises logging from the environment, populates the source and sink
//! registries, compiles the pipeline description and runs it until SIGINT or
//! SIGTERM.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "quanta", about = "Pluggable stream-processing engine")]
struct Args {
    /// Path of the pipeline description.
    #[arg(long, env = "PIPELINE_YML", default_value = "pipeline.yml")]
    pipeline: PathBuf,
}

/// Configures the process-wide logger from `LOG_LEVEL` and `LOG_JSON`.
fn init_tracing() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_JSON")
        .map(|raw| raw.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Populates the adapter registries. Registration is explicit and happens
/// before the engine starts; the registries are never mutated afterwards.
fn register_adapters() {
    quanta_kafka::register("rdkafka", || {
        Arc::new(quanta_kafka::driver::RdKafkaDriver::default())
    });
    quanta_sink::register("stdout", || {
        Arc::new(quanta_sink::stdout::StdoutSink::default())
    });
    quanta_sink::register("kafka", || {
        Arc::new(quanta_kafka::sink::KafkaSinkDriver::default())
    });
}

fn spawn_signal_watcher(cancel: CancellationToken) {
    let _ = tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(term) => term,
                    Err(error) => {
                        error!(%error, "failed to install SIGTERM handler");
                        let _ = ctrl_c.await;
                        cancel.cancel();
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    register_adapters();

    let runner = match quanta_engine::compile(&args.pipeline).await {
        Ok(runner) => Arc::new(runner),
        Err(error) => {
            error!(%error, pipeline = %args.pipeline.display(), "pipeline compilation failed");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone());

    info!(pipeline = %args.pipeline.display(), "engine running");
    let result = runner.run(cancel).await;
    if let Err(error) = runner.close().await {
        error!(%error, "shutdown cleanup failed");
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "engine run failed");
            ExitCode::FAILURE
        }
    }
}
