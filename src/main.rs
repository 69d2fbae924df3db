mod auth;
mod config;
mod error;
mod handlers;
mod metrics;
mod models;
mod routes;
mod state;
mod telemetry;
mod transform;
mod upstream;

use anyhow::Context;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LoggingConfig};
use crate::metrics::init_metrics_noop;
use crate::routes::build_router;
use crate::state::AppState;
use crate::telemetry::{init_metrics, init_tracer, init_tracer_noop, spawn_tracer_watchdog};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

fn parse_level(level: &str) -> LevelFilter {
    match level {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

fn open_log_file(path: &str) -> Option<std::fs::File> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            eprintln!("log file create dir error: {}", err);
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("log file open error: {}", err);
            None
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let file_writer = logging.file.as_deref().and_then(open_log_file).map(Arc::new);
    let writer = match (logging.stdout, file_writer) {
        (true, Some(file)) => BoxMakeWriter::new(std::io::stdout.and(file)),
        (true, None) => BoxMakeWriter::new(std::io::stdout),
        (false, Some(file)) => BoxMakeWriter::new(file),
        (false, None) => BoxMakeWriter::new(std::io::stdout),
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_filter(parse_level(&logging.level));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(tracing_opentelemetry::layer())
        .init();
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config error: {}", err);
            std::process::exit(1);
        }
    };

    let metrics = match init_metrics(&config.observability) {
        Ok(m) => m,
        Err(err) => {
            eprintln!("metrics init error (fallback to noop): {}", err);
            init_metrics_noop()
        }
    };
    let tracer_provider = match init_tracer(&config.observability) {
        Ok(provider) => provider,
        Err(err) => {
            eprintln!("tracing init error (fallback to noop): {}", err);
            init_tracer_noop(config.observability.service_name.clone())
        }
    };

    init_logging(&config.observability.logging);
    tracing::info!(
        tracing_exporter = %config.observability.exporters.tracing,
        metrics_exporter = %config.observability.exporters.metrics,
        "telemetry configured"
    );
    let _tracer_watchdog = spawn_tracer_watchdog(tracer_provider.clone());

    if let Err(err) = run(config, metrics).await {
        tracing::error!("server error: {:#}", err);
        let _ = tracer_provider.shutdown();
        std::process::exit(1);
    }
}

async fn run(config: Config, metrics: metrics::Metrics) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr().to_string();
    let gated = config.auth_token().is_some();
    let state = AppState::new(config, metrics).context("upstream client build error")?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind error on {}", bind_addr))?;

    tracing::info!(auth_gate = gated, "listening on {}", bind_addr);
    axum::serve(listener, app).await.context("serve error")?;
    Ok(())
}
