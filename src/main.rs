use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use clap_serde_derive::ClapSerde;
use tokio::net::TcpListener;
use tracing::{error, info};

use digit_runner::api::{build_router, AppState};
use digit_runner::config::{Config, DEFAULT_CONFIG_FILE};
use digit_runner::inference::mnist::MnistModel;
use digit_runner::metrics::MetricsRegistry;
use digit_runner::telemetry::{init_telemetry, shutdown_telemetry};

macro_rules! exit_err {
    ($code:expr, $fmt:expr $(, $arg:expr)*) => {
        {
            error!($fmt $(, $arg)*);
            shutdown_telemetry();
            std::process::exit($code);
        }
    };
}

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the trained model in safetensors format
    model_path: PathBuf,

    /// Path to the configuration file
    #[arg(short, long, env, default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,

    /// OTLP endpoint that traces are exported to
    #[arg(long, env)]
    otel_endpoint: Option<String>,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();
    if let Err(err) = init_telemetry(&args.otel_endpoint) {
        eprintln!("Failed to initialize telemetry: {err:#}");
        std::process::exit(1);
    }

    let config = match Config::load(&args.config_file, &mut args.opt_config) {
        Ok(config) => config,
        Err(err) => exit_err!(1, "{:#}", err),
    };

    let model = match MnistModel::load(&args.model_path) {
        Ok(model) => model,
        Err(err) => exit_err!(1, "{}", err),
    };
    let metrics = match MetricsRegistry::new() {
        Ok(metrics) => metrics,
        Err(err) => exit_err!(1, "Failed to register metrics: {}", err),
    };

    let state = AppState::new(Arc::new(model), metrics);
    let router = build_router(state, config.max_upload_bytes);

    let listener = TcpListener::bind((config.address.as_str(), config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);
    info!(
        "Supported features: avx: {}, neon: {}, simd128: {}, f16c: {}",
        candle_core::utils::with_avx(),
        candle_core::utils::with_neon(),
        candle_core::utils::with_simd128(),
        candle_core::utils::with_f16c()
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown_telemetry();
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
