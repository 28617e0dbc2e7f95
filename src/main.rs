use std::net::SocketAddr;
use std::path::PathBuf;

use facegate::config::Configuration;
use facegate::{app, initialize_state, telemetry};

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

/// Environment variable pointing to the configuration file.
const CONFIG_ENV: &str = "FACEGATE_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    dotenv::dotenv().ok();
    telemetry::setup_logging();

    let path = std::env::var(CONFIG_ENV).map(PathBuf::from).unwrap_or_default();
    let config = Configuration::default().path(path).read()?;

    let telemetry_config = config.telemetry.clone().unwrap_or_default();
    let tracer = match telemetry_config.otlp_endpoint.as_deref() {
        Some(endpoint) => match telemetry::setup_tracer(endpoint) {
            Ok(provider) => Some(provider),
            Err(err) => {
                tracing::error!(error = %err, endpoint, "cannot export traces");
                None
            },
        },
        None => None,
    };
    let metrics = if telemetry_config.prometheus {
        Some(telemetry::setup_metrics_recorder()?)
    } else {
        None
    };

    let state = initialize_state(config.clone(), metrics)?;

    let addr: SocketAddr = format!("{}:{}", config.address, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, version = config.version(), "{} started", config.name);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(provider) = tracer {
        if let Err(err) = provider.shutdown() {
            tracing::error!(error = %err, "cannot flush traces");
        }
    }
    tracing::info!("server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutting down gracefully");
}
