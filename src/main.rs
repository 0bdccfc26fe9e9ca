//! samlidp -- configuration registry and login front end of a SAML IdP.
//!
//! Crash-only design: every startup is a recovery.  The service-provider
//! registry is rebuilt from the store on each start, so SIGTERM/SIGINT only
//! stop accepting connections and wait with a timeout before exiting.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use samlidp::config::LoggingConfig;

/// Command-line arguments for the samlidp server.
#[derive(Parser, Debug)]
#[command(
    name = "samlidp",
    version,
    about = "SAML identity provider configuration registry"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "samlidp.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = samlidp::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        samlidp::metrics::init_metrics();
        samlidp::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let store = samlidp::store::open(&config.store)?;
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(samlidp::AppState::new(config, store).await?);
    info!(
        metadata_url = %state.config.server.metadata_url(),
        "Identity provider ready"
    );

    let app = samlidp::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("samlidp listening on {}", bind_addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    tokio::select! {
        result = server => result?,
        _ = drain_deadline(shutdown_timeout) => {
            warn!("In-flight requests did not finish within {:?}", shutdown_timeout);
        }
    }

    info!("samlidp shut down");
    Ok(())
}

/// Install the global subscriber.  `RUST_LOG` takes precedence over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}

/// Resolves `timeout` after the first shutdown signal; never resolves before.
async fn drain_deadline(timeout: Duration) {
    shutdown_signal().await;
    tokio::time::sleep(timeout).await;
}
