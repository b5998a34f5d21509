//! Archgate - architecture-aware pod admission webhook

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use archgate::config::{Config, EnvSource, OsEnv};
use archgate::credentials::KubeSecretStore;
use archgate::webhook::{server, webhook_router, WebhookState};

/// Archgate - pins pods to nodes matching their image architectures
#[derive(Parser, Debug)]
#[command(name = "archgate", version, about, long_about = None)]
struct Cli {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Path to the TLS certificate (overrides TLS_CERT_PATH)
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// Path to the TLS key (overrides TLS_KEY_PATH)
    #[arg(long)]
    tls_key: Option<PathBuf>,
}

/// Environment source that lets CLI flags override process variables
struct CliEnv {
    cli: Cli,
}

impl EnvSource for CliEnv {
    fn var(&self, key: &str) -> Option<String> {
        let flag = match key {
            "PORT" => self.cli.port.map(|p| p.to_string()),
            "TLS_CERT_PATH" => self.cli.tls_cert.as_ref().map(|p| p.display().to_string()),
            "TLS_KEY_PATH" => self.cli.tls_key.as_ref().map(|p| p.display().to_string()),
            _ => None,
        };
        flag.or_else(|| OsEnv.var(key))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install the crypto provider before any TLS use. Failure here means
    // the process cannot serve HTTPS at all.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install rustls crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    let config = Config::from_source(&CliEnv { cli })?;

    // Initialize tracing with the configured level as the default filter
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,tower=warn,kube=info",
            config.log_level
        ))
    });
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();

    tracing::info!(
        port = config.port,
        default_arch = %config.default_arch,
        strategy = %config.strategy,
        cache_timeout_secs = config.cache_timeout.as_secs(),
        "archgate starting"
    );

    // In-cluster Kubernetes client for pull-secret lookups
    let client = kube::Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let state = Arc::new(WebhookState::new(
        Box::new(KubeSecretStore::new(client)),
        &config,
    )?);
    let router = webhook_router(state);

    let handle = axum_server::Handle::new();
    tokio::spawn(server::shutdown_on_signal(handle.clone()));

    server::serve(router, &config, handle).await?;

    tracing::info!("archgate shut down");
    Ok(())
}
