//! HTTPS serving for the webhook
//!
//! Terminates TLS with rustls (TLS 1.2 minimum comes from the rustls
//! defaults) and supports graceful shutdown through an
//! [`axum_server::Handle`]: in-flight admission requests get a bounded
//! drain period before the listener closes.
//!
//! Connection-level timeouts are configured on the listener: header
//! reads are cut off after 30 s and idle keep-alive connections are
//! probed after 120 s. The 30 s per-request bound lives in the router's
//! timeout layer, where it also covers body extraction.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Error;
use crate::Result;

/// Longest a client may take to deliver its request headers
const READ_HEADER_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle keep-alive connections are probed at this interval
const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// How long in-flight requests may drain during shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Serve the webhook router over HTTPS until `handle` is shut down
pub async fn serve(router: Router, config: &Config, handle: Handle) -> Result<()> {
    let tls = RustlsConfig::from_pem_file(&config.tls_cert_path, &config.tls_key_path)
        .await
        .map_err(|e| {
            Error::config(format!(
                "failed to load TLS certificate from {} / {}: {e}",
                config.tls_cert_path.display(),
                config.tls_key_path.display()
            ))
        })?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(addr = %addr, "starting webhook HTTPS server");

    let mut server = axum_server::bind_rustls(addr, tls).handle(handle);
    {
        let http_builder = server.http_builder();
        http_builder.http1().header_read_timeout(READ_HEADER_TIMEOUT);
        http_builder
            .http2()
            .keep_alive_interval(IDLE_TIMEOUT)
            .keep_alive_timeout(READ_HEADER_TIMEOUT);
    }

    server
        .serve(router.into_make_service())
        .await
        .map_err(|e| Error::config(format!("webhook server error: {e}")))
}

/// Trigger graceful shutdown on SIGTERM or ctrl-c
///
/// Runs until a signal arrives, then asks the server to drain and stop.
pub async fn shutdown_on_signal(handle: Handle) {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                futures::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "failed to listen for ctrl-c");
            }
        }
        _ = terminate => {}
    }

    info!("shutdown signal received, draining in-flight requests");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}
