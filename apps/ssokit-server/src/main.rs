//! Reference single sign-on endpoint.
//!
//! Serves signed login redirects and user lookups for one registered client
//! and logs every browser in as a configured demo user.
//!
//! # Usage
//!
//! ```text
//! SSO_API_KEY=k1 SSO_API_SECRET=s1 sso-server
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSO_LISTEN` | `127.0.0.1:4580` | Bind address |
//! | `SSO_PUBLIC_ENDPOINT` | `http://<SSO_LISTEN>` | Base URL clients sign against |
//! | `SSO_API_KEY` | *(required)* | Api key of the registered client |
//! | `SSO_API_SECRET` | *(required)* | Api secret of the registered client |
//! | `SSO_DEMO_USER_ID` | `1` | User ID every login resolves to |
//! | `SSO_DEMO_USER_EMAIL` | `demo@example.com` | Demo user's e-mail metadata |
//! | `SSO_DEDUP_WINDOW_SECS` | `86400` | Request-ID retention window |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `SSO_LOG_JSON` | `false` | Emit JSON log lines |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use ssokit_auth::StaticCredentialProvider;
use ssokit_http::{RequestIdStore, ServerConfig, SsoHttpConfig, SsoHttpService, UserDirectory};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Server version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber, as JSON lines when `SSO_LOG_JSON` is set.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(config: &ServerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log level filter: {}", config.log_level))
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        builder.json().with_current_span(false).init();
    } else {
        builder.with_target(true).init();
    }

    Ok(())
}

/// Build the service for the configured client and demo user.
fn build_service(config: &ServerConfig) -> Result<SsoHttpService<UserDirectory>> {
    let credentials = config
        .credentials()
        .context("cannot configure the registered client")?;
    let provider = StaticCredentialProvider::new(vec![credentials]);

    Ok(SsoHttpService::new(
        UserDirectory::new(config.demo_user()),
        SsoHttpConfig::new(Arc::new(provider)),
        RequestIdStore::new(config.dedup_window_secs),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env().context("invalid server configuration")?;

    init_tracing(&config)?;

    info!(
        listen = %config.listen,
        public_endpoint = %config.public_endpoint(),
        api_key = %config.api_key,
        demo_user_id = config.demo_user_id,
        dedup_window_secs = config.dedup_window_secs,
        version = VERSION,
        "starting sso-server",
    );

    let service = build_service(&config)?;

    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.listen))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, "listening for connections");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, draining connections");
    };
    let accepted = ssokit_http::serve(listener, service, shutdown).await;
    info!(accepted, "sso-server stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_refuse_to_build_service_without_credentials() {
        let config = ServerConfig::default();
        let err = build_service(&config).unwrap_err();
        assert!(format!("{err:#}").contains("SSO_API_KEY"));
    }

    #[test]
    fn test_should_build_service_from_config() {
        let config = ServerConfig::builder()
            .api_key("k1")
            .api_secret("s1".into())
            .build();
        assert!(build_service(&config).is_ok());
    }
}
