//! Command-line client for a single sign-on endpoint.
//!
//! # Usage
//!
//! ```text
//! sso-demo start-login <return-url> [--iframe]
//! sso-demo finalise-login <token>
//! sso-demo fetch-user <access-token>
//! ```
//!
//! `start-login` prints the URL to open in a browser. After logging in the
//! browser lands on `<return-url>?token=...`; pass that token to
//! `finalise-login` to obtain the user ID and an access token, and the access
//! token to `fetch-user` for later lookups.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSO_ENDPOINT` | *(required)* | Base URL of the endpoint |
//! | `SSO_API_KEY` | *(required)* | Api key of this client |
//! | `SSO_API_SECRET` | *(required)* | Api secret of this client |
//! | `SSO_REQUEST_TIMEOUT_SECS` | `30` | Per-call timeout |
//! | `LOG_LEVEL` | `warn` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use ssokit_client::{HttpTransport, SsoClient, SsoConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Command-line client for a single sign-on endpoint.
#[derive(Debug, Parser)]
#[command(name = "sso-demo", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// Print a signed login URL to open in a browser.
    StartLogin {
        /// Where the endpoint sends the browser back to.
        return_url: String,
        /// Ask for the iframe variant of the login page.
        #[arg(long)]
        iframe: bool,
    },
    /// Redeem the one-time login token from the return URL.
    FinaliseLogin {
        /// The `token` query parameter the browser came back with.
        token: String,
    },
    /// Look up the user behind an access token.
    FetchUser {
        /// Access token returned by `finalise-login`.
        access_token: String,
    },
}

/// Initialize the tracing subscriber on stderr.
///
/// Uses `RUST_LOG` if set, otherwise falls back to `LOG_LEVEL`.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

async fn run(client: &SsoClient, command: Command) -> Result<Value> {
    let output = match command {
        Command::StartLogin { return_url, iframe } => {
            json!({ "redirect_url": client.start_login(&return_url, iframe) })
        }
        Command::FinaliseLogin { token } => {
            let login = client
                .finalise_login(&token)
                .await
                .context("finalise-login failed")?;
            json!({
                "success": login.success,
                "result": login.result,
                "message": login.message,
                "user_id": login.user_id,
                "access_token": login.access_token,
                "metadata": login.metadata,
            })
        }
        Command::FetchUser { access_token } => {
            let user = client
                .fetch_user(&access_token)
                .await
                .context("fetch-user failed")?;
            json!({
                "success": user.success,
                "result": user.result,
                "message": user.message,
                "user_id": user.user_id,
                "metadata": user.metadata,
            })
        }
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SsoConfig::from_env().context("invalid client configuration")?;
    if std::env::var("LOG_LEVEL").is_err() {
        config.log_level = String::from("warn");
    }
    init_tracing(&config.log_level)?;

    let credentials = config
        .credentials()
        .context("incomplete client configuration")?;
    let transport =
        HttpTransport::new(config.request_timeout()).context("cannot create HTTP transport")?;
    debug!(
        endpoint = %credentials.endpoint(),
        api_key = %credentials.api_key(),
        "calling endpoint"
    );
    let client = SsoClient::new(credentials, Arc::new(transport));

    let output = run(&client, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
