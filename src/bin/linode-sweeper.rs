//! linode-sweeper: delete leftover test objects whose label starts with a prefix.
//!
//! Exits 0 iff every candidate was deleted or was already gone.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use linode_provider::client::{Client, HttpTransport};
use linode_provider::config::{ProviderConfig, TOKEN_ENV};
use linode_provider::error::ProviderError;
use linode_provider::sweeper::{self, SweepReport};

/// Linode test object sweeper
#[derive(Parser, Debug)]
#[command(name = "linode-sweeper", version, about)]
struct Args {
    /// Label prefix of objects to delete (at least 3 characters)
    #[arg(long)]
    prefix: String,

    /// Only sweep these kinds, e.g. `--kind linode_volume` (repeatable)
    #[arg(long = "kind")]
    kinds: Vec<String>,

    /// API token
    #[arg(long, env = TOKEN_ENV, hide_env_values = true)]
    token: String,

    /// API base URL override
    #[arg(long, env = "LINODE_URL")]
    url: Option<String>,
}

async fn sweep(args: &Args, cancel: &CancellationToken) -> Result<SweepReport, ProviderError> {
    let mut options = json!({ "token": args.token });
    if let Some(url) = &args.url {
        options["url"] = json!(url);
    }
    let config = ProviderConfig::from_options(&options)?;
    let transport = HttpTransport::new(config.transport_config())
        .map_err(|e| ProviderError::Configuration(e.to_string()))?;
    let client = Client::new(Arc::new(transport)).with_paging(config.page_size, config.max_pages);

    let registry = linode_provider::resources::registry();
    let mut sweepers = registry.sweepers();
    for kind in &args.kinds {
        if !sweepers.iter().any(|s| s.name() == kind) {
            return Err(ProviderError::UnknownResource(kind.clone()));
        }
    }
    sweepers.retain(|s| args.kinds.is_empty() || args.kinds.iter().any(|k| k == s.name()));
    sweepers.sort_by_key(|s| s.name());

    info!(prefix = %args.prefix, kinds = sweepers.len(), "Sweeping");
    sweeper::run(&client, &sweepers, &args.prefix, cancel).await
}

#[tokio::main]
async fn main() -> ExitCode {
    linode_provider::init_logging();
    let args = Args::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current deletion");
            on_signal.cancel();
        }
    });

    match sweep(&args, &cancel).await {
        Ok(report) => {
            print!("{}", report);
            println!("{} deleted", report.deleted());
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!(error = %e, "Sweep aborted");
            ExitCode::FAILURE
        },
    }
}
