//! The pachub daemon.

use std::env;
use std::process;

use tokio::runtime;
use tokio::task::LocalSet;
use tracing::error;
use tracing_subscriber::EnvFilter;

use pachub::config::DEFAULT_CONFIG_FILE;
use pachub::{Config, Server};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pachub=info")),
        )
        .init();

    let config_file = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_owned());
    let config = match Config::load(&config_file) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "cannot load configuration");
            process::exit(1);
        }
    };

    // one reactor thread, no locks
    let runtime = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "cannot start the runtime");
            process::exit(1);
        }
    };

    let local = LocalSet::new();
    let served: pachub::Result<()> = local.block_on(&runtime, async {
        let server = Server::bind(&config).await?;
        server.run().await
    });

    if let Err(err) = served {
        error!(error = %err, "fatal");
        process::exit(1);
    }
}
