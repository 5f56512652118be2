use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use line_broadcast::{
    Server, ServerConfig,
    cli::{Cli, Command},
    client,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let config = ServerConfig::from(args);
            let server = Server::bind(config)
                .await
                .context("failed to start server")?;
            info!("server listening on {}", server.local_addr());

            let report = server.run_until_ctrl_c().await;
            for failure in &report.failures {
                warn!(%failure, "delivery failed");
            }
        }
        Command::Connect(args) => client::run(args).await?,
    }

    Ok(())
}
