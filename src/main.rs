use std::sync::Arc;

use clap::Parser;
use editor_toolsd::{Args, DefaultFeatureProvider};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout may carry the protocol, so logs always go to stderr
    let filter = match &args.log_filter {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = args.server_config();
    let features = Arc::new(DefaultFeatureProvider::new());

    match args.socket_path() {
        Some(path) => editor_toolsd::run_socket_server(&path, features, config).await,
        None => editor_toolsd::serve_stdio(features, config).await,
    }
}
