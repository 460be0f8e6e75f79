use clap::Parser;
use pgmock_server::config::Config;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// PostgreSQL wire protocol mock answering queries from canned responses.
#[derive(Debug, Parser)]
#[command(name = "pgmock", version)]
struct Args {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<String>,
    #[arg(short, long)]
    verbose: bool,
    /// Overrides `server.listen_addr`.
    #[arg(long)]
    listen: Option<String>,
    /// Overrides `loader.listen_addr`.
    #[arg(long)]
    loader_listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(listen) = args.loader_listen {
        config.loader.listen_addr = listen;
    }
    config.validate()?;

    pgmock_server::run(config).await
}
