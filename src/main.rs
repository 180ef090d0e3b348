use streamus::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::load()?;
    info!(
        port = config.listen_on_port,
        workspace = %config.workspace,
        livekit_url = %config.livekit_url,
        "Starting StreamUs egress coordinator"
    );

    streamus::run(config).await
}
