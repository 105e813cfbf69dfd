mod config;
mod events;
mod main_lib;

use config::Config;
use main_lib::{build_session, init_tracing, watch_listing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_format);
    let session = build_session(&config)?;
    watch_listing(&session, &config).await
}
