use std::{sync::Arc, time::Duration};

use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tracing::info;

mod api;
mod config;
mod cookies;
mod error;
mod extractor;
mod fetch;
mod playback;
mod util;

pub use error::{Error, Result};

use config::Config;
use playback::Resolver;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
  let config = Config::from_env();

  tracing_subscriber::fmt()
    .with_max_level(config.log_level)
    .init();

  let resolver = Arc::new(Resolver::new(&config)?);

  info!(
    "resolver {}, proxy {}",
    enabled_str(config.playback.resolver_enabled),
    enabled_str(config.playback.proxy_enabled)
  );

  Toplevel::new(move |s| async move {
    s.start(SubsystemBuilder::new("http", move |subsys| {
      serve(subsys, config, resolver)
    }));
  })
  .catch_signals()
  .handle_shutdown_requests(Duration::from_secs(5))
  .await?;

  Ok(())
}

async fn serve(
  subsys: SubsystemHandle,
  config: Config,
  resolver: Arc<Resolver>,
) -> anyhow::Result<()> {
  let app = api::router(resolver);

  info!("Listening on {}", config.bind_addr);

  axum::Server::bind(&config.bind_addr)
    .serve(app.into_make_service())
    .with_graceful_shutdown(subsys.on_shutdown_requested())
    .await?;

  Ok(())
}

fn enabled_str(enabled: bool) -> &'static str {
  if enabled {
    "enabled"
  } else {
    "disabled"
  }
}
