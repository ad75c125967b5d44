use anyhow::Context;
use std::net::SocketAddr;
use tracing::info;
use warp::Filter;

use dhis2gw::config::Config;
use dhis2gw::database::setup_database;
use dhis2gw::messaging::{create_rabbit_channel, declare_queues, QueueClient};
use dhis2gw::routes::{handle_rejection, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();
  let config = Config::from_env();
  let db_pool = setup_database(&config.database_url).await;
  let rabbit_channel = create_rabbit_channel(&config.rabbitmq_url)
    .await
    .context("Failed to create RabbitMQ channel")?;
  declare_queues(&rabbit_channel)
    .await
    .context("Failed to declare task queues")?;
  let queue_client = QueueClient::new(rabbit_channel);

  let api = routes(db_pool, queue_client, config.mapping_scheme.clone())
    .recover(handle_rejection);

  let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
  let (bound, server) = warp::serve(api).bind_with_graceful_shutdown(addr, async {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received, draining HTTP connections");
  });
  info!("Gateway API listening on {}", bound);
  server.await;
  Ok(())
}
