use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!();

/// Connects to Postgres and brings the submission_log / dhis2_mappings schema
/// up to date. Both binaries call this on startup.
pub async fn setup_database(database_url: &str) -> Pool<Postgres> {
  let pool = PgPoolOptions::new()
    .max_connections(10)
    .connect(database_url)
    .await
    .expect("Failed to connect to database.");

  MIGRATOR.run(&pool)
    .await
    .expect("Failed to run database migrations.");
  info!("Database migrations complete");
  pool
}
