use std::env;

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub rabbitmq_url: String,
  pub server_port: u16,
  pub max_concurrent: usize,
  pub save_response: bool,
  pub mapping_scheme: String,
  pub dhis2_base_url: String,
  pub dhis2_username: String,
  pub dhis2_password: String,
}

impl Config {
  pub fn from_env() -> Self {
    Self {
      database_url: env::var("DATABASE_URL").unwrap(),
      rabbitmq_url: env::var("RABBITMQ_URL").unwrap(),
      server_port: env::var("SERVER_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()
        .unwrap_or(8080),
      max_concurrent: env::var("MAX_CONCURRENT")
        .unwrap_or_else(|_| "10".into())
        .parse()
        .unwrap_or(10),
      save_response: env::var("SAVE_RESPONSE")
        .map(|v| v == "true")
        .unwrap_or(false),
      // empty means code-keyed mapping lookups, "UID" keys by data element id
      mapping_scheme: env::var("AGGREGATE_MAPPING_SCHEME").unwrap_or_default(),
      dhis2_base_url: env::var("DHIS2_BASE_URL").unwrap_or_default(),
      dhis2_username: env::var("DHIS2_USERNAME").unwrap_or_default(),
      dhis2_password: env::var("DHIS2_PASSWORD").unwrap_or_default(),
    }
  }
}
