use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::errors::GwError;
use crate::models::{DataValueSetPayload, ImportSummary};

/// The downstream delivery collaborator. One call per attempt; retry and
/// backoff live in the broker layer, not here. The worker receives an
/// implementation at construction so tests can substitute their own.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
  async fn send_aggregate(&self, payload: &DataValueSetPayload) -> Result<ImportSummary, GwError>;
}

/// DHIS2 Web API client posting data value sets with basic auth.
pub struct Dhis2Client {
  http: Client,
  base_url: String,
  username: String,
  password: String,
}

impl Dhis2Client {
  pub fn new(base_url: &str, username: &str, password: &str) -> Self {
    Self {
      http: Client::new(),
      base_url: base_url.trim_end_matches('/').to_string(),
      username: username.to_string(),
      password: password.to_string(),
    }
  }
}

#[async_trait]
impl DeliveryClient for Dhis2Client {
  async fn send_aggregate(&self, payload: &DataValueSetPayload) -> Result<ImportSummary, GwError> {
    let url = format!("{}/api/dataValueSets", self.base_url);
    debug!(url = %url, org_unit = %payload.org_unit, "posting data value set");

    let response = self
      .http
      .post(&url)
      .basic_auth(&self.username, Some(&self.password))
      .json(payload)
      .send()
      .await
      .map_err(|e| GwError::Delivery(e.to_string()))?;

    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| GwError::Delivery(e.to_string()))?;

    if !status.is_success() {
      return Err(GwError::Delivery(format!("DHIS2 returned {status}: {body}")));
    }

    serde_json::from_str(&body)
      .map_err(|e| GwError::Delivery(format!("unreadable DHIS2 response: {e}")))
  }
}
