use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::delivery::DeliveryClient;
use crate::errors::GwError;
use crate::joblog::{self, JobLog, STATUS_FAILED};
use crate::mapping::{self, Mapping};
use crate::messaging::AggregateTaskPayload;
use crate::models::ImportSummary;

/// Narrow store seam for the worker path: the JobLog row operations and the
/// mapping-table read that one processing attempt needs.
#[async_trait]
pub trait JobStore: Send + Sync {
  async fn load(&self, id: i64) -> Result<JobLog, sqlx::Error>;
  async fn increment_retry(&self, id: i64) -> Result<(), sqlx::Error>;
  async fn update_dhis2_payload(&self, id: i64, payload: &str) -> Result<(), sqlx::Error>;
  async fn update_status_and_errors(
    &self,
    id: i64,
    status: &str,
    errors: &str,
  ) -> Result<(), sqlx::Error>;
  async fn update_response(&self, id: i64, response: &str) -> Result<(), sqlx::Error>;
  async fn mappings(&self, scheme: &str) -> Result<HashMap<String, Mapping>, sqlx::Error>;
}

/// Production store backed by the shared Postgres pool.
pub struct PgJobStore {
  pool: PgPool,
}

impl PgJobStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl JobStore for PgJobStore {
  async fn load(&self, id: i64) -> Result<JobLog, sqlx::Error> {
    joblog::load(&self.pool, id).await
  }

  async fn increment_retry(&self, id: i64) -> Result<(), sqlx::Error> {
    joblog::increment_retry(&self.pool, id).await
  }

  async fn update_dhis2_payload(&self, id: i64, payload: &str) -> Result<(), sqlx::Error> {
    joblog::update_dhis2_payload(&self.pool, id, payload).await
  }

  async fn update_status_and_errors(
    &self,
    id: i64,
    status: &str,
    errors: &str,
  ) -> Result<(), sqlx::Error> {
    joblog::update_status_and_errors(&self.pool, id, status, errors).await
  }

  async fn update_response(&self, id: i64, response: &str) -> Result<(), sqlx::Error> {
    joblog::update_response(&self.pool, id, response).await
  }

  async fn mappings(&self, scheme: &str) -> Result<HashMap<String, Mapping>, sqlx::Error> {
    mapping::mappings_by_scheme(&self.pool, scheme).await
  }
}

/// Everything a worker needs to process tasks. Both collaborators are
/// injected here rather than set through any process-global state.
pub struct WorkerContext {
  pub store: Arc<dyn JobStore>,
  pub delivery: Arc<dyn DeliveryClient>,
  pub save_response: bool,
  pub mapping_scheme: String,
}

/// Handles one `aggregate:send` attempt.
///
/// The JobLog row is reloaded from the store rather than trusted from the
/// task payload, and the downstream payload is re-derived with the current
/// mapping table so mapping edits made since submission take effect. On a
/// re-attempt the retry counter is bumped and the status reset to `queued`
/// before delivery; a crash mid-delivery then leaves the row reprocessable.
///
/// Delivery failures are recorded on the JobLog and do not propagate: a
/// downstream rejection is an expected outcome, not a handler failure. Only
/// errors returned from this function reach the broker retry loop.
pub async fn process_aggregate_task(
  ctx: &WorkerContext,
  task: &AggregateTaskPayload,
) -> Result<(), GwError> {
  let job_log = ctx.store.load(task.log_id).await?;

  let mappings = ctx.store.mappings(&ctx.mapping_scheme).await.unwrap_or_else(|e| {
    debug!(error = %e, "Failed to load mappings, transforming with none");
    Default::default()
  });
  let payload = task.payload.to_dhis2_payload(&mappings, Utc::now().date_naive());

  if job_log.retry_count > 0 {
    if let Err(e) = ctx.store.increment_retry(job_log.id).await {
      error!(job_id = job_log.id, error = %e, "Failed to increment retry count");
    }
  } else {
    match serde_json::to_string(&payload) {
      Ok(snapshot) => {
        if let Err(e) = ctx.store.update_dhis2_payload(job_log.id, &snapshot).await {
          error!(job_id = job_log.id, error = %e, "Failed to store transformed payload");
        }
      }
      Err(e) => return Err(GwError::MalformedTask(e.to_string())),
    }
  }

  let (status, errors, response) = delivery_outcome(ctx.delivery.send_aggregate(&payload).await);

  if errors.is_empty() {
    info!(job_id = job_log.id, status = %status, "Aggregate data values delivered");
  } else {
    error!(job_id = job_log.id, errors = %errors, "Aggregate delivery failed");
  }

  if let Err(e) = ctx.store.update_status_and_errors(job_log.id, &status, &errors).await {
    error!(job_id = job_log.id, error = %e, "Failed to record delivery outcome");
  }

  if ctx.save_response && !response.is_empty() {
    if let Err(e) = ctx.store.update_response(job_log.id, &response).await {
      error!(job_id = job_log.id, error = %e, "Failed to store delivery response");
    }
  }

  Ok(())
}

/// Folds a delivery result into `(status, errors, response)` columns. On
/// success the status mirrors whatever token the downstream reported, it is
/// not a fixed literal.
fn delivery_outcome(result: Result<ImportSummary, GwError>) -> (String, String, String) {
  match result {
    Err(GwError::Delivery(detail)) => (STATUS_FAILED.to_string(), detail, String::new()),
    Err(e) => (STATUS_FAILED.to_string(), e.to_string(), String::new()),
    Ok(summary) => match serde_json::to_string(&summary) {
      Ok(raw) => (summary.status.clone(), String::new(), raw),
      Err(e) => (STATUS_FAILED.to_string(), e.to_string(), String::new()),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mapping::test_mapping;
  use crate::models::DataValueSetPayload;
  use serde_json::json;
  use std::sync::Mutex;

  fn summary(status: &str) -> ImportSummary {
    serde_json::from_value(json!({"status": status, "importCount": {"imported": 1}})).unwrap()
  }

  #[test]
  fn delivery_error_marks_failed_and_keeps_response_empty() {
    let (status, errors, response) =
      delivery_outcome(Err(GwError::Delivery("connection refused".into())));
    assert_eq!(status, "failed");
    assert_eq!(errors, "connection refused");
    assert_eq!(response, "");
  }

  #[test]
  fn delivery_success_mirrors_downstream_status_token() {
    let (status, errors, response) = delivery_outcome(Ok(summary("WARNING")));
    assert_eq!(status, "WARNING");
    assert_eq!(errors, "");
    let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(parsed["status"], "WARNING");
    assert_eq!(parsed["importCount"]["imported"], 1);
  }

  fn job_log(id: i64, retry_count: i32) -> JobLog {
    JobLog {
      id,
      submitted_at: Utc::now(),
      payload: json!({}),
      status: "queued".to_string(),
      retry_count,
      last_attempt_at: None,
      task_id: None,
      response: None,
      errors: None,
      dhis2_payload: None,
    }
  }

  /// Records every store mutation in call order, pretending the row has a
  /// fixed retry count.
  struct RecordingStore {
    retry_count: i32,
    ops: Arc<Mutex<Vec<String>>>,
  }

  #[async_trait]
  impl JobStore for RecordingStore {
    async fn load(&self, id: i64) -> Result<JobLog, sqlx::Error> {
      Ok(job_log(id, self.retry_count))
    }

    async fn increment_retry(&self, _id: i64) -> Result<(), sqlx::Error> {
      self.ops.lock().unwrap().push("increment_retry".to_string());
      Ok(())
    }

    async fn update_dhis2_payload(&self, _id: i64, _payload: &str) -> Result<(), sqlx::Error> {
      self.ops.lock().unwrap().push("snapshot".to_string());
      Ok(())
    }

    async fn update_status_and_errors(
      &self,
      _id: i64,
      status: &str,
      errors: &str,
    ) -> Result<(), sqlx::Error> {
      self.ops.lock().unwrap().push(format!("record {status}|{errors}"));
      Ok(())
    }

    async fn update_response(&self, _id: i64, _response: &str) -> Result<(), sqlx::Error> {
      self.ops.lock().unwrap().push("save_response".to_string());
      Ok(())
    }

    async fn mappings(&self, _scheme: &str) -> Result<HashMap<String, Mapping>, sqlx::Error> {
      let mut mappings = HashMap::new();
      mappings.insert("BCG".to_string(), test_mapping("BCG", "de1", "coc1"));
      Ok(mappings)
    }
  }

  enum StubOutcome {
    Succeed(String),
    Fail(String),
  }

  struct StubDelivery {
    outcome: StubOutcome,
    ops: Arc<Mutex<Vec<String>>>,
  }

  #[async_trait]
  impl DeliveryClient for StubDelivery {
    async fn send_aggregate(
      &self,
      _payload: &DataValueSetPayload,
    ) -> Result<ImportSummary, GwError> {
      self.ops.lock().unwrap().push("deliver".to_string());
      match &self.outcome {
        StubOutcome::Succeed(status) => Ok(summary(status)),
        StubOutcome::Fail(detail) => Err(GwError::Delivery(detail.clone())),
      }
    }
  }

  fn context(
    retry_count: i32,
    outcome: StubOutcome,
    save_response: bool,
  ) -> (WorkerContext, Arc<Mutex<Vec<String>>>) {
    let ops = Arc::new(Mutex::new(Vec::new()));
    let ctx = WorkerContext {
      store: Arc::new(RecordingStore { retry_count, ops: ops.clone() }),
      delivery: Arc::new(StubDelivery { outcome, ops: ops.clone() }),
      save_response,
      mapping_scheme: String::new(),
    };
    (ctx, ops)
  }

  fn task() -> AggregateTaskPayload {
    serde_json::from_value(json!({
      "log_id": 42,
      "payload": {
        "orgUnit": "ou1",
        "period": "202401",
        "dataSet": "ds1",
        "dataValues": {"BCG": "10"}
      }
    }))
    .unwrap()
  }

  #[tokio::test]
  async fn re_attempt_bumps_retry_before_delivery() {
    let (ctx, ops) = context(2, StubOutcome::Fail("connection refused".into()), false);
    process_aggregate_task(&ctx, &task()).await.unwrap();

    assert_eq!(
      *ops.lock().unwrap(),
      vec![
        "increment_retry".to_string(),
        "deliver".to_string(),
        "record failed|connection refused".to_string(),
      ]
    );
  }

  #[tokio::test]
  async fn first_attempt_snapshots_payload_instead_of_bumping_retry() {
    let (ctx, ops) = context(0, StubOutcome::Succeed("SUCCESS".into()), false);
    process_aggregate_task(&ctx, &task()).await.unwrap();

    assert_eq!(
      *ops.lock().unwrap(),
      vec!["snapshot".to_string(), "deliver".to_string(), "record SUCCESS|".to_string()]
    );
  }

  #[tokio::test]
  async fn response_is_stored_only_when_enabled() {
    let (ctx, ops) = context(0, StubOutcome::Succeed("WARNING".into()), true);
    process_aggregate_task(&ctx, &task()).await.unwrap();
    assert_eq!(ops.lock().unwrap().last().unwrap(), "save_response");

    let (ctx, ops) = context(0, StubOutcome::Fail("connection refused".into()), true);
    process_aggregate_task(&ctx, &task()).await.unwrap();
    // failed attempts leave response untouched even with saving enabled
    assert!(!ops.lock().unwrap().contains(&"save_response".to_string()));
  }

  #[tokio::test]
  async fn delivery_error_is_recorded_not_raised() {
    let (ctx, _ops) = context(0, StubOutcome::Fail("connection refused".into()), false);
    assert!(process_aggregate_task(&ctx, &task()).await.is_ok());
  }
}
