use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::errors::GwError;
use crate::joblog;
use crate::mapping;
use crate::messaging::{QueueClient, TaskEnvelope, QUEUE_DEFAULT};
use crate::models::{AggregateRequest, AggregateResponse};
use crate::validation;

/// Accepts one aggregate submission: validate, persist the JobLog, enqueue
/// the task, then link the task id back to the row.
///
/// The JobLog insert and the enqueue are two independent writes. If the
/// enqueue fails after the insert committed, the row stays `queued` with a
/// null task_id and needs a manual requeue to recover; there is no automatic
/// reconciliation sweep.
pub async fn submit(
  pool: &PgPool,
  queue_client: &QueueClient,
  mapping_scheme: &str,
  raw_request: Value,
) -> Result<AggregateResponse, GwError> {
  validation::validate_aggregate_request(&raw_request)?;

  let request: AggregateRequest = serde_json::from_value(raw_request.clone())
    .map_err(|e| GwError::InvalidJson(e.to_string()))?;

  let job_log = joblog::create(pool, &raw_request).await?;

  let envelope = TaskEnvelope::new_aggregate(job_log.id, request.clone())?;
  let task_id = queue_client.enqueue(QUEUE_DEFAULT, &envelope).await?;

  if let Err(e) = joblog::update_task_id(pool, job_log.id, &task_id).await {
    warn!(job_id = job_log.id, error = %e, "Failed to link task id to job log");
  }

  let mappings = mapping::mappings_by_scheme(pool, mapping_scheme)
    .await
    .unwrap_or_else(|e| {
      debug!(error = %e, "Failed to load mappings for response preview");
      Default::default()
    });
  let payload = request.to_dhis2_payload(&mappings, Utc::now().date_naive());

  info!(job_id = job_log.id, task_id = %task_id, "Aggregate request queued");
  Ok(AggregateResponse {
    message: "Aggregate request queued for processing".to_string(),
    payload,
    submission_id: job_log.id,
    task_id,
  })
}
