use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::errors::GwError;
use crate::joblog;
use crate::messaging::{QueueClient, QUEUE_DEFAULT};

/// Per-batch outcome report. Failed ids stay in their source queue, so a
/// partially failed batch can simply be retried with the failed ids.
#[derive(Debug, Serialize)]
pub struct BatchRequeueReport {
  pub queue: String,
  #[serde(rename = "reEnqueued")]
  pub re_enqueued: usize,
  pub failed: usize,
  pub errors: Vec<String>,
}

/// Re-submits one task from the named queue (usually `dead`) under a fresh
/// task identity with a reset retry budget. The original entry is removed
/// only once its replacement is safely enqueued. A JobLog that cannot be
/// found for the old task id is tolerated; relinking is best-effort.
pub async fn requeue_one(
  pool: &PgPool,
  queue_client: &QueueClient,
  queue: &str,
  task_id: &str,
) -> Result<String, GwError> {
  let fetched = queue_client.fetch_task(queue, task_id).await?;
  let replacement = fetched.envelope.requeued();

  let job_log = match joblog::get_by_task_id(pool, task_id).await {
    Ok(jl) => Some(jl),
    Err(e) => {
      warn!(task_id = %task_id, error = %e, "No job log found for requeued task");
      None
    }
  };

  match queue_client.enqueue(QUEUE_DEFAULT, &replacement).await {
    Ok(new_task_id) => {
      if let Some(jl) = job_log {
        if let Err(e) = joblog::update_task_id(pool, jl.id, &new_task_id).await {
          warn!(job_id = jl.id, error = %e, "Failed to relink job log to new task");
        }
      }
      fetched.remove().await?;
      info!(old = %task_id, new = %new_task_id, queue = %queue, "Task re-enqueued");
      Ok(new_task_id)
    }
    Err(e) => {
      // put the original back so it stays requeue-able
      let _ = fetched.release().await;
      Err(e)
    }
  }
}

/// Applies `requeue_one` per id. Partial failure is expected: each failure is
/// reported against its task id and never aborts the rest of the batch.
pub async fn requeue_batch(
  pool: &PgPool,
  queue_client: &QueueClient,
  queue: &str,
  task_ids: &[String],
) -> BatchRequeueReport {
  let mut report = BatchRequeueReport {
    queue: queue.to_string(),
    re_enqueued: 0,
    failed: 0,
    errors: Vec::new(),
  };

  for task_id in task_ids {
    match requeue_one(pool, queue_client, queue, task_id).await {
      Ok(_) => report.re_enqueued += 1,
      Err(e) => {
        report.failed += 1;
        report.errors.push(format!("Task {task_id}: {e}"));
      }
    }
  }

  report
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn report_serializes_with_wire_field_names() {
    let report = BatchRequeueReport {
      queue: "dead".into(),
      re_enqueued: 2,
      failed: 1,
      errors: vec!["Task t3: Task t3 not found in queue dead".into()],
    };
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["reEnqueued"], 2);
    assert_eq!(value["failed"], 1);
    assert_eq!(value["errors"].as_array().unwrap().len(), 1);
  }
}
