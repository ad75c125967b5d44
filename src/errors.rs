use thiserror::Error;

/// Gateway error taxonomy. Validation and persistence errors surface at the
/// boundary where they occur; delivery failures are recorded on the job log
/// rather than raised, since a downstream rejection is a business outcome.
#[derive(Debug, Error)]
pub enum GwError {
  #[error("Invalid JSON: {0}")]
  InvalidJson(String),

  #[error("Request does not match required schema: {0:?}")]
  ClientInput(Vec<String>),

  #[error("Schema error: {0}")]
  Schema(String),

  #[error("Persistence error: {0}")]
  Persistence(#[from] sqlx::Error),

  #[error("Broker error: {0}")]
  Broker(#[from] lapin::Error),

  #[error("Failed to enqueue task: {0}")]
  Enqueue(String),

  #[error("Task {task_id} not found in queue {queue}")]
  TaskNotFound { queue: String, task_id: String },

  #[error("{0}")]
  Delivery(String),

  #[error("Malformed task payload: {0}")]
  MalformedTask(String),
}
