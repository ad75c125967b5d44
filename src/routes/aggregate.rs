use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use warp::Filter;

use crate::messaging::{QueueClient, QUEUE_DEAD, TYPE_AGGREGATE};
use crate::requeue;
use crate::routes::{reject, with_db, with_queue_client};
use crate::submission;

#[derive(Debug, Deserialize)]
pub struct BatchRequeueRequest {
  #[serde(default)]
  pub queue: String,
  pub task_ids: Vec<String>,
}

/// POST /aggregate
pub fn submit_route(
  db_pool: PgPool,
  queue_client: QueueClient,
  mapping_scheme: String,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("aggregate")
    .and(warp::path::end())
    .and(warp::post())
    .and(warp::body::json())
    .and(with_db(db_pool))
    .and(with_queue_client(queue_client))
    .and(warp::any().map(move || mapping_scheme.clone()))
    .and_then(handle_submit)
}

async fn handle_submit(
  raw_request: Value,
  db_pool: PgPool,
  queue_client: QueueClient,
  mapping_scheme: String,
) -> Result<impl warp::Reply, warp::Rejection> {
  let response = submission::submit(&db_pool, &queue_client, &mapping_scheme, raw_request)
    .await
    .map_err(reject)?;
  Ok(warp::reply::json(&response))
}

/// POST /aggregate/reenqueue/{task_id}?queue=dead
pub fn requeue_route(
  db_pool: PgPool,
  queue_client: QueueClient,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("aggregate" / "reenqueue" / String)
    .and(warp::post())
    .and(warp::query::<HashMap<String, String>>())
    .and(with_db(db_pool))
    .and(with_queue_client(queue_client))
    .and_then(handle_requeue)
}

async fn handle_requeue(
  task_id: String,
  query: HashMap<String, String>,
  db_pool: PgPool,
  queue_client: QueueClient,
) -> Result<impl warp::Reply, warp::Rejection> {
  let queue = query
    .get("queue")
    .map(String::as_str)
    .unwrap_or(QUEUE_DEAD)
    .to_string();

  let new_task_id = requeue::requeue_one(&db_pool, &queue_client, &queue, &task_id)
    .await
    .map_err(reject)?;

  Ok(warp::reply::json(&json!({
    "message": format!("Re-enqueued task {task_id} (type: {TYPE_AGGREGATE}) from {queue} queue"),
    "task_id": new_task_id,
  })))
}

/// POST /aggregate/reenqueue/batch
pub fn requeue_batch_route(
  db_pool: PgPool,
  queue_client: QueueClient,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("aggregate" / "reenqueue" / "batch")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_db(db_pool))
    .and(with_queue_client(queue_client))
    .and_then(handle_requeue_batch)
}

async fn handle_requeue_batch(
  request: BatchRequeueRequest,
  db_pool: PgPool,
  queue_client: QueueClient,
) -> Result<impl warp::Reply, warp::Rejection> {
  let queue = if request.queue.is_empty() {
    QUEUE_DEAD.to_string()
  } else {
    request.queue
  };

  let report = requeue::requeue_batch(&db_pool, &queue_client, &queue, &request.task_ids).await;
  Ok(warp::reply::json(&report))
}
