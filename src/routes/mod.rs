use serde_json::json;
use sqlx::PgPool;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::errors::GwError;
use crate::messaging::QueueClient;

pub mod aggregate;
pub mod logs;

/// Wraps a gateway error so it can travel through warp's rejection machinery.
#[derive(Debug)]
pub struct ApiError(pub GwError);
impl warp::reject::Reject for ApiError {}

pub fn reject(err: GwError) -> Rejection {
  warp::reject::custom(ApiError(err))
}

pub fn with_db(db_pool: PgPool) -> impl Filter<Extract = (PgPool,), Error = Infallible> + Clone {
  warp::any().map(move || db_pool.clone())
}

pub fn with_queue_client(
  client: QueueClient,
) -> impl Filter<Extract = (QueueClient,), Error = Infallible> + Clone {
  warp::any().map(move || client.clone())
}

pub fn routes(
  db_pool: PgPool,
  queue_client: QueueClient,
  mapping_scheme: String,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  aggregate::submit_route(db_pool.clone(), queue_client.clone(), mapping_scheme)
    .or(aggregate::requeue_batch_route(db_pool.clone(), queue_client.clone()))
    .or(aggregate::requeue_route(db_pool.clone(), queue_client))
    .or(logs::logs_route(db_pool))
}

/// Maps rejections to the `{error, detail}` JSON shape with the right status
/// code. Client input problems get a 400, missing tasks a 404, everything
/// else a 500 with the detail kept server-side.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
  let (code, error, detail) = if let Some(ApiError(e)) = err.find::<ApiError>() {
    match e {
      GwError::ClientInput(details) => (
        StatusCode::BAD_REQUEST,
        "Request does not match required schema".to_string(),
        Some(json!(details)),
      ),
      GwError::InvalidJson(detail) => {
        (StatusCode::BAD_REQUEST, format!("Invalid JSON: {detail}"), None)
      }
      GwError::TaskNotFound { .. } => (StatusCode::NOT_FOUND, e.to_string(), None),
      other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string(), None),
    }
  } else if err.is_not_found() {
    (StatusCode::NOT_FOUND, "Not found".to_string(), None)
  } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
    (StatusCode::BAD_REQUEST, format!("Invalid JSON: {e}"), None)
  } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string(), None)
  } else {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string(), None)
  };

  let body = warp::reply::json(&crate::models::ErrorResponse { error, detail });
  Ok(warp::reply::with_status(body, code))
}
