use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use warp::Filter;

use crate::joblog::{self, JobLogFilter};
use crate::models::PaginatedResponse;
use crate::routes::{reject, with_db};

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
  pub status: Option<String>,
  pub task_id: Option<String>,
  pub job_id: Option<i64>,
  pub submitted_at: Option<String>,
  pub submitted_from: Option<String>,
  pub submitted_to: Option<String>,
  pub page: Option<i64>,
  pub page_size: Option<i64>,
}

fn parse_date(value: &Option<String>) -> Option<DateTime<Utc>> {
  value
    .as_deref()
    .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

/// GET /logs: paginated job log listing with optional filters.
pub fn logs_route(
  db_pool: PgPool,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("logs")
    .and(warp::path::end())
    .and(warp::get())
    .and(warp::query::<LogsQuery>())
    .and(with_db(db_pool))
    .and_then(handle_logs)
}

async fn handle_logs(
  query: LogsQuery,
  db_pool: PgPool,
) -> Result<impl warp::Reply, warp::Rejection> {
  let page = query.page.unwrap_or(1).max(1);
  let page_size = query.page_size.unwrap_or(10).max(1);

  let filter = JobLogFilter {
    status: query.status.clone(),
    task_id: query.task_id.clone(),
    job_id: query.job_id,
    submitted_at: parse_date(&query.submitted_at),
    submitted_from: parse_date(&query.submitted_from),
    submitted_to: parse_date(&query.submitted_to),
    page,
    page_size,
  };

  let (logs, total) = joblog::get_logs(&db_pool, &filter)
    .await
    .map_err(|e| reject(e.into()))?;

  let total_pages = (total + page_size - 1) / page_size;
  Ok(warp::reply::json(&PaginatedResponse {
    data: logs,
    page,
    page_size,
    total,
    total_pages,
  }))
}
