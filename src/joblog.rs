use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

/// Durable record of one submission's lifecycle. `payload` is the canonical
/// original request and never changes after insert; everything else is
/// mutated through the narrow row-scoped updates below.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobLog {
  pub id: i64,
  pub submitted_at: DateTime<Utc>,
  pub payload: Value,
  pub status: String,
  pub retry_count: i32,
  pub last_attempt_at: Option<DateTime<Utc>>,
  pub task_id: Option<String>,
  pub response: Option<String>,
  pub errors: Option<String>,
  pub dhis2_payload: Option<String>,
}

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_FAILED: &str = "failed";

const COLUMNS: &str = "id, submitted_at, payload, status, retry_count, last_attempt_at, \
                       task_id, response, errors, dhis2_payload";

/// Filter for the paginated log listing. All fields are optional and ANDed.
#[derive(Debug, Default)]
pub struct JobLogFilter {
  pub status: Option<String>,
  pub task_id: Option<String>,
  pub job_id: Option<i64>,
  pub submitted_at: Option<DateTime<Utc>>,
  pub submitted_from: Option<DateTime<Utc>>,
  pub submitted_to: Option<DateTime<Utc>>,
  pub page: i64,
  pub page_size: i64,
}

/// Inserts a new JobLog in `queued` state and returns the stored row.
pub async fn create(pool: &PgPool, payload: &Value) -> Result<JobLog, sqlx::Error> {
  sqlx::query_as::<_, JobLog>(
    "INSERT INTO submission_log (payload, status) VALUES ($1, $2) \
     RETURNING id, submitted_at, payload, status, retry_count, last_attempt_at, \
               task_id, response, errors, dhis2_payload",
  )
  .bind(payload)
  .bind(STATUS_QUEUED)
  .fetch_one(pool)
  .await
}

/// Loads the authoritative row by id.
pub async fn load(pool: &PgPool, id: i64) -> Result<JobLog, sqlx::Error> {
  sqlx::query_as::<_, JobLog>(
    "SELECT id, submitted_at, payload, status, retry_count, last_attempt_at, \
            task_id, response, errors, dhis2_payload \
     FROM submission_log WHERE id = $1",
  )
  .bind(id)
  .fetch_one(pool)
  .await
}

/// Reverse lookup from a broker task id to its JobLog.
pub async fn get_by_task_id(pool: &PgPool, task_id: &str) -> Result<JobLog, sqlx::Error> {
  sqlx::query_as::<_, JobLog>(
    "SELECT id, submitted_at, payload, status, retry_count, last_attempt_at, \
            task_id, response, errors, dhis2_payload \
     FROM submission_log WHERE task_id = $1",
  )
  .bind(task_id)
  .fetch_one(pool)
  .await
}

/// Links the JobLog to its most recent broker task. Called right after every
/// enqueue so task_id always points at the in-flight task.
pub async fn update_task_id(pool: &PgPool, id: i64, task_id: &str) -> Result<(), sqlx::Error> {
  sqlx::query("UPDATE submission_log SET task_id = $1 WHERE id = $2")
    .bind(task_id)
    .bind(id)
    .execute(pool)
    .await?;
  Ok(())
}

/// Records a delivery attempt outcome. Always bumps last_attempt_at.
pub async fn update_status_and_errors(
  pool: &PgPool,
  id: i64,
  status: &str,
  errors: &str,
) -> Result<(), sqlx::Error> {
  sqlx::query(
    "UPDATE submission_log SET status = $1, errors = $2, last_attempt_at = NOW() WHERE id = $3",
  )
  .bind(status)
  .bind(errors)
  .bind(id)
  .execute(pool)
  .await?;
  Ok(())
}

/// Stores the raw downstream response (only used when response saving is on).
pub async fn update_response(pool: &PgPool, id: i64, response: &str) -> Result<(), sqlx::Error> {
  sqlx::query(
    "UPDATE submission_log SET response = $1, last_attempt_at = NOW() WHERE id = $2",
  )
  .bind(response)
  .bind(id)
  .execute(pool)
  .await?;
  Ok(())
}

/// Stores the transformed payload snapshot taken on the first attempt.
pub async fn update_dhis2_payload(
  pool: &PgPool,
  id: i64,
  dhis2_payload: &str,
) -> Result<(), sqlx::Error> {
  sqlx::query("UPDATE submission_log SET dhis2_payload = $1 WHERE id = $2")
    .bind(dhis2_payload)
    .bind(id)
    .execute(pool)
    .await?;
  Ok(())
}

const INCREMENT_RETRY_SQL: &str = "UPDATE submission_log \
   SET retry_count = retry_count + 1, status = 'queued', last_attempt_at = NOW() \
   WHERE id = $1";

/// Bumps retry_count and resets status to `queued` in one atomic statement,
/// so concurrent attempts cannot lose an increment.
pub async fn increment_retry(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
  sqlx::query(INCREMENT_RETRY_SQL).bind(id).execute(pool).await?;
  Ok(())
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a JobLogFilter) {
  let mut has_where = false;
  let sep = |qb: &mut QueryBuilder<'a, Postgres>, has_where: &mut bool| {
    qb.push(if *has_where { " AND " } else { " WHERE " });
    *has_where = true;
  };
  if let Some(status) = &filter.status {
    sep(qb, &mut has_where);
    qb.push("status = ").push_bind(status.as_str());
  }
  if let Some(task_id) = &filter.task_id {
    sep(qb, &mut has_where);
    qb.push("task_id = ").push_bind(task_id.as_str());
  }
  if let Some(job_id) = filter.job_id {
    sep(qb, &mut has_where);
    qb.push("id = ").push_bind(job_id);
  }
  if let Some(at) = filter.submitted_at {
    sep(qb, &mut has_where);
    qb.push("submitted_at = ").push_bind(at);
  }
  if let Some(from) = filter.submitted_from {
    sep(qb, &mut has_where);
    qb.push("submitted_at >= ").push_bind(from);
  }
  if let Some(to) = filter.submitted_to {
    sep(qb, &mut has_where);
    qb.push("submitted_at <= ").push_bind(to);
  }
}

/// Paginated, filtered listing. Returns the page of rows plus the total count
/// matching the filter.
pub async fn get_logs(
  pool: &PgPool,
  filter: &JobLogFilter,
) -> Result<(Vec<JobLog>, i64), sqlx::Error> {
  let page = if filter.page < 1 { 1 } else { filter.page };
  let page_size = if filter.page_size <= 0 { 20 } else { filter.page_size };
  let offset = (page - 1) * page_size;

  let mut count_qb: QueryBuilder<Postgres> =
    QueryBuilder::new("SELECT COUNT(*) FROM submission_log");
  push_filters(&mut count_qb, filter);
  let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

  let mut qb: QueryBuilder<Postgres> =
    QueryBuilder::new(format!("SELECT {COLUMNS} FROM submission_log"));
  push_filters(&mut qb, filter);
  qb.push(" ORDER BY submitted_at DESC LIMIT ")
    .push_bind(page_size)
    .push(" OFFSET ")
    .push_bind(offset);
  let logs = qb.build_query_as::<JobLog>().fetch_all(pool).await?;

  Ok((logs, total))
}
