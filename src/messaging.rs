use lapin::{Connection, ConnectionProperties, Channel, BasicProperties};
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::info;
use uuid::Uuid;

use crate::errors::GwError;
use crate::models::AggregateRequest;

/// The single task type this gateway produces.
pub const TYPE_AGGREGATE: &str = "aggregate:send";

pub const QUEUE_CRITICAL: &str = "critical";
pub const QUEUE_DEFAULT: &str = "default";
pub const QUEUE_LOW: &str = "low";
/// Tasks land here once their retry budget is spent; the requeue endpoints
/// pull from this queue by default.
pub const QUEUE_DEAD: &str = "dead";

/// Retry budget attached to every task at creation and reset on requeue.
pub const MAX_RETRY: u32 = 3;

static MAX_RETRIES: usize = 5;
static DELAY: u64 = 100;

/// Wire format of a broker task. `payload` stays opaque JSON so that broker
/// plumbing (requeue, dead-lettering) never needs to understand task bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
  pub task_id: String,
  #[serde(rename = "type")]
  pub task_type: String,
  pub payload: Value,
  pub max_retry: u32,
  pub retried: u32,
}

/// Body of an `aggregate:send` task: the JobLog id plus the original request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateTaskPayload {
  pub log_id: i64,
  pub payload: AggregateRequest,
}

impl TaskEnvelope {
  pub fn new_aggregate(log_id: i64, request: AggregateRequest) -> Result<Self, GwError> {
    let payload = serde_json::to_value(AggregateTaskPayload { log_id, payload: request })
      .map_err(|e| GwError::Enqueue(e.to_string()))?;
    Ok(Self {
      task_id: Uuid::new_v4().to_string(),
      task_type: TYPE_AGGREGATE.to_string(),
      payload,
      max_retry: MAX_RETRY,
      retried: 0,
    })
  }

  /// Fresh identity and full retry budget for a manual requeue.
  pub fn requeued(&self) -> Self {
    Self {
      task_id: Uuid::new_v4().to_string(),
      task_type: self.task_type.clone(),
      payload: self.payload.clone(),
      max_retry: MAX_RETRY,
      retried: 0,
    }
  }
}

pub async fn create_rabbit_channel(rabbitmq_url: &str) -> Result<Channel, lapin::Error> {
  let conn = Retry::spawn(ExponentialBackoff::from_millis(DELAY).take(MAX_RETRIES), || {
    Connection::connect(rabbitmq_url, ConnectionProperties::default())
  })
    .await?;
  let channel = conn.create_channel().await?;
  info!("RabbitMQ channel created");
  Ok(channel)
}

/// Declares the three priority queues plus the dead queue. Idempotent.
pub async fn declare_queues(channel: &Channel) -> Result<(), lapin::Error> {
  for queue in [QUEUE_CRITICAL, QUEUE_DEFAULT, QUEUE_LOW, QUEUE_DEAD] {
    channel
      .queue_declare(
        queue,
        QueueDeclareOptions { durable: true, ..Default::default() },
        FieldTable::default(),
      )
      .await?;
  }
  Ok(())
}

pub async fn publish_message(channel: &Channel, queue: &str, payload: &[u8]) -> Result<(), lapin::Error> {
  Retry::spawn(ExponentialBackoff::from_millis(DELAY).take(MAX_RETRIES), || async {
    channel.basic_publish("", queue, BasicPublishOptions::default(), payload, BasicProperties::default()).await
  })
    .await?;
  Ok(())
}

/// A task pulled off a queue by id, still unacknowledged. Callers decide its
/// fate: `remove` deletes it from the source queue, `release` puts it back.
pub struct FetchedTask {
  pub envelope: TaskEnvelope,
  delivery: Delivery,
}

impl FetchedTask {
  pub async fn remove(self) -> Result<(), GwError> {
    self.delivery.ack(BasicAckOptions::default()).await?;
    Ok(())
  }

  pub async fn release(self) -> Result<(), GwError> {
    self
      .delivery
      .nack(BasicNackOptions { requeue: true, ..Default::default() })
      .await?;
    Ok(())
  }
}

/// Thin client over the broker channel used by the submission and requeue
/// services.
#[derive(Clone)]
pub struct QueueClient {
  channel: Channel,
}

impl QueueClient {
  pub fn new(channel: Channel) -> Self {
    Self { channel }
  }

  /// Publishes the envelope to the named queue and returns its task id.
  pub async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> Result<String, GwError> {
    let bytes = serde_json::to_vec(envelope).map_err(|e| GwError::Enqueue(e.to_string()))?;
    publish_message(&self.channel, queue, &bytes)
      .await
      .map_err(|e| GwError::Enqueue(e.to_string()))?;
    Ok(envelope.task_id.clone())
  }

  /// Finds a task in the named queue by its id. Messages inspected along the
  /// way are held unacked until the scan finishes, then returned to the queue,
  /// so nothing is lost or reordered permanently.
  pub async fn fetch_task(&self, queue: &str, task_id: &str) -> Result<FetchedTask, GwError> {
    let mut skipped = Vec::new();
    let mut found = None;

    loop {
      let message = self
        .channel
        .basic_get(queue, BasicGetOptions::default())
        .await?;
      match message {
        Some(msg) => match serde_json::from_slice::<TaskEnvelope>(&msg.delivery.data) {
          Ok(envelope) if envelope.task_id == task_id => {
            found = Some(FetchedTask { envelope, delivery: msg.delivery });
            break;
          }
          _ => skipped.push(msg.delivery),
        },
        None => break,
      }
    }

    for delivery in skipped {
      let _ = delivery
        .nack(BasicNackOptions { requeue: true, ..Default::default() })
        .await;
    }

    found.ok_or_else(|| GwError::TaskNotFound {
      queue: queue.to_string(),
      task_id: task_id.to_string(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn request() -> AggregateRequest {
    serde_json::from_value(json!({
      "orgUnit": "ou1",
      "period": "202401",
      "dataSet": "ds1",
      "dataValues": {"BCG": "10"}
    }))
    .unwrap()
  }

  #[test]
  fn new_aggregate_envelope_carries_retry_budget() {
    let envelope = TaskEnvelope::new_aggregate(42, request()).unwrap();
    assert_eq!(envelope.task_type, TYPE_AGGREGATE);
    assert_eq!(envelope.max_retry, 3);
    assert_eq!(envelope.retried, 0);
    assert_eq!(envelope.payload["log_id"], json!(42));
    assert_eq!(envelope.payload["payload"]["orgUnit"], json!("ou1"));
  }

  #[test]
  fn wire_format_round_trips() {
    let envelope = TaskEnvelope::new_aggregate(7, request()).unwrap();
    let bytes = serde_json::to_vec(&envelope).unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["type"], json!("aggregate:send"));
    assert_eq!(value["payload"]["log_id"], json!(7));

    let back: TaskEnvelope = serde_json::from_slice(&bytes).unwrap();
    let body: AggregateTaskPayload = serde_json::from_value(back.payload).unwrap();
    assert_eq!(body.log_id, 7);
    assert_eq!(body.payload.data_set, "ds1");
  }

  #[test]
  fn requeued_envelope_gets_fresh_id_and_budget() {
    let mut envelope = TaskEnvelope::new_aggregate(7, request()).unwrap();
    envelope.retried = 3;
    let requeued = envelope.requeued();
    assert_ne!(requeued.task_id, envelope.task_id);
    assert_eq!(requeued.retried, 0);
    assert_eq!(requeued.max_retry, 3);
    assert_eq!(requeued.payload, envelope.payload);
  }
}
