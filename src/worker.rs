use anyhow::Context;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions};
use lapin::types::FieldTable;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::time::Duration;
use tracing::{error, info, warn};

use dhis2gw::config::Config;
use dhis2gw::database::setup_database;
use dhis2gw::delivery::Dhis2Client;
use dhis2gw::errors::GwError;
use dhis2gw::messaging::{
  create_rabbit_channel, declare_queues, publish_message, AggregateTaskPayload, QueueClient,
  TaskEnvelope, QUEUE_DEAD, TYPE_AGGREGATE,
};
use dhis2gw::worker_processing::{process_aggregate_task, PgJobStore, WorkerContext};
use dhis2gw::worker_scheduler::{PriorityClass, Scheduler};

type Scheduled = (TaskEnvelope, Delivery);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();
  let config = Config::from_env();

  let db_pool = setup_database(&config.database_url).await;
  let rabbit_channel = create_rabbit_channel(&config.rabbitmq_url)
    .await
    .context("Failed to create RabbitMQ channel")?;
  declare_queues(&rabbit_channel)
    .await
    .context("Failed to declare task queues")?;
  let queue_client = QueueClient::new(rabbit_channel.clone());

  let ctx = Arc::new(WorkerContext {
    store: Arc::new(PgJobStore::new(db_pool)),
    delivery: Arc::new(Dhis2Client::new(
      &config.dhis2_base_url,
      &config.dhis2_username,
      &config.dhis2_password,
    )),
    save_response: config.save_response,
    mapping_scheme: config.mapping_scheme.clone(),
  });

  let scheduler: Arc<Scheduler<Scheduled>> = Arc::new(Scheduler::new());
  let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
  let shutdown = Arc::new(AtomicBool::new(false));

  // one consumer per priority class, all feeding the weighted scheduler
  for class in PriorityClass::ALL {
    let mut consumer = rabbit_channel
      .basic_consume(
        class.queue_name(),
        &format!("worker-{}", class.queue_name()),
        BasicConsumeOptions::default(),
        FieldTable::default(),
      )
      .await
      .with_context(|| format!("Failed to start consumer for {}", class.queue_name()))?;

    let scheduler = scheduler.clone();
    let channel = rabbit_channel.clone();
    tokio::spawn(async move {
      while let Some(delivery) = consumer.next().await {
        match delivery {
          Ok(delivery) => match serde_json::from_slice::<TaskEnvelope>(&delivery.data) {
            Ok(envelope) => scheduler.add_task(class, (envelope, delivery)).await,
            Err(e) => {
              // no envelope means no retry bookkeeping; dead-letter it as-is
              error!(queue = class.queue_name(), error = %e, "Unreadable task, moving to dead queue");
              if publish_message(&channel, QUEUE_DEAD, &delivery.data).await.is_ok() {
                let _ = delivery.ack(BasicAckOptions::default()).await;
              } else {
                let _ = delivery
                  .nack(BasicNackOptions { requeue: true, ..Default::default() })
                  .await;
              }
            }
          },
          Err(e) => error!(queue = class.queue_name(), "Consumer error: {:?}", e),
        }
      }
    });
  }

  {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
      let _ = tokio::signal::ctrl_c().await;
      info!("Shutdown signal received, no new tasks will be accepted");
      shutdown.store(true, Ordering::SeqCst);
    });
  }

  info!(max_concurrent = config.max_concurrent, "Worker pool started");
  while !shutdown.load(Ordering::SeqCst) {
    if let Some((class, (envelope, delivery))) = scheduler.get_next().await {
      let permit = match semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => break,
      };
      let ctx = ctx.clone();
      let queue_client = queue_client.clone();
      tokio::spawn(async move {
        handle_task(ctx, queue_client, class, envelope, delivery).await;
        drop(permit);
      });
    } else {
      tokio::time::sleep(Duration::from_millis(100)).await;
    }
  }

  // let in-flight deliveries finish before exiting
  let _ = semaphore.acquire_many(config.max_concurrent as u32).await;
  info!("Worker pool stopped");
  Ok(())
}

/// Runs one task and settles its broker delivery. Handler failures consume
/// the envelope's retry budget: the task is republished with a bumped retry
/// counter until the budget is spent, then moved to the dead queue.
async fn handle_task(
  ctx: Arc<WorkerContext>,
  queue_client: QueueClient,
  class: PriorityClass,
  envelope: TaskEnvelope,
  delivery: Delivery,
) {
  let result = match envelope.task_type.as_str() {
    TYPE_AGGREGATE => {
      match serde_json::from_value::<AggregateTaskPayload>(envelope.payload.clone()) {
        Ok(task) => process_aggregate_task(&ctx, &task).await,
        Err(e) => Err(GwError::MalformedTask(e.to_string())),
      }
    }
    other => Err(GwError::MalformedTask(format!("unknown task type: {other}"))),
  };

  match result {
    Ok(()) => {
      info!(task_id = %envelope.task_id, "Task processed");
      let _ = delivery.ack(BasicAckOptions::default()).await;
    }
    Err(e) => {
      error!(task_id = %envelope.task_id, error = %e, "Task handler failed");
      if envelope.retried < envelope.max_retry {
        let mut retry = envelope.clone();
        retry.retried += 1;
        match queue_client.enqueue(class.queue_name(), &retry).await {
          Ok(_) => {
            warn!(task_id = %envelope.task_id, attempt = retry.retried, "Task requeued for retry");
            let _ = delivery.ack(BasicAckOptions::default()).await;
          }
          Err(e) => {
            error!(task_id = %envelope.task_id, error = %e, "Failed to requeue task");
            let _ = delivery
              .nack(BasicNackOptions { requeue: true, ..Default::default() })
              .await;
          }
        }
      } else {
        match queue_client.enqueue(QUEUE_DEAD, &envelope).await {
          Ok(_) => {
            error!(task_id = %envelope.task_id, "Retry budget spent, task moved to dead queue");
            let _ = delivery.ack(BasicAckOptions::default()).await;
          }
          Err(e) => {
            error!(task_id = %envelope.task_id, error = %e, "Failed to dead-letter task");
            let _ = delivery
              .nack(BasicNackOptions { requeue: true, ..Default::default() })
              .await;
          }
        }
      }
    }
  }
}
