use std::collections::VecDeque;
use tokio::sync::Mutex;

/// The three lanes workers draw tasks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
  Critical,
  Default,
  Low,
}

impl PriorityClass {
  pub fn queue_name(self) -> &'static str {
    match self {
      PriorityClass::Critical => "critical",
      PriorityClass::Default => "default",
      PriorityClass::Low => "low",
    }
  }

  pub const ALL: [PriorityClass; 3] =
    [PriorityClass::Critical, PriorityClass::Default, PriorityClass::Low];

  fn index(self) -> usize {
    match self {
      PriorityClass::Critical => 0,
      PriorityClass::Default => 1,
      PriorityClass::Low => 2,
    }
  }
}

// 6:3:1 service cycle: classes are weighted, not strictly ordered, so low
// priority work still makes progress while critical lanes are busy.
const CYCLE: [usize; 10] = [0, 0, 0, 0, 0, 0, 1, 1, 1, 2];

struct Lanes<T> {
  lanes: [VecDeque<T>; 3],
  cursor: usize,
}

/// Weighted in-process scheduler fed by the queue consumers and drained by
/// the worker loop.
pub struct Scheduler<T> {
  inner: Mutex<Lanes<T>>,
}

impl<T> Scheduler<T> {
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(Lanes {
        lanes: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
        cursor: 0,
      }),
    }
  }

  pub async fn add_task(&self, class: PriorityClass, task: T) {
    self.inner.lock().await.lanes[class.index()].push_back(task);
  }

  /// Pops the next task following the weighted cycle, falling back to any
  /// non-empty lane so no class starves while others are idle.
  pub async fn get_next(&self) -> Option<(PriorityClass, T)> {
    let mut inner = self.inner.lock().await;
    for step in 0..CYCLE.len() {
      let pos = (inner.cursor + step) % CYCLE.len();
      let lane = CYCLE[pos];
      if let Some(task) = inner.lanes[lane].pop_front() {
        inner.cursor = (pos + 1) % CYCLE.len();
        return Some((PriorityClass::ALL[lane], task));
      }
    }
    None
  }
}

impl<T> Default for Scheduler<T> {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn empty_scheduler_yields_nothing() {
    let scheduler: Scheduler<u32> = Scheduler::new();
    assert!(scheduler.get_next().await.is_none());
  }

  #[tokio::test]
  async fn weighted_service_when_all_lanes_are_full() {
    let scheduler = Scheduler::new();
    for i in 0..6 {
      scheduler.add_task(PriorityClass::Critical, format!("c{i}")).await;
    }
    for i in 0..3 {
      scheduler.add_task(PriorityClass::Default, format!("d{i}")).await;
    }
    scheduler.add_task(PriorityClass::Low, "l0".to_string()).await;

    let mut order = Vec::new();
    while let Some((class, _)) = scheduler.get_next().await {
      order.push(class);
    }
    assert_eq!(
      order,
      vec![
        PriorityClass::Critical,
        PriorityClass::Critical,
        PriorityClass::Critical,
        PriorityClass::Critical,
        PriorityClass::Critical,
        PriorityClass::Critical,
        PriorityClass::Default,
        PriorityClass::Default,
        PriorityClass::Default,
        PriorityClass::Low,
      ]
    );
  }

  #[tokio::test]
  async fn falls_back_to_non_empty_lanes() {
    let scheduler = Scheduler::new();
    scheduler.add_task(PriorityClass::Low, 1u32).await;
    scheduler.add_task(PriorityClass::Low, 2u32).await;

    assert_eq!(scheduler.get_next().await, Some((PriorityClass::Low, 1)));
    assert_eq!(scheduler.get_next().await, Some((PriorityClass::Low, 2)));
    assert_eq!(scheduler.get_next().await, None);
  }

  #[tokio::test]
  async fn lower_classes_are_serviced_proportionally_not_last() {
    let scheduler = Scheduler::new();
    // 12 critical vs 2 default: default must be reached before critical drains
    for i in 0..12 {
      scheduler.add_task(PriorityClass::Critical, format!("c{i}")).await;
    }
    scheduler.add_task(PriorityClass::Default, "d0".to_string()).await;
    scheduler.add_task(PriorityClass::Default, "d1".to_string()).await;

    let mut first_default = None;
    for n in 0..14 {
      let (class, _) = scheduler.get_next().await.unwrap();
      if class == PriorityClass::Default && first_default.is_none() {
        first_default = Some(n);
      }
    }
    assert_eq!(first_default, Some(6));
  }
}
