//! Single-shot, restartable timers keyed by what they guard.
//!
//! Firing only posts a message back to the engine; the engine decides whether the state the
//! timer guarded is still current.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::{EngineMsg, Ticket};
use crate::item::ItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
  /// Skip to the next item after a resolution or playback failure.
  ErrorSkip,
  /// Re-issue `play()` if the position never moved after playback started.
  StartWatchdog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
  pub kind: TimerKind,
  pub item: ItemId,
}

struct Scheduled {
  ticket: Ticket,
  handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Timers {
  tasks: HashMap<TimerKey, Scheduled>,
}

impl Timers {
  pub fn new() -> Self {
    Self::default()
  }

  /// Schedule `key` to fire after `delay`, replacing any pending timer with the same key.
  pub fn schedule(&mut self, key: TimerKey, ticket: Ticket, delay: Duration, tx: mpsc::UnboundedSender<EngineMsg>) {
    self.cancel(key);
    debug!(kind = ?key.kind, item = %key.item, delay_ms = delay.as_millis() as u64, "timer: scheduled");
    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let _ = tx.send(EngineMsg::Timer { key, ticket });
    });
    self.tasks.insert(key, Scheduled { ticket, handle });
  }

  pub fn cancel(&mut self, key: TimerKey) {
    if let Some(scheduled) = self.tasks.remove(&key) {
      scheduled.handle.abort();
    }
  }

  pub fn cancel_all(&mut self) {
    for (key, scheduled) in self.tasks.drain() {
      debug!(kind = ?key.kind, item = %key.item, "timer: cancelled");
      scheduled.handle.abort();
    }
  }

  /// Consume a fired timer. Returns true only if `ticket` is the live schedule for `key`.
  pub fn take_fired(&mut self, key: TimerKey, ticket: Ticket) -> bool {
    match self.tasks.get(&key) {
      Some(scheduled) if scheduled.ticket == ticket => {
        self.tasks.remove(&key);
        true
      }
      _ => false,
    }
  }
}

impl Drop for Timers {
  fn drop(&mut self) {
    self.cancel_all();
  }
}
