//! Playback coordinator: binds the queue's active item to the playback session.
//!
//! Every async completion that reaches this module carries the item and ticket it was
//! issued for and is checked against the current state before anything is applied. Results
//! for an item that is no longer active come back as [`Outcome::Stale`].

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{Dispatch, EngineConfig, EngineEvent, EngineMsg, Outcome, Ticket};
use crate::item::{ItemId, Resolution, Resolved};
use crate::provider::Resolver;
use crate::queue::QueueModel;
use crate::session::{MediaSource, PlaybackEvent, PlaybackEventKind, PlaybackSession, PlayerStatus};
use crate::timer::{TimerKey, TimerKind, Timers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
  #[default]
  Idle,
  Loading(ItemId),
  Playing(ItemId),
  Paused(ItemId),
  Recovering(ItemId),
}

impl PlaybackState {
  pub fn item(self) -> Option<ItemId> {
    match self {
      PlaybackState::Idle => None,
      PlaybackState::Loading(id)
      | PlaybackState::Playing(id)
      | PlaybackState::Paused(id)
      | PlaybackState::Recovering(id) => Some(id),
    }
  }

  pub fn is_idle(self) -> bool {
    self == PlaybackState::Idle
  }

  pub fn label(self) -> &'static str {
    match self {
      PlaybackState::Idle => "idle",
      PlaybackState::Loading(_) => "loading",
      PlaybackState::Playing(_) => "playing",
      PlaybackState::Paused(_) => "paused",
      PlaybackState::Recovering(_) => "recovering",
    }
  }
}

impl fmt::Display for PlaybackState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.item() {
      Some(id) => write!(f, "{}({})", self.label(), id),
      None => f.write_str(self.label()),
    }
  }
}

struct PendingResolution {
  item: ItemId,
  ticket: Ticket,
  handle: JoinHandle<()>,
}

pub struct Coordinator {
  resolver: Arc<dyn Resolver>,
  session: Arc<dyn PlaybackSession>,
  config: EngineConfig,
  state: PlaybackState,
  stopped: bool,
  resolving: Option<PendingResolution>,
  timers: Timers,
}

impl Coordinator {
  pub fn new(resolver: Arc<dyn Resolver>, session: Arc<dyn PlaybackSession>, config: EngineConfig) -> Self {
    Self {
      resolver,
      session,
      config,
      state: PlaybackState::Idle,
      stopped: false,
      resolving: None,
      timers: Timers::new(),
    }
  }

  pub fn state(&self) -> PlaybackState {
    self.state
  }

  pub fn is_stopped(&self) -> bool {
    self.stopped
  }

  /// Clear the explicit-stop mark. Returns whether it was set.
  pub fn resume_from_stop(&mut self) -> bool {
    std::mem::take(&mut self.stopped)
  }

  // --- Transitions driven by the queue ---

  /// The queue's active item changed (or the queue was reset when `id` is `None`).
  pub async fn on_active_changed(&mut self, id: Option<ItemId>, queue: &mut QueueModel, dispatch: &mut Dispatch) {
    self.cancel_resolution(queue);
    self.timers.cancel_all();

    let Some(id) = id else {
      self.go_idle(dispatch).await;
      return;
    };
    if self.stopped {
      debug!(item = %id, "playback: stopped, not loading");
      return;
    }
    let Some(item) = queue.item(id) else { return };

    info!(item = %id, title = %item.title(), "playback: loading");
    dispatch.notify(EngineEvent::Status(item.title().to_string()));
    self.set_state(PlaybackState::Loading(id), dispatch);

    if let Resolution::Resolved(resolved) = &item.resolution
      && resolved.is_fresh(Utc::now(), self.config.url_reuse_margin)
    {
      debug!(item = %id, "playback: reusing resolved url");
      let resolved = resolved.clone();
      self.start_playback(id, resolved, queue, dispatch).await;
      return;
    }

    let meta = item.meta.clone();
    queue.set_resolution(id, Resolution::Resolving);
    let ticket = dispatch.ticket();
    let tx = dispatch.sender();
    let resolver = Arc::clone(&self.resolver);
    let handle = tokio::spawn(async move {
      let result = resolver.resolve(&meta).await;
      let _ = tx.send(EngineMsg::Resolved { item: id, ticket, result });
    });
    self.resolving = Some(PendingResolution { item: id, ticket, handle });
  }

  // --- Async completions ---

  pub async fn handle_resolved(
    &mut self,
    item: ItemId,
    ticket: Ticket,
    result: anyhow::Result<Resolved>,
    queue: &mut QueueModel,
    dispatch: &mut Dispatch,
  ) -> Outcome {
    let current = self.resolving.as_ref().is_some_and(|p| p.item == item && p.ticket == ticket);
    if !current || self.stopped || queue.active_id() != Some(item) {
      debug!(item = %item, ticket = ticket.0, "playback: discarding stale resolution");
      return Outcome::Stale;
    }
    self.resolving = None;

    match result {
      Ok(resolved) => {
        info!(item = %item, expires_at = ?resolved.expires_at, "playback: stream url resolved");
        queue.set_resolution(item, Resolution::Resolved(resolved.clone()));
        self.start_playback(item, resolved, queue, dispatch).await;
      }
      Err(e) => {
        let reason = format!("{:#}", e);
        warn!(item = %item, err = %reason, "playback: resolution failed");
        queue.set_resolution(item, Resolution::Failed(reason.clone()));
        dispatch.notify(EngineEvent::ResolutionFailed { item, reason });
        self.enter_recovery(item, dispatch);
      }
    }
    Outcome::Applied
  }

  pub async fn handle_playback(&mut self, event: PlaybackEvent, queue: &mut QueueModel, dispatch: &mut Dispatch) -> Outcome {
    if self.stopped || queue.active_id() != Some(event.item) || self.state.item() != Some(event.item) {
      debug!(item = %event.item, kind = ?event.kind, "playback: discarding stale player event");
      return Outcome::Stale;
    }
    let item = event.item;

    match event.kind {
      PlaybackEventKind::Finished => {
        info!(item = %item, "playback: finished");
        self.advance(queue, dispatch).await;
        Outcome::Applied
      }
      PlaybackEventKind::Status(PlayerStatus::Playing) => match self.state {
        PlaybackState::Loading(_) | PlaybackState::Paused(_) => {
          self.set_state(PlaybackState::Playing(item), dispatch);
          Outcome::Applied
        }
        _ => Outcome::Ignored,
      },
      PlaybackEventKind::Status(PlayerStatus::Paused) => match self.state {
        PlaybackState::Playing(_) => {
          self.set_state(PlaybackState::Paused(item), dispatch);
          Outcome::Applied
        }
        _ => Outcome::Ignored,
      },
      PlaybackEventKind::Status(PlayerStatus::Error(reason)) => {
        if matches!(self.state, PlaybackState::Recovering(_)) {
          return Outcome::Ignored;
        }
        warn!(item = %item, err = %reason, "playback: player error");
        // The URL may have expired; force a fresh resolution next time.
        queue.set_resolution(item, Resolution::Failed(reason.clone()));
        dispatch.notify(EngineEvent::PlaybackFailed { item, reason });
        self.enter_recovery(item, dispatch);
        Outcome::Applied
      }
      PlaybackEventKind::Status(status) => {
        debug!(item = %item, status = ?status, "playback: player status");
        Outcome::Ignored
      }
    }
  }

  pub async fn handle_timer(
    &mut self,
    key: TimerKey,
    ticket: Ticket,
    queue: &mut QueueModel,
    dispatch: &mut Dispatch,
  ) -> Outcome {
    if !self.timers.take_fired(key, ticket) {
      debug!(kind = ?key.kind, item = %key.item, "timer: discarding superseded timer");
      return Outcome::Stale;
    }
    if self.stopped || queue.active_id() != Some(key.item) {
      debug!(kind = ?key.kind, item = %key.item, "timer: guarded item no longer active");
      return Outcome::Stale;
    }

    match key.kind {
      TimerKind::ErrorSkip => {
        info!(item = %key.item, "playback: skipping after error");
        self.advance(queue, dispatch).await;
        Outcome::Applied
      }
      TimerKind::StartWatchdog => {
        if self.state != PlaybackState::Playing(key.item) {
          return Outcome::Ignored;
        }
        match self.session.position().await {
          Ok(Some(position)) if !position.is_zero() => Outcome::Ignored,
          Ok(_) => {
            info!(item = %key.item, "playback: position stuck at start, re-issuing play");
            if let Err(e) = self.session.play().await {
              warn!(err = %e, "playback: re-issued play failed");
            }
            Outcome::Applied
          }
          Err(e) => {
            warn!(err = %e, "playback: could not read position");
            Outcome::Ignored
          }
        }
      }
    }
  }

  // --- User intents ---

  /// Pause while playing, resume otherwise.
  pub async fn toggle_pause(&mut self, dispatch: &mut Dispatch) -> Outcome {
    match self.state {
      PlaybackState::Playing(id) => match self.session.pause().await {
        Ok(()) => {
          self.set_state(PlaybackState::Paused(id), dispatch);
          Outcome::Applied
        }
        Err(e) => {
          warn!(err = %e, "playback: pause failed");
          Outcome::Ignored
        }
      },
      PlaybackState::Paused(id) => match self.session.play().await {
        Ok(()) => {
          self.set_state(PlaybackState::Playing(id), dispatch);
          Outcome::Applied
        }
        Err(e) => {
          warn!(err = %e, "playback: resume failed");
          Outcome::Ignored
        }
      },
      // Nudge a source that is slow to start; the player reports Playing when it does.
      PlaybackState::Loading(_) => match self.session.play().await {
        Ok(()) => Outcome::Applied,
        Err(e) => {
          warn!(err = %e, "playback: play failed");
          Outcome::Ignored
        }
      },
      PlaybackState::Idle | PlaybackState::Recovering(_) => Outcome::Ignored,
    }
  }

  /// Hard stop from any state. Late results are ignored until the user activates again.
  pub async fn stop(&mut self, queue: &mut QueueModel, dispatch: &mut Dispatch) {
    info!(state = %self.state, "playback: stopped by user");
    self.stopped = true;
    self.cancel_resolution(queue);
    self.timers.cancel_all();
    if let Err(e) = self.session.stop().await {
      warn!(err = %e, "playback: stopping player failed");
    }
    self.set_state(PlaybackState::Idle, dispatch);
  }

  /// Release the player on shutdown.
  pub async fn shutdown(&mut self) {
    self.timers.cancel_all();
    if let Some(pending) = self.resolving.take() {
      pending.handle.abort();
    }
    if let Err(e) = self.session.stop().await {
      warn!(err = %e, "playback: stopping player on shutdown failed");
    }
  }

  // --- Internals ---

  async fn start_playback(&mut self, item: ItemId, resolved: Resolved, queue: &QueueModel, dispatch: &mut Dispatch) {
    let title = queue.item(item).map(|i| i.title().to_string()).unwrap_or_default();
    let source = MediaSource { item, url: resolved.url, title };
    let started = match self.session.set_source(source).await {
      Ok(()) => self.session.play().await,
      Err(e) => Err(e),
    };
    if let Err(e) = started {
      let reason = format!("{:#}", e);
      warn!(item = %item, err = %reason, "playback: player rejected source");
      dispatch.notify(EngineEvent::PlaybackFailed { item, reason });
      self.enter_recovery(item, dispatch);
      return;
    }
    info!(item = %item, "playback: playing");
    self.set_state(PlaybackState::Playing(item), dispatch);
    if let Some(grace) = self.config.start_grace {
      let key = TimerKey { kind: TimerKind::StartWatchdog, item };
      self.timers.schedule(key, dispatch.ticket(), grace, dispatch.sender());
    }
  }

  /// Activate the next item, or go idle at the end of the queue.
  async fn advance(&mut self, queue: &mut QueueModel, dispatch: &mut Dispatch) {
    match queue.next_index() {
      Some(next) => {
        // Valid by construction; the engine reacts to the resulting ActiveChanged.
        let _ = queue.set_active(next);
      }
      None => {
        info!("playback: end of queue");
        self.go_idle(dispatch).await;
      }
    }
  }

  fn enter_recovery(&mut self, item: ItemId, dispatch: &mut Dispatch) {
    self.set_state(PlaybackState::Recovering(item), dispatch);
    let key = TimerKey { kind: TimerKind::ErrorSkip, item };
    self.timers.schedule(key, dispatch.ticket(), self.config.recovery_delay, dispatch.sender());
  }

  async fn go_idle(&mut self, dispatch: &mut Dispatch) {
    self.timers.cancel_all();
    if self.state.is_idle() {
      return;
    }
    if let Err(e) = self.session.stop().await {
      warn!(err = %e, "playback: stopping player failed");
    }
    self.set_state(PlaybackState::Idle, dispatch);
  }

  fn cancel_resolution(&mut self, queue: &mut QueueModel) {
    if let Some(pending) = self.resolving.take() {
      debug!(item = %pending.item, ticket = pending.ticket.0, "playback: cancelling resolution");
      pending.handle.abort();
      if queue.item(pending.item).is_some_and(|i| i.resolution == Resolution::Resolving) {
        queue.set_resolution(pending.item, Resolution::Unresolved);
      }
    }
  }

  fn set_state(&mut self, state: PlaybackState, dispatch: &mut Dispatch) {
    if self.state != state {
      debug!(from = %self.state, to = %state, "playback: state");
      self.state = state;
      dispatch.notify(EngineEvent::State(state));
    }
  }
}
