//! The queue engine: single owner of the queue, the search session and the playback
//! coordinator.
//!
//! All mutation happens through `&mut self`. Background work (page fetches, URL
//! resolution, timers) runs on spawned tasks that report back as [`EngineMsg`]s; the host
//! loop feeds those to [`Engine::handle`], either by awaiting [`Engine::recv`] or by polling
//! [`Engine::check_pending`] once per frame.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::constants::constants;
use crate::coordinator::{Coordinator, PlaybackState};
use crate::error::{OutOfRangeSnafu, Result};
use crate::item::{Item, ItemId, Resolved};
use crate::provider::{Page, Resolver, SearchProvider};
use crate::queue::{Direction, QueueEvent, QueueModel, Row};
use crate::search::{PageOutcome, SearchController, SearchSession, SessionId, SortMode};
use crate::session::{PlaybackEvent, PlaybackSession};
use crate::timer::TimerKey;

/// Monotonic tag attached to every async request so late completions can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

/// Completions posted back to the engine by background tasks.
#[derive(Debug)]
pub enum EngineMsg {
  Page { session: SessionId, ticket: Ticket, result: anyhow::Result<Page> },
  Resolved { item: ItemId, ticket: Ticket, result: anyhow::Result<Resolved> },
  Timer { key: TimerKey, ticket: Ticket },
  Playback(PlaybackEvent),
}

/// What handling a message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Applied,
  /// The message belonged to a session, item or timer that is no longer current.
  Stale,
  /// Current, but nothing to do in this state.
  Ignored,
}

/// Notifications for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
  Queue(QueueEvent),
  State(PlaybackState),
  Status(String),
  ResolutionFailed { item: ItemId, reason: String },
  PlaybackFailed { item: ItemId, reason: String },
  FetchFailed { session: SessionId, reason: String },
}

/// Ticket issuer, completion channel and event outbox shared by the engine's parts.
pub struct Dispatch {
  tx: mpsc::UnboundedSender<EngineMsg>,
  last_ticket: u64,
  outbox: Vec<EngineEvent>,
}

impl Dispatch {
  fn new(tx: mpsc::UnboundedSender<EngineMsg>) -> Self {
    Self { tx, last_ticket: 0, outbox: Vec::new() }
  }

  pub fn ticket(&mut self) -> Ticket {
    self.last_ticket += 1;
    Ticket(self.last_ticket)
  }

  pub fn sender(&self) -> mpsc::UnboundedSender<EngineMsg> {
    self.tx.clone()
  }

  pub fn notify(&mut self, event: EngineEvent) {
    self.outbox.push(event);
  }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Fetch another page once fewer than this many items follow the active one.
  pub look_ahead: usize,
  /// Pause before skipping past an item that failed to resolve or play.
  pub recovery_delay: Duration,
  /// Re-issue `play()` once if the position has not moved after this long.
  pub start_grace: Option<Duration>,
  /// A resolved URL is reused only if it stays valid for at least this long.
  pub url_reuse_margin: TimeDelta,
  /// Activate the first item as soon as the first page lands.
  pub autoplay: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    let c = constants();
    Self {
      look_ahead: c.look_ahead,
      recovery_delay: c.recovery_delay(),
      start_grace: c.start_grace(),
      url_reuse_margin: TimeDelta::seconds(c.url_reuse_margin_secs),
      autoplay: true,
    }
  }
}

pub struct Engine {
  config: EngineConfig,
  queue: QueueModel,
  search: SearchController,
  coordinator: Coordinator,
  dispatch: Dispatch,
  rx: mpsc::UnboundedReceiver<EngineMsg>,
  playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
  subscribers: Vec<mpsc::UnboundedSender<EngineEvent>>,
}

impl Engine {
  /// `playback_rx` is the receiving end of the channel the session reports its events on.
  pub fn new(
    config: EngineConfig,
    provider: Arc<dyn SearchProvider>,
    resolver: Arc<dyn Resolver>,
    session: Arc<dyn PlaybackSession>,
    playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      coordinator: Coordinator::new(resolver, session, config.clone()),
      config,
      queue: QueueModel::new(),
      search: SearchController::new(provider),
      dispatch: Dispatch::new(tx),
      rx,
      playback_rx,
      subscribers: Vec::new(),
    }
  }

  /// Register an observer. Events are delivered in the order they happened.
  pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<EngineEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    self.subscribers.push(tx);
    rx
  }

  // --- Accessors ---

  pub fn queue(&self) -> &QueueModel {
    &self.queue
  }

  pub fn state(&self) -> PlaybackState {
    self.coordinator.state()
  }

  pub fn session(&self) -> Option<&SearchSession> {
    self.search.session()
  }

  pub fn is_stopped(&self) -> bool {
    self.coordinator.is_stopped()
  }

  pub fn is_fetching(&self) -> bool {
    self.search.session().is_some_and(SearchSession::is_fetching)
  }

  pub fn active_item(&self) -> Option<&Item> {
    self.queue.active_item()
  }

  /// Shareable web page of the active item.
  pub fn active_share_link(&self) -> Option<String> {
    self.queue.active_item().map(Item::share_link)
  }

  /// Resolved stream URL of the active item, once known.
  pub fn active_stream_url(&self) -> Option<&str> {
    self.queue.active_item().and_then(Item::stream_url)
  }

  // --- Search ---

  pub async fn start_search(&mut self, query: &str, sort: SortMode) -> Result<SessionId> {
    let id = self.search.start_search(query, sort, &mut self.queue, &mut self.dispatch)?;
    self.coordinator.resume_from_stop();
    self.settle().await;
    Ok(id)
  }

  /// Treat `text` as a pasted link and queue the single video it references.
  pub async fn parse_source(&mut self, text: &str) -> Result<SessionId> {
    let id = self.search.parse_source(text, &mut self.queue, &mut self.dispatch)?;
    self.coordinator.resume_from_stop();
    self.settle().await;
    Ok(id)
  }

  /// Search for `text`, or play it directly when it contains a video link.
  pub async fn submit(&mut self, text: &str, sort: SortMode) -> Result<SessionId> {
    match crate::search::detect_video_ref(text) {
      Some(_) => self.parse_source(text).await,
      None => self.start_search(text, sort).await,
    }
  }

  /// Fetch the next page. Returns whether a fetch was issued.
  pub fn load_more(&mut self) -> bool {
    self.search.load_more(&mut self.dispatch)
  }

  pub async fn change_sort(&mut self, sort: SortMode) -> Result<SessionId> {
    let id = self.search.change_sort(sort, &mut self.queue, &mut self.dispatch)?;
    self.coordinator.resume_from_stop();
    self.settle().await;
    Ok(id)
  }

  // --- Queue ---

  /// Activate whatever sits at `row`: an item starts playing, the sentinel loads more.
  pub async fn activate_row(&mut self, row: usize) -> Result<()> {
    match self.queue.row(row) {
      Some(Row::LoadMore) => {
        self.load_more();
        Ok(())
      }
      Some(Row::Item(_)) => self.set_active(row).await,
      None => Err(OutOfRangeSnafu { index: row, len: self.queue.len() }.build().into()),
    }
  }

  /// User activation of an item. Re-activating the current item restarts it only when
  /// nothing is playing (after a stop or the end of the queue).
  pub async fn set_active(&mut self, index: usize) -> Result<()> {
    if self.queue.get(index).is_none() {
      return Err(OutOfRangeSnafu { index, len: self.queue.len() }.build().into());
    }
    self.coordinator.resume_from_stop();
    if self.queue.active_index() == Some(index) && self.coordinator.state().is_idle() {
      info!(index, "queue: restarting active item");
      let id = self.queue.active_id();
      self.coordinator.on_active_changed(id, &mut self.queue, &mut self.dispatch).await;
      self.replenish();
    } else {
      self.queue.set_active(index)?;
    }
    self.settle().await;
    Ok(())
  }

  pub async fn remove(&mut self, indices: &[usize]) -> Result<()> {
    self.queue.remove(indices)?;
    self.settle().await;
    Ok(())
  }

  /// Move the selection one slot. Returns the rows the selection now occupies.
  pub async fn move_rows(&mut self, indices: &[usize], direction: Direction) -> Result<Vec<usize>> {
    let moved = self.queue.move_rows(indices, direction)?;
    self.settle().await;
    Ok(moved)
  }

  pub fn restore_selection(&self, ids: &[ItemId]) -> Vec<usize> {
    self.queue.restore_selection(ids)
  }

  // --- Playback ---

  /// Jump to the item after the active one. Returns false at the end of the queue.
  pub async fn skip(&mut self) -> Result<bool> {
    let Some(next) = self.queue.next_index() else { return Ok(false) };
    self.set_active(next).await?;
    Ok(true)
  }

  pub async fn toggle_pause(&mut self) -> Outcome {
    let outcome = self.coordinator.toggle_pause(&mut self.dispatch).await;
    self.flush();
    outcome
  }

  /// Stop everything. Late fetches, resolutions and timers are ignored afterwards.
  pub async fn stop(&mut self) {
    self.search.cancel();
    self.coordinator.stop(&mut self.queue, &mut self.dispatch).await;
    self.settle().await;
  }

  pub async fn shutdown(&mut self) {
    self.search.cancel();
    self.coordinator.shutdown().await;
  }

  // --- Message loop ---

  /// Wait for the next completion or player event.
  pub async fn recv(&mut self) -> Option<EngineMsg> {
    tokio::select! {
      Some(msg) = self.rx.recv() => Some(msg),
      Some(event) = self.playback_rx.recv() => Some(EngineMsg::Playback(event)),
      else => None,
    }
  }

  /// Wait for and handle one message.
  pub async fn step(&mut self) -> Option<Outcome> {
    let msg = self.recv().await?;
    Some(self.handle(msg).await)
  }

  /// Handle everything that has already arrived, without waiting. Returns how many
  /// messages were handled.
  pub async fn check_pending(&mut self) -> usize {
    let mut handled = 0;
    loop {
      let msg = match self.rx.try_recv() {
        Ok(msg) => msg,
        Err(_) => match self.playback_rx.try_recv() {
          Ok(event) => EngineMsg::Playback(event),
          Err(_) => break,
        },
      };
      self.handle(msg).await;
      handled += 1;
    }
    handled
  }

  pub async fn handle(&mut self, msg: EngineMsg) -> Outcome {
    let outcome = match msg {
      EngineMsg::Page { session, ticket, result } => {
        let outcome = self.search.apply_page(session, ticket, result, &mut self.queue);
        self.on_page(outcome)
      }
      EngineMsg::Resolved { item, ticket, result } => {
        let outcome =
          self.coordinator.handle_resolved(item, ticket, result, &mut self.queue, &mut self.dispatch).await;
        if outcome == Outcome::Applied {
          self.replenish();
        }
        outcome
      }
      EngineMsg::Timer { key, ticket } => {
        self.coordinator.handle_timer(key, ticket, &mut self.queue, &mut self.dispatch).await
      }
      EngineMsg::Playback(event) => {
        self.coordinator.handle_playback(event, &mut self.queue, &mut self.dispatch).await
      }
    };
    self.settle().await;
    outcome
  }

  fn on_page(&mut self, outcome: PageOutcome) -> Outcome {
    match outcome {
      PageOutcome::Stale => Outcome::Stale,
      PageOutcome::NoResults => {
        self.dispatch.notify(EngineEvent::Status("No results found.".to_string()));
        Outcome::Applied
      }
      PageOutcome::Appended { first_page, .. } => {
        if first_page && self.config.autoplay && self.queue.active_index().is_none() && !self.coordinator.is_stopped() {
          // The page just added at least one item, so row 0 exists.
          let _ = self.queue.set_active(0);
        }
        Outcome::Applied
      }
      PageOutcome::Failed { session, reason } => {
        self.dispatch.notify(EngineEvent::FetchFailed { session, reason });
        Outcome::Applied
      }
    }
  }

  /// Keep enough items buffered after the active one.
  fn replenish(&mut self) {
    let Some(remaining) = self.queue.remaining_after_active() else { return };
    if remaining < self.config.look_ahead && self.search.load_more(&mut self.dispatch) {
      info!(remaining, look_ahead = self.config.look_ahead, "search: replenishing queue");
    }
  }

  /// Forward queue events, let the coordinator react to active-item changes, and repeat
  /// until the queue is quiet. Then deliver everything to subscribers.
  async fn settle(&mut self) {
    loop {
      let events = self.queue.drain_events();
      if events.is_empty() {
        break;
      }
      // Only the last activation in a batch matters; earlier ones were superseded.
      let activation = events.iter().rev().find_map(|event| match event {
        QueueEvent::ActiveChanged { id, .. } => Some(*id),
        QueueEvent::Reset => Some(None),
        _ => None,
      });
      for event in events {
        self.dispatch.notify(EngineEvent::Queue(event));
      }
      if let Some(id) = activation {
        debug!(item = ?id, "queue: active item changed");
        self.coordinator.on_active_changed(id, &mut self.queue, &mut self.dispatch).await;
        self.replenish();
      }
    }
    self.flush();
  }

  fn flush(&mut self) {
    let events = std::mem::take(&mut self.dispatch.outbox);
    if events.is_empty() {
      return;
    }
    self.subscribers.retain(|tx| !tx.is_closed());
    for event in events {
      for tx in &self.subscribers {
        let _ = tx.send(event.clone());
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use crate::item::Resolution;
  use crate::session::{PlaybackEventKind, PlayerStatus};
  use crate::testing::{FakeProvider, FakeResolver, FakeSession, SessionCall};

  struct Harness {
    engine: Engine,
    provider: Arc<FakeProvider>,
    resolver: Arc<FakeResolver>,
    session: Arc<FakeSession>,
    playback_tx: mpsc::UnboundedSender<PlaybackEvent>,
  }

  fn config() -> EngineConfig {
    EngineConfig {
      look_ahead: 10,
      recovery_delay: Duration::from_millis(2000),
      start_grace: None,
      url_reuse_margin: TimeDelta::seconds(30),
      autoplay: false,
    }
  }

  fn harness_with(config: EngineConfig, provider: FakeProvider) -> Harness {
    let provider = Arc::new(provider);
    let resolver = Arc::new(FakeResolver::new());
    let session = Arc::new(FakeSession::new());
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();
    let engine = Engine::new(config, provider.clone(), resolver.clone(), session.clone(), playback_rx);
    Harness { engine, provider, resolver, session, playback_tx }
  }

  fn harness() -> Harness {
    harness_with(config(), FakeProvider::new(10))
  }

  /// Handle messages until `done` holds.
  async fn pump_until(engine: &mut Engine, done: impl Fn(&Engine) -> bool) {
    while !done(engine) {
      engine.step().await.expect("engine channel closed");
    }
  }

  async fn search(h: &mut Harness, query: &str) {
    h.engine.start_search(query, SortMode::Relevance).await.unwrap();
    pump_until(&mut h.engine, |e| !e.is_fetching()).await;
  }

  /// Let spawned fake tasks run up to their first real await.
  async fn idle() {
    for _ in 0..10 {
      tokio::task::yield_now().await;
    }
  }

  #[tokio::test]
  async fn search_activate_resolve_play_and_replenish() {
    let config = EngineConfig { look_ahead: 2, ..config() };
    let mut h = harness_with(config, FakeProvider::new(10).hold_after(1));
    search(&mut h, "cats").await;
    assert_eq!(h.engine.queue().len(), 10);
    assert!(h.engine.queue().has_more());
    assert_eq!(h.provider.fetch_count(), 1);

    h.engine.set_active(0).await.unwrap();
    assert!(matches!(h.engine.state(), PlaybackState::Loading(_)));
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;

    let first = h.engine.queue().get(0).unwrap();
    let url = FakeResolver::url_for(&first.meta);
    assert_eq!(h.engine.active_stream_url(), Some(url.as_str()));
    assert_eq!(h.session.last_source().map(|s| s.url), Some(url));
    assert!(h.session.calls().contains(&SessionCall::Play));
    idle().await;
    assert_eq!(h.provider.fetch_count(), 1);

    // One item left after row 8, below the look-ahead of 2.
    h.engine.set_active(8).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    idle().await;
    assert_eq!(h.provider.fetch_count(), 2);
    assert!(h.engine.is_fetching());

    // The second page is still in flight, so no third fetch.
    h.engine.set_active(9).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    idle().await;
    assert_eq!(h.provider.fetch_count(), 2);
  }

  #[tokio::test]
  async fn scenario_margin_of_ten_issues_exactly_one_more_fetch() {
    let mut h = harness_with(config(), FakeProvider::new(10).hold_after(1));
    search(&mut h, "cats").await;
    assert_eq!(h.engine.queue().len(), 10);
    assert_eq!(h.provider.fetch_count(), 1);

    h.engine.set_active(0).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    let first = h.engine.queue().get(0).unwrap();
    assert_eq!(h.session.last_source().map(|s| s.url), Some(FakeResolver::url_for(&first.meta)));

    h.engine.set_active(8).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    idle().await;
    assert_eq!(h.provider.fetch_count(), 2);
  }

  #[tokio::test]
  async fn late_resolution_for_previous_item_is_stale() {
    let mut h = harness_with(EngineConfig { look_ahead: 0, ..config() }, FakeProvider::new(10));
    search(&mut h, "cats").await;
    let old = h.engine.queue().get(0).unwrap().id;
    h.engine.set_active(0).await.unwrap();
    // The resolution for row 0 completes and waits in the channel, unhandled.
    idle().await;
    h.engine.set_active(1).await.unwrap();
    assert_eq!(h.engine.queue().get(0).unwrap().resolution, Resolution::Unresolved);

    let late = h.engine.recv().await.unwrap();
    assert!(matches!(&late, EngineMsg::Resolved { item, result: Ok(_), .. } if *item == old));
    assert_eq!(h.engine.handle(late).await, Outcome::Stale);
    assert_eq!(h.engine.queue().get(0).unwrap().resolution, Resolution::Unresolved);
    assert!(h.session.last_source().is_none());

    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    assert_eq!(h.session.last_source().map(|s| s.item), Some(h.engine.queue().get(1).unwrap().id));
  }

  #[tokio::test(start_paused = true)]
  async fn failed_resolution_skips_after_delay() {
    let mut h = harness();
    search(&mut h, "cats").await;
    let bad = h.engine.queue().get(0).unwrap().meta.video_id.clone();
    h.resolver.fail_for(&bad);
    let mut events = h.engine.subscribe();

    h.engine.set_active(0).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Recovering(_))).await;
    assert!(matches!(h.engine.queue().get(0).unwrap().resolution, Resolution::Failed(_)));

    pump_until(&mut h.engine, |e| e.queue().active_index() == Some(1)).await;
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
      saw_failure |= matches!(event, EngineEvent::ResolutionFailed { .. });
    }
    assert!(saw_failure);
  }

  #[tokio::test(start_paused = true)]
  async fn recovery_skip_is_suppressed_by_user_activation() {
    let mut h = harness();
    search(&mut h, "cats").await;
    let bad = h.engine.queue().get(0).unwrap().meta.video_id.clone();
    h.resolver.fail_for(&bad);

    h.engine.set_active(0).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Recovering(_))).await;
    h.engine.set_active(5).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    h.engine.check_pending().await;
    assert_eq!(h.engine.queue().active_index(), Some(5));
  }

  #[tokio::test]
  async fn load_more_is_deduplicated_while_in_flight() {
    let mut h = harness_with(config(), FakeProvider::new(10).hold_after(1));
    search(&mut h, "cats").await;
    assert!(h.engine.load_more());
    assert!(!h.engine.load_more());
    assert!(!h.engine.load_more());
    idle().await;
    assert_eq!(h.provider.fetch_count(), 2);
  }

  #[tokio::test]
  async fn sentinel_row_loads_more() {
    let mut h = harness();
    search(&mut h, "cats").await;
    assert_eq!(h.engine.queue().row_count(), 11);
    h.engine.activate_row(10).await.unwrap();
    pump_until(&mut h.engine, |e| !e.is_fetching()).await;
    assert_eq!(h.engine.queue().len(), 20);
    assert_eq!(h.engine.queue().active_index(), None);
  }

  #[tokio::test]
  async fn stop_ignores_late_results_until_reactivated() {
    let mut h = harness();
    search(&mut h, "cats").await;
    h.resolver.hold(true);
    h.engine.set_active(0).await.unwrap();
    let id = h.engine.queue().get(0).unwrap().id;
    h.engine.stop().await;
    assert_eq!(h.engine.state(), PlaybackState::Idle);

    let late = EngineMsg::Resolved { item: id, ticket: Ticket(1), result: Ok(Resolved::from_url("http://late")) };
    assert_eq!(h.engine.handle(late).await, Outcome::Stale);
    let finished = PlaybackEvent { item: id, kind: PlaybackEventKind::Finished };
    assert_eq!(h.engine.handle(EngineMsg::Playback(finished)).await, Outcome::Stale);
    assert_eq!(h.engine.queue().active_index(), Some(0));

    h.resolver.hold(false);
    h.engine.set_active(0).await.unwrap();
    assert!(!h.engine.is_stopped());
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
  }

  #[tokio::test]
  async fn failed_activation_keeps_stop_mark() {
    let mut h = harness();
    search(&mut h, "cats").await;
    h.engine.set_active(0).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    h.engine.stop().await;

    assert!(h.engine.set_active(99).await.is_err());
    assert!(h.engine.is_stopped());

    h.engine.remove(&[0]).await.unwrap();
    assert_eq!(h.engine.state(), PlaybackState::Idle);
    assert_eq!(h.session.calls().last(), Some(&SessionCall::Stop));
  }

  #[tokio::test]
  async fn finished_advances_and_end_of_queue_goes_idle() {
    let mut h = harness_with(config(), FakeProvider::new(2).pages(1));
    search(&mut h, "cats").await;
    assert!(!h.engine.queue().has_more());

    h.engine.set_active(0).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    let first = h.engine.queue().get(0).unwrap().id;
    h.playback_tx.send(PlaybackEvent { item: first, kind: PlaybackEventKind::Finished }).unwrap();
    pump_until(&mut h.engine, |e| e.queue().active_index() == Some(1)).await;
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;

    let second = h.engine.queue().get(1).unwrap().id;
    h.playback_tx.send(PlaybackEvent { item: second, kind: PlaybackEventKind::Finished }).unwrap();
    pump_until(&mut h.engine, |e| e.state().is_idle()).await;
    assert_eq!(h.engine.queue().active_index(), Some(1));
    assert_eq!(h.session.calls().last(), Some(&SessionCall::Stop));
  }

  #[tokio::test]
  async fn events_for_inactive_items_are_stale() {
    let mut h = harness();
    search(&mut h, "cats").await;
    h.engine.set_active(0).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    let other = h.engine.queue().get(3).unwrap().id;
    let event = PlaybackEvent { item: other, kind: PlaybackEventKind::Finished };
    assert_eq!(h.engine.handle(EngineMsg::Playback(event)).await, Outcome::Stale);
    assert_eq!(h.engine.queue().active_index(), Some(0));
  }

  #[tokio::test(start_paused = true)]
  async fn player_error_recovers_like_resolution_failure() {
    let mut h = harness();
    search(&mut h, "cats").await;
    h.engine.set_active(0).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    let id = h.engine.queue().get(0).unwrap().id;

    let error = PlaybackEvent { item: id, kind: PlaybackEventKind::Status(PlayerStatus::Error("403".into())) };
    assert_eq!(h.engine.handle(EngineMsg::Playback(error)).await, Outcome::Applied);
    assert_eq!(h.engine.state(), PlaybackState::Recovering(id));
    pump_until(&mut h.engine, |e| e.queue().active_index() == Some(1)).await;
  }

  #[tokio::test]
  async fn fresh_resolved_url_is_reused() {
    let mut h = harness();
    search(&mut h, "cats").await;
    h.engine.set_active(0).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    h.engine.set_active(1).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    let resolves = h.resolver.resolve_count();

    h.engine.set_active(0).await.unwrap();
    assert!(matches!(h.engine.state(), PlaybackState::Playing(_)));
    assert_eq!(h.resolver.resolve_count(), resolves);
  }

  #[tokio::test]
  async fn removing_active_item_activates_successor() {
    let mut h = harness();
    search(&mut h, "cats").await;
    h.engine.set_active(2).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    let successor = h.engine.queue().get(3).unwrap().id;

    h.engine.remove(&[2]).await.unwrap();
    assert_eq!(h.engine.queue().active_id(), Some(successor));
    pump_until(&mut h.engine, |e| e.state() == PlaybackState::Playing(successor)).await;
  }

  #[tokio::test]
  async fn moving_active_item_does_not_restart_it() {
    let mut h = harness();
    search(&mut h, "cats").await;
    h.engine.set_active(1).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    let resolves = h.resolver.resolve_count();
    let id = h.engine.queue().get(1).unwrap().id;

    let moved = h.engine.move_rows(&[1], Direction::Down).await.unwrap();
    assert_eq!(moved, vec![2]);
    assert_eq!(h.engine.queue().active_index(), Some(2));
    assert_eq!(h.engine.restore_selection(&[id]), vec![2]);
    h.engine.set_active(2).await.unwrap();
    assert_eq!(h.resolver.resolve_count(), resolves);
    assert_eq!(h.engine.state(), PlaybackState::Playing(id));
  }

  #[tokio::test]
  async fn new_search_discards_previous_session() {
    let mut h = harness_with(config(), FakeProvider::new(10).hold_after(1));
    search(&mut h, "cats").await;
    h.engine.load_more();
    let old = h.engine.session().unwrap().id;

    h.engine.start_search("dogs", SortMode::Newest).await.unwrap();
    assert!(h.engine.queue().is_empty());
    let late = EngineMsg::Page { session: old, ticket: Ticket(2), result: Ok(Page::default()) };
    assert_eq!(h.engine.handle(late).await, Outcome::Stale);
    assert_eq!(h.engine.session().and_then(SearchSession::params).map(|p| p.sort), Some(SortMode::Newest));
  }

  #[tokio::test]
  async fn change_sort_needs_a_query_session() {
    let mut h = harness();
    assert!(matches!(h.engine.change_sort(SortMode::Newest).await, Err(Error::NoActiveSearch { .. })));

    h.engine.parse_source("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await.unwrap();
    pump_until(&mut h.engine, |e| !e.is_fetching()).await;
    assert!(matches!(h.engine.change_sort(SortMode::Newest).await, Err(Error::NoActiveSearch { .. })));
    assert_eq!(h.engine.queue().len(), 1);
  }

  #[tokio::test]
  async fn change_sort_reruns_stored_query() {
    let mut h = harness();
    search(&mut h, "cats").await;
    let old = h.engine.session().unwrap().id;
    assert!(h.engine.load_more());
    // Page two of the old session completes before the re-sort.
    idle().await;

    let new = h.engine.change_sort(SortMode::ViewCount).await.unwrap();
    assert_ne!(new, old);
    assert!(h.engine.queue().is_empty());
    assert_eq!(h.engine.step().await, Some(Outcome::Stale));

    pump_until(&mut h.engine, |e| !e.is_fetching()).await;
    assert_eq!(h.engine.queue().len(), 10);
    let first = h.engine.queue().get(0).unwrap();
    assert_eq!(first.meta.video_id, "views000000");
    assert_eq!(first.title(), "cats #0");
    let params = h.engine.session().and_then(SearchSession::params).unwrap();
    assert_eq!((params.query.as_str(), params.sort), ("cats", SortMode::ViewCount));
  }

  #[tokio::test]
  async fn text_without_link_is_unrecognized() {
    let mut h = harness();
    assert!(matches!(h.engine.parse_source("cats").await, Err(Error::UnrecognizedSource { .. })));
    assert!(h.engine.session().is_none());
  }

  #[tokio::test]
  async fn empty_first_page_reports_no_results() {
    let mut h = harness_with(config(), FakeProvider::new(0).pages(1));
    let mut events = h.engine.subscribe();
    search(&mut h, "zzzz").await;
    assert_eq!(h.engine.queue().row_count(), 0);

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
      if let EngineEvent::Status(msg) = event {
        statuses.push(msg);
      }
    }
    assert_eq!(statuses, vec!["No results found.".to_string()]);
  }

  #[tokio::test]
  async fn failed_fetch_keeps_sentinel_and_retry_autoplays() {
    let config = EngineConfig { autoplay: true, ..config() };
    let mut h = harness_with(config, FakeProvider::new(10).fail_next(1));
    let mut events = h.engine.subscribe();
    search(&mut h, "cats").await;

    assert!(h.engine.queue().is_empty());
    assert_eq!(h.engine.queue().row_count(), 1);
    assert_eq!(h.engine.queue().active_index(), None);
    assert_eq!(h.engine.state(), PlaybackState::Idle);
    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
      saw_failure |= matches!(event, EngineEvent::FetchFailed { .. });
    }
    assert!(saw_failure);

    // Retrying through the sentinel fetches the same first page.
    h.engine.activate_row(0).await.unwrap();
    pump_until(&mut h.engine, |e| e.queue().len() >= 10).await;
    assert_eq!(h.provider.fetch_count(), 2);
    assert_eq!(h.engine.queue().get(0).unwrap().meta.video_id, "relevance000000");
    assert_eq!(h.engine.queue().active_index(), Some(0));
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
  }

  #[tokio::test]
  async fn autoplay_activates_first_item() {
    let mut h = harness_with(EngineConfig { autoplay: true, ..config() }, FakeProvider::new(10));
    search(&mut h, "cats").await;
    assert_eq!(h.engine.queue().active_index(), Some(0));
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
  }

  #[tokio::test]
  async fn pasted_link_plays_single_item() {
    let mut h = harness_with(EngineConfig { autoplay: true, ..config() }, FakeProvider::new(10));
    h.engine.submit("watch this https://youtu.be/dQw4w9WgXcQ", SortMode::Relevance).await.unwrap();
    pump_until(&mut h.engine, |e| !e.is_fetching()).await;
    assert_eq!(h.engine.queue().len(), 1);
    assert!(!h.engine.queue().has_more());
    assert_eq!(h.engine.queue().get(0).unwrap().meta.video_id, "dQw4w9WgXcQ");
    assert_eq!(h.provider.fetch_count(), 0);
  }

  #[tokio::test]
  async fn empty_query_is_rejected() {
    let mut h = harness();
    assert!(h.engine.start_search("   ", SortMode::Relevance).await.is_err());
    assert!(h.engine.session().is_none());
  }

  #[tokio::test]
  async fn out_of_range_activation_is_a_contract_error() {
    let mut h = harness();
    search(&mut h, "cats").await;
    let err = h.engine.activate_row(42).await.unwrap_err();
    assert!(err.is_contract_violation());
  }

  #[tokio::test]
  async fn toggle_pause_round_trips() {
    let mut h = harness();
    search(&mut h, "cats").await;
    assert_eq!(h.engine.toggle_pause().await, Outcome::Ignored);
    h.engine.set_active(0).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    let id = h.engine.queue().get(0).unwrap().id;

    assert_eq!(h.engine.toggle_pause().await, Outcome::Applied);
    assert_eq!(h.engine.state(), PlaybackState::Paused(id));
    assert_eq!(h.engine.toggle_pause().await, Outcome::Applied);
    assert_eq!(h.engine.state(), PlaybackState::Playing(id));
    assert!(h.session.calls().contains(&SessionCall::Pause));
  }

  #[tokio::test(start_paused = true)]
  async fn start_watchdog_reissues_play_once() {
    let config = EngineConfig { start_grace: Some(Duration::from_secs(3)), look_ahead: 0, ..config() };
    let mut h = harness_with(config, FakeProvider::new(10));
    search(&mut h, "cats").await;
    h.engine.set_active(0).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    let plays = || h.session.calls().iter().filter(|c| **c == SessionCall::Play).count();
    assert_eq!(plays(), 1);

    assert_eq!(h.engine.step().await, Some(Outcome::Applied));
    assert_eq!(plays(), 2);
    tokio::time::sleep(Duration::from_secs(10)).await;
    h.engine.check_pending().await;
    assert_eq!(plays(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn start_watchdog_leaves_moving_playback_alone() {
    let config = EngineConfig { start_grace: Some(Duration::from_secs(3)), look_ahead: 0, ..config() };
    let mut h = harness_with(config, FakeProvider::new(10));
    search(&mut h, "cats").await;
    h.session.set_position(Some(Duration::from_secs(2)));
    h.engine.set_active(0).await.unwrap();
    pump_until(&mut h.engine, |e| matches!(e.state(), PlaybackState::Playing(_))).await;
    assert_eq!(h.engine.step().await, Some(Outcome::Ignored));
    assert_eq!(h.session.calls().iter().filter(|c| **c == SessionCall::Play).count(), 1);
  }
}
