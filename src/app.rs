use anyhow::Result;
use ratatui::widgets::ListState;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::coordinator::PlaybackState;
use crate::engine::{Engine, EngineEvent, Outcome};
use crate::error::Error;
use crate::item::ItemId;
use crate::queue::{Direction, QueueEvent, Row};
use crate::search::SortMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
  Input,
  Queue,
}

pub struct App {
  pub engine: Engine,
  events: mpsc::UnboundedReceiver<EngineEvent>,
  pub input: String,
  pub cursor_position: usize,
  pub input_scroll: usize,
  pub mode: AppMode,
  pub sort: SortMode,
  pub list_state: ListState,
  /// Marked items, by identity so marks survive reorders and removals.
  pub marked: BTreeSet<ItemId>,
  pub last_error: Option<String>,
  pub status_message: Option<String>,
  /// Informational message, lower priority than status/error.
  pub info_message: Option<String>,
  pub should_quit: bool,
  config: Config,
  /// When the last error was set, for auto-dismiss after 5 seconds.
  error_time: Option<Instant>,
}

impl App {
  pub fn new(mut engine: Engine, config: Config, sort: SortMode) -> Self {
    let events = engine.subscribe();
    Self {
      engine,
      events,
      input: String::new(),
      cursor_position: 0,
      input_scroll: 0,
      mode: AppMode::Input,
      sort,
      list_state: ListState::default(),
      marked: BTreeSet::new(),
      last_error: None,
      status_message: None,
      info_message: None,
      should_quit: false,
      config,
      error_time: None,
    }
  }

  /// Set an error message with auto-dismiss tracking.
  pub fn set_error(&mut self, msg: String) {
    self.last_error = Some(msg);
    self.error_time = Some(Instant::now());
  }

  /// Surface an engine error. Queue contract violations also go to the log.
  fn report(&mut self, e: Error) {
    if e.is_contract_violation() {
      warn!(err = %e, "ui: queue rejected the operation");
    }
    self.set_error(e.to_string());
  }

  pub fn clear_error(&mut self) {
    self.last_error = None;
    self.error_time = None;
  }

  /// Clear stale error messages after 5 seconds.
  pub fn expire_error(&mut self) {
    if let Some(t) = self.error_time
      && t.elapsed() >= Duration::from_secs(5)
    {
      self.last_error = None;
      self.error_time = None;
    }
  }

  // --- Engine plumbing ---

  /// Apply finished background work and fold the resulting engine events into UI state.
  pub async fn check_pending(&mut self) -> Result<()> {
    self.engine.check_pending().await;
    while let Ok(event) = self.events.try_recv() {
      self.apply_event(event);
    }
    Ok(())
  }

  fn apply_event(&mut self, event: EngineEvent) {
    match event {
      EngineEvent::Queue(QueueEvent::Reset) => {
        self.marked.clear();
        self.list_state.select(None);
      }
      EngineEvent::Queue(QueueEvent::Appended { range }) => {
        self.status_message = None;
        if range.start == 0 {
          self.list_state.select(Some(0));
          self.mode = AppMode::Queue;
        }
      }
      EngineEvent::Queue(QueueEvent::Removed { .. }) => {
        let queue = self.engine.queue();
        self.marked.retain(|id| queue.index_of(*id).is_some());
        self.clamp_cursor();
      }
      EngineEvent::Queue(QueueEvent::SentinelChanged { .. }) => {
        self.status_message = None;
        self.clamp_cursor();
      }
      EngineEvent::Queue(_) => {}
      EngineEvent::State(state) => {
        debug!(state = %state, "ui: playback state");
        if let PlaybackState::Loading(id) = state
          && let Some(item) = self.engine.queue().item(id)
        {
          self.status_message = Some(format!("Loading '{}'…", item.title()));
        } else {
          self.status_message = None;
        }
      }
      EngineEvent::Status(msg) => self.info_message = Some(msg),
      EngineEvent::ResolutionFailed { item, reason } | EngineEvent::PlaybackFailed { item, reason } => {
        let title = self.engine.queue().item(item).map(|i| i.title().to_string()).unwrap_or_default();
        self.set_error(format!("Cannot play '{}': {}", title, reason));
      }
      EngineEvent::FetchFailed { reason, .. } => {
        self.status_message = None;
        self.set_error(format!("Search failed: {}", reason));
      }
    }
  }

  fn clamp_cursor(&mut self) {
    let rows = self.engine.queue().row_count();
    match self.list_state.selected() {
      _ if rows == 0 => self.list_state.select(None),
      Some(i) if i >= rows => self.list_state.select(Some(rows - 1)),
      None => self.list_state.select(Some(0)),
      _ => {}
    }
  }

  // --- Intents ---

  /// Search for the input, or play it directly when it is a video link.
  pub async fn submit(&mut self) {
    let query = self.input.trim().to_string();
    self.clear_error();
    self.info_message = None;
    match self.engine.submit(&query, self.sort).await {
      Ok(session) => {
        info!(session = %session, query = %query, "ui: submitted");
        self.status_message = Some(format!("Searching '{}'…", query));
      }
      Err(e) => self.set_error(e.to_string()),
    }
  }

  pub fn move_cursor(&mut self, down: bool) {
    let count = self.engine.queue().row_count();
    if count == 0 {
      return;
    }
    let i = match (self.list_state.selected(), down) {
      (None, _) => 0,
      (Some(i), true) => (i + 1) % count,
      (Some(0), false) => count - 1,
      (Some(i), false) => i - 1,
    };
    self.list_state.select(Some(i));
  }

  /// Item under the cursor (the sentinel row has none).
  pub fn cursor_item(&self) -> Option<ItemId> {
    match self.engine.queue().row(self.list_state.selected()?)? {
      Row::Item(item) => Some(item.id),
      Row::LoadMore => None,
    }
  }

  /// Marked items, or the cursor item when nothing is marked.
  fn selection(&self) -> Vec<ItemId> {
    if self.marked.is_empty() { self.cursor_item().into_iter().collect() } else { self.marked.iter().copied().collect() }
  }

  pub fn toggle_mark(&mut self) {
    if let Some(id) = self.cursor_item()
      && !self.marked.remove(&id)
    {
      self.marked.insert(id);
    }
  }

  pub async fn activate_cursor(&mut self) {
    let Some(row) = self.list_state.selected() else { return };
    self.clear_error();
    if let Err(e) = self.engine.activate_row(row).await {
      self.report(e);
    }
  }

  pub async fn remove_selection(&mut self) {
    let rows = self.engine.restore_selection(&self.selection());
    if rows.is_empty() {
      return;
    }
    match self.engine.remove(&rows).await {
      Ok(()) => {
        self.marked.clear();
        self.clamp_cursor();
      }
      Err(e) => self.report(e),
    }
  }

  /// Move the selection one row; the cursor follows its item.
  pub async fn move_selection(&mut self, direction: Direction) {
    let cursor = self.cursor_item();
    let rows = self.engine.restore_selection(&self.selection());
    if rows.is_empty() {
      return;
    }
    match self.engine.move_rows(&rows, direction).await {
      Ok(_) => {
        if let Some(row) = cursor.and_then(|id| self.engine.restore_selection(&[id]).first().copied()) {
          self.list_state.select(Some(row));
        }
      }
      Err(e) => {
        debug!(err = %e, "ui: move rejected");
        self.info_message = Some(format!("Can't move {}", direction));
      }
    }
  }

  pub fn load_more(&mut self) {
    if self.engine.load_more() {
      self.status_message = Some("Loading more…".to_string());
    }
  }

  pub async fn cycle_sort(&mut self) {
    let idx = SortMode::ALL.iter().position(|m| *m == self.sort).unwrap_or(0);
    self.sort = SortMode::ALL[(idx + 1) % SortMode::ALL.len()];
    self.config.sort_mode = Some(self.sort.label().to_string());
    self.config.save();
    if self.engine.session().and_then(|s| s.params()).is_none() {
      self.info_message = Some(format!("Sort: {}", self.sort));
      return;
    }
    match self.engine.change_sort(self.sort).await {
      Ok(_) => self.status_message = Some(format!("Sorting by {}…", self.sort)),
      Err(e) => self.set_error(e.to_string()),
    }
  }

  pub async fn toggle_pause(&mut self) {
    if self.engine.toggle_pause().await == Outcome::Ignored {
      self.info_message = Some("Nothing is playing.".to_string());
    }
  }

  pub async fn skip(&mut self) {
    match self.engine.skip().await {
      Ok(true) => {}
      Ok(false) => self.info_message = Some("End of queue.".to_string()),
      Err(e) => self.report(e),
    }
  }

  pub async fn stop(&mut self) {
    self.engine.stop().await;
    self.status_message = None;
  }

  /// Show the resolved stream URL of the active item.
  pub fn show_stream_url(&mut self) {
    self.info_message = Some(match self.engine.active_stream_url() {
      Some(url) => format!("Stream URL (valid for a limited time): {}", url),
      None => "No stream URL yet.".to_string(),
    });
  }

  /// Open the active item's web page in the default browser.
  pub async fn open_web_page(&mut self) {
    let Some(url) = self.engine.active_share_link() else { return };
    self.pause_playback().await;
    self.open_url(&url);
  }

  /// Pause before handing the user over to the browser. Never resumes.
  async fn pause_playback(&mut self) {
    if matches!(self.engine.state(), PlaybackState::Playing(_)) {
      self.engine.toggle_pause().await;
    }
  }

  /// Open the channel page of the item under the cursor.
  pub fn open_channel_page(&mut self) {
    let Some(id) = self.cursor_item() else { return };
    let url = self.engine.queue().item(id).and_then(|i| i.meta.author_url.clone());
    match url {
      Some(url) => self.open_url(&url),
      None => self.info_message = Some("No channel page for this video.".to_string()),
    }
  }

  fn open_url(&mut self, url: &str) {
    #[cfg(target_os = "macos")]
    let cmd = "open";
    #[cfg(not(target_os = "macos"))]
    let cmd = "xdg-open";
    match std::process::Command::new(cmd)
      .arg(url)
      .stdin(std::process::Stdio::null())
      .stdout(std::process::Stdio::null())
      .stderr(std::process::Stdio::null())
      .spawn()
    {
      Ok(mut child) => {
        // Reap the child in a background thread to avoid zombie processes.
        std::thread::spawn(move || {
          let _ = child.wait();
        });
      }
      Err(e) => self.set_error(format!("Failed to open browser: {}", e)),
    }
  }
}
