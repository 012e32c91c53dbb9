//! In-memory fakes for the provider, resolver and player traits.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};

use crate::item::{Metadata, Resolved};
use crate::provider::{Cursor, Page, Resolver, SearchProvider};
use crate::search::{SortMode, VideoRef};
use crate::session::{MediaSource, PlaybackSession};

/// Serves `per_page` synthetic results per page.
pub struct FakeProvider {
  per_page: usize,
  pages: Option<u32>,
  hold_after: Option<usize>,
  failures: AtomicUsize,
  fetches: AtomicUsize,
}

impl FakeProvider {
  pub fn new(per_page: usize) -> Self {
    Self { per_page, pages: None, hold_after: None, failures: AtomicUsize::new(0), fetches: AtomicUsize::new(0) }
  }

  /// Stop offering more pages after `pages`.
  pub fn pages(mut self, pages: u32) -> Self {
    self.pages = Some(pages);
    self
  }

  /// Fetches beyond the first `count` never complete.
  pub fn hold_after(mut self, count: usize) -> Self {
    self.hold_after = Some(count);
    self
  }

  /// The next `count` fetches fail.
  pub fn fail_next(self, count: usize) -> Self {
    self.failures.store(count, Ordering::SeqCst);
    self
  }

  pub fn fetch_count(&self) -> usize {
    self.fetches.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl SearchProvider for FakeProvider {
  async fn fetch(&self, query: &str, sort: SortMode, cursor: &Cursor) -> Result<Page> {
    let n = self.fetches.fetch_add(1, Ordering::SeqCst);
    if self.hold_after.is_some_and(|limit| n >= limit) {
      std::future::pending::<()>().await;
    }
    if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1)).is_ok() {
      bail!("search service unavailable");
    }
    let entries = (0..self.per_page)
      .map(|i| {
        let mut meta = Metadata::from_video_id(&format!("{}{:03}{:03}", sort.label(), cursor.page, i));
        meta.title = format!("{} #{}", query, cursor.page as usize * self.per_page + i);
        meta
      })
      .collect();
    let last = self.pages.is_some_and(|pages| cursor.page + 1 >= pages);
    Ok(Page { entries, next: (!last).then(|| cursor.next_page()) })
  }

  async fn lookup(&self, video: &VideoRef) -> Result<Metadata> {
    Ok(Metadata::from_video_id(&video.video_id))
  }
}

/// Resolves every video to a URL that stays valid for six hours.
#[derive(Default)]
pub struct FakeResolver {
  failing: Mutex<HashSet<String>>,
  hold: AtomicBool,
  resolves: AtomicUsize,
}

impl FakeResolver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn url_for(meta: &Metadata) -> String {
    format!("https://media.test/{}.mp4", meta.video_id)
  }

  pub fn fail_for(&self, video_id: &str) {
    self.failing.lock().unwrap().insert(video_id.to_string());
  }

  /// While set, new resolutions never complete.
  pub fn hold(&self, hold: bool) {
    self.hold.store(hold, Ordering::SeqCst);
  }

  pub fn resolve_count(&self) -> usize {
    self.resolves.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Resolver for FakeResolver {
  async fn resolve(&self, meta: &Metadata) -> Result<Resolved> {
    self.resolves.fetch_add(1, Ordering::SeqCst);
    if self.hold.load(Ordering::SeqCst) {
      std::future::pending::<()>().await;
    }
    if self.failing.lock().unwrap().contains(&meta.video_id) {
      bail!("video {} is unavailable", meta.video_id);
    }
    Ok(Resolved { url: Self::url_for(meta), expires_at: Some(Utc::now() + TimeDelta::hours(6)) })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
  SetSource(MediaSource),
  Play,
  Pause,
  Stop,
}

/// Records every call; never emits events on its own.
#[derive(Default)]
pub struct FakeSession {
  calls: Mutex<Vec<SessionCall>>,
  position: Mutex<Option<Duration>>,
}

impl FakeSession {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn calls(&self) -> Vec<SessionCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn last_source(&self) -> Option<MediaSource> {
    self.calls().into_iter().rev().find_map(|call| match call {
      SessionCall::SetSource(source) => Some(source),
      _ => None,
    })
  }

  pub fn set_position(&self, position: Option<Duration>) {
    *self.position.lock().unwrap() = position;
  }

  fn record(&self, call: SessionCall) {
    self.calls.lock().unwrap().push(call);
  }
}

#[async_trait]
impl PlaybackSession for FakeSession {
  async fn set_source(&self, source: MediaSource) -> Result<()> {
    self.record(SessionCall::SetSource(source));
    Ok(())
  }

  async fn play(&self) -> Result<()> {
    self.record(SessionCall::Play);
    Ok(())
  }

  async fn pause(&self) -> Result<()> {
    self.record(SessionCall::Pause);
    Ok(())
  }

  async fn stop(&self) -> Result<()> {
    self.record(SessionCall::Stop);
    Ok(())
  }

  async fn position(&self) -> Result<Option<Duration>> {
    Ok(*self.position.lock().unwrap())
  }
}
