use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::item::ItemId;

/// What the player should open, tagged with the queue item it belongs to so every status
/// event can be matched back to the item that was playing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
  pub item: ItemId,
  pub url: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerStatus {
  Loading,
  Playing,
  Paused,
  Stopped,
  Buffering,
  Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEventKind {
  Status(PlayerStatus),
  /// The source played through to its end.
  Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEvent {
  pub item: ItemId,
  pub kind: PlaybackEventKind,
}

/// A media player the engine drives. Status changes are reported asynchronously through
/// the `PlaybackEvent` channel handed to the implementation when it is built.
#[async_trait]
pub trait PlaybackSession: Send + Sync {
  async fn set_source(&self, source: MediaSource) -> Result<()>;
  async fn play(&self) -> Result<()>;
  async fn pause(&self) -> Result<()>;
  async fn stop(&self) -> Result<()>;
  /// Current play position, `None` when nothing is loaded.
  async fn position(&self) -> Result<Option<Duration>>;
}
