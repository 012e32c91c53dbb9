use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;

/// Stable identity of a queue entry. Assigned by the queue on insertion and never reused,
/// so it stays valid across reorders and lets async results be matched to their target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Provider-side description of a video, as returned by a search page or a link lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
  pub video_id: String,
  pub title: String,
  pub web_page: String,
  pub author: Option<String>,
  pub author_url: Option<String>,
  pub duration: Option<String>,
  pub upload_date: Option<String>,
  pub view_count: Option<u64>,
}

impl Metadata {
  /// Minimal metadata for a video known only by id.
  pub fn from_video_id(video_id: &str) -> Self {
    Self {
      video_id: video_id.to_string(),
      title: video_id.to_string(),
      web_page: format!("https://www.youtube.com/watch?v={}", video_id),
      author: None,
      author_url: None,
      duration: None,
      upload_date: None,
      view_count: None,
    }
  }
}

/// A playable URL together with the moment the CDN stops honouring it, when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
  pub url: String,
  pub expires_at: Option<DateTime<Utc>>,
}

impl Resolved {
  /// Build from a resolved stream URL, reading the `expire=` hint if the URL carries one.
  pub fn from_url(url: impl Into<String>) -> Self {
    let url = url.into();
    let expires_at = expiry_hint(&url);
    Self { url, expires_at }
  }

  /// Whether the URL can still be handed to the player at `now`, keeping `margin` in reserve.
  /// URLs without an expiry hint are never reused.
  pub fn is_fresh(&self, now: DateTime<Utc>, margin: TimeDelta) -> bool {
    self.expires_at.is_some_and(|at| at - margin > now)
  }
}

/// Resolution lifecycle of a queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Resolution {
  #[default]
  Unresolved,
  Resolving,
  Resolved(Resolved),
  Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
  pub id: ItemId,
  pub meta: Metadata,
  pub resolution: Resolution,
}

impl Item {
  pub fn new(id: ItemId, meta: Metadata) -> Self {
    Self { id, meta, resolution: Resolution::Unresolved }
  }

  pub fn title(&self) -> &str {
    &self.meta.title
  }

  /// Web page address suitable for sharing, without provider tracking suffixes.
  pub fn share_link(&self) -> String {
    self.meta.web_page.replace("&feature=youtube_gdata", "")
  }

  /// The resolved stream URL, if resolution already succeeded.
  pub fn stream_url(&self) -> Option<&str> {
    match &self.resolution {
      Resolution::Resolved(r) => Some(&r.url),
      _ => None,
    }
  }
}

/// Extract the `expire=<unix seconds>` query parameter stream CDNs attach to signed URLs.
pub fn expiry_hint(url: &str) -> Option<DateTime<Utc>> {
  let (_, query) = url.split_once('?')?;
  query
    .split('&')
    .filter_map(|pair| pair.split_once('='))
    .find(|(key, _)| *key == "expire")
    .and_then(|(_, value)| value.parse::<i64>().ok())
    .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
