//! Contracts for the network capabilities the engine consumes.
//!
//! The engine only ever talks to these traits; the yt-dlp implementations live in
//! `youtube.rs` and the test doubles in `testing.rs`.

use anyhow::Result;
use async_trait::async_trait;

use crate::item::{Metadata, Resolved};
use crate::search::{SortMode, VideoRef};

/// Zero-based page position handed back by the provider with every page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
  pub page: u32,
}

impl Cursor {
  pub fn next_page(&self) -> Self {
    Self { page: self.page + 1 }
  }
}

/// One page of search results. `next` is `None` once the provider has nothing more.
#[derive(Debug, Clone, Default)]
pub struct Page {
  pub entries: Vec<Metadata>,
  pub next: Option<Cursor>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
  /// Fetch the page at `cursor` for `query`, ranked by the provider according to `sort`.
  async fn fetch(&self, query: &str, sort: SortMode, cursor: &Cursor) -> Result<Page>;

  /// Look up a single video referenced directly (pasted link).
  async fn lookup(&self, video: &VideoRef) -> Result<Metadata>;
}

#[async_trait]
pub trait Resolver: Send + Sync {
  /// Turn a video into a playable, usually time-limited, stream URL.
  async fn resolve(&self, meta: &Metadata) -> Result<Resolved>;
}
