//! Search sessions: first page, "load more" pagination, sort switching and pasted links.

use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use snafu::ensure;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{Dispatch, EngineMsg, Ticket};
use crate::error::{EmptyQuerySnafu, NoActiveSearchSnafu, Result, UnrecognizedSourceSnafu};
use crate::item::Metadata;
use crate::provider::{Cursor, Page, SearchProvider};
use crate::queue::QueueModel;

/// Result ordering, computed by the provider. The engine never re-sorts locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SortMode {
  #[default]
  Relevance,
  Newest,
  ViewCount,
}

impl SortMode {
  pub const ALL: [SortMode; 3] = [SortMode::Relevance, SortMode::Newest, SortMode::ViewCount];

  pub fn label(self) -> &'static str {
    match self {
      SortMode::Relevance => "relevance",
      SortMode::Newest => "newest",
      SortMode::ViewCount => "views",
    }
  }

  pub fn from_config(s: &str) -> Self {
    match s.to_lowercase().as_str() {
      "newest" | "date" => SortMode::Newest,
      "views" | "viewcount" | "view_count" => SortMode::ViewCount,
      _ => SortMode::Relevance,
    }
  }
}

impl fmt::Display for SortMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
  pub query: String,
  pub sort: SortMode,
}

/// A video referenced directly by a pasted link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRef {
  pub video_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "s{}", self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSource {
  Query(SearchParams),
  Link(VideoRef),
}

struct InFlight {
  ticket: Ticket,
  handle: JoinHandle<()>,
}

/// State of the current search. Replaced wholesale by the next search.
pub struct SearchSession {
  pub id: SessionId,
  pub source: SessionSource,
  pub cursor: Cursor,
  pub has_more: bool,
  /// Pages applied so far.
  pub pages: u32,
  in_flight: Option<InFlight>,
}

impl SearchSession {
  pub fn params(&self) -> Option<&SearchParams> {
    match &self.source {
      SessionSource::Query(params) => Some(params),
      SessionSource::Link(_) => None,
    }
  }

  pub fn is_fetching(&self) -> bool {
    self.in_flight.is_some()
  }
}

/// What applying a page result did to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
  Stale,
  Appended { first_page: bool, count: usize },
  NoResults,
  Failed { session: SessionId, reason: String },
}

pub struct SearchController {
  provider: Arc<dyn SearchProvider>,
  session: Option<SearchSession>,
  next_session: u64,
}

impl SearchController {
  pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
    Self { provider, session: None, next_session: 0 }
  }

  pub fn session(&self) -> Option<&SearchSession> {
    self.session.as_ref()
  }

  /// Replace the current session with a fresh query and fetch its first page.
  pub fn start_search(
    &mut self,
    query: &str,
    sort: SortMode,
    queue: &mut QueueModel,
    dispatch: &mut Dispatch,
  ) -> Result<SessionId> {
    let query = query.trim();
    ensure!(!query.is_empty(), EmptyQuerySnafu);
    info!(query = %query, sort = %sort, "search: started");
    let params = SearchParams { query: query.to_string(), sort };
    let id = self.open_session(SessionSource::Query(params), queue);
    self.issue_fetch(dispatch);
    Ok(id)
  }

  /// Start a single-item session from a link found in `text`, skipping pagination.
  pub fn parse_source(&mut self, text: &str, queue: &mut QueueModel, dispatch: &mut Dispatch) -> Result<SessionId> {
    let Some(video) = detect_video_ref(text) else {
      return UnrecognizedSourceSnafu { text: text.trim().to_string() }.fail();
    };
    info!(video_id = %video.video_id, "search: playing pasted link");
    let id = self.open_session(SessionSource::Link(video), queue);
    self.issue_fetch(dispatch);
    Ok(id)
  }

  /// Fetch the next page. Returns whether a fetch was actually issued.
  pub fn load_more(&mut self, dispatch: &mut Dispatch) -> bool {
    let Some(session) = &self.session else { return false };
    if session.in_flight.is_some() {
      debug!(session = %session.id, "search: load more already in flight");
      return false;
    }
    if !session.has_more {
      return false;
    }
    self.issue_fetch(dispatch);
    true
  }

  /// Re-run the current query with another ordering. Always a full replacement.
  pub fn change_sort(&mut self, sort: SortMode, queue: &mut QueueModel, dispatch: &mut Dispatch) -> Result<SessionId> {
    let Some(params) = self.session.as_ref().and_then(SearchSession::params) else {
      return NoActiveSearchSnafu.fail();
    };
    let query = params.query.clone();
    self.start_search(&query, sort, queue, dispatch)
  }

  /// Abort the in-flight fetch, if any. Late results are still rejected by ticket.
  pub fn cancel(&mut self) {
    if let Some(session) = &mut self.session
      && let Some(in_flight) = session.in_flight.take()
    {
      debug!(session = %session.id, "search: cancelling fetch");
      in_flight.handle.abort();
    }
  }

  /// Apply a fetch result, validating it still belongs to the current session and fetch.
  pub fn apply_page(
    &mut self,
    session_id: SessionId,
    ticket: Ticket,
    result: anyhow::Result<Page>,
    queue: &mut QueueModel,
  ) -> PageOutcome {
    let Some(session) = &mut self.session else { return PageOutcome::Stale };
    if session.id != session_id || session.in_flight.as_ref().map(|f| f.ticket) != Some(ticket) {
      debug!(session = %session_id, ticket = ticket.0, "search: discarding stale page");
      return PageOutcome::Stale;
    }
    session.in_flight = None;

    match result {
      Ok(page) => {
        let first_page = session.pages == 0;
        let count = page.entries.len();
        session.pages += 1;
        match page.next {
          Some(next) if count > 0 => {
            session.cursor = next;
            session.has_more = true;
          }
          _ => session.has_more = false,
        }
        info!(session = %session.id, count, has_more = session.has_more, "search: page arrived");
        queue.append(page.entries);
        queue.set_has_more(session.has_more);
        if first_page && count == 0 { PageOutcome::NoResults } else { PageOutcome::Appended { first_page, count } }
      }
      Err(e) => {
        let reason = format!("{:#}", e);
        warn!(session = %session.id, err = %reason, "search: fetch failed");
        // Keep the sentinel so the user can retry with "load more".
        if matches!(session.source, SessionSource::Query(_)) {
          session.has_more = true;
          queue.set_has_more(true);
        }
        PageOutcome::Failed { session: session.id, reason }
      }
    }
  }

  fn open_session(&mut self, source: SessionSource, queue: &mut QueueModel) -> SessionId {
    self.cancel();
    queue.reset();
    self.next_session += 1;
    let id = SessionId(self.next_session);
    let has_more = matches!(source, SessionSource::Query(_));
    self.session = Some(SearchSession { id, source, cursor: Cursor::default(), has_more, pages: 0, in_flight: None });
    id
  }

  fn issue_fetch(&mut self, dispatch: &mut Dispatch) {
    let Some(session) = &mut self.session else { return };
    let ticket = dispatch.ticket();
    let tx = dispatch.sender();
    let provider = Arc::clone(&self.provider);
    let session_id = session.id;
    let source = session.source.clone();
    let cursor = session.cursor.clone();
    debug!(session = %session_id, page = cursor.page, ticket = ticket.0, "search: fetching page");

    let handle = tokio::spawn(async move {
      let result = match source {
        SessionSource::Query(params) => provider.fetch(&params.query, params.sort, &cursor).await,
        SessionSource::Link(video) => {
          provider.lookup(&video).await.map(|meta| Page { entries: vec![meta], next: None })
        }
      };
      let _ = tx.send(EngineMsg::Page { session: session_id, ticket, result });
    });
    session.in_flight = Some(InFlight { ticket, handle });
  }
}

/// Characters allowed in a YouTube video id.
fn is_id_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Take a video id from the start of `s`, if it is exactly 11 id characters long.
fn take_video_id(s: &str) -> Option<String> {
  let id: String = s.chars().take_while(|c| is_id_char(*c)).collect();
  (id.chars().count() == 11).then_some(id)
}

/// Find a YouTube video link in arbitrary pasted text.
///
/// Recognises `watch?v=`, `youtu.be/`, `/shorts/`, `/embed/`, `/live/` and `/v/` forms,
/// with or without scheme. Plain words are never treated as ids.
pub fn detect_video_ref(text: &str) -> Option<VideoRef> {
  text.split_whitespace().find_map(|token| {
    let token = token.trim_matches(|c: char| matches!(c, '<' | '>' | '"' | '\'' | '(' | ')'));
    let lower = token.to_ascii_lowercase();

    if let Some(pos) = lower.find("youtu.be/") {
      return take_video_id(&token[pos + "youtu.be/".len()..]).map(|video_id| VideoRef { video_id });
    }

    let host = ["youtube.com/", "youtube-nocookie.com/"].iter().find_map(|h| lower.find(h).map(|p| p + h.len()))?;
    let rest = &token[host..];

    if let Some((_, query)) = rest.split_once('?') {
      let found = query
        .split(['&', '#'])
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "v")
        .and_then(|(_, value)| take_video_id(value));
      if found.is_some() {
        return found.map(|video_id| VideoRef { video_id });
      }
    }

    ["shorts/", "embed/", "live/", "v/"]
      .iter()
      .find_map(|prefix| rest.strip_prefix(prefix))
      .and_then(take_video_id)
      .map(|video_id| VideoRef { video_id })
  })
}

/// Fallback metadata for a link whose lookup gave nothing better.
pub fn link_metadata(video: &VideoRef) -> Metadata {
  Metadata::from_video_id(&video.video_id)
}
