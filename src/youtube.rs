use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::constants::constants;
use crate::item::{Metadata, Resolved};
use crate::provider::{Cursor, Page, Resolver, SearchProvider};
use crate::search::{SortMode, VideoRef, link_metadata};

/// Search, lookup and stream resolution backed by the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlp {
  page_size: usize,
}

impl Default for YtDlp {
  fn default() -> Self {
    Self::new(constants().page_size)
  }
}

impl YtDlp {
  pub fn new(page_size: usize) -> Self {
    Self { page_size: page_size.max(1) }
  }
}

/// Build the results-page URL yt-dlp lists from. Sorting is done server-side through the
/// `sp` filter parameter.
pub fn search_url(query: &str, sort: SortMode) -> String {
  let c = constants();
  let filter = match sort {
    SortMode::Relevance => None,
    SortMode::Newest => Some(&c.sort_filter_newest),
    SortMode::ViewCount => Some(&c.sort_filter_view_count),
  };
  let mut url = format!("{}{}", c.search_url, urlencoding::encode(query));
  if let Some(filter) = filter {
    url.push_str("&sp=");
    url.push_str(filter);
  }
  url
}

/// 1-based inclusive `--playlist-items` range for a page.
fn playlist_range(page: u32, page_size: usize) -> String {
  let start = page as usize * page_size + 1;
  format!("{}:{}", start, start + page_size - 1)
}

/// Parse one tab-separated line printed with `list_format` / `lookup_format`.
/// Expected: `title\tid\tchannel\tchannel_url\tduration\tview_count[\tupload_date]`
fn parse_entry_line(line: &str) -> Option<Metadata> {
  let parts: Vec<&str> = line.split('\t').collect();
  if parts.len() < 2 {
    return None;
  }
  let video_id = parts[1].trim();
  if video_id.is_empty() || video_id == "NA" {
    return None;
  }
  let opt = |idx: usize| -> Option<String> {
    parts.get(idx).map(|s| s.trim()).filter(|s| !s.is_empty() && *s != "NA").map(|s| s.to_string())
  };
  let mut meta = Metadata::from_video_id(video_id);
  if let Some(title) = opt(0) {
    meta.title = title;
  }
  meta.author = opt(2);
  meta.author_url = opt(3);
  meta.duration = opt(4);
  meta.view_count = opt(5).and_then(|s| s.parse().ok());
  meta.upload_date = opt(6);
  Some(meta)
}

fn parse_entries(stdout: &str) -> Vec<Metadata> {
  stdout.lines().map(str::trim).filter(|l| !l.is_empty()).filter_map(parse_entry_line).collect()
}

/// Run yt-dlp with `args` and return its stdout. `what` names the operation in errors.
async fn run_yt_dlp(args: &[&str], what: &str) -> Result<String> {
  debug!(args = ?args, "yt-dlp: running {}", what);
  let output = Command::new("yt-dlp")
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true)
    .output()
    .await
    .map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        anyhow!("yt-dlp not found. Install it with: brew install yt-dlp (macOS) or pip install yt-dlp")
      } else {
        anyhow!(e).context(format!("Failed to execute yt-dlp {}", what))
      }
    })?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(anyhow!("yt-dlp {} failed: {}", what, stderr.trim()));
  }
  String::from_utf8(output.stdout).context("yt-dlp output non-UTF8")
}

#[async_trait]
impl SearchProvider for YtDlp {
  async fn fetch(&self, query: &str, sort: SortMode, cursor: &Cursor) -> Result<Page> {
    let url = search_url(query, sort);
    let range = playlist_range(cursor.page, self.page_size);
    let stdout = run_yt_dlp(
      &[
        "--flat-playlist",
        "--print",
        &constants().list_format,
        "--playlist-items",
        &range,
        "--ignore-errors",
        "--no-warnings",
        "--",
        &url,
      ],
      "search",
    )
    .await?;
    let entries = parse_entries(&stdout);
    // A short page means the listing is exhausted.
    let next = (entries.len() >= self.page_size).then(|| cursor.next_page());
    Ok(Page { entries, next })
  }

  async fn lookup(&self, video: &VideoRef) -> Result<Metadata> {
    let url = link_metadata(video).web_page;
    let result = run_yt_dlp(
      &["--skip-download", "--no-playlist", "--print", &constants().lookup_format, "--no-warnings", "--", &url],
      "lookup",
    )
    .await;
    match result {
      Ok(stdout) => Ok(parse_entries(&stdout).into_iter().next().unwrap_or_else(|| link_metadata(video))),
      Err(e) => {
        // Still queue the link; resolution will report whether it is really playable.
        warn!(video_id = %video.video_id, err = %e, "youtube: lookup failed, using bare link");
        Ok(link_metadata(video))
      }
    }
  }
}

#[async_trait]
impl Resolver for YtDlp {
  async fn resolve(&self, meta: &Metadata) -> Result<Resolved> {
    let stdout = run_yt_dlp(
      &["-g", "-f", &constants().resolve_format, "--no-playlist", "--no-warnings", "--", &meta.web_page],
      "resolve",
    )
    .await?;
    let url = stdout
      .lines()
      .map(str::trim)
      .find(|l| l.starts_with("http"))
      .ok_or_else(|| anyhow!("yt-dlp returned no stream URL for {}", meta.video_id))?;
    Ok(Resolved::from_url(url))
  }
}
