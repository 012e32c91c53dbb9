//! Application constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!` so it's always available,
//! no runtime file I/O. Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // Queue / search
  pub look_ahead: usize,
  pub page_size: usize,

  // Playback coordinator timers
  pub recovery_delay_ms: u64,
  pub start_grace_ms: Option<u64>,
  pub url_reuse_margin_secs: i64,

  // YouTube / yt-dlp
  pub search_url: String,
  pub sort_filter_newest: String,
  pub sort_filter_view_count: String,
  pub list_format: String,
  pub lookup_format: String,
  pub resolve_format: String,

  // mpv
  pub mpv_ipc_timeout_ms: u64,
}

impl Constants {
  pub fn recovery_delay(&self) -> Duration {
    Duration::from_millis(self.recovery_delay_ms)
  }

  pub fn start_grace(&self) -> Option<Duration> {
    self.start_grace_ms.map(Duration::from_millis)
  }

  pub fn mpv_ipc_timeout(&self) -> Duration {
    Duration::from_millis(self.mpv_ipc_timeout_ms)
  }
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; if it's malformed the first access panics in every run.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn embedded_constants_parse() {
    let c = constants();
    assert_eq!(c.look_ahead, 10);
    assert!(c.page_size > 0);
    assert_eq!(c.recovery_delay(), Duration::from_secs(2));
    assert_eq!(c.start_grace(), Some(Duration::from_secs(3)));
  }

  #[test]
  fn list_format_is_tab_separated() {
    assert_eq!(constants().list_format.split('\t').count(), 6);
    assert_eq!(constants().lookup_format.split('\t').count(), 7);
  }
}
