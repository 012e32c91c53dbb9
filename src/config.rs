use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::search::SortMode;

/// User preferences persisted to `prefs.toml` in the platform config dir.
#[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
pub struct Config {
  pub sort_mode: Option<String>,
  pub autoplay: Option<bool>,
  /// Open an mpv window instead of playing audio only.
  pub video: Option<bool>,
}

impl Config {
  pub fn load() -> Self {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "ypq") {
      let config_file = proj_dirs.config_dir().join("prefs.toml");
      if let Ok(content) = std::fs::read_to_string(config_file)
        && let Ok(config) = toml::from_str(&content)
      {
        return config;
      }
    }
    Self::default()
  }

  pub fn save(&self) {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "ypq") {
      let config_dir = proj_dirs.config_dir();
      if std::fs::create_dir_all(config_dir).is_ok() {
        let config_file = config_dir.join("prefs.toml");
        if let Ok(content) = toml::to_string(self) {
          let _ = std::fs::write(config_file, content);
        }
      }
    }
  }

  pub fn sort_mode(&self) -> SortMode {
    self.sort_mode.as_deref().map(SortMode::from_config).unwrap_or_default()
  }

  pub fn autoplay(&self) -> bool {
    self.autoplay.unwrap_or(true)
  }

  pub fn video(&self) -> bool {
    self.video.unwrap_or(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_prefs_use_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.sort_mode(), SortMode::Relevance);
    assert!(config.autoplay());
    assert!(config.video());
  }

  #[test]
  fn reads_saved_prefs() {
    let config: Config = toml::from_str("sort_mode = \"views\"\nautoplay = false\n").unwrap();
    assert_eq!(config.sort_mode(), SortMode::ViewCount);
    assert!(!config.autoplay());
  }
}
