//! Engine options: the configuration surface consumed (not owned) by the
//! editing core.
//!
//! Options are normally supplied programmatically by the embedding layer;
//! a TOML profile (`quillbox.toml`, local directory first, then the
//! platform config dir) can override defaults for hosts that want
//! file-based configuration. Unknown fields are ignored so the profile can
//! evolve without warnings, and a parse error falls back to defaults.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    /// Maximum retained undo entries; the oldest entry is evicted FIFO.
    #[serde(default = "HistoryConfig::default_max_depth")]
    pub max_depth: usize,
    /// Consecutive changes within this window collapse into one undo entry.
    #[serde(default = "HistoryConfig::default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_depth: Self::default_max_depth(),
            debounce_ms: Self::default_debounce_ms(),
        }
    }
}

impl HistoryConfig {
    const fn default_max_depth() -> usize {
        100
    }
    const fn default_debounce_ms() -> u64 {
        300
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Options {
    #[serde(default)]
    pub placeholder: String,
    /// Maximum document length in characters; `None` disables the length
    /// interceptor entirely.
    #[serde(default)]
    pub max_length: Option<usize>,
    /// When false, line breaks are exempt from the length budget.
    #[serde(default = "Options::default_line_break_count")]
    pub is_line_break_count: bool,
    #[serde(default = "Options::default_min_height")]
    pub min_height: u32,
    #[serde(default = "Options::default_max_height")]
    pub max_height: u32,
    /// Cap on decorative emoji atoms in the document.
    #[serde(default = "Options::default_emoji_max_count")]
    pub emoji_max_count: usize,
    /// Images accepted from a single paste; the rest of the batch is
    /// dropped.
    #[serde(default = "Options::default_image_paste_max")]
    pub image_paste_max: usize,
    /// Sensitive words re-checked after every committed change.
    #[serde(default)]
    pub match_words_list: Vec<String>,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            placeholder: String::new(),
            max_length: None,
            is_line_break_count: Self::default_line_break_count(),
            min_height: Self::default_min_height(),
            max_height: Self::default_max_height(),
            emoji_max_count: Self::default_emoji_max_count(),
            image_paste_max: Self::default_image_paste_max(),
            match_words_list: Vec::new(),
            history: HistoryConfig::default(),
        }
    }
}

impl Options {
    const fn default_line_break_count() -> bool {
        true
    }
    const fn default_min_height() -> u32 {
        36
    }
    const fn default_max_height() -> u32 {
        200
    }
    const fn default_emoji_max_count() -> usize {
        50
    }
    const fn default_image_paste_max() -> usize {
        5
    }

    pub fn with_max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn with_placeholder(mut self, text: impl Into<String>) -> Self {
        self.placeholder = text.into();
        self
    }
}

/// Best-effort profile path following platform conventions: local working
/// directory first, then the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("quillbox.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("quillbox").join("quillbox.toml");
    }
    PathBuf::from("quillbox.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Options> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<Options>(&content) {
            Ok(options) => {
                info!(target: "config", path = %path.display(), "options_profile_loaded");
                Ok(options)
            }
            Err(_e) => Ok(Options::default()),
        }
    } else {
        Ok(Options::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_profile_missing() {
        let opts = load_from(Some(PathBuf::from("__nonexistent_hopefully__.toml"))).unwrap();
        assert_eq!(opts.max_length, None);
        assert!(opts.is_line_break_count);
        assert_eq!(opts.history.max_depth, 100);
        assert_eq!(opts.image_paste_max, 5);
    }

    #[test]
    fn parses_profile_fields() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "placeholder = \"say something\"\nmax_length = 140\nis_line_break_count = false\n[history]\nmax_depth = 10\n",
        )
        .unwrap();
        let opts = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(opts.placeholder, "say something");
        assert_eq!(opts.max_length, Some(140));
        assert!(!opts.is_line_break_count);
        assert_eq!(opts.history.max_depth, 10);
        // Unspecified fields keep their defaults.
        assert_eq!(opts.history.debounce_ms, 300);
        assert_eq!(opts.emoji_max_count, 50);
    }

    #[test]
    fn parse_error_falls_back_to_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "max_length = \"not a number\"\n").unwrap();
        let opts = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(opts.max_length, None);
    }

    #[test]
    fn builder_style_overrides() {
        let opts = Options::default()
            .with_max_length(280)
            .with_placeholder("type here");
        assert_eq!(opts.max_length, Some(280));
        assert_eq!(opts.placeholder, "type here");
    }
}
