use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_VIEW_SCALE: f64 = 0.2;
pub const DEFAULT_CELL_MARGIN: u32 = 4;

/// Viewer settings, resolved from defaults, an optional JSON file, the
/// environment, and finally command line flags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewerConfig {
    pub base_url: String,
    pub owner: String,
    pub view_scale: f64,
    pub cell_margin: u32,
    pub draw_poll_millis: u64,
    /// Polls before a draw waiting on unpositioned cells is abandoned.
    pub draw_wait_polls: u32,
    pub handoff_retries: u32,
    pub handoff_interval_millis: u64,
    pub request_timeout_secs: u64,
    pub out_dir: PathBuf,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/render-ws/v1".to_string(),
            owner: "flyTEM".to_string(),
            view_scale: DEFAULT_VIEW_SCALE,
            cell_margin: DEFAULT_CELL_MARGIN,
            draw_poll_millis: 500,
            draw_wait_polls: 120,
            handoff_retries: 3,
            handoff_interval_millis: 500,
            request_timeout_secs: 300,
            out_dir: PathBuf::from(".match-trial"),
        }
    }
}

impl ViewerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("config not found: {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("invalid config JSON: {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(base_url) = non_blank_env("MATCH_TRIAL_BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(owner) = non_blank_env("MATCH_TRIAL_OWNER") {
            self.owner = owner;
        }
        if let Some(out_dir) = non_blank_env("MATCH_TRIAL_OUT_DIR") {
            self.out_dir = PathBuf::from(out_dir);
        }
    }

    /// View scale to render cells at; non-finite or non-positive values fall back to the default.
    pub fn effective_view_scale(&self) -> f64 {
        if self.view_scale.is_finite() && self.view_scale > 0.0 {
            self.view_scale
        } else {
            DEFAULT_VIEW_SCALE
        }
    }

    pub fn draw_poll_interval(&self) -> Duration {
        Duration::from_millis(self.draw_poll_millis)
    }

    pub fn handoff_interval(&self) -> Duration {
        Duration::from_millis(self.handoff_interval_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn non_blank_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_config_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("viewer.json");
        fs::write(&path, r#"{"owner": "hessh", "viewScale": 0.35}"#).unwrap();
        let config = ViewerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.view_scale, 0.35);
        assert_eq!(config.cell_margin, DEFAULT_CELL_MARGIN);
        assert_eq!(config.handoff_retries, 3);
    }

    #[test]
    fn bad_view_scale_falls_back() {
        let config = ViewerConfig {
            view_scale: f64::NAN,
            ..ViewerConfig::default()
        };
        assert_eq!(config.effective_view_scale(), DEFAULT_VIEW_SCALE);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(ViewerConfig::load(Some(&dir.path().join("nope.json"))).is_err());
    }
}
