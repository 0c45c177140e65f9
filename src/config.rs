//! Service settings stored as YAML.
//!
//! Loaded once at startup (a missing file means defaults) and written back
//! whenever a command changes the destination list or the active collection.

use crate::error::{Error, Result};
use crate::selection::SelectionMode;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument, warn};

/// Where `serve` listens for commands unless configured otherwise.
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:7419";

/// Runtime settings for the card service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Collection the daily cycle draws from.
    pub current_collection: String,
    /// Time of day (`HH:MM`) at which the card is generated.
    pub generate_time: String,
    /// Time of day (`HH:MM`) at which the cached card is pushed.
    pub push_time: String,
    /// Fixed UTC offset, in hours, all schedule times are expressed in.
    pub utc_offset_hours: i32,
    pub learning_mode: SelectionMode,
    /// Start over once every entry of a collection has been delivered.
    pub reset_on_complete: bool,
    /// Proficiency filter for leveled collections (`all`, `N1`..`N5`).
    pub level_filter: String,
    /// Registered delivery destinations.
    pub destinations: Vec<String>,
    pub use_cdn_background: bool,
    pub cdn_backgrounds: Vec<String>,
    pub enable_ai_background: bool,
    /// Device scale factor used when rasterizing cards.
    pub render_scale: u32,
    pub collections_dir: PathBuf,
    pub data_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub backgrounds_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    /// Endpoint that receives delivery requests; `None` means log-only delivery.
    pub webhook_url: Option<String>,
    /// Headless browser used to rasterize cards.
    pub chromium_binary: String,
    /// Loopback address the serving process takes commands on; `None`
    /// disables the endpoint and every command runs in its own process.
    pub control_addr: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            current_collection: "english".to_string(),
            generate_time: "07:30".to_string(),
            push_time: "08:00".to_string(),
            utc_offset_hours: 8,
            learning_mode: SelectionMode::Random,
            reset_on_complete: true,
            level_filter: "all".to_string(),
            destinations: Vec::new(),
            use_cdn_background: true,
            cdn_backgrounds: Vec::new(),
            enable_ai_background: false,
            render_scale: 4,
            collections_dir: PathBuf::from("collections"),
            data_dir: PathBuf::from("data"),
            templates_dir: PathBuf::from("templates"),
            backgrounds_dir: PathBuf::from("photos"),
            artifacts_dir: PathBuf::from("artifacts"),
            webhook_url: None,
            chromium_binary: "chromium".to_string(),
            control_addr: Some(DEFAULT_CONTROL_ADDR.to_string()),
        }
    }
}

impl AppConfig {
    /// Load settings from a YAML file, falling back to defaults if it is absent.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            warn!("Config file not found; using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).await?;
        let mut config: Self = serde_yaml::from_str(&raw)?;
        config.normalize();
        config.validate()?;
        info!(collection = %config.current_collection, "Loaded configuration");
        Ok(config)
    }

    /// Write settings back to a YAML file.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml).await?;
        info!("Saved configuration");
        Ok(())
    }

    /// The configured offset as a chrono timezone.
    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            Error::config(format!(
                "utc_offset_hours out of range: {}",
                self.utc_offset_hours
            ))
        })
    }

    /// Level filter handed to leveled collections; `all` means no filter.
    pub fn level_filter(&self) -> Option<&str> {
        let filter = self.level_filter.trim();
        (!filter.is_empty() && !filter.eq_ignore_ascii_case("all")).then_some(filter)
    }

    /// Drop blank and duplicate destinations while keeping their order.
    fn normalize(&mut self) {
        use itertools::Itertools;
        self.destinations = self
            .destinations
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unique()
            .collect();
    }

    fn validate(&self) -> Result<()> {
        self.offset()?;
        if self.render_scale == 0 {
            return Err(Error::config("render_scale must be at least 1"));
        }
        if self.current_collection.trim().is_empty() {
            return Err(Error::config("current_collection must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&tmp.path().join("nope.yaml")).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.generate_time, "07:30");
        assert_eq!(config.push_time, "08:00");
        assert!(config.reset_on_complete);
    }

    #[tokio::test]
    async fn test_partial_yaml_and_normalization() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        tokio::fs::write(
            &path,
            "current_collection: idiom\nlearning_mode: sequential\ndestinations:\n  - group-a\n  - ' group-a '\n  - ''\n  - group-b\n",
        )
        .await
        .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.current_collection, "idiom");
        assert_eq!(config.learning_mode, SelectionMode::Sequential);
        assert_eq!(config.destinations, vec!["group-a", "group-b"]);
        assert_eq!(config.utc_offset_hours, 8);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/config.yaml");
        let config = AppConfig {
            destinations: vec!["chat-42".into()],
            level_filter: "N3".into(),
            ..AppConfig::default()
        };
        config.save(&path).await.unwrap();
        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_invalid_offset_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        tokio::fs::write(&path, "utc_offset_hours: 99\n").await.unwrap();
        assert!(matches!(AppConfig::load(&path).await, Err(Error::Config(_))));
    }

    #[test]
    fn test_level_filter() {
        let mut config = AppConfig::default();
        assert_eq!(config.level_filter(), None);
        config.level_filter = "ALL".into();
        assert_eq!(config.level_filter(), None);
        config.level_filter = "N2".into();
        assert_eq!(config.level_filter(), Some("N2"));
    }
}
