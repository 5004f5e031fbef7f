//! Vault configuration stored under `.ticksync/`.

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use ticksync_core::ProjectId;
use ticksync_core::line::DEFAULT_TAG;
use url::Url;

const CONFIG_DIR: &str = ".ticksync";
const CONFIG_FILE: &str = "config.toml";

/// Lower bound for the automatic sync interval, in seconds.
pub const MIN_SYNC_INTERVAL_SECS: u64 = 20;

/// Top-level vault configuration loaded from `.ticksync/config.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectConfig {
    /// Engine settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl ProjectConfig {
    /// Load configuration from a vault root directory.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read, parsed or validated.
    pub fn from_vault(root: impl AsRef<Path>) -> Result<Self> {
        let config_path = Self::path_in(root);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;
        config.sync.validate()?;
        Ok(config)
    }

    /// Location of the configuration file inside a vault.
    pub fn path_in(root: impl AsRef<Path>) -> std::path::PathBuf {
        root.as_ref().join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Directory holding ticksync's own files inside a vault.
    pub fn state_dir(root: impl AsRef<Path>) -> std::path::PathBuf {
        root.as_ref().join(CONFIG_DIR)
    }
}

/// Settings threaded into the sync engine at construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between automatic passes.
    pub interval_secs: u64,
    /// Track every task line, not only tagged ones.
    pub full_vault_sync: bool,
    /// Log every field-level change.
    pub debug: bool,
    /// Tag marking a line as tracked.
    pub tag: String,
    /// Project for new tasks without a project tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_project_id: Option<ProjectId>,
    /// Document receiving remote tasks that have no better home.
    pub inbox_document: String,
    /// Base URL for back-links from remote tasks to documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_base: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            full_vault_sync: false,
            debug: false,
            tag: DEFAULT_TAG.to_owned(),
            default_project_id: None,
            inbox_document: "TickTick.md".to_owned(),
            link_base: None,
        }
    }
}

impl SyncConfig {
    /// Check value ranges.
    ///
    /// # Errors
    /// Returns a message naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs < MIN_SYNC_INTERVAL_SECS {
            bail!(
                "sync interval must be at least {MIN_SYNC_INTERVAL_SECS} seconds, got {}",
                self.interval_secs
            );
        }
        let Some(name) = self.tag.strip_prefix('#') else {
            bail!("tag '{}' must start with '#'", self.tag);
        };
        if name.is_empty() || name.starts_with('#') || name.contains(char::is_whitespace) {
            bail!("tag '{}' must be a single #word", self.tag);
        }
        if self.inbox_document.trim().is_empty() {
            bail!("inbox document must not be empty");
        }
        if let Some(base) = &self.link_base {
            Url::parse(base).with_context(|| format!("link base '{base}' is not a valid URL"))?;
        }
        Ok(())
    }

    /// Interval between automatic passes.
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Back-link locator for a document, when a link base is configured.
    pub fn locator_for(&self, path: &str) -> Option<String> {
        let base = self.link_base.as_deref()?;
        let mut url = Url::parse(base).ok()?;
        url.query_pairs_mut().append_pair("file", path);
        Some(url.to_string())
    }
}
