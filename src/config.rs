//! Build configuration.
//!
//! Loaded from an optional `config.toml` in the content root. The file is
//! sparse: whatever it sets is merged over the stock defaults, unknown keys are
//! rejected, and the merged result is validated before use.
//!
//! ```toml
//! [render]
//! cache_dir = ".stagepress-cache"   # Shared on-disk cache (diagrams)
//! user_agent = "stagepress"         # Sent with every outbound request
//! # link_target = "_blank"          # Applied to external links
//!
//! [render.highlight]
//! enabled = true
//! theme = "base16-ocean.dark"       # Any bundled syntect theme
//! line_numbers = false
//!
//! [render.diagrams]
//! renderer = "client"               # "none" | "client" | "remote"
//! endpoint = "https://kroki.io"     # Used by the "remote" renderer
//!
//! [processing]
//! # max_workers = 4                 # Omit for auto (= CPU cores)
//! ```

use crate::highlight;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up in the content root.
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub render: RenderConfig,
    pub processing: ProcessingConfig,
}

impl BuildConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render.user_agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "render.user_agent must not be empty".into(),
            ));
        }
        if self.processing.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_workers must be at least 1".into(),
            ));
        }
        if let Some(target) = &self.render.link_target
            && target.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "render.link_target must not be empty when set".into(),
            ));
        }
        if self.render.highlight.enabled && !highlight::has_theme(&self.render.highlight.theme) {
            return Err(ConfigError::Validation(format!(
                "render.highlight.theme {:?} is not a bundled theme (available: {})",
                self.render.highlight.theme,
                highlight::theme_names().join(", ")
            )));
        }
        if self.render.diagrams.renderer == DiagramMode::Remote
            && !(self.render.diagrams.endpoint.starts_with("http://")
                || self.render.diagrams.endpoint.starts_with("https://"))
        {
            return Err(ConfigError::Validation(
                "render.diagrams.endpoint must be an http(s) URL".into(),
            ));
        }
        Ok(())
    }
}

/// Options handed to every content processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Cache directory, relative to the content root unless absolute.
    pub cache_dir: PathBuf,
    pub user_agent: String,
    /// `target` attribute forced onto external links.
    pub link_target: Option<String>,
    pub highlight: HighlightConfig,
    pub diagrams: DiagramConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".stagepress-cache"),
            user_agent: format!("stagepress/{}", env!("CARGO_PKG_VERSION")),
            link_target: None,
            highlight: HighlightConfig::default(),
            diagrams: DiagramConfig::default(),
        }
    }
}

/// Code block highlighting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HighlightConfig {
    pub enabled: bool,
    pub theme: String,
    pub line_numbers: bool,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            theme: "base16-ocean.dark".to_string(),
            line_numbers: false,
        }
    }
}

/// Which diagram renderer handles `mermaid` and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramMode {
    /// Leave diagram fences as plain code blocks.
    None,
    /// Emit markup for a client-side renderer.
    #[default]
    Client,
    /// Render to SVG through a kroki-compatible endpoint.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiagramConfig {
    pub renderer: DiagramMode,
    pub endpoint: String,
}

impl Default for DiagramConfig {
    fn default() -> Self {
        Self {
            renderer: DiagramMode::Client,
            endpoint: "https://kroki.io".to_string(),
        }
    }
}

/// Parallel rendering settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel render workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_workers(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_workers
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Loading
// =============================================================================

/// The stock defaults as a TOML table.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(BuildConfig::default())
        .map_err(|e| ConfigError::Validation(format!("default config must serialize: {e}")))
}

/// Layer `overlay` over `base`. Tables merge per key, recursively; any
/// other overlay value wins outright.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut merged), toml::Value::Table(layer)) => {
            for (key, value) in layer {
                let value = match merged.remove(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => value,
                };
                merged.insert(key, value);
            }
            toml::Value::Table(merged)
        }
        (_, replacement) => replacement,
    }
}

/// Load `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the directory has no config file.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let path = dir.join(CONFIG_FILENAME);
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(toml::from_str(&fs::read_to_string(&path)?)?))
}

/// Apply `overlay` (if any) to `base`, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<BuildConfig, ConfigError> {
    let value = match overlay {
        Some(layer) => merge_toml(base, layer),
        None => base,
    };
    let config: BuildConfig = value.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the content root.
pub fn load_config(content_root: &Path) -> Result<BuildConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(content_root)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# stagepress configuration
# ========================
# All settings are optional. Values shown below are the defaults.
# Place this file at the root of the content directory.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Rendering
# ---------------------------------------------------------------------------
[render]
# Shared on-disk cache for expensive render steps (remote diagrams).
# Relative paths resolve against the content root.
cache_dir = ".stagepress-cache"

# User agent sent with outbound requests.
# user_agent = "stagepress/<version>"

# Force a target on external links, e.g. "_blank".
# link_target = "_blank"

[render.highlight]
# Highlight fenced code blocks.
enabled = true
# One of the bundled themes: base16-ocean.dark, base16-eighties.dark,
# base16-mocha.dark, base16-ocean.light, InspiredGitHub,
# Solarized (dark), Solarized (light).
theme = "base16-ocean.dark"
line_numbers = false

[render.diagrams]
# "none" keeps diagram fences as code, "client" emits markup for a
# browser-side renderer, "remote" renders SVG through the endpoint below.
renderer = "client"
endpoint = "https://kroki.io"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel render workers.
# Omit to auto-detect (= number of CPU cores).
# max_workers = 4
"##
}
