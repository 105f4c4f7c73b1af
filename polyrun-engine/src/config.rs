//! Engine configuration
//!
//! Loaded from TOML, then overridden by `POLYRUN_*` environment variables.
//!
//! ```toml
//! stream_output = true
//!
//! [limits]
//! timeout = "10s"
//! max_memory_bytes = 134217728
//!
//! [python]
//! wasm_path = "~/.local/share/polyrun/python.wasm"
//! home = "~/.local/share/polyrun/python"
//! preload_packages = ["json", "math"]
//! ```

use crate::error::{EngineError, Result};
use crate::limits::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub limits: ResourceLimits,

    /// Emit `output`/`error` events while an execution runs
    #[serde(default = "EngineConfig::default_stream_output")]
    pub stream_output: bool,

    #[serde(default)]
    pub python: PythonConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            stream_output: Self::default_stream_output(),
            python: PythonConfig::default(),
        }
    }
}

/// Python interpreter-bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythonConfig {
    /// WASI build of CPython
    #[serde(default)]
    pub wasm_path: Option<String>,

    /// Directory holding `lib/python3.x`; mounted read-only at `/usr/local`
    #[serde(default)]
    pub home: Option<String>,

    /// Extra package directory; mounted at `/site-packages`
    #[serde(default)]
    pub site_packages: Option<String>,

    /// Packages imported once when the session starts
    #[serde(default = "PythonConfig::default_preload_packages")]
    pub preload_packages: Vec<String>,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            wasm_path: None,
            home: None,
            site_packages: None,
            preload_packages: Self::default_preload_packages(),
        }
    }
}

impl PythonConfig {
    fn default_preload_packages() -> Vec<String> {
        [
            "json",
            "math",
            "random",
            "re",
            "collections",
            "itertools",
            "datetime",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn wasm_path(&self) -> Result<Option<PathBuf>> {
        self.wasm_path.as_deref().map(expand_path).transpose()
    }

    pub fn home(&self) -> Result<Option<PathBuf>> {
        self.home.as_deref().map(expand_path).transpose()
    }

    pub fn site_packages(&self) -> Result<Option<PathBuf>> {
        self.site_packages.as_deref().map(expand_path).transpose()
    }
}

impl EngineConfig {
    fn default_stream_output() -> bool {
        true
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is used
    /// when present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))
    }

    /// `$XDG_CONFIG_HOME/polyrun/config.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("polyrun").join("config.toml"))
    }

    /// Environment variables take precedence over the file
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("POLYRUN_TIMEOUT") {
            self.limits.timeout = parse_duration(&value)?;
        }
        if let Some(value) = lookup("POLYRUN_PYTHON_WASM") {
            self.python.wasm_path = Some(value);
        }
        if let Some(value) = lookup("POLYRUN_PYTHON_HOME") {
            self.python.home = Some(value);
        }
        if let Some(value) = lookup("POLYRUN_PYTHON_SITE_PACKAGES") {
            self.python.site_packages = Some(value);
        }
        if let Some(value) = lookup("POLYRUN_STREAM_OUTPUT") {
            self.stream_output = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.limits.timeout.is_zero() {
            return Err(EngineError::Config("limits.timeout must be positive".into()));
        }
        if self.limits.max_output_lines == 0 {
            return Err(EngineError::Config(
                "limits.max_output_lines must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_duration(value: &str) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(value.trim())
        .map_err(|e| EngineError::Config(format!("Invalid duration {:?}: {}", value, e)))
}

fn expand_path(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(rest))
    } else {
        Ok(PathBuf::from(path))
    }
}
