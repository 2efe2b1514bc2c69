//! File-based settings for building a [`DependencyConfiguration`].
//!
//! ```toml
//! system = "/usr/lib/jvm/java-21"
//! module-path = ["mods"]
//! class-path = ["lib/*"]
//! add-modules = ["app", "ALL-DEFAULT"]
//! multi-release = 17
//! ```
//!
//! [`DependencyConfiguration`]: crate::DependencyConfiguration

use crate::configuration::{join_paths, ConfigurationError, DependencyConfigurationBuilder};
use crate::platform::PlatformSelector;
use crate::DepsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Lowest release that knows about versioned archive entries.
pub const MIN_MULTI_RELEASE: u16 = 9;

/// Platform selection as written in settings: a home directory or `none`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemSetting {
    None,
    Home(PathBuf),
}

impl SystemSetting {
    pub fn to_selector(&self) -> PlatformSelector {
        match self {
            SystemSetting::None => PlatformSelector::None,
            SystemSetting::Home(home) => PlatformSelector::Home(home.clone()),
        }
    }
}

impl fmt::Display for SystemSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemSetting::None => f.write_str("none"),
            SystemSetting::Home(home) => write!(f, "{}", home.display()),
        }
    }
}

impl FromStr for SystemSetting {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ConfigurationError::InvalidSettings {
                message: "system must be a platform home or `none`".to_string(),
            });
        }
        if trimmed.eq_ignore_ascii_case("none") {
            Ok(SystemSetting::None)
        } else {
            Ok(SystemSetting::Home(PathBuf::from(trimmed)))
        }
    }
}

impl Serialize for SystemSetting {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SystemSetting {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        SystemSetting::from_str(&value).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    /// Platform to catalog; the caller's fallback applies when absent.
    pub system: Option<SystemSetting>,
    pub upgrade_module_path: Vec<PathBuf>,
    pub module_path: Vec<PathBuf>,
    /// Raw class path strings; `dir/*` entries are expanded at build time.
    pub class_path: Vec<String>,
    pub add_modules: Vec<String>,
    /// Archives to analyze.
    pub roots: Vec<PathBuf>,
    pub multi_release: Option<u16>,
    pub all_modules: bool,
}

impl Settings {
    pub fn from_toml_str(source: &str) -> Result<Self, DepsError> {
        let settings: Settings = toml::from_str(source).map_err(|error| {
            DepsError::from(ConfigurationError::InvalidSettings {
                message: error.to_string(),
            })
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, DepsError> {
        let source = fs::read_to_string(path).map_err(|source| DepsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(release) = self.multi_release {
            if release < MIN_MULTI_RELEASE {
                return Err(ConfigurationError::InvalidSettings {
                    message: format!(
                        "multi-release must be at least {MIN_MULTI_RELEASE}, got {release}"
                    ),
                });
            }
        }
        Ok(())
    }

    /// Produces a builder carrying every option. `fallback` selects the
    /// platform when the settings do not name one.
    pub fn builder(
        &self,
        fallback: PlatformSelector,
    ) -> Result<DependencyConfigurationBuilder, DepsError> {
        self.validate()?;
        let selector = self
            .system
            .as_ref()
            .map(SystemSetting::to_selector)
            .unwrap_or(fallback);

        let mut builder = DependencyConfigurationBuilder::new(selector);
        if let Some(release) = self.multi_release {
            builder = builder.release(release);
        }
        if !self.upgrade_module_path.is_empty() {
            builder = builder.upgrade_module_path(join_paths(&self.upgrade_module_path)?);
        }
        if !self.module_path.is_empty() {
            builder = builder.app_module_path(join_paths(&self.module_path)?);
        }
        builder = builder.add_modules(self.add_modules.iter().cloned());
        if self.all_modules {
            builder = builder.all_modules();
        }
        for root in &self.roots {
            builder = builder.add_root(root.clone());
        }
        for class_path in &self.class_path {
            builder = builder.add_class_path(class_path.clone());
        }
        Ok(builder)
    }
}
