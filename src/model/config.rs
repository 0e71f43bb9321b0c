use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub home: String,
    pub plugins_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Poll every `development_interval_secs` instead of `interval_secs`.
    pub development_mode: bool,
    pub interval_secs: u64,
    pub development_interval_secs: u64,
    pub delete_retries: u32,
    pub delete_retry_interval_ms: u64,
    #[serde(default)]
    pub watch_filesystem: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginsConfig {
    /// Comma-separated extra plugin source directories. Parsed and validated
    /// every cycle, handed to the host, never synchronized.
    #[serde(default)]
    pub extra_dirs: String,
}

impl AppConfig {
    /// Load configuration with layering: defaults → user config → environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::defaults()?;

        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "charlotte") {
            let config_path = proj_dirs.config_dir().join("config.toml");
            if config_path.exists() {
                let user_str = fs::read_to_string(&config_path)
                    .with_context(|| format!("reading {}", config_path.display()))?;
                config = toml::from_str(&user_str)
                    .with_context(|| format!("parsing {}", config_path.display()))?;
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());

        // Expand ~ in home
        if config.general.home.starts_with('~') {
            let home = dirs_home().ok_or_else(|| anyhow!("cannot determine home directory"))?;
            config.general.home = config
                .general
                .home
                .replacen('~', &home.to_string_lossy(), 1);
        }

        Ok(config)
    }

    pub fn defaults() -> Result<Self> {
        let defaults = include_str!("../../config/default.toml");
        Ok(toml::from_str(defaults)?)
    }

    /// Apply `CHARLOTTE_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(home) = lookup("CHARLOTTE_HOME").filter(|v| !v.trim().is_empty()) {
            self.general.home = home;
        }

        if let Some(flag) = lookup("CHARLOTTE_DEVELOPMENT_MODE") {
            self.monitor.development_mode = parse_flag(&flag);
        }

        if let Some(dirs) = lookup("CHARLOTTE_PLUGIN_DIRS") {
            self.plugins.extra_dirs = dirs;
        }
    }

    pub fn home_path(&self) -> PathBuf {
        PathBuf::from(&self.general.home)
    }

    pub fn plugins_path(&self) -> PathBuf {
        self.home_path().join(&self.general.plugins_dir)
    }

    /// Extra plugin directories, `None` when unset.
    pub fn extra_plugin_dirs(&self) -> Option<&str> {
        let raw = self.plugins.extra_dirs.trim();
        (!raw.is_empty()).then_some(raw)
    }
}

/// A zero delay would spin the monitor thread.
const MIN_INTERVAL_SECS: u64 = 1;

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        let secs = if self.development_mode {
            self.development_interval_secs
        } else {
            self.interval_secs
        };
        Duration::from_secs(secs.max(MIN_INTERVAL_SECS))
    }

    pub fn delete_retry_interval(&self) -> Duration {
        Duration::from_millis(self.delete_retry_interval_ms)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_use_long_interval() {
        let config = AppConfig::defaults().unwrap();
        assert!(!config.monitor.development_mode);
        assert_eq!(config.monitor.interval(), Duration::from_secs(20));
        assert_eq!(config.monitor.delete_retries, 5);
        assert_eq!(
            config.monitor.delete_retry_interval(),
            Duration::from_secs(1)
        );
        assert!(config.extra_plugin_dirs().is_none());
    }

    #[test]
    fn development_mode_uses_short_interval() {
        let mut config = AppConfig::defaults().unwrap();
        config.monitor.development_mode = true;
        assert_eq!(config.monitor.interval(), Duration::from_secs(5));
    }

    #[test]
    fn zero_interval_is_raised_to_one_second() {
        let mut config = AppConfig::defaults().unwrap();
        config.monitor.interval_secs = 0;
        config.monitor.development_interval_secs = 0;
        assert_eq!(config.monitor.interval(), Duration::from_secs(1));
        config.monitor.development_mode = true;
        assert_eq!(config.monitor.interval(), Duration::from_secs(1));
    }

    #[test]
    fn environment_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CHARLOTTE_HOME", "/srv/charlotte"),
            ("CHARLOTTE_DEVELOPMENT_MODE", "TRUE"),
            ("CHARLOTTE_PLUGIN_DIRS", "/a, /b"),
        ]);
        let mut config = AppConfig::defaults().unwrap();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.plugins_path(), PathBuf::from("/srv/charlotte/plugins"));
        assert!(config.monitor.development_mode);
        assert_eq!(config.extra_plugin_dirs(), Some("/a, /b"));
    }

    #[test]
    fn unrecognized_flag_disables_development_mode() {
        let mut config = AppConfig::defaults().unwrap();
        config.monitor.development_mode = true;
        config.apply_overrides(|key| {
            (key == "CHARLOTTE_DEVELOPMENT_MODE").then(|| "nope".to_string())
        });
        assert!(!config.monitor.development_mode);
    }
}
