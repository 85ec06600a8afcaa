use anyhow::{Context, Result, anyhow, bail};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const APP_DIR: &str = ".novastore";
const CONFIG_FILE: &str = "config.json";
const HISTORY_DB_FILE: &str = "history.db";
const BOOKMARKS_DB_FILE: &str = "bookmarks.db";
const PREFERENCES_FILE: &str = "preferences.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub history_db_path: PathBuf,
    pub bookmarks_db_path: PathBuf,
    pub preferences_path: PathBuf,
    pub api_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let root = default_root_dir();

        Self {
            history_db_path: root.join("db").join(HISTORY_DB_FILE),
            bookmarks_db_path: root.join("db").join(BOOKMARKS_DB_FILE),
            preferences_path: root.join(PREFERENCES_FILE),
            api_port: 7891,
            data_dir: root,
        }
    }
}

impl Config {
    pub fn config_path() -> PathBuf {
        default_root_dir().join(CONFIG_FILE)
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    pub fn ensure_bootstrap_files(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("Failed to create data directory: {}", self.data_dir.display())
        })?;

        for db_path in [&self.history_db_path, &self.bookmarks_db_path] {
            if let Some(parent) = db_path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create DB directory: {}", parent.display())
                })?;
            }
        }

        Ok(())
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match normalize_config_key(key) {
            "data_dir" => {
                self.data_dir = expand_home(value);
            }
            "history_db_path" => {
                self.history_db_path = expand_home(value);
            }
            "bookmarks_db_path" => {
                self.bookmarks_db_path = expand_home(value);
            }
            "preferences_path" => {
                self.preferences_path = expand_home(value);
            }
            "api_port" => {
                self.api_port = value
                    .parse::<u16>()
                    .map_err(|_| anyhow!("api_port must be a number"))?;
            }
            _ => {
                bail!(
                    "Unsupported config key: {key}. Supported keys: data_dir|data.dir, history_db_path|history.db_path, bookmarks_db_path|bookmarks.db_path, preferences_path|preferences.path, api_port|api.port"
                );
            }
        }

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        match normalize_config_key(key) {
            "data_dir" => Some(self.data_dir.display().to_string()),
            "history_db_path" => Some(self.history_db_path.display().to_string()),
            "bookmarks_db_path" => Some(self.bookmarks_db_path.display().to_string()),
            "preferences_path" => Some(self.preferences_path.display().to_string()),
            "api_port" => Some(self.api_port.to_string()),
            _ => None,
        }
    }
}

fn normalize_config_key(key: &str) -> &str {
    match key {
        "data_dir" | "data.dir" => "data_dir",
        "history_db_path" | "history.db_path" => "history_db_path",
        "bookmarks_db_path" | "bookmarks.db_path" => "bookmarks_db_path",
        "preferences_path" | "preferences.path" => "preferences_path",
        "api_port" | "api.port" => "api_port",
        _ => key,
    }
}

pub fn expand_home(raw: &str) -> PathBuf {
    raw.strip_prefix("~/")
        .and_then(|stripped| home_dir().map(|home| home.join(stripped)))
        .unwrap_or_else(|| PathBuf::from(raw))
}

fn default_root_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn set_mode_600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set file permissions: {}", path.display()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Config, expand_home};

    #[test]
    fn config_key_aliases_resolve() {
        let mut config = Config::default();
        config.set_value("api.port", "9000").expect("set api port");
        assert_eq!(config.get_value("api_port").as_deref(), Some("9000"));
    }

    #[test]
    fn rejects_unknown_config_key() {
        let mut config = Config::default();
        assert!(config.set_value("polling_seconds", "300").is_err());
    }

    #[test]
    fn expand_home_passes_plain_paths_through() {
        assert_eq!(
            expand_home("/tmp/novastore"),
            std::path::PathBuf::from("/tmp/novastore")
        );
    }
}
