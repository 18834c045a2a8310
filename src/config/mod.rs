use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::filter::FileCategory;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "FilelistSync";
const APP_NAME: &str = "filesync";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub preferences_path: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("FILESYNC_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("FILESYNC_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let preferences_path = data_root.join("preferences.db");

        Ok(Self {
            config_dir,
            config_file,
            data_dir: data_root,
            preferences_path,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerOptions,
    pub pagination: PaginationOptions,
    pub replies: ReplyOptions,
    pub filters: FilterOptions,
    pub storage: StorageOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerOptions::default(),
            pagination: PaginationOptions::default(),
            replies: ReplyOptions::default(),
            filters: FilterOptions::default(),
            storage: StorageOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        if self.server.base_url.trim().is_empty() {
            tracing::warn!("empty server.base_url in config, falling back to default");
            self.server.base_url = ServerOptions::default().base_url;
        }
        if self.replies.timeout_secs == 0 {
            tracing::warn!("replies.timeout_secs must be positive, using 30");
            self.replies.timeout_secs = ReplyOptions::default().timeout_secs;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".into(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationOptions {
    /// Load the next page once the last visible row is this close to the end.
    pub prefetch_threshold: usize,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            prefetch_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyOptions {
    pub timeout_secs: u64,
}

impl Default for ReplyOptions {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl ReplyOptions {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    pub default_type: FileCategory,
    /// Key the active filter is persisted under in the preference store.
    pub preference_key: String,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            default_type: FileCategory::Media,
            preference_key: "file_list_filter".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub preferences_path: PathBuf,
    pub wal_autocheckpoint: u32,
    pub busy_timeout_ms: u64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            preferences_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
            busy_timeout_ms: 2_000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.preferences_path.as_os_str().is_empty() {
            self.preferences_path = paths.preferences_path.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn temp_paths(root: &TempDir) -> ConfigPaths {
        let base = root.path();
        let config_dir = base.join("config");
        let data_dir = base.join("data");
        ConfigPaths {
            config_dir: config_dir.clone(),
            config_file: config_dir.join("config.toml"),
            data_dir: data_dir.clone(),
            preferences_path: data_dir.join("preferences.db"),
        }
    }

    #[test]
    fn first_load_writes_defaults() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let loader = ConfigLoader::with_paths(temp_paths(&temp));
        let cfg = loader.load_or_init()?;
        assert!(loader.paths().config_file.exists());
        assert_eq!(cfg.pagination.prefetch_threshold, 1);
        assert_eq!(cfg.replies.timeout_secs, 30);
        assert_eq!(cfg.storage.preferences_path, loader.paths().preferences_path);
        Ok(())
    }

    #[test]
    fn only_config_and_data_dirs_are_created() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        temp_paths(&temp).ensure_directories()?;
        let mut created: Vec<String> = fs::read_dir(temp.path())?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<Result<_, _>>()?;
        created.sort();
        assert_eq!(created, ["config", "data"]);
        Ok(())
    }

    #[test]
    fn partial_config_keeps_defaults_and_repairs_values() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let loader = ConfigLoader::with_paths(temp_paths(&temp));
        loader.paths().ensure_directories()?;
        fs::write(
            &loader.paths().config_file,
            "[server]\nbase_url = \"\"\n\n[replies]\ntimeout_secs = 0\n\n[filters]\ndefault_type = \"video\"\n",
        )?;
        let cfg = loader.load()?;
        assert_eq!(cfg.server.base_url, ServerOptions::default().base_url);
        assert_eq!(cfg.server.request_timeout_secs, 30);
        assert_eq!(cfg.replies.timeout_secs, 30);
        assert_eq!(cfg.filters.default_type, FileCategory::Video);
        assert_eq!(cfg.filters.preference_key, "file_list_filter");
        Ok(())
    }
}
