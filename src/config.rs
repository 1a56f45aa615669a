use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_USERNAME: &str = "PARSE_VIDEO_USERNAME";
pub const ENV_PASSWORD: &str = "PARSE_VIDEO_PASSWORD";
pub const ENV_BIND: &str = "PARSE_VIDEO_BIND";
pub const ENV_CONFIG: &str = "PARSE_VIDEO_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Applies to each upstream request separately.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub mobile_user_agent: Option<String>,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_redirects() -> usize {
    5
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_redirects: default_max_redirects(),
            user_agent: None,
            mobile_user_agent: None,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CookieConfig {
    #[serde(default)]
    pub cookie: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TwitterConfig {
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0:8965".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub douyin: CookieConfig,
    #[serde(default)]
    pub kuaishou: CookieConfig,
    #[serde(default)]
    pub redbook: CookieConfig,
    #[serde(default)]
    pub bilibili: CookieConfig,
    #[serde(default)]
    pub twitter: TwitterConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn config_dir() -> PathBuf {
    // ~/.config/parse-video/ on every OS, not dirs::config_dir()
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("parse-video")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.yml")
}

impl Config {
    /// A missing file yields defaults; an unreadable or malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file parses as null.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }

    /// Load from `explicit`, else `$PARSE_VIDEO_CONFIG`, else the default
    /// path, then apply the environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => std::env::var_os(ENV_CONFIG)
                .map(PathBuf::from)
                .unwrap_or_else(config_path),
        };
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Blank values are ignored so an exported-but-empty variable cannot
    /// switch auth on with an empty password.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(username) = get(ENV_USERNAME) {
            self.server.username = Some(username);
        }
        if let Some(password) = get(ENV_PASSWORD) {
            self.server.password = Some(password);
        }
        if let Some(bind) = get(ENV_BIND) {
            self.server.bind = bind;
        }
    }
}
