use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::{DEFAULT_ORG, DEFAULT_TEAM};

pub const TOKEN_ENV: &str = "GITHUB_AUTH_TOKEN";
const DEFAULT_DOMAINS: [&str; 3] = ["mdsol.com", "shyftanalytics.com", "3ds.com"];

/// Settings read from `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub org: Option<String>,
    pub default_team: Option<String>,
    pub github_token: Option<String>,
    pub email_domains: Option<Vec<String>>,
    pub max_concurrency: Option<usize>,
    pub fetch_timeout_secs: Option<u64>,
}

impl Config {
    pub fn org(&self) -> &str {
        self.org.as_deref().unwrap_or(DEFAULT_ORG)
    }

    pub fn default_team(&self) -> &str {
        self.default_team.as_deref().unwrap_or(DEFAULT_TEAM)
    }

    pub fn email_domains(&self) -> Vec<String> {
        match &self.email_domains {
            Some(domains) => domains.clone(),
            None => DEFAULT_DOMAINS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// `<config dir>/gh-policy/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gh-policy").join("config.toml"))
}

/// Loads `path`; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            debug!("No config file at {}", path.display());
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Password of the `machine github.com` entry in a `.netrc` file.
pub fn netrc_token(contents: &str) -> Option<String> {
    let mut tokens = contents.split_whitespace();
    let mut in_github = false;
    while let Some(token) = tokens.next() {
        match token {
            "machine" => in_github = tokens.next() == Some("github.com"),
            "default" => in_github = false,
            "password" => {
                let password = tokens.next();
                if in_github {
                    return password.map(str::to_string);
                }
            }
            _ => {}
        }
    }
    None
}

/// Picks the first token available from the flag, the environment, the
/// config file and `~/.netrc`, in that order.
pub fn resolve_token(flag: Option<&str>, config: &Config) -> Result<String, ConfigError> {
    let present = |token: &String| !token.is_empty();
    let netrc = || {
        let path = dirs::home_dir()?.join(".netrc");
        netrc_token(&std::fs::read_to_string(path).ok()?)
    };
    flag.map(str::to_string)
        .filter(present)
        .or_else(|| std::env::var(TOKEN_ENV).ok().filter(present))
        .or_else(|| config.github_token.clone().filter(present))
        .or_else(netrc)
        .ok_or_else(|| ConfigError::MissingToken {
            path: config_path()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config.toml".to_string()),
        })
}
