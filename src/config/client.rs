use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::realtime::ReconnectPolicy;
use crate::view::StatusPolicy;

pub const ENV_BACKEND_URL: &str = "COVENTURE_BACKEND_URL";
pub const ENV_API_KEY: &str = "COVENTURE_API_KEY";
pub const ENV_SESSION_FILE: &str = "COVENTURE_SESSION_FILE";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the hosted backend (e.g., "https://abc.example.co").
    pub backend_url: Url,
    /// Public (anon) API key sent with every request.
    pub api_key: String,
    pub http: HttpConfig,
    pub realtime: ReconnectPolicy,
    pub session_file: PathBuf,
    /// Whether accepting members moves a full project to in progress.
    pub status_policy: StatusPolicy,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub join_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            join_timeout_secs: 10,
        }
    }
}

impl HttpConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

/// On-disk shape. Every field is optional so the environment can fill gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    backend_url: Option<String>,
    api_key: Option<String>,
    session_file: Option<PathBuf>,
    http: HttpConfig,
    realtime: ReconnectPolicy,
    status_policy: StatusPolicy,
}

impl ClientConfig {
    /// Loads the optional TOML file, then applies environment overrides.
    /// Fails if the backend URL or API key is missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut file = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                toml::from_str::<ConfigFile>(&content)?
            }
            None => ConfigFile::default(),
        };

        if let Some(url) = env(ENV_BACKEND_URL) {
            file.backend_url = Some(url);
        }
        if let Some(key) = env(ENV_API_KEY) {
            file.api_key = Some(key);
        }
        if let Some(session_file) = env(ENV_SESSION_FILE) {
            file.session_file = Some(PathBuf::from(session_file));
        }

        let backend_url = file
            .backend_url
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!("backend URL is not set (use {ENV_BACKEND_URL})"))
            })?;
        let api_key = file
            .api_key
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::Config(format!("API key is not set (use {ENV_API_KEY})")))?;

        let backend_url = parse_backend_url(&backend_url)?;
        let session_file = match file.session_file {
            Some(path) => path,
            None => default_session_file()?,
        };

        if file.http.timeout_secs == 0 {
            return Err(Error::Config("http.timeout_secs must be at least 1".into()));
        }

        Ok(Self {
            backend_url,
            api_key,
            http: file.http,
            realtime: file.realtime,
            session_file,
            status_policy: file.status_policy,
        })
    }

    /// `https://host` becomes `wss://host/realtime/v1/websocket?apikey=...&vsn=1.0.0`.
    pub fn realtime_url(&self) -> Result<Url> {
        let mut url = self.backend_url.join("realtime/v1/websocket").map_err(|e| {
            Error::Config(format!("invalid backend URL: {e}"))
        })?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| Error::Config("cannot derive realtime URL".into()))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }
}

fn parse_backend_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("invalid backend URL '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "backend URL must use http or https, got '{}'",
            url.scheme()
        )));
    }
    // Url::join replaces the last segment unless the path ends with '/'.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

pub fn default_session_file() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| Error::Config("could not determine config directory. Is $HOME set?".into()))?;
    Ok(dir.join("coventure").join("session.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_url_is_fatal() {
        let err = ClientConfig::load_with(None, env_of(&[(ENV_API_KEY, "anon")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains(ENV_BACKEND_URL)));
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let err = ClientConfig::load_with(
            None,
            env_of(&[(ENV_BACKEND_URL, "https://abc.example.co")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains(ENV_API_KEY)));
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let err = ClientConfig::load_with(
            None,
            env_of(&[(ENV_BACKEND_URL, "  "), (ENV_API_KEY, "anon")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let err = ClientConfig::load_with(
            None,
            env_of(&[(ENV_BACKEND_URL, "ftp://abc"), (ENV_API_KEY, "anon")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("http or https")));
    }

    #[test]
    fn test_env_only_uses_defaults() {
        let config = ClientConfig::load_with(
            None,
            env_of(&[
                (ENV_BACKEND_URL, "https://abc.example.co"),
                (ENV_API_KEY, "anon"),
                (ENV_SESSION_FILE, "/tmp/coventure-session.toml"),
            ]),
        )
        .unwrap();
        assert_eq!(config.backend_url.as_str(), "https://abc.example.co/");
        assert_eq!(config.http.timeout(), Duration::from_secs(15));
        assert_eq!(config.realtime, ReconnectPolicy::default());
        assert_eq!(config.session_file, PathBuf::from("/tmp/coventure-session.toml"));
        assert_eq!(config.status_policy, StatusPolicy::Manual);
    }

    #[test]
    fn test_file_then_env_override() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("coventure.toml");
        std::fs::write(
            &path,
            r#"
backend_url = "https://from-file.example.co"
api_key = "file-key"
session_file = "/tmp/s.toml"
status_policy = "auto_at_capacity"

[http]
timeout_secs = 20

[realtime]
max_retries = 5
"#,
        )
        .unwrap();

        let config = ClientConfig::load_with(
            Some(&path),
            env_of(&[(ENV_API_KEY, "env-key")]),
        )
        .unwrap();
        assert_eq!(config.backend_url.host_str(), Some("from-file.example.co"));
        assert_eq!(config.api_key, "env-key");
        assert_eq!(config.http.timeout_secs, 20);
        assert_eq!(config.realtime.max_retries, 5);
        assert_eq!(config.realtime.base_delay_ms, 1_000);
        assert_eq!(config.status_policy, StatusPolicy::AutoAtCapacity);
    }

    #[test]
    fn test_realtime_url() {
        let config = ClientConfig::load_with(
            None,
            env_of(&[
                (ENV_BACKEND_URL, "https://abc.example.co"),
                (ENV_API_KEY, "anon"),
                (ENV_SESSION_FILE, "/tmp/s.toml"),
            ]),
        )
        .unwrap();
        assert_eq!(
            config.realtime_url().unwrap().as_str(),
            "wss://abc.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }
}
