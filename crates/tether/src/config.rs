//! Client configuration and profile resolution

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Longest single wait the platform will hold a request open for.
pub(crate) const MAX_POLL_ATTEMPT: Duration = Duration::from_secs(55);

/// Shortest per-attempt wait; zero-wait attempts would spin on `Pending`.
pub(crate) const MIN_POLL_ATTEMPT: Duration = Duration::from_secs(1);

const DEFAULT_SERVER_URL: &str = "https://api.tether.dev:443";

/// Connection settings and per-call timing for a [`Client`](crate::Client).
///
/// Values come from the active profile in `~/.tether.toml`, then `TETHER_*`
/// environment variables, then explicit builder calls, later sources winning.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Control-plane endpoint.
    pub server_url: String,
    /// Token id sent with every call.
    pub token_id: Option<String>,
    /// Token secret sent with every call.
    pub token_secret: Option<String>,
    /// Environment used for name lookups.
    pub environment: Option<String>,
    /// Deadline for single-shot RPCs.
    #[serde(with = "duration_ms")]
    pub rpc_timeout: Duration,
    /// Upper bound on one poll attempt's server-side wait.
    #[serde(with = "duration_ms")]
    pub poll_attempt_cap: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            token_id: None,
            token_secret: None,
            environment: None,
            rpc_timeout: Duration::from_secs(60),
            poll_attempt_cap: MAX_POLL_ATTEMPT,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_url", &self.server_url)
            .field("token_id", &self.token_id)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<redacted>"))
            .field("environment", &self.environment)
            .field("rpc_timeout", &self.rpc_timeout)
            .field("poll_attempt_cap", &self.poll_attempt_cap)
            .finish()
    }
}

impl ClientConfig {
    /// Load from the config file and the process environment.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = match lookup("TETHER_CONFIG_PATH") {
            Some(path) => Some(PathBuf::from(path)),
            None => dirs::home_dir().map(|home| home.join(".tether.toml")),
        };

        let mut config = match path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("failed to read {}: {e}", path.display()))
                })?;
                let profile = lookup("TETHER_PROFILE");
                Self::from_toml(&contents, profile.as_deref())
                    .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
            }
            _ => Self::default(),
        };

        config.apply_env(&lookup);
        config.poll_attempt_cap = clamp_attempt_cap(config.poll_attempt_cap);
        Ok(config)
    }

    /// Parse a profiles document and select one profile from it.
    ///
    /// With no explicit name the first profile marked `active = true` is used;
    /// with none active the defaults apply.
    pub fn from_toml(contents: &str, profile: Option<&str>) -> Result<Self, String> {
        let profiles: toml::Table = contents.parse().map_err(|e| format!("{e}"))?;

        let selected = match profile {
            Some(name) => match profiles.get(name) {
                Some(toml::Value::Table(table)) => Some((name.to_string(), table.clone())),
                Some(_) => return Err(format!("profile '{name}' is not a table")),
                None => return Err(format!("profile '{name}' not found")),
            },
            None => profiles.iter().find_map(|(name, value)| match value {
                toml::Value::Table(table)
                    if table.get("active").and_then(toml::Value::as_bool) == Some(true) =>
                {
                    Some((name.clone(), table.clone()))
                }
                _ => None,
            }),
        };

        let Some((name, mut table)) = selected else {
            return Ok(Self::default());
        };
        table.remove("active");
        debug!(profile = %name, "using config profile");

        let mut config: Self = toml::Value::Table(table)
            .try_into()
            .map_err(|e| format!("profile '{name}': {e}"))?;
        config.poll_attempt_cap = clamp_attempt_cap(config.poll_attempt_cap);
        Ok(config)
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("TETHER_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(id) = lookup("TETHER_TOKEN_ID") {
            self.token_id = Some(id);
        }
        if let Some(secret) = lookup("TETHER_TOKEN_SECRET") {
            self.token_secret = Some(secret);
        }
        if let Some(env) = lookup("TETHER_ENVIRONMENT") {
            self.environment = Some(env);
        }
    }

    /// Set the control-plane endpoint.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Set the token pair sent with every call.
    pub fn with_credentials(mut self, id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.token_id = Some(id.into());
        self.token_secret = Some(secret.into());
        self
    }

    /// Set the environment used for name lookups.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Set the deadline for single-shot RPCs.
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Set the per-attempt wait cap, clamped to between one second and the
    /// platform ceiling.
    pub fn with_poll_attempt_cap(mut self, cap: Duration) -> Self {
        self.poll_attempt_cap = clamp_attempt_cap(cap);
        self
    }
}

pub(crate) fn clamp_attempt_cap(cap: Duration) -> Duration {
    cap.clamp(MIN_POLL_ATTEMPT, MAX_POLL_ATTEMPT)
}

/// Helper for serializing Duration as milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // TOML integers are i64
        i64::try_from(duration.as_millis())
            .unwrap_or(i64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const PROFILES: &str = r#"
[staging]
token_id = "ak-staging"
token_secret = "as-staging"
server_url = "https://staging.example:443"

[work]
active = true
token_id = "ak-work"
token_secret = "as-work"
environment = "main"
rpc_timeout = 1500
poll_attempt_cap = 120000
"#;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.rpc_timeout, Duration::from_secs(60));
        assert_eq!(config.poll_attempt_cap, Duration::from_secs(55));
        assert!(config.token_id.is_none());
    }

    #[test]
    fn test_active_profile_selected() {
        let config = ClientConfig::from_toml(PROFILES, None).unwrap();
        assert_eq!(config.token_id.as_deref(), Some("ak-work"));
        assert_eq!(config.environment.as_deref(), Some("main"));
        assert_eq!(config.rpc_timeout, Duration::from_millis(1500));
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn test_attempt_cap_clamped() {
        let config = ClientConfig::from_toml(PROFILES, None).unwrap();
        assert_eq!(config.poll_attempt_cap, MAX_POLL_ATTEMPT);

        let config = ClientConfig::default().with_poll_attempt_cap(Duration::from_secs(600));
        assert_eq!(config.poll_attempt_cap, MAX_POLL_ATTEMPT);
    }

    #[test]
    fn test_zero_attempt_cap_raised_to_floor() {
        let config = ClientConfig::default().with_poll_attempt_cap(Duration::ZERO);
        assert_eq!(config.poll_attempt_cap, MIN_POLL_ATTEMPT);

        let config =
            ClientConfig::from_toml("[work]\nactive = true\npoll_attempt_cap = 0\n", None)
                .unwrap();
        assert_eq!(config.poll_attempt_cap, MIN_POLL_ATTEMPT);
    }

    #[test]
    fn test_named_profile_selected() {
        let config = ClientConfig::from_toml(PROFILES, Some("staging")).unwrap();
        assert_eq!(config.token_id.as_deref(), Some("ak-staging"));
        assert_eq!(config.server_url, "https://staging.example:443");
    }

    #[test]
    fn test_missing_named_profile_is_error() {
        let err = ClientConfig::from_toml(PROFILES, Some("nope")).unwrap_err();
        assert!(err.contains("nope"));
    }

    #[test]
    fn test_no_active_profile_uses_defaults() {
        let config = ClientConfig::from_toml("[a]\ntoken_id = \"x\"\n", None).unwrap();
        assert!(config.token_id.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, PROFILES).unwrap();

        let env: HashMap<&str, String> = HashMap::from([
            ("TETHER_CONFIG_PATH", path.display().to_string()),
            ("TETHER_TOKEN_ID", "ak-env".to_string()),
        ]);
        let config = ClientConfig::load_with(|key| env.get(key).cloned()).unwrap();
        assert_eq!(config.token_id.as_deref(), Some("ak-env"));
        assert_eq!(config.token_secret.as_deref(), Some("as-work"));
    }

    #[test]
    fn test_missing_file_is_empty_config() {
        let env: HashMap<&str, String> = HashMap::from([(
            "TETHER_CONFIG_PATH",
            "/nonexistent/tether.toml".to_string(),
        )]);
        let config = ClientConfig::load_with(|key| env.get(key).cloned()).unwrap();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn test_malformed_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[work\nactive = ").unwrap();

        let env: HashMap<&str, String> =
            HashMap::from([("TETHER_CONFIG_PATH", path.display().to_string())]);
        let err = ClientConfig::load_with(|key| env.get(key).cloned()).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("broken.toml")));
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let config = ClientConfig::default().with_rpc_timeout(Duration::from_millis(2500));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"rpc_timeout\":2500"));

        let parsed: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.rpc_timeout, Duration::from_millis(2500));
        assert_eq!(parsed.poll_attempt_cap, MAX_POLL_ATTEMPT);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = ClientConfig::default().with_credentials("ak-1", "super-secret");
        let debug = format!("{config:?}");
        assert!(debug.contains("ak-1"));
        assert!(!debug.contains("super-secret"));
    }
}
