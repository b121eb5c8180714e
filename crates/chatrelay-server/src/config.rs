use chatrelay_core::{DisconnectPolicy, RelayConfig};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// redb file; `None` means the default under the ChatRelay directory.
    pub db_path: Option<String>,
    pub in_memory: bool,
    pub upstream_base_url: String,
    pub upstream_api_key: String,
    pub default_model: String,
    pub relay: RelayConfig,
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    upstream: UpstreamSection,
    #[serde(default)]
    relay: RelaySection,
    #[serde(default)]
    auth: AuthSection,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct StorageSection {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    in_memory: bool,
}

#[derive(Debug, Deserialize)]
struct UpstreamSection {
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    read_timeout_secs: u64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RelaySection {
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    context_turns: Option<usize>,
    #[serde(default)]
    disconnect_policy: DisconnectPolicy,
}

#[derive(Debug, Deserialize, Default)]
struct AuthSection {
    #[serde(default)]
    jwt_secret: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        if let Some(file_config) = load_from_file()? {
            return Ok(Self::from_file(file_config, |key| env::var(key).ok()));
        }

        Ok(Self::from_lookup(|key| env::var(key).ok()))
    }

    fn from_file(file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = RelayConfig::default();
        let relay = RelayConfig {
            system_prompt: file.relay.system_prompt.unwrap_or(defaults.system_prompt),
            context_turns: file.relay.context_turns.unwrap_or(defaults.context_turns),
            connect_timeout: Duration::from_secs(file.upstream.connect_timeout_secs),
            read_timeout: Duration::from_secs(file.upstream.read_timeout_secs),
            disconnect_policy: file.relay.disconnect_policy,
            ..defaults
        };

        Self {
            host: file.server.host,
            port: file.server.port,
            db_path: non_empty(file.storage.path),
            in_memory: file.storage.in_memory,
            upstream_base_url: file.upstream.base_url,
            // Keep secrets out of checked-in files when possible.
            upstream_api_key: non_empty(file.upstream.api_key)
                .or_else(|| non_empty(lookup("CHATRELAY_UPSTREAM_API_KEY")))
                .unwrap_or_default(),
            default_model: file.upstream.model,
            relay,
            jwt_secret: non_empty(file.auth.jwt_secret)
                .or_else(|| non_empty(lookup("CHATRELAY_JWT_SECRET"))),
        }
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|value| value.trim().parse::<u64>().ok());

        let defaults = RelayConfig::default();
        let relay = RelayConfig {
            system_prompt: lookup("CHATRELAY_SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
            context_turns: parsed("CHATRELAY_CONTEXT_TURNS")
                .map(|turns| turns as usize)
                .unwrap_or(defaults.context_turns),
            connect_timeout: parsed("CHATRELAY_CONNECT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            read_timeout: parsed("CHATRELAY_READ_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.read_timeout),
            disconnect_policy: lookup("CHATRELAY_DISCONNECT_POLICY")
                .and_then(|value| value.parse().ok())
                .unwrap_or_default(),
            ..defaults
        };

        Self {
            host: lookup("CHATRELAY_SERVER_HOST").unwrap_or_else(default_host),
            port: lookup("CHATRELAY_SERVER_PORT")
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or_else(default_port),
            db_path: non_empty(lookup("CHATRELAY_DB_PATH")),
            in_memory: lookup("CHATRELAY_IN_MEMORY").is_some_and(|value| value == "1"),
            upstream_base_url: lookup("CHATRELAY_UPSTREAM_BASE_URL")
                .unwrap_or_else(default_base_url),
            upstream_api_key: lookup("CHATRELAY_UPSTREAM_API_KEY").unwrap_or_default(),
            default_model: lookup("CHATRELAY_DEFAULT_MODEL").unwrap_or_else(default_model),
            relay,
            jwt_secret: non_empty(lookup("CHATRELAY_JWT_SECRET")),
        }
    }
}

fn load_from_file() -> anyhow::Result<Option<FileConfig>> {
    let config_path = env::var("CHATRELAY_SERVER_CONFIG").ok();
    let path = if let Some(path) = config_path {
        Some(path)
    } else if Path::new("server.toml").exists() {
        Some("server.toml".to_string())
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .map_err(|err| anyhow::anyhow!("Failed to read config {}: {}", path, err))?;
    let parsed: FileConfig = toml::from_str(&contents)
        .map_err(|err| anyhow::anyhow!("Failed to parse config {}: {}", path, err))?;
    Ok(Some(parsed))
}
