use anyhow::Context;
use pgmock_protocol::codec::DEFAULT_MAX_MESSAGE_LENGTH;
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub loader: LoaderConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_message_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9999".into(),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoaderConfig {
    pub listen_addr: String,
    pub metrics_enabled: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9998".into(),
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Responses are kept in memory only when unset.
    pub data_dir: Option<String>,
}

impl Config {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.server
            .listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid server listen_addr {}", self.server.listen_addr))?;
        self.loader
            .listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid loader listen_addr {}", self.loader.listen_addr))?;
        // A tag-less frame still needs its length word plus one byte.
        if self.server.max_message_length < 8 {
            return Err(anyhow::anyhow!(
                "max_message_length must be at least 8, got {}",
                self.server.max_message_length
            ));
        }
        Ok(())
    }
}
