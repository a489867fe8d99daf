//! Client configuration loaded from a TOML file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::protocol::{TWITCH_HOST, TWITCH_PORT};

/// Credentials, channel assignments and client behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Login nickname, also used to suppress our own echoed messages.
    pub nick: String,
    /// OAuth credential token sent as the authentication line.
    pub token: String,
    /// Channels to join, in order. Partitioned across connections at start.
    pub channels: Vec<String>,
    /// Upper bound on channels per connection.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Prefix that turns a chat message into a command.
    #[serde(default = "default_activator")]
    pub command_activator: String,
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_max_connections() -> usize {
    50
}

fn default_activator() -> String {
    "!".to_string()
}

fn default_server() -> String {
    TWITCH_HOST.to_string()
}

fn default_port() -> u16 {
    TWITCH_PORT
}

/// Default location: `<platform config dir>/shoal/config.toml`.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shoal")
        .join("config.toml")
}

impl ClientConfig {
    /// Read a configuration file. A missing or unreadable file is an error;
    /// there is no useful client without credentials and channels.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: ClientConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Read the configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::from_path(config_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            nick = "jarvis"
            token = "oauth:abcdef"
            channels = ["lagoon", "rustlang"]
            "#,
        )
        .unwrap();

        assert_eq!(config.nick, "jarvis");
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.command_activator, "!");
        assert_eq!(config.server, "irc.chat.twitch.tv");
        assert_eq!(config.port, 6667);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            nick = "jarvis"
            token = "oauth:abcdef"
            channels = ["lagoon"]
            max_connections = 2
            command_activator = ">>"
            server = "127.0.0.1"
            port = 16667
            "#,
        )
        .unwrap();

        assert_eq!(config.max_connections, 2);
        assert_eq!(config.command_activator, ">>");
        assert_eq!(config.server, "127.0.0.1");
        assert_eq!(config.port, 16667);
    }

    #[test]
    fn missing_credentials_fail_to_parse() {
        let result = toml::from_str::<ClientConfig>(r#"channels = ["lagoon"]"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = ClientConfig::from_path("/nonexistent/shoal/config.toml");
        assert!(result.is_err());
    }
}
