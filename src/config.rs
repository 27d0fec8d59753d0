//! Configuration loading and validation.
//!
//! The config file is a single JSON document with `twitch`, `discord`,
//! `irc` and `global` sections. Unknown keys are ignored; missing required
//! keys fail startup with a `ConfigError`.

use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::path::Path;

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub twitch: Option<TwitchConfig>,
    pub discord: Option<DiscordConfig>,
    #[serde(default)]
    pub irc: IrcConfig,
    #[serde(default)]
    pub global: GlobalConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TwitchConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub oauth_token: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub ignored_users: Vec<String>,
    #[serde(default)]
    pub emote_auto_update_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub oauth_token: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub guilds: Vec<GuildConfig>,
    #[serde(default)]
    pub ignored_users: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IrcConfig {
    #[serde(default)]
    pub servers: Vec<IrcServerConfig>,
    #[serde(default)]
    pub ignored_users: Vec<String>,
}

/// Per-channel behaviour knobs, shared between the twitch channel list and
/// the discord guild list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lurk: bool,
    #[serde(default, rename = "mod")]
    pub moderator: bool,
    #[serde(default)]
    pub respond_to_pings: bool,
    #[serde(default)]
    pub silent_interp_errors: bool,
    #[serde(default = "default_prefix")]
    pub command_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuildConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub lurk: bool,
    #[serde(default)]
    pub respond_to_pings: bool,
    #[serde(default)]
    pub silent_interp_errors: bool,
    #[serde(default)]
    pub run_message_handlers: bool,
    #[serde(default = "default_prefix")]
    pub command_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IrcServerConfig {
    #[serde(default)]
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub use_sasl: bool,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub console_port: u16,
    #[serde(default)]
    pub strip_mentions_from_markov: bool,
    #[serde(default = "default_min_markov_length")]
    pub min_markov_length: usize,
    #[serde(default = "default_max_markov_retries")]
    pub max_markov_retries: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            console_port: 0,
            strip_mentions_from_markov: false,
            min_markov_length: default_min_markov_length(),
            max_markov_retries: default_max_markov_retries(),
        }
    }
}

fn default_prefix() -> String {
    String::from("!")
}

fn default_irc_port() -> u16 {
    6697
}

fn default_min_markov_length() -> usize {
    2
}

fn default_max_markov_retries() -> usize {
    20
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source,
        })?;

        let config: Config = serde_json::from_str(&contents).map_err(ConfigError::Json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if let Some(twitch) = &self.twitch {
            if twitch.username.is_empty() {
                return Err(ConfigError::MissingKey("twitch.username".into()));
            }
            if twitch.oauth_token.is_empty() {
                return Err(ConfigError::MissingKey("twitch.oauth_token".into()));
            }
            for chan in &twitch.channels {
                if chan.name.is_empty() {
                    return Err(ConfigError::Invalid(
                        "twitch channel name cannot be empty".into(),
                    ));
                }
            }
        }

        if let Some(discord) = &self.discord {
            if discord.oauth_token.is_empty() {
                return Err(ConfigError::MissingKey("discord.oauth_token".into()));
            }
            if discord.user_id.is_empty() {
                return Err(ConfigError::MissingKey("discord.user_id".into()));
            }
        }

        for server in &self.irc.servers {
            if server.hostname.is_empty() {
                return Err(ConfigError::MissingKey("irc.servers[].hostname".into()));
            }
            if server.nickname.is_empty() {
                return Err(ConfigError::MissingKey("irc.servers[].nickname".into()));
            }
        }

        Ok(())
    }

    pub fn have_twitch(&self) -> bool {
        self.twitch.is_some()
    }

    pub fn have_discord(&self) -> bool {
        self.discord.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_full_config_parses() {
        let raw = indoc! {r#"
            {
                "twitch": {
                    "username": "ikura",
                    "oauth_token": "sekrit",
                    "owner": "41231",
                    "channels": [
                        { "name": "somechannel", "lurk": false, "mod": true,
                          "respond_to_pings": true, "command_prefix": "!" }
                    ],
                    "ignored_users": [ "nightbot" ]
                },
                "global": { "console_port": 4242, "min_markov_length": 3 },
                "some_future_key": { "ignored": true }
            }
        "#};

        let config: Config = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();

        let twitch = config.twitch.unwrap();
        assert_eq!(twitch.username, "ikura");
        assert_eq!(twitch.channels.len(), 1);
        assert!(twitch.channels[0].moderator);
        assert_eq!(config.global.console_port, 4242);
        assert_eq!(config.global.min_markov_length, 3);
        assert_eq!(config.global.max_markov_retries, 20);
    }

    #[test]
    fn test_missing_required_key_fails() {
        let raw = r#"{ "twitch": { "username": "ikura" } }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingKey(k)) if k == "twitch.oauth_token"
        ));
    }
}
