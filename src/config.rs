use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Service configuration, loaded from CLI arguments and an optional TOML file.
///
/// Example configuration file content
/// # StreamUs configuration
///
/// listen_on_port = 32145
/// workspace = "./data"
///
/// # LiveKit egress
/// livekit_url = "wss://project.livekit.cloud"
/// livekit_api_key = "APIxxxx"
/// livekit_api_secret = "secret"
/// egress_layout = "grid-light"
/// gateway_timeout_secs = 15
///
/// # Comment ingestion
/// youtube_poll_interval_ms = 5000
/// facebook_poll_interval_ms = 5000
/// twitch_poll_interval_ms = 3000
/// twitch_client_id = "abc"
/// twitch_client_secret = "def"
/// youtube_client_id = "123.apps.googleusercontent.com"
/// youtube_client_secret = "ghi"
/// facebook_app_id = "456"
/// facebook_app_secret = "jkl"
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, default_value_t = 32145)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Directory holding persisted stream state
    #[arg(short = 'w', long, default_value = ".")]
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Configuration file path
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// LiveKit server URL (ws://, wss://, http:// or https://)
    #[arg(long, default_value = "http://localhost:7880")]
    #[serde(default = "default_livekit_url")]
    pub livekit_url: String,

    /// LiveKit API key
    #[arg(long, default_value = "devkey")]
    #[serde(default = "default_livekit_api_key")]
    pub livekit_api_key: String,

    /// LiveKit API secret
    #[arg(long, default_value = "devsecret")]
    #[serde(default = "default_livekit_api_secret")]
    pub livekit_api_secret: String,

    /// Room composite layout used for egress
    #[arg(long, default_value = "grid-light")]
    #[serde(default = "default_egress_layout")]
    pub egress_layout: String,

    /// Timeout for every call to LiveKit, chat APIs and token endpoints
    #[arg(long, default_value_t = 15)]
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    #[arg(long, default_value_t = 5000)]
    #[serde(default = "default_youtube_poll_interval_ms")]
    pub youtube_poll_interval_ms: u64,

    #[arg(long, default_value_t = 5000)]
    #[serde(default = "default_facebook_poll_interval_ms")]
    pub facebook_poll_interval_ms: u64,

    #[arg(long, default_value_t = 3000)]
    #[serde(default = "default_twitch_poll_interval_ms")]
    pub twitch_poll_interval_ms: u64,

    /// YouTube Data API base URL override
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube_api_base: Option<String>,

    /// Twitch Helix base URL override
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitch_api_base: Option<String>,

    /// Facebook Graph API base URL override
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facebook_graph_base: Option<String>,

    /// Google OAuth client used to refresh YouTube tokens
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube_client_id: Option<String>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube_client_secret: Option<String>,

    /// Twitch application client id, also sent as `Client-Id` on Helix calls
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitch_client_id: Option<String>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitch_client_secret: Option<String>,

    /// Facebook app used to exchange expiring Facebook tokens
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facebook_app_id: Option<String>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facebook_app_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            workspace: default_workspace(),
            config: None,
            livekit_url: default_livekit_url(),
            livekit_api_key: default_livekit_api_key(),
            livekit_api_secret: default_livekit_api_secret(),
            egress_layout: default_egress_layout(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            youtube_poll_interval_ms: default_youtube_poll_interval_ms(),
            facebook_poll_interval_ms: default_facebook_poll_interval_ms(),
            twitch_poll_interval_ms: default_twitch_poll_interval_ms(),
            youtube_api_base: None,
            twitch_api_base: None,
            facebook_graph_base: None,
            youtube_client_id: None,
            youtube_client_secret: None,
            twitch_client_id: None,
            twitch_client_secret: None,
            facebook_app_id: None,
            facebook_app_secret: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // a CLI value still at its default yields to the file
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.workspace == default_workspace() {
            self.workspace = file_config.workspace;
        }
        if self.livekit_url == default_livekit_url() {
            self.livekit_url = file_config.livekit_url;
        }
        if self.livekit_api_key == default_livekit_api_key() {
            self.livekit_api_key = file_config.livekit_api_key;
        }
        if self.livekit_api_secret == default_livekit_api_secret() {
            self.livekit_api_secret = file_config.livekit_api_secret;
        }
        if self.egress_layout == default_egress_layout() {
            self.egress_layout = file_config.egress_layout;
        }
        if self.gateway_timeout_secs == default_gateway_timeout_secs() {
            self.gateway_timeout_secs = file_config.gateway_timeout_secs;
        }
        if self.youtube_poll_interval_ms == default_youtube_poll_interval_ms() {
            self.youtube_poll_interval_ms = file_config.youtube_poll_interval_ms;
        }
        if self.facebook_poll_interval_ms == default_facebook_poll_interval_ms() {
            self.facebook_poll_interval_ms = file_config.facebook_poll_interval_ms;
        }
        if self.twitch_poll_interval_ms == default_twitch_poll_interval_ms() {
            self.twitch_poll_interval_ms = file_config.twitch_poll_interval_ms;
        }

        self.youtube_api_base = self.youtube_api_base.or(file_config.youtube_api_base);
        self.twitch_api_base = self.twitch_api_base.or(file_config.twitch_api_base);
        self.facebook_graph_base = self.facebook_graph_base.or(file_config.facebook_graph_base);
        self.youtube_client_id = self.youtube_client_id.or(file_config.youtube_client_id);
        self.youtube_client_secret = self
            .youtube_client_secret
            .or(file_config.youtube_client_secret);
        self.twitch_client_id = self.twitch_client_id.or(file_config.twitch_client_id);
        self.twitch_client_secret = self
            .twitch_client_secret
            .or(file_config.twitch_client_secret);
        self.facebook_app_id = self.facebook_app_id.or(file_config.facebook_app_id);
        self.facebook_app_secret = self
            .facebook_app_secret
            .or(file_config.facebook_app_secret);

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let scheme_ok = ["ws://", "wss://", "http://", "https://"]
            .iter()
            .any(|scheme| self.livekit_url.starts_with(scheme));
        if !scheme_ok {
            return Err(anyhow::anyhow!(
                "LiveKit URL must start with ws://, wss://, http:// or https://"
            ));
        }
        if self.livekit_api_key.is_empty() || self.livekit_api_secret.is_empty() {
            return Err(anyhow::anyhow!("LiveKit API key and secret are required"));
        }
        if self.gateway_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Gateway timeout must be greater than zero"));
        }

        for (name, value) in [
            ("youtube", self.youtube_poll_interval_ms),
            ("facebook", self.facebook_poll_interval_ms),
            ("twitch", self.twitch_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(anyhow::anyhow!(
                    "The {name} poll interval must be greater than zero"
                ));
            }
        }

        for (name, value) in [
            ("YouTube API base", &self.youtube_api_base),
            ("Twitch API base", &self.twitch_api_base),
            ("Facebook Graph base", &self.facebook_graph_base),
        ] {
            if let Some(url) = value
                && !url.starts_with("http://")
                && !url.starts_with("https://")
            {
                return Err(anyhow::anyhow!(
                    "{name} must start with http:// or https://"
                ));
            }
        }

        Ok(())
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }
}

// Default value functions
fn default_port() -> u16 {
    32145
}

fn default_workspace() -> String {
    ".".to_string()
}

fn default_livekit_url() -> String {
    "http://localhost:7880".to_string()
}

fn default_livekit_api_key() -> String {
    "devkey".to_string()
}

fn default_livekit_api_secret() -> String {
    "devsecret".to_string()
}

fn default_egress_layout() -> String {
    "grid-light".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_youtube_poll_interval_ms() -> u64 {
    5000
}

fn default_facebook_poll_interval_ms() -> u64 {
    5000
}

fn default_twitch_poll_interval_ms() -> u64 {
    3000
}
