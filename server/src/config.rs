use std::ffi::OsString;
use std::time::Duration;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Longest accepted session token lifetime (about a century).
pub const MAX_TOKEN_TTL_DAYS: u32 = 36_500;

/// Real-time chat relay server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "relay-server", version, about = "Real-time chat relay server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "RELAY_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "RELAY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./relay.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RELAY_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long, env = "RELAY_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Shared secret for history, token check and the chat stream (X-API-Key)
    #[arg(long, env = "RELAY_API_KEY", default_value = "")]
    pub api_key: String,

    /// Privileged secret for identity issuance (Authorization header)
    #[arg(long, env = "RELAY_AUTH_TOKEN", default_value = "")]
    pub auth_token: String,

    /// Origin allowed by CORS
    #[arg(long, env = "RELAY_FRONTEND_URL", default_value = "http://localhost:3000")]
    pub frontend_url: String,

    /// Lifetime of a freshly minted session token, in days
    #[arg(long, env = "RELAY_TOKEN_TTL_DAYS", default_value = "30")]
    pub token_ttl_days: u32,

    /// Treat expired session tokens as unknown on token check
    #[arg(long, env = "RELAY_REJECT_EXPIRED_TOKENS")]
    pub reject_expired_tokens: bool,

    /// Capacity of each connection's outbound queue
    #[arg(long, env = "RELAY_OUTBOUND_BUFFER", default_value = "64")]
    pub outbound_buffer: usize,

    /// Capacity of the broadcast router's inbound queue
    #[arg(long, env = "RELAY_ROUTER_QUEUE", default_value = "256")]
    pub router_queue: usize,

    /// Largest inbound frame accepted on the chat stream
    #[arg(long, env = "RELAY_MAX_MESSAGE_BYTES", default_value = "4096")]
    pub max_message_bytes: usize,

    /// Deadline for admitting a connection, in seconds
    #[arg(long, env = "RELAY_HANDSHAKE_TIMEOUT_SECS", default_value = "5")]
    pub handshake_timeout_secs: u64,

    /// Deadline for every store call, in seconds
    #[arg(long, env = "RELAY_PERSISTENCE_TIMEOUT_SECS", default_value = "5")]
    pub persistence_timeout_secs: u64,

    /// Deadline for one socket write, in seconds
    #[arg(long, env = "RELAY_WRITE_TIMEOUT_SECS", default_value = "10")]
    pub write_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./relay.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            api_key: String::new(),
            auth_token: String::new(),
            frontend_url: "http://localhost:3000".to_string(),
            token_ttl_days: 30,
            reject_expired_tokens: false,
            outbound_buffer: 64,
            router_queue: 256,
            max_message_bytes: 4096,
            handshake_timeout_secs: 5,
            persistence_timeout_secs: 5,
            write_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(std::env::args_os())
    }

    /// Same as [`Config::load`] over an explicit argument list.
    pub fn load_from<I, T>(args: I) -> Result<Self, figment::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Config::command().get_matches_from(args);
        let cli = Config::from_arg_matches(&matches).map_err(|e| figment::Error::from(e.to_string()))?;

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("RELAY_"))
            .merge(Serialized::defaults(command_line_values(&cli, &matches)?))
            .extract()
    }

    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            api_key: self.api_key.clone(),
            auth_token: self.auth_token.clone(),
            frontend_url: self.frontend_url.clone(),
            token_ttl: chrono::Duration::days(i64::from(self.token_ttl_days.min(MAX_TOKEN_TTL_DAYS))),
            reject_expired_tokens: self.reject_expired_tokens,
            outbound_buffer: self.outbound_buffer.max(1),
            router_queue: self.router_queue.max(1),
            max_message_bytes: self.max_message_bytes,
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            persistence_timeout: Duration::from_secs(self.persistence_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
        }
    }
}

/// Only the flags typed on the command line. clap fills every other field
/// from its own defaults or the environment, which must not mask the TOML layer.
fn command_line_values(
    cli: &Config,
    matches: &ArgMatches,
) -> Result<serde_json::Map<String, serde_json::Value>, figment::Error> {
    let serde_json::Value::Object(mut values) =
        serde_json::to_value(cli).map_err(|e| figment::Error::from(e.to_string()))?
    else {
        return Ok(serde_json::Map::new());
    };
    values.retain(|key, _| matches.value_source(key) == Some(ValueSource::CommandLine));
    Ok(values)
}

/// Runtime knobs handed to handlers and sessions through `AppState`.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub api_key: String,
    pub auth_token: String,
    pub frontend_url: String,
    pub token_ttl: chrono::Duration,
    pub reject_expired_tokens: bool,
    pub outbound_buffer: usize,
    pub router_queue: usize,
    pub max_message_bytes: usize,
    pub handshake_timeout: Duration,
    pub persistence_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Config::default().settings()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chat Relay Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and token signing key
# data_dir = "./data"

# ---- Credentials ----
# An empty secret rejects every request that needs it.

# Sent as X-API-Key on /getMessages and /checkJWT, and as the first half of
# the chat stream's Sec-WebSocket-Protocol header
# api_key = ""

# Sent as Authorization on POST /auth
# auth_token = ""

# Origin allowed by CORS
# frontend_url = "http://localhost:3000"

# ---- Session tokens ----
# token_ttl_days = 30
# Expiry is advisory unless this is set
# reject_expired_tokens = false

# ---- Stream ----
# outbound_buffer = 64       # Per-connection queue; a full queue drops the message
# router_queue = 256         # Queue feeding the broadcast router
# max_message_bytes = 4096

# ---- Deadlines (seconds) ----
# handshake_timeout_secs = 5
# persistence_timeout_secs = 5
# write_timeout_secs = 10
"#
    .to_string()
}
