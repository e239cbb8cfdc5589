//! Layered configuration, following the teacher's `figment`-based
//! `Toml` + `Env` provider stack.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod duration_serde;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub limits: LimitsConfig,
    pub hls: HlsConfig,
    pub ffmpeg: FfmpegConfig,
    pub playback_decision: PlaybackDecisionConfig,
    pub network: NetworkConfig,
    pub force_https: bool,
    pub api_disable_legacy_token_sources: bool,
    pub web: WebConfig,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            limits: LimitsConfig::default(),
            hls: HlsConfig::default(),
            ffmpeg: FfmpegConfig::default(),
            playback_decision: PlaybackDecisionConfig::default(),
            network: NetworkConfig::default(),
            force_https: false,
            api_disable_legacy_token_sources: true,
            web: WebConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub enabled: bool,
    pub tuner_slots: Vec<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tuner_slots: vec![0, 1],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_sessions: u32,
    pub max_transcodes: u32,
    #[serde(with = "duration_serde")]
    pub lease_ttl: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            max_transcodes: 4,
            lease_ttl: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    pub root: PathBuf,
    pub library_roots: Vec<PathBuf>,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/xg2g/hls"),
            library_roots: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub bin: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            bin: PathBuf::from("/usr/bin/ffmpeg"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackDecisionConfig {
    pub secret: String,
    pub key_id: Option<String>,
    /// `"kid:secret"` pairs, most recently retired first.
    pub previous_keys: Vec<String>,
    #[serde(with = "duration_serde")]
    pub rotation_window: Duration,
}

impl Default for PlaybackDecisionConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            key_id: None,
            previous_keys: Vec::new(),
            rotation_window: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NetworkConfig {
    pub outbound: OutboundPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundPolicy {
    pub enabled: bool,
    pub allow_hosts: Vec<String>,
    pub allow_cidrs: Vec<String>,
    pub allow_ports: Vec<u16>,
    pub allow_schemes: Vec<String>,
}

impl Default for OutboundPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_hosts: Vec::new(),
            allow_cidrs: Vec::new(),
            allow_ports: vec![80, 443],
            allow_schemes: vec!["http".to_string(), "https".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// principal id/bearer token → scopes (static for tests/dev; production
    /// token storage is an external collaborator).
    pub tokens: HashMap<String, TokenPrincipal>,
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: HashMap::new(),
            cookie_name: "xg2g_session".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPrincipal {
    pub principal_id: String,
    pub scopes: Vec<String>,
}

impl Config {
    /// Load from `xg2g.toml` (if present) overlaid with `XG2G_*` environment
    /// variables, following the teacher's `Figment::from(Toml::file(..)).merge(Env::prefixed(..))`
    /// idiom.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        use figment::{
            providers::{Env, Format, Toml},
            Figment,
        };

        let mut figment = Figment::from(figment::providers::Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("XG2G_").split("__"));
        Ok(figment.extract()?)
    }
}
