// ABOUTME: Space configuration model and loading from files and environment
// ABOUTME: Enumerates participants, tokens, capabilities, listener, and limits

//! Space configuration.
//!
//! A space configuration enumerates every participant the gateway will
//! admit — with bearer tokens and static capabilities — plus the optional
//! network listener and the tunable limits. Files may be YAML or JSON;
//! `MEW_*` environment variables override file values.

use crate::capability::Capability;
use crate::constants::{limits, timeouts};
use crate::error::{GatewayError, Result};

use figment::providers::{Env, Format, Json, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Preferred transport for a participant, when the space pins one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Pipe,
    WebSocket,
}

/// One configured participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantConfig {
    pub id: String,

    /// Opaque bearer secrets accepted for this participant
    pub tokens: Vec<String>,

    /// Static capability set
    #[serde(default)]
    pub capabilities: Vec<Capability>,

    /// Recipients substituted for an empty `to` on `chat` envelopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_chat_to: Option<Vec<String>>,

    /// Auto-start command, consumed by an external supervisor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments for the auto-start command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Transport preference, when pinned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,
}

/// Network listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub port: u16,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

/// Tunable limits and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Seconds before an unfulfilled proposal produces a timeout note
    #[serde(default = "default_proposal_lifetime_secs")]
    pub proposal_lifetime_secs: u64,

    /// Pause duration applied when `participant/pause` names none
    #[serde(default = "default_pause_timeout_secs")]
    pub pause_timeout_secs: u64,

    /// Bound on each participant's outbound queue
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,

    /// Largest accepted binary stream frame
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Idle reaper; absent means no reap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,

    /// Gateway heartbeat broadcast; absent means none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_secs: Option<u64>,
}

fn default_proposal_lifetime_secs() -> u64 {
    timeouts::DEFAULT_PROPOSAL_LIFETIME.as_secs()
}

fn default_pause_timeout_secs() -> u64 {
    timeouts::DEFAULT_PAUSE_TIMEOUT.as_secs()
}

fn default_outbound_queue_size() -> usize {
    limits::DEFAULT_OUTBOUND_QUEUE_SIZE
}

fn default_max_frame_bytes() -> usize {
    limits::DEFAULT_MAX_FRAME_BYTES
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            proposal_lifetime_secs: default_proposal_lifetime_secs(),
            pause_timeout_secs: default_pause_timeout_secs(),
            outbound_queue_size: default_outbound_queue_size(),
            max_frame_bytes: default_max_frame_bytes(),
            idle_timeout_secs: None,
            heartbeat_interval_secs: None,
        }
    }
}

impl LimitsConfig {
    pub fn proposal_lifetime(&self) -> Duration {
        Duration::from_secs(self.proposal_lifetime_secs)
    }

    pub fn pause_timeout(&self) -> Duration {
        Duration::from_secs(self.pause_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_secs.map(Duration::from_secs)
    }
}

/// A complete space configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceConfig {
    /// Human-readable space name
    #[serde(default)]
    pub name: Option<String>,

    pub participants: Vec<ParticipantConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<ListenerConfig>,

    #[serde(default)]
    pub limits: LimitsConfig,

    /// Optional JSONL sink mirroring the history log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            name: None,
            participants: Vec::new(),
            listener: None,
            limits: LimitsConfig::default(),
            history_file: None,
        }
    }
}

impl SpaceConfig {
    /// Load a configuration file (YAML or JSON by extension), with `MEW_*`
    /// environment variables layered on top.
    pub fn from_file(path: &Path) -> Result<Self> {
        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Figment::new().merge(Json::file(path)),
            _ => Figment::new().merge(Yaml::file(path)),
        };
        let config: SpaceConfig = figment
            .merge(Env::prefixed("MEW_").split("__"))
            .extract()
            .map_err(|e| GatewayError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants a loaded configuration must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.participants.is_empty() {
            return Err(GatewayError::config("a space needs at least one participant"));
        }
        for participant in &self.participants {
            if participant.id.is_empty() {
                return Err(GatewayError::config("participant id cannot be empty"));
            }
            if participant.tokens.is_empty() {
                return Err(GatewayError::config(format!(
                    "participant '{}' has no tokens",
                    participant.id
                )));
            }
            if participant.tokens.iter().any(|t| t.is_empty()) {
                return Err(GatewayError::config(format!(
                    "participant '{}' has an empty token",
                    participant.id
                )));
            }
        }
        if self.limits.outbound_queue_size == 0 {
            return Err(GatewayError::config("outbound_queue_size cannot be 0"));
        }
        if self.limits.max_frame_bytes == 0 {
            return Err(GatewayError::config("max_frame_bytes cannot be 0"));
        }
        if let Some(listener) = &self.listener {
            if listener.port == 0 {
                return Err(GatewayError::config("listener port cannot be 0"));
            }
            if listener.bind_address.is_empty() {
                return Err(GatewayError::config("listener bind address cannot be empty"));
            }
        }
        Ok(())
    }
}
