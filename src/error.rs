//! Wire-visible error kinds.
//!
//! Every failure or warning surfaced in telemetry carries one of these kinds;
//! `Display` yields the exact snake_case string used on the wire, so the
//! enum doubles as the single source of truth for downstream schemas.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error kinds emitted in outcome events and warning telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("malformed_json")]
    MalformedJson,
    #[error("invalid_command_structure")]
    InvalidCommandStructure,
    #[error("unknown_command")]
    UnknownCommand,
    #[error("invalid_parameters")]
    InvalidParameters,
    #[error("file_not_found")]
    FileNotFound,
    #[error("player_load_failed")]
    PlayerLoadFailed,
    #[error("player_spawn_failed")]
    PlayerSpawnFailed,
    #[error("player_ipc_timeout")]
    PlayerIpcTimeout,
    #[error("command_timeout")]
    CommandTimeout,
    #[error("volume_resolution_warning")]
    VolumeResolutionWarning,
    #[error("duplicate_ignored")]
    DuplicateIgnored,
    #[error("queue_overflow_dropped")]
    QueueOverflowDropped,
    #[error("invalid_zone_model")]
    InvalidZoneModel,
    #[error("transport_disconnected")]
    TransportDisconnected,
}

impl ErrorKind {
    /// The wire string, without going through `format!`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedJson => "malformed_json",
            Self::InvalidCommandStructure => "invalid_command_structure",
            Self::UnknownCommand => "unknown_command",
            Self::InvalidParameters => "invalid_parameters",
            Self::FileNotFound => "file_not_found",
            Self::PlayerLoadFailed => "player_load_failed",
            Self::PlayerSpawnFailed => "player_spawn_failed",
            Self::PlayerIpcTimeout => "player_ipc_timeout",
            Self::CommandTimeout => "command_timeout",
            Self::VolumeResolutionWarning => "volume_resolution_warning",
            Self::DuplicateIgnored => "duplicate_ignored",
            Self::QueueOverflowDropped => "queue_overflow_dropped",
            Self::InvalidZoneModel => "invalid_zone_model",
            Self::TransportDisconnected => "transport_disconnected",
        }
    }
}
