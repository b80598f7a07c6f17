//! Media player contracts.
//!
//! Channels drive playback through the narrow [`PlayerHandle`] trait and
//! create players through [`PlayerFactory`], so the zone runtime never
//! depends on a concrete player process. The shipped implementation controls
//! mpv over its line-delimited JSON IPC socket (see [`mpv`]).

pub mod mpv;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::error::ErrorKind;

/// Deadline for a single player IPC round trip.
pub const IPC_DEADLINE: Duration = Duration::from_secs(5);

/// Errors from player operations.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("player spawn failed: {0}")]
    Spawn(String),
    #[error("player load failed: {0}")]
    Load(String),
    #[error("player ipc timed out after {0:?}")]
    IpcTimeout(Duration),
    #[error("player ipc failed: {0}")]
    Ipc(String),
}

impl PlayerError {
    /// Map to the wire-visible error kind for telemetry.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Spawn(_) => ErrorKind::PlayerSpawnFailed,
            Self::Load(_) => ErrorKind::PlayerLoadFailed,
            Self::IpcTimeout(_) => ErrorKind::PlayerIpcTimeout,
            Self::Ipc(_) => ErrorKind::PlayerLoadFailed,
        }
    }
}

/// Result of a successful load.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadedMedia {
    /// Declared media duration in seconds, when the player can report one.
    pub duration: Option<f64>,
}

/// Why playback of the current file ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EofReason {
    /// The file played to its end.
    Eof,
    /// Playback was stopped or replaced.
    Stopped,
    /// The player reported an error.
    Error,
}

/// End-of-file observation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofEvent {
    pub reason: EofReason,
}

/// Thin contract over one media player process.
#[async_trait]
pub trait PlayerHandle: Send + Sync {
    /// Load a file, replacing the current one. Playback starts paused.
    async fn load(&self, file: &Path, replace: bool) -> Result<LoadedMedia, PlayerError>;
    async fn play(&self) -> Result<(), PlayerError>;
    async fn pause(&self) -> Result<(), PlayerError>;
    async fn resume(&self) -> Result<(), PlayerError>;
    async fn stop(&self) -> Result<(), PlayerError>;
    async fn set_volume(&self, volume: i32) -> Result<(), PlayerError>;
    async fn set_looping(&self, looping: bool) -> Result<(), PlayerError>;
    /// Subscribe to end-of-file observations.
    fn eof_events(&self) -> broadcast::Receiver<EofEvent>;
    /// Terminate the player process, best-effort.
    async fn quit(&self);
}

/// Which stream a player serves; affects spawn options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerRole {
    Background,
    Speech,
    Video,
}

/// Everything needed to spawn a persistent player for a zone stream.
#[derive(Debug, Clone)]
pub struct PlayerSpec {
    pub zone: String,
    pub role: PlayerRole,
    pub audio_device: String,
    pub extra_options: Vec<String>,
}

/// Parameters for a fire-and-forget effect spawn.
#[derive(Debug, Clone)]
pub struct EffectSpec {
    pub file: PathBuf,
    pub volume: i32,
    pub audio_device: String,
}

/// Creates players and effect spawns. Tests inject mock factories.
#[async_trait]
pub trait PlayerFactory: Send + Sync {
    async fn create_player(
        &self,
        spec: &PlayerSpec,
    ) -> Result<std::sync::Arc<dyn PlayerHandle>, PlayerError>;

    /// Spawn an independent short-lived playback with no IPC.
    async fn spawn_effect(&self, spec: &EffectSpec) -> Result<(), PlayerError>;
}
