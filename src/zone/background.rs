//! Background music channel.
//!
//! One persistent player per zone. At most one file is active; `play`
//! replaces the current file atomically. The channel caches the pre-duck
//! volume from the last play so a duck edge can be applied as a pure
//! recompute without consulting the original request again.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::ZoneConfig;
use crate::player::PlayerHandle;
use crate::telemetry::{CommandOutcome, ZoneTelemetry};
use crate::volume::{resolve, StreamType, VolumeRequest};
use crate::zone::duck::DuckView;
use crate::zone::is_file;

use crate::error::ErrorKind;

/// Observable background state, serialized into status snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackgroundState {
    pub playing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub pre_duck_volume: i32,
    pub effective_volume: i32,
    pub ducked_now: bool,
    pub looping: bool,
}

pub struct BackgroundChannel {
    player: Arc<dyn PlayerHandle>,
    telemetry: ZoneTelemetry,
    cfg: Arc<ZoneConfig>,
    state: BackgroundState,
}

impl BackgroundChannel {
    pub fn new(player: Arc<dyn PlayerHandle>, telemetry: ZoneTelemetry, cfg: Arc<ZoneConfig>) -> Self {
        Self {
            player,
            telemetry,
            cfg,
            state: BackgroundState::default(),
        }
    }

    pub fn state(&self) -> &BackgroundState {
        &self.state
    }

    pub fn playing(&self) -> bool {
        self.state.playing
    }

    /// Start (or replace) background playback.
    pub async fn play(
        &mut self,
        file_ref: &str,
        request: VolumeRequest,
        looping: bool,
        duck: DuckView,
    ) -> CommandOutcome {
        let path = self.cfg.resolve_media(file_ref);
        if !is_file(&path).await {
            return CommandOutcome::warning(
                ErrorKind::FileNotFound,
                format!("file not found: {}", path.display()),
            )
            .with_parameter("file", json!(file_ref));
        }

        let ctx = self.cfg.volume_context(StreamType::Background, duck.adjust);
        let resolved = resolve(StreamType::Background, &ctx, &request, duck.active);

        if let Err(e) = self.player.load(&path, true).await {
            warn!(zone = %self.telemetry.zone(), "background load failed: {}", e);
            return CommandOutcome::failure(e.kind(), e.to_string())
                .with_parameter("file", json!(file_ref));
        }

        let driven = async {
            self.player.set_looping(looping).await?;
            self.player.set_volume(resolved.effective).await?;
            self.player.play().await
        }
        .await;

        if let Err(e) = driven {
            warn!(zone = %self.telemetry.zone(), "background start failed: {}", e);
            // Keep the previous state; the replaced file is torn down.
            let _ = self.player.stop().await;
            return CommandOutcome::failure(e.kind(), e.to_string())
                .with_parameter("file", json!(file_ref));
        }

        self.state = BackgroundState {
            playing: true,
            file: Some(file_ref.to_string()),
            pre_duck_volume: resolved.pre_duck,
            effective_volume: resolved.effective,
            ducked_now: resolved.ducked,
            looping,
        };
        debug!(
            zone = %self.telemetry.zone(),
            file = file_ref,
            volume = resolved.effective,
            ducked = resolved.ducked,
            "background playing"
        );

        CommandOutcome::playback(file_ref, &request, &resolved)
    }

    pub async fn stop(&mut self) -> CommandOutcome {
        if let Err(e) = self.player.stop().await {
            warn!(zone = %self.telemetry.zone(), "background stop failed: {}", e);
        }
        self.state = BackgroundState {
            pre_duck_volume: self.state.pre_duck_volume,
            ..BackgroundState::default()
        };
        CommandOutcome::success()
    }

    /// Re-evaluate the effective volume for the current duck state and apply
    /// it if it changed, emitting the recompute event.
    pub async fn recompute(&mut self, duck: DuckView) {
        if !self.state.playing {
            return;
        }
        let ctx = self.cfg.volume_context(StreamType::Background, duck.adjust);
        let request = VolumeRequest::absolute(self.state.pre_duck_volume as f64);
        let resolved = resolve(StreamType::Background, &ctx, &request, duck.active);

        if resolved.effective == self.state.effective_volume {
            return;
        }
        if let Err(e) = self.player.set_volume(resolved.effective).await {
            warn!(zone = %self.telemetry.zone(), "recompute set_volume failed: {}", e);
            return;
        }
        self.state.effective_volume = resolved.effective;
        self.state.ducked_now = resolved.ducked;
        self.telemetry
            .recompute(resolved.effective, resolved.pre_duck, resolved.ducked)
            .await;
    }

    /// `setVolume`: update the pre-duck volume and recompute under the
    /// current duck state.
    pub async fn set_base_volume(&mut self, volume: f64, duck: DuckView) -> CommandOutcome {
        let ctx = self.cfg.volume_context(StreamType::Background, duck.adjust);
        let request = VolumeRequest::absolute(volume);
        let resolved = resolve(StreamType::Background, &ctx, &request, duck.active);

        self.state.pre_duck_volume = resolved.pre_duck;
        if self.state.playing {
            if let Err(e) = self.player.set_volume(resolved.effective).await {
                return CommandOutcome::failure(e.kind(), e.to_string());
            }
            self.state.effective_volume = resolved.effective;
            self.state.ducked_now = resolved.ducked;
        }

        let mut outcome = if resolved.warnings.is_empty() {
            CommandOutcome::success()
        } else {
            CommandOutcome::warning(
                ErrorKind::VolumeResolutionWarning,
                "volume clamped during resolution",
            )
        };
        outcome = outcome
            .with_parameter("volume", json!(volume))
            .with_parameter("effective_volume", json!(resolved.effective))
            .with_parameter("pre_duck_volume", json!(resolved.pre_duck))
            .with_parameter("ducked", json!(resolved.ducked))
            .with_parameter("warnings", json!(resolved.warning_strings()));
        outcome
    }

    pub async fn quit(&self) {
        self.player.quit().await;
    }
}
