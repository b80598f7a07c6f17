//! Fire-and-forget sound effects.
//!
//! Each play spawns an independent short-lived player with no IPC; effects
//! overlap freely and never add duck triggers.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::config::ZoneConfig;
use crate::error::ErrorKind;
use crate::player::{EffectSpec, PlayerFactory};
use crate::telemetry::{CommandOutcome, ZoneTelemetry};
use crate::volume::{resolve, StreamType, VolumeRequest};
use crate::zone::is_file;

pub struct EffectsChannel {
    factory: Arc<dyn PlayerFactory>,
    telemetry: ZoneTelemetry,
    cfg: Arc<ZoneConfig>,
}

impl EffectsChannel {
    pub fn new(
        factory: Arc<dyn PlayerFactory>,
        telemetry: ZoneTelemetry,
        cfg: Arc<ZoneConfig>,
    ) -> Self {
        Self {
            factory,
            telemetry,
            cfg,
        }
    }

    pub async fn play(&self, file_ref: &str, request: VolumeRequest) -> CommandOutcome {
        let path = self.cfg.resolve_media(file_ref);
        if !is_file(&path).await {
            return CommandOutcome::warning(
                ErrorKind::FileNotFound,
                format!("file not found: {}", path.display()),
            )
            .with_parameter("file", json!(file_ref));
        }

        let ctx = self.cfg.volume_context(StreamType::Effects, 0);
        let resolved = resolve(StreamType::Effects, &ctx, &request, false);

        let spec = EffectSpec {
            file: path,
            volume: resolved.effective,
            audio_device: self.cfg.audio_device.clone(),
        };
        if let Err(e) = self.factory.spawn_effect(&spec).await {
            warn!(zone = %self.telemetry.zone(), file = file_ref, "effect spawn failed: {}", e);
            return CommandOutcome::failure(ErrorKind::PlayerSpawnFailed, e.to_string())
                .with_parameter("file", json!(file_ref));
        }

        debug!(zone = %self.telemetry.zone(), file = file_ref, volume = resolved.effective, "effect spawned");
        CommandOutcome::playback(file_ref, &request, &resolved)
    }
}
