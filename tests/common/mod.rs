//! Shared mock infrastructure for integration tests.
//!
//! Mirrors the production traits with capture-everything fakes: players
//! record every call and let tests fire EOF events, the factory hands the
//! mocks out by role, and the publisher collects every telemetry payload.

// Each test binary uses a different subset of this module.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use paradox_fx::config::{BaseVolumes, QueueLimits, ZoneConfig, ZoneKind};
use paradox_fx::player::{
    EffectSpec, EofEvent, EofReason, LoadedMedia, PlayerError, PlayerFactory, PlayerHandle,
    PlayerRole, PlayerSpec,
};
use paradox_fx::transport::Publisher;

/// Everything a mock player was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCall {
    Load(PathBuf),
    Play,
    Pause,
    Resume,
    Stop,
    SetVolume(i32),
    SetLooping(bool),
    Quit,
}

pub struct MockPlayer {
    pub calls: Mutex<Vec<PlayerCall>>,
    eof_tx: broadcast::Sender<EofEvent>,
    /// Duration reported for every load.
    duration: Option<f64>,
}

impl MockPlayer {
    pub fn new(duration: Option<f64>) -> Self {
        let (eof_tx, _) = broadcast::channel(16);
        Self {
            calls: Mutex::new(Vec::new()),
            eof_tx,
            duration,
        }
    }

    /// Simulate the player reaching end of file.
    pub fn fire_eof(&self) {
        let _ = self.eof_tx.send(EofEvent {
            reason: EofReason::Eof,
        });
    }

    pub async fn volumes(&self) -> Vec<i32> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                PlayerCall::SetVolume(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub async fn loads(&self) -> Vec<PathBuf> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                PlayerCall::Load(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, call: PlayerCall) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl PlayerHandle for MockPlayer {
    async fn load(&self, file: &Path, _replace: bool) -> Result<LoadedMedia, PlayerError> {
        self.record(PlayerCall::Load(file.to_path_buf())).await;
        Ok(LoadedMedia {
            duration: self.duration,
        })
    }

    async fn play(&self) -> Result<(), PlayerError> {
        self.record(PlayerCall::Play).await;
        Ok(())
    }

    async fn pause(&self) -> Result<(), PlayerError> {
        self.record(PlayerCall::Pause).await;
        Ok(())
    }

    async fn resume(&self) -> Result<(), PlayerError> {
        self.record(PlayerCall::Resume).await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), PlayerError> {
        self.record(PlayerCall::Stop).await;
        Ok(())
    }

    async fn set_volume(&self, volume: i32) -> Result<(), PlayerError> {
        self.record(PlayerCall::SetVolume(volume)).await;
        Ok(())
    }

    async fn set_looping(&self, looping: bool) -> Result<(), PlayerError> {
        self.record(PlayerCall::SetLooping(looping)).await;
        Ok(())
    }

    fn eof_events(&self) -> broadcast::Receiver<EofEvent> {
        self.eof_tx.subscribe()
    }

    async fn quit(&self) {
        self.record(PlayerCall::Quit).await;
    }
}

/// Hands out one mock player per (zone, role) and records effect spawns.
pub struct MockFactory {
    pub players: Mutex<HashMap<(String, String), Arc<MockPlayer>>>,
    pub effects: Mutex<Vec<EffectSpec>>,
    /// Duration reported by players created from here on.
    duration: Option<f64>,
}

impl MockFactory {
    pub fn new(duration: Option<f64>) -> Arc<Self> {
        Arc::new(Self {
            players: Mutex::new(HashMap::new()),
            effects: Mutex::new(Vec::new()),
            duration,
        })
    }

    pub async fn player(&self, zone: &str, role: PlayerRole) -> Arc<MockPlayer> {
        let key = (zone.to_string(), role_key(role).to_string());
        self.players
            .lock()
            .await
            .get(&key)
            .cloned()
            .unwrap_or_else(|| panic!("no player created for {:?}", key))
    }

    pub async fn effect_count(&self) -> usize {
        self.effects.lock().await.len()
    }
}

fn role_key(role: PlayerRole) -> &'static str {
    match role {
        PlayerRole::Background => "background",
        PlayerRole::Speech => "speech",
        PlayerRole::Video => "video",
    }
}

#[async_trait]
impl PlayerFactory for MockFactory {
    async fn create_player(&self, spec: &PlayerSpec) -> Result<Arc<dyn PlayerHandle>, PlayerError> {
        let player = Arc::new(MockPlayer::new(self.duration));
        self.players.lock().await.insert(
            (spec.zone.clone(), role_key(spec.role).to_string()),
            player.clone(),
        );
        Ok(player)
    }

    async fn spawn_effect(&self, spec: &EffectSpec) -> Result<(), PlayerError> {
        self.effects.lock().await.push(spec.clone());
        Ok(())
    }
}

/// Captures every telemetry publish.
pub struct CapturingPublisher {
    pub messages: Mutex<Vec<(String, Value)>>,
}

impl CapturingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
        })
    }

    /// Payloads published to a topic, in order.
    pub async fn on_topic(&self, topic: &str) -> Vec<Value> {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Events on a topic where `key` is present.
    pub async fn events_with(&self, topic: &str, key: &str) -> Vec<Value> {
        self.on_topic(topic)
            .await
            .into_iter()
            .filter(|payload| payload.get(key).is_some())
            .collect()
    }

    /// Outcome events (payloads with a `command` field) on a topic.
    pub async fn outcomes(&self, topic: &str) -> Vec<Value> {
        self.events_with(topic, "command").await
    }
}

#[async_trait]
impl Publisher for CapturingPublisher {
    async fn publish(&self, topic: &str, payload: String) -> anyhow::Result<()> {
        let value: Value = serde_json::from_str(&payload)?;
        self.messages.lock().await.push((topic.to_string(), value));
        Ok(())
    }
}

/// Poll until the predicate passes or the deadline expires.
pub async fn wait_for<F, Fut>(deadline: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if check().await {
            return;
        }
        if start.elapsed() > deadline {
            panic!("condition not met within {:?}", deadline);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A zone config rooted in a temp media dir with the given files created.
pub fn zone_config(name: &str, kind: ZoneKind, media_dir: &Path, files: &[&str]) -> ZoneConfig {
    for file in files {
        std::fs::write(media_dir.join(file), b"media").unwrap();
    }
    ZoneConfig {
        name: name.to_string(),
        kind,
        base_topic: format!("paradox/{}", name),
        status_topic: None,
        media_dir: media_dir.to_path_buf(),
        audio_device: "default".to_string(),
        base_volumes: BaseVolumes::default(),
        max_volume: 150,
        ducking_adjust: -50,
        speech_duck_override: None,
        video_duck_override: None,
        combined_sink: None,
        queue_limits: QueueLimits::default(),
        player_options: Vec::new(),
    }
}
