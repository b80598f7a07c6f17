//! Zone runtime.
//!
//! Each zone is one cooperative actor: a tokio task that owns every bit of
//! the zone's state (channels, duck lifecycle, status) and processes its
//! inbox strictly sequentially. Tracker natural-ends and player EOFs come
//! back through the same inbox, so there is exactly one writer and no locks.
//!
//! Commands are validated, dispatched to the owning channel, and answered
//! with exactly one outcome event each. Duck edges produced by a dispatch
//! are applied to the local lifecycle, fanned out on the internal bus for
//! sibling zones, and immediately folded into a background volume recompute.

pub mod background;
pub mod command;
pub mod duck;
pub mod effects;
pub mod speech;
pub mod tracker;
pub mod video;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, SharedBus};
use crate::config::{ZoneConfig, ZoneKind};
use crate::error::ErrorKind;
use crate::player::{PlayerFactory, PlayerRole, PlayerSpec};
use crate::telemetry::{CommandOutcome, Outcome, OutcomeEvent, ZoneTelemetry};
use crate::transport::Publisher;

use self::background::BackgroundChannel;
use self::command::{parse, CommandAction, ParsedCommand};
use self::duck::{DuckEdge, DuckKind, DuckLifecycle, DuckTrigger, DuckView};
use self::effects::EffectsChannel;
use self::speech::SpeechChannel;
use self::video::VideoChannel;

/// Umbrella timeout for a single command dispatch.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Messages a zone actor processes.
#[derive(Debug)]
pub enum ZoneMsg {
    /// A decoded JSON command from the router.
    Command { raw: Value },
    /// Duck edge fan-out from a sibling zone.
    RemoteDuck {
        id: String,
        kind: DuckKind,
        adjust: Option<i32>,
        active: bool,
    },
    /// The current speech item finished (tracker or EOF).
    SpeechAdvance { seq: u64 },
    /// The current video item finished (tracker or EOF).
    VideoAdvance { seq: u64 },
}

/// Routing handle for a running zone.
#[derive(Clone)]
pub struct ZoneHandle {
    pub name: String,
    pub kind: ZoneKind,
    pub base_topic: String,
    pub tx: mpsc::Sender<ZoneMsg>,
}

/// Whether a path points at an existing regular file.
pub(crate) async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Build the zone's players and spawn its actor task. The join handle lets
/// the supervisor drain the actor during shutdown.
pub async fn spawn_zone(
    cfg: ZoneConfig,
    factory: Arc<dyn PlayerFactory>,
    publisher: Arc<dyn Publisher>,
    bus: SharedBus,
    status_interval: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<(ZoneHandle, tokio::task::JoinHandle<()>)> {
    let cfg = Arc::new(cfg);
    let telemetry = ZoneTelemetry::new(
        &cfg.name,
        &cfg.base_topic,
        cfg.status_topic.as_deref(),
        publisher,
    );

    let (tx, rx) = mpsc::channel(64);

    let player_spec = |role: PlayerRole| PlayerSpec {
        zone: cfg.name.clone(),
        role,
        audio_device: cfg.audio_device.clone(),
        extra_options: cfg.player_options.clone(),
    };

    let background_player = factory
        .create_player(&player_spec(PlayerRole::Background))
        .await
        .with_context(|| format!("zone {}: background player", cfg.name))?;
    let speech_player = factory
        .create_player(&player_spec(PlayerRole::Speech))
        .await
        .with_context(|| format!("zone {}: speech player", cfg.name))?;

    let video = match cfg.kind {
        ZoneKind::Screen => {
            let video_player = factory
                .create_player(&player_spec(PlayerRole::Video))
                .await
                .with_context(|| format!("zone {}: video player", cfg.name))?;
            Some(VideoChannel::new(
                video_player,
                telemetry.clone(),
                cfg.clone(),
                tx.clone(),
            ))
        }
        ZoneKind::Audio => None,
    };

    let runtime = ZoneRuntime {
        background: BackgroundChannel::new(background_player, telemetry.clone(), cfg.clone()),
        speech: SpeechChannel::new(speech_player, telemetry.clone(), cfg.clone(), tx.clone()),
        effects: EffectsChannel::new(factory, telemetry.clone(), cfg.clone()),
        video,
        duck: DuckLifecycle::new(),
        telemetry,
        bus,
        cfg: cfg.clone(),
        last_command: None,
        error_state: false,
        last_status: None,
    };

    let handle = ZoneHandle {
        name: cfg.name.clone(),
        kind: cfg.kind,
        base_topic: cfg.base_topic.clone(),
        tx,
    };

    let join = tokio::spawn(runtime.run(rx, status_interval, cancel));
    info!("zone {} ({}) started on {}", cfg.name, cfg.kind, cfg.base_topic);

    Ok((handle, join))
}

struct ZoneRuntime {
    cfg: Arc<ZoneConfig>,
    telemetry: ZoneTelemetry,
    bus: SharedBus,
    duck: DuckLifecycle,
    background: BackgroundChannel,
    speech: SpeechChannel,
    effects: EffectsChannel,
    video: Option<VideoChannel>,
    last_command: Option<String>,
    error_state: bool,
    last_status: Option<Value>,
}

impl ZoneRuntime {
    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<ZoneMsg>,
        status_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut status_tick = tokio::time::interval(status_interval);
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick fires immediately; the initial snapshot
        // below already covers it.
        status_tick.reset();

        self.publish_status(true).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("zone {} cancelled", self.cfg.name);
                    break;
                }
                msg = inbox.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
                _ = status_tick.tick() => {
                    self.publish_status(true).await;
                }
            }
        }

        self.teardown().await;
        info!("zone {} stopped", self.cfg.name);
    }

    async fn handle(&mut self, msg: ZoneMsg) {
        match msg {
            ZoneMsg::Command { raw } => self.handle_raw_command(raw).await,
            ZoneMsg::RemoteDuck {
                id,
                kind,
                adjust,
                active,
            } => {
                if active {
                    self.duck.add(DuckTrigger { id, kind, adjust });
                } else {
                    self.duck.remove(&id);
                }
                let view = self.duck_view();
                self.background.recompute(view).await;
                self.publish_status(false).await;
            }
            ZoneMsg::SpeechAdvance { seq } => {
                let edges = self.speech.on_advance(seq).await;
                self.apply_edges(edges).await;
                self.publish_status(false).await;
            }
            ZoneMsg::VideoAdvance { seq } => {
                let edges = match &mut self.video {
                    Some(video) => video.on_advance(seq).await,
                    None => Vec::new(),
                };
                self.apply_edges(edges).await;
                self.publish_status(false).await;
            }
        }
    }

    async fn handle_raw_command(&mut self, raw: Value) {
        let parsed = match parse(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                let name = raw_command_name(&raw);
                warn!(zone = %self.cfg.name, command = %name, "{}", e.message);
                let event = OutcomeEvent::new(&self.cfg.name, &name, Outcome::Warning)
                    .with_message(e.message)
                    .with_warning_type(e.kind.as_str());
                self.telemetry.outcome(event).await;
                return;
            }
        };

        if parsed.action.screen_only() && self.cfg.kind != ZoneKind::Screen {
            let event = OutcomeEvent::new(&self.cfg.name, &parsed.name, Outcome::Warning)
                .with_message(format!(
                    "'{}' is not supported by audio zones",
                    parsed.name
                ))
                .with_warning_type(ErrorKind::UnknownCommand.as_str());
            self.telemetry.outcome(event).await;
            return;
        }

        self.last_command = Some(parsed.name.clone());
        let name = parsed.name.clone();
        let action = parsed.action.clone();

        match tokio::time::timeout(COMMAND_TIMEOUT, self.execute(parsed)).await {
            Ok((outcome, edges)) => {
                self.error_state = outcome.outcome() == Outcome::Failure;
                self.apply_edges(edges).await;

                let mut event = OutcomeEvent::new(&self.cfg.name, &name, outcome.outcome())
                    .with_parameters(outcome.parameters);
                if let Some(message) = outcome.message {
                    event = event.with_message(message);
                }
                if let Some(warning_type) = outcome.warning_type {
                    event = event.with_warning_type(warning_type);
                }
                self.telemetry.outcome(event).await;
            }
            Err(_) => {
                warn!(zone = %self.cfg.name, command = %name, "command timed out");
                self.error_state = true;
                let event = OutcomeEvent::new(&self.cfg.name, &name, Outcome::Failure)
                    .with_message(format!("command exceeded {:?}", COMMAND_TIMEOUT))
                    .with_warning_type(ErrorKind::CommandTimeout.as_str());
                self.telemetry.outcome(event).await;
                self.stop_after_timeout(&action).await;
            }
        }

        self.publish_status(false).await;
    }

    async fn execute(&mut self, parsed: ParsedCommand) -> (CommandOutcome, Vec<DuckEdge>) {
        let duck = self.duck_view();
        match parsed.action {
            CommandAction::PlayBackground {
                file,
                request,
                looping,
            } => (
                self.background.play(&file, request, looping, duck).await,
                Vec::new(),
            ),
            CommandAction::StopBackground => (self.background.stop().await, Vec::new()),
            CommandAction::PlaySpeech {
                file,
                request,
                ducking,
            } => self.speech.enqueue(&file, request, ducking).await,
            CommandAction::ClearSpeechQueue => self.speech.clear().await,
            CommandAction::PauseSpeech => (self.speech.pause().await, Vec::new()),
            CommandAction::ResumeSpeech => (self.speech.resume().await, Vec::new()),
            CommandAction::SkipSpeech => self.speech.skip().await,
            CommandAction::PlayEffect { file, request } => {
                (self.effects.play(&file, request).await, Vec::new())
            }
            CommandAction::SetVolume { volume } => {
                (self.background.set_base_volume(volume, duck).await, Vec::new())
            }
            CommandAction::GetStatus => {
                self.publish_status(true).await;
                (CommandOutcome::success(), Vec::new())
            }
            CommandAction::StopAll => {
                let mut edges = Vec::new();
                self.background.stop().await;
                let (_, speech_edges) = self.speech.clear().await;
                edges.extend(speech_edges);
                if let Some(video) = &mut self.video {
                    let (_, video_edges) = video.stop().await;
                    edges.extend(video_edges);
                }
                (CommandOutcome::success(), edges)
            }
            CommandAction::SetImage { file } => match &mut self.video {
                Some(video) => video.set_image(&file).await,
                None => (unsupported(), Vec::new()),
            },
            CommandAction::PlayVideo {
                file,
                request,
                looping,
                ducking,
            } => match &mut self.video {
                Some(video) => video.play(&file, request, looping, ducking, None).await,
                None => (unsupported(), Vec::new()),
            },
            CommandAction::StopVideo => match &mut self.video {
                Some(video) => video.stop().await,
                None => (unsupported(), Vec::new()),
            },
            CommandAction::Transition { file, image } => match &mut self.video {
                Some(video) => {
                    video
                        .play(&file, Default::default(), false, None, Some(image))
                        .await
                }
                None => (unsupported(), Vec::new()),
            },
        }
    }

    /// Apply duck edges locally, fan them out, and fold the result into the
    /// background volume.
    async fn apply_edges(&mut self, edges: Vec<DuckEdge>) {
        if edges.is_empty() {
            return;
        }
        for edge in edges {
            match edge {
                DuckEdge::Started { id, kind, adjust } => {
                    self.duck.add(DuckTrigger {
                        id: id.clone(),
                        kind,
                        adjust,
                    });
                    self.bus.publish(BusEvent::DuckStarted {
                        zone: self.cfg.name.clone(),
                        trigger_id: id,
                        kind,
                        adjust,
                    });
                }
                DuckEdge::Ended { id } => {
                    self.duck.remove(&id);
                    self.bus.publish(BusEvent::DuckEnded {
                        zone: self.cfg.name.clone(),
                        trigger_id: id,
                    });
                }
            }
        }
        let view = self.duck_view();
        self.background.recompute(view).await;
    }

    fn duck_view(&self) -> DuckView {
        DuckView {
            active: self.duck.active(),
            adjust: self.duck.effective_adjust(&self.cfg.duck_defaults()),
        }
    }

    fn current_status(&self) -> &'static str {
        if self.error_state {
            return "error";
        }
        if let Some(video) = &self.video {
            if video.playing() {
                return "playing_video";
            }
            if video.showing_image() {
                return "playing_image";
            }
        }
        if self.background.playing() || self.speech.active() {
            return "playing_audio";
        }
        "idle"
    }

    fn status_body(&self) -> Value {
        let mut body = json!({
            "zone": self.cfg.name,
            "type": "status",
            "kind": self.cfg.kind,
            "status": self.current_status(),
            "background": self.background.state(),
            "speech": self.speech.state(),
            "duck": self.duck.snapshot(),
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(video) = &self.video {
                obj.insert("video_queue".to_string(), json!(video.state()));
            }
            if let Some(last) = &self.last_command {
                obj.insert("last_command".to_string(), json!(last));
            }
        }
        body
    }

    /// Publish a status snapshot, skipping unchanged bodies unless forced.
    async fn publish_status(&mut self, force: bool) {
        let body = self.status_body();
        if !force && self.last_status.as_ref() == Some(&body) {
            return;
        }
        self.last_status = Some(body.clone());

        let mut payload = body;
        if let Some(obj) = payload.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                json!(crate::telemetry::now_iso8601()),
            );
        }
        self.telemetry.status(payload).await;
    }

    /// Best-effort stop of whatever the timed-out command was driving.
    async fn stop_after_timeout(&mut self, action: &CommandAction) {
        let edges = match action {
            CommandAction::PlayBackground { .. }
            | CommandAction::StopBackground
            | CommandAction::SetVolume { .. } => {
                self.background.stop().await;
                Vec::new()
            }
            CommandAction::PlaySpeech { .. }
            | CommandAction::SkipSpeech
            | CommandAction::PauseSpeech
            | CommandAction::ResumeSpeech
            | CommandAction::ClearSpeechQueue => {
                let (_, edges) = self.speech.clear().await;
                edges
            }
            CommandAction::SetImage { .. }
            | CommandAction::PlayVideo { .. }
            | CommandAction::StopVideo
            | CommandAction::Transition { .. } => match &mut self.video {
                Some(video) => {
                    let (_, edges) = video.stop().await;
                    edges
                }
                None => Vec::new(),
            },
            _ => Vec::new(),
        };
        self.apply_edges(edges).await;
    }

    async fn teardown(&mut self) {
        self.background.quit().await;
        self.speech.quit().await;
        if let Some(video) = &self.video {
            video.quit().await;
        }
    }
}

fn unsupported() -> CommandOutcome {
    CommandOutcome::warning(
        ErrorKind::UnknownCommand,
        "command not supported by this zone",
    )
}

/// Best-effort command-name extraction for telemetry on parse failures.
fn raw_command_name(raw: &Value) -> String {
    raw.as_object()
        .and_then(|obj| {
            obj.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case("command"))
                .and_then(|(_, v)| v.as_str())
        })
        .unwrap_or("invalid")
        .to_string()
}
