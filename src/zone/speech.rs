//! Speech queue channel.
//!
//! A strict FIFO: at most one item plays at a time, duplicates of the
//! currently playing file or of the last queued file are suppressed, and the
//! queue advances on natural end (tracker), player EOF, or skip. Each
//! playing item holds a duck trigger unless its per-item ducking is exactly
//! zero, which means "no trigger" rather than "trigger with no effect".
//!
//! Completion signals are delivered back through the zone inbox so the zone
//! actor stays the single writer of channel state.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ZoneConfig;
use crate::error::ErrorKind;
use crate::player::{EofReason, PlayerHandle};
use crate::telemetry::{CommandOutcome, ZoneTelemetry};
use crate::volume::{resolve, ResolvedVolume, StreamType, VolumeRequest};
use crate::zone::duck::{DuckEdge, DuckKind};
use crate::zone::tracker::{PlaybackTracker, DEFAULT_EPSILON};
use crate::zone::{is_file, ZoneMsg};

/// One queued speech item.
#[derive(Debug, Clone)]
pub struct SpeechItem {
    pub id: Uuid,
    pub file_ref: String,
    pub path: PathBuf,
    pub request: VolumeRequest,
    pub resolved: ResolvedVolume,
    pub per_item_duck: Option<i32>,
    pub received_at: DateTime<Utc>,
}

struct CurrentSpeech {
    item: SpeechItem,
    trigger_id: Option<String>,
    tracker: Option<PlaybackTracker>,
    eof_task: JoinHandle<()>,
    seq: u64,
}

/// Observable queue state for status snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechQueueState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
    pub pending: usize,
    pub paused: bool,
}

pub struct SpeechChannel {
    player: Arc<dyn PlayerHandle>,
    telemetry: ZoneTelemetry,
    cfg: Arc<ZoneConfig>,
    zone_tx: mpsc::Sender<ZoneMsg>,
    queue: VecDeque<SpeechItem>,
    current: Option<CurrentSpeech>,
    paused: bool,
    seq: u64,
}

impl SpeechChannel {
    pub fn new(
        player: Arc<dyn PlayerHandle>,
        telemetry: ZoneTelemetry,
        cfg: Arc<ZoneConfig>,
        zone_tx: mpsc::Sender<ZoneMsg>,
    ) -> Self {
        Self {
            player,
            telemetry,
            cfg,
            zone_tx,
            queue: VecDeque::new(),
            current: None,
            paused: false,
            seq: 0,
        }
    }

    pub fn state(&self) -> SpeechQueueState {
        SpeechQueueState {
            active: self.current.as_ref().map(|c| c.item.file_ref.clone()),
            pending: self.queue.len(),
            paused: self.paused,
        }
    }

    pub fn active(&self) -> bool {
        self.current.is_some()
    }

    /// Enqueue a speech item, starting it immediately when nothing plays.
    pub async fn enqueue(
        &mut self,
        file_ref: &str,
        request: VolumeRequest,
        per_item_duck: Option<i32>,
    ) -> (CommandOutcome, Vec<DuckEdge>) {
        let path = self.cfg.resolve_media(file_ref);
        if !is_file(&path).await {
            let outcome = CommandOutcome::warning(
                ErrorKind::FileNotFound,
                format!("file not found: {}", path.display()),
            )
            .with_parameter("file", json!(file_ref));
            return (outcome, Vec::new());
        }

        // Duplicate suppression: currently playing, or tail of the queue.
        let duplicate = self
            .current
            .as_ref()
            .map(|c| c.item.path == path)
            .unwrap_or(false)
            || self.queue.back().map(|i| i.path == path).unwrap_or(false);
        if duplicate {
            debug!(zone = %self.telemetry.zone(), file = file_ref, "duplicate speech ignored");
            let outcome = CommandOutcome::warning(
                ErrorKind::DuplicateIgnored,
                "duplicate of current or last queued item",
            )
            .with_parameter("file", json!(file_ref));
            let outcome = CommandOutcome {
                warning_type: Some("speech_duplicate_ignored".to_string()),
                ..outcome
            };
            return (outcome, Vec::new());
        }

        // Speech volume never ducks, so resolution at enqueue time is final.
        let ctx = self.cfg.volume_context(StreamType::Speech, 0);
        let resolved = resolve(StreamType::Speech, &ctx, &request, false);

        while self.queue.len() >= self.cfg.queue_limits.audio {
            if let Some(dropped) = self.queue.pop_front() {
                warn!(
                    zone = %self.telemetry.zone(),
                    file = %dropped.file_ref,
                    "speech queue full, dropping oldest"
                );
                self.telemetry
                    .warning(
                        ErrorKind::QueueOverflowDropped,
                        format!("speech queue full, dropped {}", dropped.file_ref),
                        None,
                    )
                    .await;
            }
        }

        let item = SpeechItem {
            id: Uuid::new_v4(),
            file_ref: file_ref.to_string(),
            path,
            request: request.clone(),
            resolved: resolved.clone(),
            per_item_duck,
            received_at: Utc::now(),
        };
        self.queue.push_back(item);

        let edges = if self.current.is_none() {
            self.start_next().await
        } else {
            Vec::new()
        };

        (CommandOutcome::playback(file_ref, &request, &resolved), edges)
    }

    /// Advance past the current item. `seq` guards against stale completion
    /// messages from an item that was already skipped or cleared.
    pub async fn on_advance(&mut self, seq: u64) -> Vec<DuckEdge> {
        match &self.current {
            Some(current) if current.seq == seq => {}
            _ => return Vec::new(),
        }
        let mut edges = self.finish_current().await;
        edges.extend(self.start_next().await);
        edges
    }

    pub async fn skip(&mut self) -> (CommandOutcome, Vec<DuckEdge>) {
        if self.current.is_none() {
            return (
                CommandOutcome::success().with_parameter("skipped", json!(false)),
                Vec::new(),
            );
        }
        if let Err(e) = self.player.stop().await {
            warn!(zone = %self.telemetry.zone(), "speech stop on skip failed: {}", e);
        }
        let mut edges = self.finish_current().await;
        edges.extend(self.start_next().await);
        (
            CommandOutcome::success().with_parameter("skipped", json!(true)),
            edges,
        )
    }

    pub async fn pause(&mut self) -> CommandOutcome {
        if let Some(current) = &self.current {
            if let Err(e) = self.player.pause().await {
                return CommandOutcome::failure(e.kind(), e.to_string());
            }
            if let Some(tracker) = &current.tracker {
                tracker.pause();
            }
            self.paused = true;
        }
        CommandOutcome::success()
    }

    pub async fn resume(&mut self) -> CommandOutcome {
        if let Some(current) = &self.current {
            if let Err(e) = self.player.resume().await {
                return CommandOutcome::failure(e.kind(), e.to_string());
            }
            if let Some(tracker) = &current.tracker {
                tracker.resume();
            }
            self.paused = false;
        }
        CommandOutcome::success()
    }

    /// Empty the queue and stop the current item.
    pub async fn clear(&mut self) -> (CommandOutcome, Vec<DuckEdge>) {
        let cleared = self.queue.len() + usize::from(self.current.is_some());
        self.queue.clear();

        let mut edges = Vec::new();
        if let Some(current) = self.current.take() {
            current.eof_task.abort();
            if let Some(tracker) = &current.tracker {
                tracker.stop();
            }
            if let Err(e) = self.player.stop().await {
                warn!(zone = %self.telemetry.zone(), "speech stop on clear failed: {}", e);
            }
            if let Some(id) = current.trigger_id {
                edges.push(DuckEdge::Ended { id });
            }
        }
        self.paused = false;

        self.telemetry
            .lifecycle("speech_queue_cleared", {
                let mut fields = serde_json::Map::new();
                fields.insert("cleared".to_string(), json!(cleared));
                fields
            })
            .await;

        (
            CommandOutcome::success().with_parameter("cleared", json!(cleared)),
            edges,
        )
    }

    /// Start items from the front of the queue until one plays.
    async fn start_next(&mut self) -> Vec<DuckEdge> {
        let mut edges = Vec::new();
        while let Some(item) = self.queue.pop_front() {
            self.seq += 1;
            let seq = self.seq;

            let loaded = match self.player.load(&item.path, true).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    warn!(zone = %self.telemetry.zone(), file = %item.file_ref, "speech load failed: {}", e);
                    self.telemetry
                        .warning(e.kind(), format!("speech item skipped: {}", e), None)
                        .await;
                    continue;
                }
            };

            let started = async {
                self.player.set_volume(item.resolved.effective).await?;
                self.player.play().await
            }
            .await;
            if let Err(e) = started {
                warn!(zone = %self.telemetry.zone(), file = %item.file_ref, "speech start failed: {}", e);
                self.telemetry
                    .warning(e.kind(), format!("speech item skipped: {}", e), None)
                    .await;
                continue;
            }

            // Natural-end tracking when the player reports a duration; EOF
            // observation covers the rest.
            let tracker = loaded.duration.map(|secs| {
                let tx = self.zone_tx.clone();
                PlaybackTracker::start(
                    Some(Duration::from_secs_f64(secs.max(0.0))),
                    DEFAULT_EPSILON,
                    move || {
                        let _ = tx.try_send(ZoneMsg::SpeechAdvance { seq });
                    },
                )
            });

            let eof_task = {
                let mut rx = self.player.eof_events();
                let tx = self.zone_tx.clone();
                tokio::spawn(async move {
                    while let Ok(event) = rx.recv().await {
                        match event.reason {
                            EofReason::Eof | EofReason::Error => {
                                let _ = tx.send(ZoneMsg::SpeechAdvance { seq }).await;
                                break;
                            }
                            // Stop events belong to replaced files; the task
                            // is aborted when we stop on purpose.
                            EofReason::Stopped => {}
                        }
                    }
                })
            };

            // Per-item ducking of exactly zero means no trigger at all.
            let trigger_id = if item.per_item_duck == Some(0) {
                None
            } else {
                Some(format!("speech-{}", Uuid::new_v4()))
            };
            if let Some(id) = &trigger_id {
                edges.push(DuckEdge::Started {
                    id: id.clone(),
                    kind: DuckKind::Speech,
                    adjust: item.per_item_duck,
                });
            }

            self.telemetry
                .lifecycle("speech_started", {
                    let mut fields = serde_json::Map::new();
                    fields.insert("file".to_string(), json!(item.file_ref));
                    fields.insert("effective_volume".to_string(), json!(item.resolved.effective));
                    fields.insert("pre_duck_volume".to_string(), json!(item.resolved.pre_duck));
                    fields.insert("ducked".to_string(), json!(false));
                    fields
                })
                .await;

            debug!(zone = %self.telemetry.zone(), file = %item.file_ref, seq, "speech started");

            self.current = Some(CurrentSpeech {
                item,
                trigger_id,
                tracker,
                eof_task,
                seq,
            });
            // A freshly started item is never paused, whatever the previous
            // one was doing.
            self.paused = false;
            return edges;
        }
        edges
    }

    /// Tear down the current item and emit `speech_completed`.
    async fn finish_current(&mut self) -> Vec<DuckEdge> {
        let mut edges = Vec::new();
        if let Some(current) = self.current.take() {
            current.eof_task.abort();
            if let Some(tracker) = &current.tracker {
                tracker.stop();
            }
            if let Some(id) = current.trigger_id {
                edges.push(DuckEdge::Ended { id });
            }
            self.telemetry
                .lifecycle("speech_completed", {
                    let mut fields = serde_json::Map::new();
                    fields.insert("file".to_string(), json!(current.item.file_ref));
                    fields
                })
                .await;
        }
        edges
    }

    pub async fn quit(&self) {
        self.player.quit().await;
    }
}
