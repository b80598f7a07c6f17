//! Video channel (screen zones).
//!
//! Mirrors the speech queue semantics with a duration-based tracker, plus
//! the two screen-only operations: `setImage` replaces whatever is on the
//! display, and `transition` plays a video once and then holds an image.
//! Playing video holds a duck trigger so sibling audio follows.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

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

#[derive(Debug, Clone)]
struct VideoItem {
    file_ref: String,
    path: PathBuf,
    request: VolumeRequest,
    resolved: ResolvedVolume,
    looping: bool,
    ducking: Option<i32>,
    /// Image displayed after this item completes (transition).
    follow_image: Option<String>,
}

struct CurrentVideo {
    item: VideoItem,
    trigger_id: Option<String>,
    tracker: Option<PlaybackTracker>,
    eof_task: JoinHandle<()>,
    seq: u64,
}

/// Observable video state for status snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoQueueState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

pub struct VideoChannel {
    player: Arc<dyn PlayerHandle>,
    telemetry: ZoneTelemetry,
    cfg: Arc<ZoneConfig>,
    zone_tx: mpsc::Sender<ZoneMsg>,
    queue: VecDeque<VideoItem>,
    current: Option<CurrentVideo>,
    displayed_image: Option<String>,
    seq: u64,
}

impl VideoChannel {
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
            displayed_image: None,
            seq: 0,
        }
    }

    pub fn state(&self) -> VideoQueueState {
        VideoQueueState {
            active: self.current.as_ref().map(|c| c.item.file_ref.clone()),
            pending: self.queue.len(),
            image: self.displayed_image.clone(),
        }
    }

    pub fn playing(&self) -> bool {
        self.current.is_some()
    }

    pub fn showing_image(&self) -> bool {
        self.displayed_image.is_some()
    }

    /// Queue a video for playback.
    pub async fn play(
        &mut self,
        file_ref: &str,
        request: VolumeRequest,
        looping: bool,
        ducking: Option<i32>,
        follow_image: Option<String>,
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

        let duplicate = self
            .current
            .as_ref()
            .map(|c| c.item.path == path)
            .unwrap_or(false)
            || self.queue.back().map(|i| i.path == path).unwrap_or(false);
        if duplicate {
            let outcome = CommandOutcome::warning(
                ErrorKind::DuplicateIgnored,
                "duplicate of current or last queued item",
            )
            .with_parameter("file", json!(file_ref));
            return (outcome, Vec::new());
        }

        let ctx = self.cfg.volume_context(StreamType::Video, 0);
        let resolved = resolve(StreamType::Video, &ctx, &request, false);

        while self.queue.len() >= self.cfg.queue_limits.video {
            if let Some(dropped) = self.queue.pop_front() {
                warn!(
                    zone = %self.telemetry.zone(),
                    file = %dropped.file_ref,
                    "video queue full, dropping oldest"
                );
                self.telemetry
                    .warning(
                        ErrorKind::QueueOverflowDropped,
                        format!("video queue full, dropped {}", dropped.file_ref),
                        None,
                    )
                    .await;
            }
        }

        self.queue.push_back(VideoItem {
            file_ref: file_ref.to_string(),
            path,
            request: request.clone(),
            resolved: resolved.clone(),
            looping,
            ducking,
            follow_image,
        });

        let edges = if self.current.is_none() {
            self.start_next().await
        } else {
            Vec::new()
        };

        (CommandOutcome::playback(file_ref, &request, &resolved), edges)
    }

    /// Replace the display content with a still image. Any playing video is
    /// stopped and the queue is discarded; the screen now shows the image.
    pub async fn set_image(&mut self, file_ref: &str) -> (CommandOutcome, Vec<DuckEdge>) {
        let path = self.cfg.resolve_media(file_ref);
        if !is_file(&path).await {
            let outcome = CommandOutcome::warning(
                ErrorKind::FileNotFound,
                format!("file not found: {}", path.display()),
            )
            .with_parameter("file", json!(file_ref));
            return (outcome, Vec::new());
        }

        self.queue.clear();
        let edges = self.teardown_current().await;

        if let Err(e) = self.player.load(&path, true).await {
            warn!(zone = %self.telemetry.zone(), file = file_ref, "image load failed: {}", e);
            let outcome = CommandOutcome::failure(e.kind(), e.to_string())
                .with_parameter("file", json!(file_ref));
            return (outcome, edges);
        }
        if let Err(e) = self.player.play().await {
            let outcome = CommandOutcome::failure(e.kind(), e.to_string())
                .with_parameter("file", json!(file_ref));
            return (outcome, edges);
        }

        self.displayed_image = Some(file_ref.to_string());
        debug!(zone = %self.telemetry.zone(), file = file_ref, "image displayed");

        (
            CommandOutcome::success().with_parameter("file", json!(file_ref)),
            edges,
        )
    }

    /// Stop playback and discard the queue.
    pub async fn stop(&mut self) -> (CommandOutcome, Vec<DuckEdge>) {
        self.queue.clear();
        let edges = self.teardown_current().await;
        if let Err(e) = self.player.stop().await {
            warn!(zone = %self.telemetry.zone(), "video stop failed: {}", e);
        }
        self.displayed_image = None;
        (CommandOutcome::success(), edges)
    }

    /// Advance past the current item; honors a pending transition image.
    pub async fn on_advance(&mut self, seq: u64) -> Vec<DuckEdge> {
        match &self.current {
            Some(current) if current.seq == seq => {}
            _ => return Vec::new(),
        }
        let follow_image = self
            .current
            .as_ref()
            .and_then(|c| c.item.follow_image.clone());

        let mut edges = self.finish_current().await;
        if let Some(image) = follow_image {
            let (_, image_edges) = self.set_image(&image).await;
            edges.extend(image_edges);
        } else {
            edges.extend(self.start_next().await);
        }
        edges
    }

    async fn start_next(&mut self) -> Vec<DuckEdge> {
        let mut edges = Vec::new();
        while let Some(item) = self.queue.pop_front() {
            self.seq += 1;
            let seq = self.seq;

            let loaded = match self.player.load(&item.path, true).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    warn!(zone = %self.telemetry.zone(), file = %item.file_ref, "video load failed: {}", e);
                    self.telemetry
                        .warning(e.kind(), format!("video item skipped: {}", e), None)
                        .await;
                    continue;
                }
            };

            let started = async {
                self.player.set_looping(item.looping).await?;
                self.player.set_volume(item.resolved.effective).await?;
                self.player.play().await
            }
            .await;
            if let Err(e) = started {
                warn!(zone = %self.telemetry.zone(), file = %item.file_ref, "video start failed: {}", e);
                self.telemetry
                    .warning(e.kind(), format!("video item skipped: {}", e), None)
                    .await;
                continue;
            }

            // Looping videos have no natural end.
            let tracker = if item.looping {
                None
            } else {
                loaded.duration.map(|secs| {
                    let tx = self.zone_tx.clone();
                    PlaybackTracker::start(
                        Some(Duration::from_secs_f64(secs.max(0.0))),
                        DEFAULT_EPSILON,
                        move || {
                            let _ = tx.try_send(ZoneMsg::VideoAdvance { seq });
                        },
                    )
                })
            };

            let eof_task = {
                let mut rx = self.player.eof_events();
                let tx = self.zone_tx.clone();
                tokio::spawn(async move {
                    while let Ok(event) = rx.recv().await {
                        match event.reason {
                            EofReason::Eof | EofReason::Error => {
                                let _ = tx.send(ZoneMsg::VideoAdvance { seq }).await;
                                break;
                            }
                            // Stop events belong to replaced files; the task
                            // is aborted when we stop on purpose.
                            EofReason::Stopped => {}
                        }
                    }
                })
            };

            let trigger_id = if item.ducking == Some(0) {
                None
            } else {
                Some(format!("video-{}", Uuid::new_v4()))
            };
            if let Some(id) = &trigger_id {
                edges.push(DuckEdge::Started {
                    id: id.clone(),
                    kind: DuckKind::Video,
                    adjust: item.ducking,
                });
            }

            self.telemetry
                .lifecycle("video_started", {
                    let mut fields = serde_json::Map::new();
                    fields.insert("file".to_string(), json!(item.file_ref));
                    fields.insert("effective_volume".to_string(), json!(item.resolved.effective));
                    fields.insert("pre_duck_volume".to_string(), json!(item.resolved.pre_duck));
                    fields
                })
                .await;

            self.displayed_image = None;
            self.current = Some(CurrentVideo {
                item,
                trigger_id,
                tracker,
                eof_task,
                seq,
            });
            return edges;
        }
        edges
    }

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
                .lifecycle("video_completed", {
                    let mut fields = serde_json::Map::new();
                    fields.insert("file".to_string(), json!(current.item.file_ref));
                    fields
                })
                .await;
        }
        edges
    }

    /// Tear down without completion telemetry (stop/setImage paths).
    async fn teardown_current(&mut self) -> Vec<DuckEdge> {
        let mut edges = Vec::new();
        if let Some(current) = self.current.take() {
            current.eof_task.abort();
            if let Some(tracker) = &current.tracker {
                tracker.stop();
            }
            if let Err(e) = self.player.stop().await {
                warn!(zone = %self.telemetry.zone(), "video teardown stop failed: {}", e);
            }
            if let Some(id) = current.trigger_id {
                edges.push(DuckEdge::Ended { id });
            }
        }
        edges
    }

    pub async fn quit(&self) {
        self.player.quit().await;
    }
}
