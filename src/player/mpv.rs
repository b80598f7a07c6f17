//! mpv-backed player implementation.
//!
//! One mpv process per persistent stream, controlled over its line-delimited
//! JSON IPC socket: requests carry a `request_id` that the reader task
//! matches back to the caller, unsolicited `end-file` events drive EOF
//! observation. Every round trip is bounded by [`IPC_DEADLINE`].
//!
//! Effects take the cheap path: a short-lived mpv process with low-latency
//! audio options and no IPC socket at all.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::{
    EffectSpec, EofEvent, EofReason, LoadedMedia, PlayerError, PlayerFactory, PlayerHandle,
    PlayerRole, PlayerSpec, IPC_DEADLINE,
};

const CONNECT_ATTEMPTS: u32 = 20;
const CONNECT_RETRY: Duration = Duration::from_millis(100);
const DURATION_POLL_ATTEMPTS: u32 = 10;
const DURATION_POLL_INTERVAL: Duration = Duration::from_millis(100);
const QUIT_GRACE: Duration = Duration::from_millis(500);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Creates mpv players. The binary name is configurable for tests and
/// unusual installs.
pub struct MpvPlayerFactory {
    binary: String,
}

impl MpvPlayerFactory {
    pub fn new() -> Self {
        Self {
            binary: "mpv".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for MpvPlayerFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlayerFactory for MpvPlayerFactory {
    async fn create_player(
        &self,
        spec: &PlayerSpec,
    ) -> Result<Arc<dyn PlayerHandle>, PlayerError> {
        let player = MpvPlayer::spawn(&self.binary, spec).await?;
        Ok(Arc::new(player))
    }

    async fn spawn_effect(&self, spec: &EffectSpec) -> Result<(), PlayerError> {
        let mut child = Command::new(&self.binary)
            .arg("--no-terminal")
            .arg("--really-quiet")
            .arg("--vid=no")
            .arg(format!("--audio-device={}", spec.audio_device))
            .arg(format!("--volume={}", spec.volume))
            // Low-latency spawn: effects favor start time over robustness.
            .arg("--audio-buffer=0.05")
            .arg("--cache=no")
            .arg(&spec.file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PlayerError::Spawn(e.to_string()))?;

        // Reap in the background; effects are fire-and-forget.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(())
    }
}

/// One mpv process with an IPC connection.
pub struct MpvPlayer {
    child: Mutex<Option<Child>>,
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    next_id: AtomicU64,
    eof_tx: broadcast::Sender<EofEvent>,
    socket_path: std::path::PathBuf,
}

impl MpvPlayer {
    async fn spawn(binary: &str, spec: &PlayerSpec) -> Result<Self, PlayerError> {
        let role = match spec.role {
            PlayerRole::Background => "bg",
            PlayerRole::Speech => "speech",
            PlayerRole::Video => "video",
        };
        let socket_path = std::env::temp_dir().join(format!(
            "pfx-{}-{}-{}.sock",
            sanitize(&spec.zone),
            role,
            std::process::id()
        ));
        // A stale socket from a previous run would make mpv fail to bind.
        let _ = std::fs::remove_file(&socket_path);

        let mut cmd = Command::new(binary);
        cmd.arg("--idle=yes")
            .arg(format!("--input-ipc-server={}", socket_path.display()))
            .arg("--no-terminal")
            .arg("--really-quiet")
            .arg("--pause")
            .arg(format!("--audio-device={}", spec.audio_device));

        match spec.role {
            PlayerRole::Background | PlayerRole::Speech => {
                cmd.arg("--vid=no");
            }
            PlayerRole::Video => {
                cmd.arg("--fs")
                    .arg("--no-osc")
                    .arg("--no-input-default-bindings")
                    .arg("--image-display-duration=inf");
            }
        }
        for opt in &spec.extra_options {
            cmd.arg(opt);
        }

        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PlayerError::Spawn(e.to_string()))?;

        debug!(zone = %spec.zone, role = ?spec.role, socket = %socket_path.display(), "mpv spawned");

        let stream = connect_with_retry(&socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (eof_tx, _) = broadcast::channel(16);

        spawn_reader(read_half, pending.clone(), eof_tx.clone());

        Ok(Self {
            child: Mutex::new(Some(child)),
            writer: Mutex::new(write_half),
            pending,
            next_id: AtomicU64::new(1),
            eof_tx,
            socket_path,
        })
    }

    async fn command(&self, cmd: Value) -> Result<Value, PlayerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let line = format!("{}\n", json!({ "command": cmd, "request_id": id }));
        let write_result = {
            let mut writer = self.writer.lock().await;
            writer.write_all(line.as_bytes()).await
        };
        if let Err(e) = write_result {
            self.pending.lock().await.remove(&id);
            return Err(PlayerError::Ipc(e.to_string()));
        }

        match timeout(IPC_DEADLINE, rx).await {
            Ok(Ok(response)) => {
                let status = response.get("error").and_then(Value::as_str).unwrap_or("");
                if status == "success" {
                    Ok(response)
                } else {
                    Err(PlayerError::Ipc(status.to_string()))
                }
            }
            Ok(Err(_)) => Err(PlayerError::Ipc("ipc connection closed".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(PlayerError::IpcTimeout(IPC_DEADLINE))
            }
        }
    }

    async fn set_property(&self, name: &str, value: Value) -> Result<(), PlayerError> {
        self.command(json!(["set_property", name, value])).await?;
        Ok(())
    }

    /// Poll for the loaded file's duration; mpv only knows it once demuxing
    /// has started, so a few retries are expected.
    async fn probe_duration(&self) -> Option<f64> {
        for _ in 0..DURATION_POLL_ATTEMPTS {
            match self.command(json!(["get_property", "duration"])).await {
                Ok(response) => {
                    if let Some(duration) = response.get("data").and_then(Value::as_f64) {
                        return Some(duration);
                    }
                }
                Err(PlayerError::Ipc(_)) => {
                    // Property not available yet; keep polling.
                }
                Err(_) => return None,
            }
            tokio::time::sleep(DURATION_POLL_INTERVAL).await;
        }
        None
    }
}

#[async_trait]
impl PlayerHandle for MpvPlayer {
    async fn load(&self, file: &Path, replace: bool) -> Result<LoadedMedia, PlayerError> {
        self.set_property("pause", json!(true)).await?;
        let mode = if replace { "replace" } else { "append-play" };
        self.command(json!(["loadfile", file.to_string_lossy(), mode]))
            .await
            .map_err(|e| match e {
                PlayerError::Ipc(msg) => PlayerError::Load(msg),
                other => other,
            })?;
        let duration = self.probe_duration().await;
        trace!(file = %file.display(), ?duration, "loaded");
        Ok(LoadedMedia { duration })
    }

    async fn play(&self) -> Result<(), PlayerError> {
        self.set_property("pause", json!(false)).await
    }

    async fn pause(&self) -> Result<(), PlayerError> {
        self.set_property("pause", json!(true)).await
    }

    async fn resume(&self) -> Result<(), PlayerError> {
        self.set_property("pause", json!(false)).await
    }

    async fn stop(&self) -> Result<(), PlayerError> {
        self.command(json!(["stop"])).await?;
        Ok(())
    }

    async fn set_volume(&self, volume: i32) -> Result<(), PlayerError> {
        self.set_property("volume", json!(volume)).await
    }

    async fn set_looping(&self, looping: bool) -> Result<(), PlayerError> {
        let value = if looping { json!("inf") } else { json!("no") };
        self.set_property("loop-file", value).await
    }

    fn eof_events(&self) -> broadcast::Receiver<EofEvent> {
        self.eof_tx.subscribe()
    }

    async fn quit(&self) {
        // Polite quit first, then force.
        if let Err(e) = timeout(QUIT_GRACE, self.command(json!(["quit"]))).await {
            debug!("mpv quit request timed out: {}", e);
        }
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

async fn connect_with_retry(path: &Path) -> Result<UnixStream, PlayerError> {
    let mut last_error = String::new();
    for _ in 0..CONNECT_ATTEMPTS {
        match UnixStream::connect(path).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = e.to_string(),
        }
        tokio::time::sleep(CONNECT_RETRY).await;
    }
    Err(PlayerError::Spawn(format!(
        "ipc socket never appeared at {}: {}",
        path.display(),
        last_error
    )))
}

fn spawn_reader(
    read_half: OwnedReadHalf,
    pending: PendingMap,
    eof_tx: broadcast::Sender<EofEvent>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let message: Value = match serde_json::from_str(&line) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("unparseable ipc line: {} ({})", line, e);
                            continue;
                        }
                    };
                    if let Some(id) = message.get("request_id").and_then(Value::as_u64) {
                        if let Some(tx) = pending.lock().await.remove(&id) {
                            let _ = tx.send(message);
                        }
                        continue;
                    }
                    if message.get("event").and_then(Value::as_str) == Some("end-file") {
                        let reason = match message.get("reason").and_then(Value::as_str) {
                            Some("eof") => EofReason::Eof,
                            Some("error") => EofReason::Error,
                            _ => EofReason::Stopped,
                        };
                        let _ = eof_tx.send(EofEvent { reason });
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("ipc read ended: {}", e);
                    break;
                }
            }
        }
        // Fail any callers still waiting on a response.
        pending.lock().await.clear();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(sanitize("zone1/main"), "zone1-main");
        assert_eq!(sanitize("mirror"), "mirror");
    }

    /// Drives the request/response and event paths against an in-process
    /// socket standing in for mpv.
    #[tokio::test]
    async fn reader_matches_responses_and_broadcasts_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipc.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let client = UnixStream::connect(&path).await.unwrap();
        let (server, _addr) = listener.accept().await.unwrap();

        let (read_half, _write_half) = client.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (eof_tx, mut eof_rx) = broadcast::channel(4);
        spawn_reader(read_half, pending.clone(), eof_tx);

        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(7, tx);

        let (_srv_read, mut srv_write) = server.into_split();
        srv_write
            .write_all(b"{\"error\":\"success\",\"request_id\":7,\"data\":12.5}\n")
            .await
            .unwrap();
        srv_write
            .write_all(b"{\"event\":\"end-file\",\"reason\":\"eof\"}\n")
            .await
            .unwrap();

        let response = timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
        assert_eq!(response.get("data").and_then(Value::as_f64), Some(12.5));

        let event = timeout(Duration::from_secs(1), eof_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.reason, EofReason::Eof);
    }

    #[tokio::test]
    async fn reader_drops_pending_on_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipc.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let client = UnixStream::connect(&path).await.unwrap();
        let (server, _addr) = listener.accept().await.unwrap();

        let (read_half, _write_half) = client.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (eof_tx, _) = broadcast::channel(4);
        spawn_reader(read_half, pending.clone(), eof_tx);

        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(1, tx);

        drop(server);

        // The pending sender is dropped, so the receiver errors out instead
        // of hanging for the full deadline.
        assert!(timeout(Duration::from_secs(1), rx).await.unwrap().is_err());
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn connect_retry_gives_up_with_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.sock");
        let result = connect_with_retry(&path).await;
        assert!(matches!(result, Err(PlayerError::Spawn(_))));
    }
}
