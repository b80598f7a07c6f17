//! Structured telemetry publishing.
//!
//! Every playback command produces exactly one outcome event on the zone's
//! events topic; duck recomputes, channel lifecycle markers, warnings, and
//! status snapshots each have their own payload shapes. Channels receive a
//! [`ZoneTelemetry`] capability instead of a back-pointer to the zone, so
//! they can emit without knowing who transports the bytes.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::ErrorKind;
use crate::transport::Publisher;
use crate::volume::{ResolvedVolume, VolumeRequest};

/// Command outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Warning,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Failure => "failure",
        }
    }
}

/// Command-completion event published to the zone events topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub timestamp: String,
    pub zone: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub command: String,
    pub outcome: Outcome,
    pub parameters: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_type: Option<String>,
}

impl OutcomeEvent {
    pub fn new(zone: &str, command: &str, outcome: Outcome) -> Self {
        Self {
            timestamp: now_iso8601(),
            zone: zone.to_string(),
            message_type: "events".to_string(),
            command: command.to_string(),
            outcome,
            parameters: Map::new(),
            message: None,
            warning_type: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_warning_type(mut self, warning_type: impl Into<String>) -> Self {
        self.warning_type = Some(warning_type.into());
        self
    }
}

/// ISO-8601 UTC with millisecond precision.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// What a channel reports back to the zone after executing a command. The
/// zone turns this into the single outcome event for the command, which
/// keeps the one-event-per-command invariant in one place.
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub outcome: Option<Outcome>,
    pub parameters: Map<String, Value>,
    pub message: Option<String>,
    pub warning_type: Option<String>,
}

impl CommandOutcome {
    pub fn success() -> Self {
        Self {
            outcome: Some(Outcome::Success),
            ..Self::default()
        }
    }

    pub fn warning(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            outcome: Some(Outcome::Warning),
            message: Some(message.into()),
            warning_type: Some(kind.as_str().to_string()),
            ..Self::default()
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            outcome: Some(Outcome::Failure),
            message: Some(message.into()),
            warning_type: Some(kind.as_str().to_string()),
            ..Self::default()
        }
    }

    /// Success or warning depending on whether resolution produced warnings.
    pub fn playback(file: &str, request: &VolumeRequest, resolved: &ResolvedVolume) -> Self {
        let outcome = if resolved.warnings.is_empty() {
            Outcome::Success
        } else {
            Outcome::Warning
        };
        let warning_type = if resolved.warnings.is_empty() {
            None
        } else {
            Some(ErrorKind::VolumeResolutionWarning.as_str().to_string())
        };
        Self {
            outcome: Some(outcome),
            parameters: playback_parameters(file, request, resolved),
            message: None,
            warning_type,
        }
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    /// The effective outcome, treating an unset value as success.
    pub fn outcome(&self) -> Outcome {
        self.outcome.unwrap_or(Outcome::Success)
    }
}

/// Build the `parameters` object for a playback outcome event.
pub fn playback_parameters(
    file: &str,
    request: &VolumeRequest,
    resolved: &ResolvedVolume,
) -> Map<String, Value> {
    let mut parameters = Map::new();
    parameters.insert("file".to_string(), json!(file));
    if let Some(volume) = request.absolute {
        parameters.insert("volume".to_string(), json!(volume));
    }
    if let Some(adjust) = request.adjust_percent {
        parameters.insert("adjustVolume".to_string(), json!(adjust));
    }
    parameters.insert("effective_volume".to_string(), json!(resolved.effective));
    parameters.insert("pre_duck_volume".to_string(), json!(resolved.pre_duck));
    parameters.insert("ducked".to_string(), json!(resolved.ducked));
    parameters.insert(
        "warnings".to_string(),
        json!(resolved.warning_strings()),
    );
    parameters
}

/// Per-zone telemetry capability handed to channels.
#[derive(Clone)]
pub struct ZoneTelemetry {
    zone: String,
    events_topic: String,
    status_topic: String,
    warning_topic: String,
    publisher: Arc<dyn Publisher>,
}

impl ZoneTelemetry {
    pub fn new(
        zone: &str,
        base_topic: &str,
        events_override: Option<&str>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            zone: zone.to_string(),
            events_topic: events_override
                .map(String::from)
                .unwrap_or_else(|| format!("{}/events", base_topic)),
            status_topic: format!("{}/status", base_topic),
            warning_topic: format!("{}/warning", base_topic),
            publisher,
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Publish an outcome event. Telemetry failures never fail commands.
    pub async fn outcome(&self, event: OutcomeEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => self.send(&self.events_topic, payload).await,
            Err(e) => warn!(zone = %self.zone, "outcome event serialization failed: {}", e),
        }
    }

    /// Publish a background volume recompute event.
    pub async fn recompute(&self, effective: i32, pre_duck: i32, ducked: bool) {
        let payload = json!({
            "timestamp": now_iso8601(),
            "zone": self.zone,
            "type": "events",
            "background_volume_recomputed": true,
            "effective_volume": effective,
            "pre_duck_volume": pre_duck,
            "ducked": ducked,
        });
        self.send(&self.events_topic, payload.to_string()).await;
    }

    /// Publish a flag-style lifecycle event (e.g. `speech_started`).
    pub async fn lifecycle(&self, flag: &str, mut fields: Map<String, Value>) {
        fields.insert("timestamp".to_string(), json!(now_iso8601()));
        fields.insert("zone".to_string(), json!(self.zone));
        fields.insert("type".to_string(), json!("events"));
        fields.insert(flag.to_string(), json!(true));
        self.send(&self.events_topic, Value::Object(fields).to_string())
            .await;
    }

    /// Publish to the zone warning topic.
    pub async fn warning(&self, kind: ErrorKind, message: impl Into<String>, raw: Option<&str>) {
        let mut payload = json!({
            "timestamp": now_iso8601(),
            "zone": self.zone,
            "type": "warning",
            "warning_type": kind.as_str(),
            "message": message.into(),
        });
        if let (Some(raw), Some(obj)) = (raw, payload.as_object_mut()) {
            obj.insert("raw".to_string(), json!(raw));
        }
        self.send(&self.warning_topic, payload.to_string()).await;
    }

    /// Publish a status snapshot.
    pub async fn status(&self, snapshot: Value) {
        self.send(&self.status_topic, snapshot.to_string()).await;
    }

    async fn send(&self, topic: &str, payload: String) {
        if let Err(e) = self.publisher.publish(topic, payload).await {
            warn!(zone = %self.zone, topic, "telemetry publish failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{resolve, StreamType, VolumeContext};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct CapturingPublisher {
        messages: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Publisher for CapturingPublisher {
        async fn publish(&self, topic: &str, payload: String) -> anyhow::Result<()> {
            self.messages
                .lock()
                .await
                .push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn telemetry() -> (ZoneTelemetry, Arc<CapturingPublisher>) {
        let publisher = Arc::new(CapturingPublisher {
            messages: Mutex::new(Vec::new()),
        });
        let telemetry = ZoneTelemetry::new("zone1", "paradox/zone1", None, publisher.clone());
        (telemetry, publisher)
    }

    #[tokio::test]
    async fn outcome_event_lands_on_events_topic() {
        let (telemetry, publisher) = telemetry();
        telemetry
            .outcome(OutcomeEvent::new("zone1", "playBackground", Outcome::Success))
            .await;

        let messages = publisher.messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "paradox/zone1/events");

        let payload: Value = serde_json::from_str(&messages[0].1).unwrap();
        assert_eq!(payload["type"], "events");
        assert_eq!(payload["zone"], "zone1");
        assert_eq!(payload["command"], "playBackground");
        assert_eq!(payload["outcome"], "success");
        assert!(payload.get("warning_type").is_none());
    }

    #[tokio::test]
    async fn events_override_redirects_outcomes() {
        let publisher = Arc::new(CapturingPublisher {
            messages: Mutex::new(Vec::new()),
        });
        let telemetry = ZoneTelemetry::new(
            "zone1",
            "paradox/zone1",
            Some("custom/status"),
            publisher.clone(),
        );
        telemetry
            .outcome(OutcomeEvent::new("zone1", "getStatus", Outcome::Success))
            .await;
        assert_eq!(publisher.messages.lock().await[0].0, "custom/status");
    }

    #[tokio::test]
    async fn recompute_payload_shape() {
        let (telemetry, publisher) = telemetry();
        telemetry.recompute(40, 80, true).await;

        let messages = publisher.messages.lock().await;
        let payload: Value = serde_json::from_str(&messages[0].1).unwrap();
        assert_eq!(payload["background_volume_recomputed"], true);
        assert_eq!(payload["effective_volume"], 40);
        assert_eq!(payload["pre_duck_volume"], 80);
        assert_eq!(payload["ducked"], true);
        assert!(payload["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn warning_includes_raw_when_given() {
        let (telemetry, publisher) = telemetry();
        telemetry
            .warning(ErrorKind::MalformedJson, "not json", Some("{{oops"))
            .await;

        let messages = publisher.messages.lock().await;
        assert_eq!(messages[0].0, "paradox/zone1/warning");
        let payload: Value = serde_json::from_str(&messages[0].1).unwrap();
        assert_eq!(payload["warning_type"], "malformed_json");
        assert_eq!(payload["raw"], "{{oops");
    }

    #[test]
    fn playback_parameters_include_volume_fields() {
        let ctx = VolumeContext {
            base: Some(100),
            max_volume: 150,
            ducking_adjust: -40,
        };
        let request = VolumeRequest::absolute(120.0);
        let resolved = resolve(StreamType::Background, &ctx, &request, false);
        let parameters = playback_parameters("a.wav", &request, &resolved);

        assert_eq!(parameters["file"], "a.wav");
        assert_eq!(parameters["volume"], 120.0);
        assert_eq!(parameters["effective_volume"], 120);
        assert_eq!(parameters["pre_duck_volume"], 120);
        assert_eq!(parameters["ducked"], false);
        assert!(parameters["warnings"].as_array().unwrap().is_empty());
        assert!(parameters.get("adjustVolume").is_none());
    }
}
