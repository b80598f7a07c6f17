//! Telemetry schema test harness.
//!
//! Validates that every payload the system publishes conforms to the shapes
//! downstream consumers parse. This is an executable contract: the structs
//! below are the documented schemas, and the tests feed them real payloads
//! produced by the telemetry layer.

mod common;

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use common::CapturingPublisher;
use paradox_fx::error::ErrorKind;
use paradox_fx::telemetry::{
    playback_parameters, Outcome, OutcomeEvent, ZoneTelemetry,
};
use paradox_fx::volume::{resolve, StreamType, VolumeContext, VolumeRequest};

/// Outcome event schema - `<baseTopic>/events`
#[derive(Debug, Deserialize)]
struct OutcomeEventSchema {
    timestamp: String,
    zone: String,
    #[serde(rename = "type")]
    message_type: String,
    command: String,
    outcome: String,
    parameters: PlaybackParameters,
    message: Option<String>,
    warning_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaybackParameters {
    file: Option<String>,
    volume: Option<f64>,
    #[serde(rename = "adjustVolume")]
    adjust_volume: Option<f64>,
    effective_volume: Option<i64>,
    pre_duck_volume: Option<i64>,
    ducked: Option<bool>,
    warnings: Option<Vec<String>>,
}

/// Background recompute schema - `<baseTopic>/events`
#[derive(Debug, Deserialize)]
struct RecomputeEventSchema {
    timestamp: String,
    zone: String,
    #[serde(rename = "type")]
    message_type: String,
    background_volume_recomputed: bool,
    effective_volume: i64,
    pre_duck_volume: i64,
    ducked: bool,
}

/// Warning schema - `<baseTopic>/warning`
#[derive(Debug, Deserialize)]
struct WarningSchema {
    timestamp: String,
    zone: String,
    #[serde(rename = "type")]
    message_type: String,
    warning_type: String,
    message: String,
    raw: Option<String>,
}

fn telemetry() -> (ZoneTelemetry, Arc<CapturingPublisher>) {
    let publisher = CapturingPublisher::new();
    let telemetry = ZoneTelemetry::new("zone1", "paradox/zone1", None, publisher.clone());
    (telemetry, publisher)
}

#[tokio::test]
async fn playback_outcome_event_validates() {
    let (telemetry, publisher) = telemetry();

    let ctx = VolumeContext {
        base: Some(100),
        max_volume: 150,
        ducking_adjust: -40,
    };
    let request = VolumeRequest {
        absolute: Some(120.0),
        adjust_percent: Some(-25.0),
        skip_ducking: false,
    };
    let resolved = resolve(StreamType::Background, &ctx, &request, false);

    telemetry
        .outcome(
            OutcomeEvent::new("zone1", "playBackground", Outcome::Warning)
                .with_parameters(playback_parameters("bg.mp3", &request, &resolved))
                .with_warning_type("volume_resolution_warning"),
        )
        .await;

    let payload = publisher.on_topic("paradox/zone1/events").await.remove(0);
    let event: OutcomeEventSchema = serde_json::from_value(payload).unwrap();

    assert_eq!(event.message_type, "events");
    assert_eq!(event.zone, "zone1");
    assert_eq!(event.command, "playBackground");
    assert_eq!(event.outcome, "warning");
    assert_eq!(event.warning_type.as_deref(), Some("volume_resolution_warning"));
    assert!(event.message.is_none());
    assert!(event.timestamp.ends_with('Z'));

    assert_eq!(event.parameters.file.as_deref(), Some("bg.mp3"));
    assert_eq!(event.parameters.volume, Some(120.0));
    assert_eq!(event.parameters.adjust_volume, Some(-25.0));
    assert_eq!(event.parameters.effective_volume, Some(120));
    assert_eq!(event.parameters.pre_duck_volume, Some(120));
    assert_eq!(event.parameters.ducked, Some(false));
    assert_eq!(
        event.parameters.warnings,
        Some(vec!["both_volume_and_adjust".to_string()])
    );
}

#[tokio::test]
async fn outcome_values_are_exactly_the_three_documented() {
    for (outcome, expected) in [
        (Outcome::Success, "success"),
        (Outcome::Warning, "warning"),
        (Outcome::Failure, "failure"),
    ] {
        let (telemetry, publisher) = telemetry();
        telemetry
            .outcome(OutcomeEvent::new("zone1", "getStatus", outcome))
            .await;
        let payload = publisher.on_topic("paradox/zone1/events").await.remove(0);
        assert_eq!(payload["outcome"], expected);
    }
}

#[tokio::test]
async fn recompute_event_validates() {
    let (telemetry, publisher) = telemetry();
    telemetry.recompute(40, 80, true).await;

    let payload = publisher.on_topic("paradox/zone1/events").await.remove(0);
    let event: RecomputeEventSchema = serde_json::from_value(payload).unwrap();

    assert!(event.background_volume_recomputed);
    assert_eq!(event.message_type, "events");
    assert_eq!(event.zone, "zone1");
    assert_eq!(event.effective_volume, 40);
    assert_eq!(event.pre_duck_volume, 80);
    assert!(event.ducked);
    assert!(event.timestamp.ends_with('Z'));
}

#[tokio::test]
async fn warning_payload_validates() {
    let (telemetry, publisher) = telemetry();
    telemetry
        .warning(ErrorKind::MalformedJson, "payload is not JSON", Some("{oops"))
        .await;

    let payload = publisher.on_topic("paradox/zone1/warning").await.remove(0);
    let warning: WarningSchema = serde_json::from_value(payload).unwrap();

    assert_eq!(warning.message_type, "warning");
    assert_eq!(warning.zone, "zone1");
    assert_eq!(warning.warning_type, "malformed_json");
    assert_eq!(warning.message, "payload is not JSON");
    assert_eq!(warning.raw.as_deref(), Some("{oops"));
}

#[tokio::test]
async fn error_kinds_match_documented_wire_strings() {
    let expected = [
        (ErrorKind::MalformedJson, "malformed_json"),
        (ErrorKind::InvalidCommandStructure, "invalid_command_structure"),
        (ErrorKind::UnknownCommand, "unknown_command"),
        (ErrorKind::InvalidParameters, "invalid_parameters"),
        (ErrorKind::FileNotFound, "file_not_found"),
        (ErrorKind::PlayerLoadFailed, "player_load_failed"),
        (ErrorKind::PlayerSpawnFailed, "player_spawn_failed"),
        (ErrorKind::PlayerIpcTimeout, "player_ipc_timeout"),
        (ErrorKind::CommandTimeout, "command_timeout"),
        (ErrorKind::VolumeResolutionWarning, "volume_resolution_warning"),
        (ErrorKind::DuplicateIgnored, "duplicate_ignored"),
        (ErrorKind::QueueOverflowDropped, "queue_overflow_dropped"),
        (ErrorKind::InvalidZoneModel, "invalid_zone_model"),
        (ErrorKind::TransportDisconnected, "transport_disconnected"),
    ];
    for (kind, wire) in expected {
        assert_eq!(kind.as_str(), wire);
        assert_eq!(serde_json::to_value(kind).unwrap(), json!(wire));
    }
}

#[tokio::test]
async fn status_snapshot_keeps_reserved_fields() {
    let (telemetry, publisher) = telemetry();
    telemetry
        .status(json!({
            "zone": "zone1",
            "type": "status",
            "status": "idle",
        }))
        .await;

    let payload = publisher.on_topic("paradox/zone1/status").await.remove(0);
    assert_eq!(payload["type"], "status");
    assert_eq!(payload["status"], "idle");
}
