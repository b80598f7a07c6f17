//! Startup, wiring, and graceful shutdown.
//!
//! The supervisor owns the lifecycle: provision combined sinks, connect the
//! transport, spawn one actor per configured zone, wire the router, run the
//! heartbeat, and on shutdown drain everything in order with a bounded
//! grace period before players are force-terminated.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{create_bus, BusEvent};
use crate::config::Config;
use crate::error::ErrorKind;
use crate::player::mpv::MpvPlayerFactory;
use crate::player::PlayerFactory;
use crate::router::{command_topics, Router};
use crate::sink::{sink_device, PulseSinkProvisioner, SinkProvisioner};
use crate::telemetry::{now_iso8601, ZoneTelemetry};
use crate::transport::{MqttTransport, Publisher, RetryConfig};
use crate::zone::spawn_zone;

/// Grace period for zone actors to drain after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Run the system until the shutdown token fires.
pub async fn run(mut config: Config, shutdown: CancellationToken) -> Result<()> {
    let bus = create_bus();

    // Combined sinks first: zones route their players through them.
    let provisioner = PulseSinkProvisioner::new();
    for zone in config.zones.values_mut() {
        if let Some(decl) = &zone.combined_sink {
            match provisioner.ensure_sink(decl).await {
                Ok(name) => {
                    zone.audio_device = sink_device(&name);
                    info!("zone {} routed to {}", zone.name, zone.audio_device);
                }
                Err(e) => {
                    warn!(
                        "zone {}: combined sink unavailable ({}), keeping {}",
                        zone.name, e, zone.audio_device
                    );
                }
            }
        }
    }

    let subscriptions: Vec<String> = config
        .zones
        .values()
        .flat_map(|zone| command_topics(&zone.base_topic))
        .collect();

    let (inbound_tx, inbound_rx) = mpsc::channel(256);
    let transport = MqttTransport::start(
        &config.global.mqtt,
        subscriptions,
        inbound_tx,
        RetryConfig::default(),
        shutdown.child_token(),
    );
    let publisher: Arc<dyn Publisher> = transport.clone();

    let factory: Arc<dyn PlayerFactory> = Arc::new(MpvPlayerFactory::new());

    // Spawn zones; a zone that cannot be built is logged and not registered.
    let zone_cancel = shutdown.child_token();
    let mut handles = Vec::new();
    let mut joins = Vec::new();
    for (name, zone_cfg) in config.zones.clone() {
        let base_topic = zone_cfg.base_topic.clone();
        match spawn_zone(
            zone_cfg,
            factory.clone(),
            publisher.clone(),
            bus.clone(),
            config.global.heartbeat_interval,
            zone_cancel.child_token(),
        )
        .await
        {
            Ok((handle, join)) => {
                handles.push(handle);
                joins.push((name, join));
            }
            Err(e) => {
                error!("zone {} not registered: {:#}", name, e);
                let telemetry = ZoneTelemetry::new(&name, &base_topic, None, publisher.clone());
                telemetry
                    .warning(
                        ErrorKind::InvalidZoneModel,
                        format!("zone not registered: {:#}", e),
                        None,
                    )
                    .await;
            }
        }
    }
    if handles.is_empty() {
        return Err(anyhow!("no zones could be started"));
    }

    let router = Router::new(handles, publisher.clone(), bus.clone());
    let router_join = tokio::spawn(router.run(inbound_rx, shutdown.child_token()));

    // Global heartbeat.
    let heartbeat_join = {
        let publisher = publisher.clone();
        let topic = config.global.heartbeat_topic.clone();
        let interval = config.global.heartbeat_interval;
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let payload = json!({
                            "timestamp": now_iso8601(),
                            "alive": true,
                        });
                        if let Err(e) = publisher.publish(&topic, payload.to_string()).await {
                            warn!("heartbeat publish failed: {}", e);
                        }
                    }
                }
            }
        })
    };

    info!("paradox-fx running");
    shutdown.cancelled().await;

    // Graceful shutdown: announce, cancel, drain with grace, then force.
    info!("shutting down");
    bus.publish(BusEvent::ShuttingDown {
        reason: Some("shutdown requested".to_string()),
    });
    zone_cancel.cancel();

    for (name, join) in joins {
        match tokio::time::timeout(SHUTDOWN_GRACE, join).await {
            Ok(Ok(())) => info!("zone {} drained", name),
            Ok(Err(e)) => warn!("zone {} task panicked: {}", name, e),
            Err(_) => warn!("zone {} did not drain within grace, abandoning", name),
        }
    }

    let _ = tokio::time::timeout(Duration::from_secs(1), router_join).await;
    heartbeat_join.abort();

    provisioner.teardown().await;
    transport.disconnect().await;

    info!("shutdown complete");
    Ok(())
}
