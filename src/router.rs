//! Command routing.
//!
//! One task subscribed to every zone's command topics. Each delivery is
//! decoded, shape-checked, and handed to the owning zone actor; decode
//! failures surface as warning telemetry on the zone's warning topic and
//! never stall the stream. The router also listens for duck edges on the
//! internal bus and fans them out to sibling zones so backgrounds duck
//! in unison across the installation.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, SharedBus};
use crate::error::ErrorKind;
use crate::telemetry::ZoneTelemetry;
use crate::transport::{InboundMessage, Publisher};
use crate::zone::{ZoneHandle, ZoneMsg};

/// Both accepted command topic spellings for a zone. The plural form is
/// canonical; the singular survives for fielded controllers.
pub fn command_topics(base_topic: &str) -> [String; 2] {
    [
        format!("{}/commands", base_topic),
        format!("{}/command", base_topic),
    ]
}

struct Route {
    handle: ZoneHandle,
    telemetry: ZoneTelemetry,
}

pub struct Router {
    routes: Vec<Route>,
    bus: SharedBus,
}

impl Router {
    pub fn new(zones: Vec<ZoneHandle>, publisher: Arc<dyn Publisher>, bus: SharedBus) -> Self {
        let routes = zones
            .into_iter()
            .map(|handle| Route {
                telemetry: ZoneTelemetry::new(
                    &handle.name,
                    &handle.base_topic,
                    None,
                    publisher.clone(),
                ),
                handle,
            })
            .collect();
        Self { routes, bus }
    }

    /// Process inbound commands and duck fan-out until cancelled.
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>, cancel: CancellationToken) {
        let mut bus_rx = self.bus.subscribe();
        info!("router started for {} zone(s)", self.routes.len());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => self.handle_inbound(message).await,
                    None => break,
                },
                event = bus_rx.recv() => match event {
                    Ok(BusEvent::DuckStarted { zone, trigger_id, kind, adjust }) => {
                        self.fan_out(&zone, &trigger_id, Some((kind, adjust))).await;
                    }
                    Ok(BusEvent::DuckEnded { zone, trigger_id }) => {
                        self.fan_out(&zone, &trigger_id, None).await;
                    }
                    Ok(BusEvent::ShuttingDown { .. }) => break,
                    Err(_) => {
                        // Lagged or closed; fan-out is best-effort.
                    }
                }
            }
        }

        info!("router stopped");
    }

    async fn handle_inbound(&self, message: InboundMessage) {
        let Some(route) = self.match_topic(&message.topic) else {
            debug!("no zone for topic {}", message.topic);
            return;
        };

        let text = match String::from_utf8(message.payload) {
            Ok(text) => text,
            Err(_) => {
                route
                    .telemetry
                    .warning(ErrorKind::MalformedJson, "payload is not UTF-8", None)
                    .await;
                return;
            }
        };

        let raw: Value = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(e) => {
                route
                    .telemetry
                    .warning(
                        ErrorKind::MalformedJson,
                        format!("payload is not JSON: {}", e),
                        Some(&text),
                    )
                    .await;
                return;
            }
        };

        if !has_command_key(&raw) {
            route
                .telemetry
                .warning(
                    ErrorKind::InvalidCommandStructure,
                    "expected an object with a 'command' key",
                    Some(&text),
                )
                .await;
            return;
        }

        // A full inbox must not stall other zones; drop and warn instead.
        if route.handle.tx.try_send(ZoneMsg::Command { raw }).is_err() {
            warn!(zone = %route.handle.name, "zone inbox full, command dropped");
            route
                .telemetry
                .warning(
                    ErrorKind::InvalidCommandStructure,
                    "zone busy, command dropped",
                    None,
                )
                .await;
        }
    }

    fn match_topic(&self, topic: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| command_topics(&route.handle.base_topic).iter().any(|t| t == topic))
    }

    /// Forward a duck edge to every zone except its origin. The forwarded
    /// trigger id is derived from the origin so removals match additions.
    async fn fan_out(&self, origin: &str, trigger_id: &str, start: Option<(crate::zone::duck::DuckKind, Option<i32>)>) {
        let id = format!("{}:{}", origin, trigger_id);
        for route in &self.routes {
            if route.handle.name == origin {
                continue;
            }
            let msg = match start {
                Some((kind, adjust)) => ZoneMsg::RemoteDuck {
                    id: id.clone(),
                    kind,
                    adjust,
                    active: true,
                },
                None => ZoneMsg::RemoteDuck {
                    id: id.clone(),
                    kind: crate::zone::duck::DuckKind::Other,
                    adjust: None,
                    active: false,
                },
            };
            if route.handle.tx.try_send(msg).is_err() {
                warn!(zone = %route.handle.name, "duck fan-out dropped (inbox full)");
            }
        }
    }
}

/// Cheap shape check before the zone does full validation.
fn has_command_key(raw: &Value) -> bool {
    raw.as_object()
        .map(|obj| obj.keys().any(|key| key.eq_ignore_ascii_case("command")))
        .unwrap_or(false)
}
