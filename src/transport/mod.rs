//! MQTT transport.
//!
//! Wraps `rumqttc`: subscribes to every zone's command topics, forwards
//! inbound publishes to the router over an mpsc channel, and exposes the
//! narrow [`Publisher`] capability the telemetry layer writes through.
//! Connection loss is retried with exponential backoff; the backoff resets
//! after a stable run, so a flaky broker does not pin the delay at its cap.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::error::ErrorKind;

/// A message delivered from the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Narrow publish capability handed to telemetry and the router.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<()>;
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// A connection that lived at least this long resets the backoff.
    pub stable_run_threshold: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            stable_run_threshold: Duration::from_secs(30),
        }
    }
}

pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    /// Connect and spawn the event loop task. Inbound publishes are forwarded
    /// to `inbound`; subscriptions are re-established on every reconnect.
    pub fn start(
        cfg: &MqttConfig,
        subscriptions: Vec<String>,
        inbound: mpsc::Sender<InboundMessage>,
        retry: RetryConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let mut options = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        info!("mqtt connecting to {}:{}", cfg.host, cfg.port);

        let loop_client = client.clone();
        tokio::spawn(async move {
            let mut delay = retry.initial_delay;
            let mut connected_at: Option<Instant> = None;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("mqtt event loop shutting down");
                        break;
                    }
                    result = eventloop.poll() => match result {
                        Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                            info!("mqtt connected (code: {:?})", ack.code);
                            connected_at = Some(Instant::now());
                            for topic in &subscriptions {
                                if let Err(e) = loop_client.subscribe(topic, QoS::AtMostOnce).await {
                                    warn!("mqtt subscribe {} failed: {}", topic, e);
                                }
                            }
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let message = InboundMessage {
                                topic: publish.topic.clone(),
                                payload: publish.payload.to_vec(),
                            };
                            if inbound.try_send(message).is_err() {
                                warn!("router inbox full, dropping message on {}", publish.topic);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(
                                kind = ErrorKind::TransportDisconnected.as_str(),
                                "mqtt connection lost: {}", e
                            );
                            // Stable runs reset the backoff.
                            if let Some(since) = connected_at.take() {
                                if since.elapsed() >= retry.stable_run_threshold {
                                    delay = retry.initial_delay;
                                }
                            }
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {
                                    delay = (delay * 2).min(retry.max_delay);
                                }
                            }
                        }
                    }
                }
            }
        });

        Arc::new(Self { client })
    }

    pub async fn disconnect(&self) {
        let _ = self.client.disconnect().await;
        info!("mqtt disconnected");
    }
}

#[async_trait]
impl Publisher for MqttTransport {
    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.into_bytes())
            .await?;
        Ok(())
    }
}
