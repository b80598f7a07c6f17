//! ParadoxFX - command-driven media orchestrator
//!
//! A zone runtime for interactive installations (escape rooms, theatrical
//! effects). External controllers send JSON commands over MQTT; each zone
//! maps them onto coordinated media channels and answers with structured
//! event/status telemetry.
//!
//! This library provides:
//! - Per-zone command routing and state machine
//! - Background / speech / effects / video channels with ducking
//! - Pure volume resolution with bit-exact telemetry
//! - MQTT transport with reconnect and heartbeat
//! - Combined-sink provisioning for multi-output zones

// =============================================================================
// Lints - Enforce code quality and consistency
// =============================================================================

// Deny truly dangerous patterns (these will fail the build)
#![deny(unsafe_code)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod bus;
pub mod config;
pub mod error;
pub mod player;
pub mod router;
pub mod sink;
pub mod supervisor;
pub mod telemetry;
pub mod transport;
pub mod volume;
pub mod zone;
