//! Configuration management
//!
//! The INI file is read through the `config` crate and then normalized into
//! the immutable typed model: key aliases (legacy `UPPER_SNAKE` arrives
//! lowercased by the loader, plus a few renamed keys), the legacy
//! `ducking_volume` translation, and the documented range clamps all happen
//! here, so the rest of the system only ever sees validated values.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::volume::{StreamType, VolumeContext, VOLUME_CEILING};
use crate::zone::duck::DuckDefaults;

pub const DEFAULT_MAX_VOLUME: i32 = 150;
pub const DEFAULT_QUEUE_LIMIT: usize = 5;
const DEFAULT_HEARTBEAT_SECS: u64 = 10;

/// Immutable application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub global: GlobalConfig,
    pub zones: HashMap<String, ZoneConfig>,
}

#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub mqtt: MqttConfig,
    pub heartbeat_topic: String,
    pub heartbeat_interval: Duration,
    pub media_base_path: PathBuf,
    /// Default ducking adjustment applied when a zone declares none.
    pub ducking_adjust: i32,
    pub speech_duck_level: Option<i32>,
    pub video_duck_level: Option<i32>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
}

/// What a zone drives: a screen (video + audio) or audio outputs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Screen,
    Audio,
}

impl std::fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Screen => write!(f, "screen"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Per-stream base volumes, clamped to [0, 200] at load.
#[derive(Debug, Clone, Copy)]
pub struct BaseVolumes {
    pub background: i32,
    pub speech: i32,
    pub effects: i32,
    pub video: Option<i32>,
}

impl Default for BaseVolumes {
    fn default() -> Self {
        Self {
            background: 100,
            speech: 100,
            effects: 100,
            video: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub video: usize,
    pub audio: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            video: DEFAULT_QUEUE_LIMIT,
            audio: DEFAULT_QUEUE_LIMIT,
        }
    }
}

/// Declaration of an OS combined sink mirroring one stream to several
/// physical outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedSinkDecl {
    pub name: String,
    pub description: Option<String>,
    pub slaves: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ZoneConfig {
    pub name: String,
    pub kind: ZoneKind,
    pub base_topic: String,
    pub status_topic: Option<String>,
    pub media_dir: PathBuf,
    pub audio_device: String,
    pub base_volumes: BaseVolumes,
    pub max_volume: i32,
    pub ducking_adjust: i32,
    pub speech_duck_override: Option<i32>,
    pub video_duck_override: Option<i32>,
    pub combined_sink: Option<CombinedSinkDecl>,
    pub queue_limits: QueueLimits,
    /// Opaque extra player options, passed through verbatim.
    pub player_options: Vec<String>,
}

impl ZoneConfig {
    pub fn base_volume(&self, stream: StreamType) -> Option<i32> {
        match stream {
            StreamType::Background => Some(self.base_volumes.background),
            StreamType::Speech => Some(self.base_volumes.speech),
            StreamType::Effects => Some(self.base_volumes.effects),
            StreamType::Video => self.base_volumes.video,
        }
    }

    /// Resolver inputs for a stream given the effective duck adjustment.
    pub fn volume_context(&self, stream: StreamType, ducking_adjust: i32) -> VolumeContext {
        VolumeContext {
            base: self.base_volume(stream),
            max_volume: self.max_volume,
            ducking_adjust,
        }
    }

    pub fn duck_defaults(&self) -> DuckDefaults {
        DuckDefaults {
            speech: self.speech_duck_override,
            video: self.video_duck_override,
            fallback: self.ducking_adjust,
        }
    }

    /// Resolve a command file reference against the zone media directory.
    pub fn resolve_media(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.media_dir.join(path)
        }
    }
}

/// A zone section that cannot be turned into a valid zone model.
#[derive(Debug, Error)]
#[error("invalid zone model for [{zone}]: {reason}")]
pub struct ZoneModelError {
    pub zone: String,
    pub reason: String,
}

/// One INI section as raw key/value strings.
pub type Section = HashMap<String, String>;

/// Load and normalize the configuration file.
pub fn load(path: &Path) -> Result<Config> {
    from_sections(load_sections(path)?)
}

/// Read the raw INI sections without normalization. `main` peeks at the
/// global log level here before the tracing subscriber exists.
pub fn load_sections(path: &Path) -> Result<HashMap<String, Section>> {
    let raw = ::config::Config::builder()
        .add_source(::config::File::from(path).format(::config::FileFormat::Ini))
        .build()
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    raw.try_deserialize()
        .context("config file is not a set of INI sections")
}

/// The configured log level, if any, straight from raw sections.
pub fn peek_log_level(sections: &HashMap<String, Section>) -> Option<String> {
    sections.iter().find_map(|(name, body)| {
        if name.eq_ignore_ascii_case("global") {
            body.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("log_level"))
                .map(|(_, v)| v.clone())
        } else {
            None
        }
    })
}

/// Normalize parsed INI sections into the typed model. Exposed for tests.
pub fn from_sections(sections: HashMap<String, Section>) -> Result<Config> {
    // The loader lowercases keys; lowercase section names too so legacy
    // UPPER_SNAKE files and [Global] headers behave identically.
    let mut sections: HashMap<String, Section> = sections
        .into_iter()
        .map(|(name, body)| {
            let body = body
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect();
            (name.to_lowercase(), body)
        })
        .collect();

    let global_section = sections.remove("global").unwrap_or_default();
    let mqtt_section = sections.remove("mqtt").unwrap_or_default();

    let global = parse_global(&global_section, &mqtt_section)?;

    let mut zones = HashMap::new();
    for (name, section) in sections {
        match parse_zone(&name, &section, &global) {
            Ok(zone) => {
                zones.insert(name, zone);
            }
            Err(e) => {
                // The zone is not registered; everything else keeps running.
                error!("{}", e);
            }
        }
    }

    if zones.is_empty() {
        return Err(anyhow!("no valid zones configured"));
    }

    Ok(Config { global, zones })
}

fn parse_global(global: &Section, mqtt: &Section) -> Result<GlobalConfig> {
    let host = lookup(mqtt, &["host", "server", "broker"])
        .or_else(|| lookup(global, &["mqtt_server", "mqtt_broker", "mqtt_host"]))
        .map(String::from)
        .ok_or_else(|| anyhow!("mqtt broker host missing ([mqtt] host or [global] mqtt_server)"))?;

    let port = lookup(mqtt, &["port"])
        .or_else(|| lookup(global, &["mqtt_port"]))
        .map(|v| parse_number::<u16>("mqtt port", v))
        .transpose()?
        .unwrap_or(1883);

    let username = lookup(mqtt, &["username", "user"])
        .or_else(|| lookup(global, &["mqtt_username", "mqtt_user"]))
        .map(String::from);
    let password = lookup(mqtt, &["password"])
        .or_else(|| lookup(global, &["mqtt_password"]))
        .map(String::from);

    let client_id = lookup(mqtt, &["client_id"])
        .map(String::from)
        .unwrap_or_else(|| "paradox-fx".to_string());

    let heartbeat_topic = lookup(global, &["heartbeat_topic"])
        .map(String::from)
        .unwrap_or_else(|| "paradox/heartbeat".to_string());

    let heartbeat_interval = lookup(global, &["heartbeat_interval"])
        .map(|v| parse_number::<u64>("heartbeat_interval", v))
        .transpose()?
        .unwrap_or(DEFAULT_HEARTBEAT_SECS);

    let media_base_path = lookup(global, &["media_base_path", "media_dir"])
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let ducking_adjust = lookup(global, &["ducking_adjust"])
        .map(|v| parse_number::<i32>("ducking_adjust", v))
        .transpose()?
        .map(|v| clamp_duck_adjust("global", v))
        .unwrap_or(0);

    let speech_duck_level = lookup(global, &["speech_duck_level"])
        .map(|v| parse_number::<i32>("speech_duck_level", v))
        .transpose()?
        .map(|v| clamp_duck_adjust("global", v));
    let video_duck_level = lookup(global, &["video_duck_level"])
        .map(|v| parse_number::<i32>("video_duck_level", v))
        .transpose()?
        .map(|v| clamp_duck_adjust("global", v));

    let log_level = lookup(global, &["log_level"]).map(String::from);

    Ok(GlobalConfig {
        mqtt: MqttConfig {
            host,
            port,
            username,
            password,
            client_id,
        },
        heartbeat_topic,
        heartbeat_interval: Duration::from_secs(heartbeat_interval),
        media_base_path,
        ducking_adjust,
        speech_duck_level,
        video_duck_level,
        log_level,
    })
}

/// Parse one zone section. Failures here mean the zone is not registered.
pub fn parse_zone(name: &str, section: &Section, global: &GlobalConfig) -> Result<ZoneConfig, ZoneModelError> {
    let fail = |reason: String| ZoneModelError {
        zone: name.to_string(),
        reason,
    };

    let kind = match lookup(section, &["type", "zone_type", "kind"]) {
        Some(v) => match v.to_lowercase().as_str() {
            "screen" => ZoneKind::Screen,
            "audio" => ZoneKind::Audio,
            other => return Err(fail(format!("unknown zone type '{}'", other))),
        },
        None => return Err(fail("missing zone type".to_string())),
    };

    let base_topic = lookup(section, &["base_topic", "topic"])
        .map(String::from)
        .ok_or_else(|| fail("missing base_topic".to_string()))?;

    let status_topic = lookup(section, &["status_topic"]).map(String::from);

    let media_dir = lookup(section, &["media_dir"])
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(name));
    let media_dir = if media_dir.is_absolute() {
        media_dir
    } else {
        global.media_base_path.join(media_dir)
    };

    let audio_device = lookup(section, &["audio_device", "device"])
        .map(String::from)
        .unwrap_or_else(|| "default".to_string());

    let mut base_volumes = BaseVolumes::default();
    if let Some(v) = parse_volume_key(section, name, &["background_volume"])? {
        base_volumes.background = v;
    }
    if let Some(v) = parse_volume_key(section, name, &["speech_volume"])? {
        base_volumes.speech = v;
    }
    if let Some(v) = parse_volume_key(section, name, &["effects_volume", "effect_volume"])? {
        base_volumes.effects = v;
    }
    base_volumes.video = parse_volume_key(section, name, &["video_volume"])?;

    let max_volume = lookup(section, &["max_volume"])
        .map(|v| parse_number::<i32>("max_volume", v).map_err(|e| fail(e.to_string())))
        .transpose()?
        .map(|v| {
            let clamped = v.clamp(0, VOLUME_CEILING);
            if clamped != v {
                warn!("[{}] max_volume {} clamped to {}", name, v, clamped);
            }
            clamped
        })
        .unwrap_or(DEFAULT_MAX_VOLUME);

    // ducking_adjust wins over the legacy ducking_volume (a 0-100 target
    // level translated to a reduction).
    let ducking_adjust = if let Some(v) = lookup(section, &["ducking_adjust"]) {
        let n = parse_number::<i32>("ducking_adjust", v).map_err(|e| fail(e.to_string()))?;
        clamp_duck_adjust(name, n)
    } else if let Some(v) = lookup(section, &["ducking_volume"]) {
        let legacy = parse_number::<i32>("ducking_volume", v).map_err(|e| fail(e.to_string()))?;
        let translated = -(100 - legacy.clamp(0, 100));
        warn!(
            "[{}] legacy ducking_volume={} translated to ducking_adjust={}",
            name, legacy, translated
        );
        translated
    } else {
        global.ducking_adjust
    };

    let speech_duck_override = lookup(section, &["speech_duck_override", "speech_ducking"])
        .map(|v| parse_number::<i32>("speech_duck_override", v).map_err(|e| fail(e.to_string())))
        .transpose()?
        .map(|v| clamp_duck_adjust(name, v))
        .or(global.speech_duck_level);
    let video_duck_override = lookup(section, &["video_duck_override", "video_ducking"])
        .map(|v| parse_number::<i32>("video_duck_override", v).map_err(|e| fail(e.to_string())))
        .transpose()?
        .map(|v| clamp_duck_adjust(name, v))
        .or(global.video_duck_level);

    let combined_sink = match lookup(section, &["combined_sinks"]) {
        Some(raw) => {
            let slaves: Vec<String> = serde_json::from_str(raw)
                .map_err(|e| fail(format!("combined_sinks is not a JSON array: {}", e)))?;
            if slaves.is_empty() {
                return Err(fail("combined_sinks must name at least one slave".to_string()));
            }
            Some(CombinedSinkDecl {
                name: lookup(section, &["combined_sink_name"])
                    .map(String::from)
                    .unwrap_or_else(|| format!("pfx_{}", name)),
                description: lookup(section, &["combined_sink_description"]).map(String::from),
                slaves,
            })
        }
        None => None,
    };

    let queue_limits = QueueLimits {
        video: lookup(section, &["video_queue_max"])
            .map(|v| parse_number::<usize>("video_queue_max", v).map_err(|e| fail(e.to_string())))
            .transpose()?
            .unwrap_or(DEFAULT_QUEUE_LIMIT),
        audio: lookup(section, &["audio_queue_max"])
            .map(|v| parse_number::<usize>("audio_queue_max", v).map_err(|e| fail(e.to_string())))
            .transpose()?
            .unwrap_or(DEFAULT_QUEUE_LIMIT),
    };

    let player_options = lookup(section, &["player_options"])
        .map(|v| v.split_whitespace().map(String::from).collect())
        .unwrap_or_default();

    Ok(ZoneConfig {
        name: name.to_string(),
        kind,
        base_topic,
        status_topic,
        media_dir,
        audio_device,
        base_volumes,
        max_volume,
        ducking_adjust,
        speech_duck_override,
        video_duck_override,
        combined_sink,
        queue_limits,
        player_options,
    })
}

fn lookup<'a>(section: &'a Section, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| section.get(*k))
        .map(String::as_str)
}

fn parse_volume_key(
    section: &Section,
    zone: &str,
    keys: &[&str],
) -> Result<Option<i32>, ZoneModelError> {
    lookup(section, keys)
        .map(|v| {
            parse_number::<i32>(keys[0], v)
                .map(|n| clamp_base_volume(zone, keys[0], n))
                .map_err(|e| ZoneModelError {
                    zone: zone.to_string(),
                    reason: e.to_string(),
                })
        })
        .transpose()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| anyhow!("{} is not a valid number: '{}'", key, value))
}

fn clamp_base_volume(zone: &str, key: &str, value: i32) -> i32 {
    let clamped = value.clamp(0, VOLUME_CEILING);
    if clamped != value {
        warn!("[{}] {} {} clamped to {}", zone, key, value, clamped);
    }
    clamped
}

/// Ducking adjustments live in [-100, 0]: positive values are rewritten to 0
/// and anything below -100 saturates.
fn clamp_duck_adjust(zone: &str, value: i32) -> i32 {
    if value > 0 {
        warn!("[{}] positive ducking adjustment {} rewritten to 0", zone, value);
        0
    } else if value < -100 {
        warn!("[{}] ducking adjustment {} clamped to -100", zone, value);
        -100
    } else {
        value
    }
}
