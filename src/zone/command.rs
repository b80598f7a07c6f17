//! Command decoding and canonicalization.
//!
//! Controllers in the field speak two schema flavors (`Command` vs
//! `command`, plus a handful of synonyms), so the decoder looks keys up
//! case-insensitively and canonicalizes before dispatch. The original
//! command string is preserved for telemetry echo.

use serde_json::Value;
use tracing::warn;

use crate::error::ErrorKind;
use crate::volume::VolumeRequest;

/// A decoded, canonicalized command.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    /// The command string as the controller sent it.
    pub name: String,
    pub action: CommandAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandAction {
    PlayBackground {
        file: String,
        request: VolumeRequest,
        looping: bool,
    },
    StopBackground,
    PlaySpeech {
        file: String,
        request: VolumeRequest,
        ducking: Option<i32>,
    },
    ClearSpeechQueue,
    PauseSpeech,
    ResumeSpeech,
    SkipSpeech,
    PlayEffect {
        file: String,
        request: VolumeRequest,
    },
    SetVolume {
        volume: f64,
    },
    GetStatus,
    StopAll,
    SetImage {
        file: String,
    },
    PlayVideo {
        file: String,
        request: VolumeRequest,
        looping: bool,
        ducking: Option<i32>,
    },
    StopVideo,
    Transition {
        file: String,
        image: String,
    },
}

impl CommandAction {
    /// Whether this command only makes sense on a screen zone.
    pub fn screen_only(&self) -> bool {
        matches!(
            self,
            Self::SetImage { .. } | Self::PlayVideo { .. } | Self::StopVideo | Self::Transition { .. }
        )
    }
}

/// Decoding failure, mapped to a wire-visible kind.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CommandError {
    fn structure(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidCommandStructure,
            message: message.into(),
        }
    }

    fn parameters(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidParameters,
            message: message.into(),
        }
    }
}

/// Decode a raw JSON command into a canonical action.
pub fn parse(value: &Value) -> Result<ParsedCommand, CommandError> {
    let object = value
        .as_object()
        .ok_or_else(|| CommandError::structure("command must be a JSON object"))?;

    let name = object
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("command"))
        .map(|(_, v)| v)
        .ok_or_else(|| CommandError::structure("missing 'command' key"))?
        .as_str()
        .ok_or_else(|| CommandError::structure("'command' must be a string"))?
        .to_string();

    if name.trim().is_empty() {
        return Err(CommandError::structure("'command' must be non-empty"));
    }

    let action = match name.to_lowercase().as_str() {
        "playbackground" | "playbackgroundmusic" | "playmusic" => CommandAction::PlayBackground {
            file: required_file(object, "file")?,
            request: volume_request(object)?,
            looping: bool_param(object, "loop")?.unwrap_or(false),
        },
        "stopbackground" | "stopbackgroundmusic" | "stopmusic" => CommandAction::StopBackground,
        "playspeech" => CommandAction::PlaySpeech {
            file: required_file(object, "file")?,
            request: volume_request(object)?,
            ducking: ducking_param(object)?,
        },
        "clearspeechqueue" => CommandAction::ClearSpeechQueue,
        "pausespeech" => CommandAction::PauseSpeech,
        "resumespeech" => CommandAction::ResumeSpeech,
        "skipspeech" => CommandAction::SkipSpeech,
        "playsoundeffect" | "playeffect" | "playaudiofx" => CommandAction::PlayEffect {
            file: required_file(object, "file")?,
            request: volume_request(object)?,
        },
        "setvolume" => CommandAction::SetVolume {
            volume: numeric_param(object, "volume")?
                .ok_or_else(|| CommandError::parameters("setVolume requires 'volume'"))?,
        },
        "getstatus" => CommandAction::GetStatus,
        "stopall" => CommandAction::StopAll,
        "setimage" => CommandAction::SetImage {
            file: required_file(object, "file")?,
        },
        "playvideo" => CommandAction::PlayVideo {
            file: required_file(object, "file")?,
            request: volume_request(object)?,
            looping: bool_param(object, "loop")?.unwrap_or(false),
            ducking: ducking_param(object)?,
        },
        "stopvideo" => CommandAction::StopVideo,
        "transition" => CommandAction::Transition {
            file: required_file(object, "file")?,
            image: required_file(object, "image")?,
        },
        _ => {
            return Err(CommandError {
                kind: ErrorKind::UnknownCommand,
                message: format!("unknown command '{}'", name),
            })
        }
    };

    Ok(ParsedCommand { name, action })
}

fn get_param<'a>(object: &'a serde_json::Map<String, Value>, name: &str) -> Option<&'a Value> {
    object
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

fn required_file(
    object: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<String, CommandError> {
    match get_param(object, key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(_) => Err(CommandError::parameters(format!(
            "'{}' must be a non-empty string",
            key
        ))),
        None => Err(CommandError::parameters(format!("missing '{}'", key))),
    }
}

fn numeric_param(
    object: &serde_json::Map<String, Value>,
    name: &str,
) -> Result<Option<f64>, CommandError> {
    match get_param(object, name) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        // Some controllers send numbers as strings.
        Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| {
            CommandError::parameters(format!("'{}' is not numeric: '{}'", name, s))
        }),
        Some(_) => Err(CommandError::parameters(format!(
            "'{}' must be numeric",
            name
        ))),
    }
}

fn bool_param(
    object: &serde_json::Map<String, Value>,
    name: &str,
) -> Result<Option<bool>, CommandError> {
    match get_param(object, name) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            _ => Err(CommandError::parameters(format!(
                "'{}' is not a boolean: '{}'",
                name, s
            ))),
        },
        Some(_) => Err(CommandError::parameters(format!(
            "'{}' must be a boolean",
            name
        ))),
    }
}

fn volume_request(object: &serde_json::Map<String, Value>) -> Result<VolumeRequest, CommandError> {
    Ok(VolumeRequest {
        absolute: numeric_param(object, "volume")?,
        adjust_percent: numeric_param(object, "adjustVolume")?,
        skip_ducking: bool_param(object, "skipDucking")?.unwrap_or(false),
    })
}

/// Per-item ducking in [-100, 0]; positive values are rewritten to 0.
fn ducking_param(object: &serde_json::Map<String, Value>) -> Result<Option<i32>, CommandError> {
    let Some(raw) = numeric_param(object, "ducking")? else {
        return Ok(None);
    };
    let value = raw.round_ties_even() as i32;
    if value > 0 {
        warn!("positive ducking {} rewritten to 0", value);
        Ok(Some(0))
    } else {
        Ok(Some(value.max(-100)))
    }
}
