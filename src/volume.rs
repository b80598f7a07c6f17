//! Volume resolution.
//!
//! A pure function from (stream type, zone volume limits, per-call request,
//! duck state) to the effective integer volume plus the warnings the caller
//! must surface. Because it has no side effects it is re-evaluated on every
//! duck lifecycle edge without touching the player.
//!
//! Precedence: absolute volume > percentage adjustment > configured base.
//! Ducking applies to the background stream only, after the pre-duck value
//! has been computed, and never pushes the result outside [0, max_volume].

use serde::{Deserialize, Serialize};

/// Base volume used when the zone model does not declare one for a stream.
pub const DEFAULT_BASE_VOLUME: i32 = 100;

/// Upper bound any volume value can reach, regardless of configuration.
pub const VOLUME_CEILING: i32 = 200;

/// Stream types a zone can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Background,
    Speech,
    Effects,
    Video,
}

/// Per-call volume parameters extracted from a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeRequest {
    /// Absolute volume; wins over `adjust_percent` when both are present.
    pub absolute: Option<f64>,
    /// Percentage adjustment of the base volume, in [-100, 100].
    pub adjust_percent: Option<f64>,
    /// Opt out of ducking for this playback (background only).
    pub skip_ducking: bool,
}

impl VolumeRequest {
    pub fn absolute(volume: f64) -> Self {
        Self {
            absolute: Some(volume),
            ..Self::default()
        }
    }

    pub fn adjust(percent: f64) -> Self {
        Self {
            adjust_percent: Some(percent),
            ..Self::default()
        }
    }
}

/// Warning codes produced during resolution. Serialized as snake_case in
/// outcome event `warnings` arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeWarning {
    BothVolumeAndAdjust,
    ClampAbsLow,
    ClampAbsHigh,
    ClampAdjustLow,
    ClampAdjustHigh,
    ClampAdjustResultLow,
    ClampAdjustResultHigh,
    ClampBaseHigh,
    ClampDuckLow,
    ClampDuckHigh,
}

impl VolumeWarning {
    /// Whether this warning records a clamp (as opposed to a precedence note).
    pub fn is_clamp(&self) -> bool {
        !matches!(self, Self::BothVolumeAndAdjust)
    }
}

/// Inputs the resolver reads from the zone model.
#[derive(Debug, Clone, Copy)]
pub struct VolumeContext {
    /// Configured base volume for the stream, if the zone declares one.
    pub base: Option<i32>,
    /// Zone volume ceiling, clamped to [0, 200] before use.
    pub max_volume: i32,
    /// Effective ducking adjustment in [-100, 0] for the current duck state.
    pub ducking_adjust: i32,
}

/// The parameters that actually fed the computation, echoed in telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsedParams {
    pub base: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjust_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ducking_adjust: Option<i32>,
}

/// Resolution result. `effective` and `pre_duck` are integers in
/// [0, max_volume], rounded half-to-even.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVolume {
    pub effective: i32,
    pub pre_duck: i32,
    pub ducked: bool,
    pub warnings: Vec<VolumeWarning>,
    pub used: UsedParams,
    pub clamped: bool,
}

impl ResolvedVolume {
    /// Warning strings for telemetry payloads.
    pub fn warning_strings(&self) -> Vec<String> {
        self.warnings
            .iter()
            .map(|w| {
                serde_json::to_value(w)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default()
            })
            .collect()
    }
}

fn round_to_int(value: f64) -> i32 {
    value.round_ties_even() as i32
}

/// Resolve the effective volume for one playback or recompute.
pub fn resolve(
    stream: StreamType,
    ctx: &VolumeContext,
    request: &VolumeRequest,
    duck_active: bool,
) -> ResolvedVolume {
    let max_volume = ctx.max_volume.clamp(0, VOLUME_CEILING);
    let base = ctx.base.unwrap_or(DEFAULT_BASE_VOLUME);

    let mut warnings = Vec::new();
    let mut used = UsedParams {
        base,
        ..UsedParams::default()
    };

    if request.absolute.is_some() && request.adjust_percent.is_some() {
        warnings.push(VolumeWarning::BothVolumeAndAdjust);
    }

    let pre_duck_f = if let Some(abs) = request.absolute {
        used.volume = Some(abs);
        if abs < 0.0 {
            warnings.push(VolumeWarning::ClampAbsLow);
            0.0
        } else if abs > max_volume as f64 {
            warnings.push(VolumeWarning::ClampAbsHigh);
            max_volume as f64
        } else {
            abs
        }
    } else if let Some(adjust) = request.adjust_percent {
        let adjust = if adjust < -100.0 {
            warnings.push(VolumeWarning::ClampAdjustLow);
            -100.0
        } else if adjust > 100.0 {
            warnings.push(VolumeWarning::ClampAdjustHigh);
            100.0
        } else {
            adjust
        };
        used.adjust_percent = Some(adjust);
        let scaled = base as f64 * (1.0 + adjust / 100.0);
        if scaled < 0.0 {
            warnings.push(VolumeWarning::ClampAdjustResultLow);
            0.0
        } else if scaled > max_volume as f64 {
            warnings.push(VolumeWarning::ClampAdjustResultHigh);
            max_volume as f64
        } else {
            scaled
        }
    } else if base > max_volume {
        warnings.push(VolumeWarning::ClampBaseHigh);
        max_volume as f64
    } else {
        base.max(0) as f64
    };

    let pre_duck = round_to_int(pre_duck_f);

    let duck_applies =
        stream == StreamType::Background && duck_active && !request.skip_ducking;

    let (effective, ducked) = if duck_applies {
        used.ducking_adjust = Some(ctx.ducking_adjust);
        let scaled = pre_duck as f64 * (1.0 + ctx.ducking_adjust as f64 / 100.0);
        let clamped = if scaled < 0.0 {
            warnings.push(VolumeWarning::ClampDuckLow);
            0.0
        } else if scaled > max_volume as f64 {
            warnings.push(VolumeWarning::ClampDuckHigh);
            max_volume as f64
        } else {
            scaled
        };
        (round_to_int(clamped), true)
    } else {
        (pre_duck, false)
    };

    let clamped = warnings.iter().any(VolumeWarning::is_clamp);

    ResolvedVolume {
        effective,
        pre_duck,
        ducked,
        warnings,
        used,
        clamped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(base: i32, max: i32, duck: i32) -> VolumeContext {
        VolumeContext {
            base: Some(base),
            max_volume: max,
            ducking_adjust: duck,
        }
    }

    #[test]
    fn base_volume_used_when_no_params() {
        let r = resolve(
            StreamType::Background,
            &ctx(100, 150, 0),
            &VolumeRequest::default(),
            false,
        );
        assert_eq!(r.effective, 100);
        assert_eq!(r.pre_duck, 100);
        assert!(!r.ducked);
        assert!(r.warnings.is_empty());
        assert!(!r.clamped);
    }

    #[test]
    fn absolute_wins_over_adjust_with_warning() {
        // Resolver precedence scenario: base 100, max 150, duck -40.
        let request = VolumeRequest {
            absolute: Some(120.0),
            adjust_percent: Some(-25.0),
            skip_ducking: false,
        };
        let r = resolve(StreamType::Background, &ctx(100, 150, -40), &request, false);
        assert_eq!(r.effective, 120);
        assert!(!r.ducked);
        assert_eq!(r.warnings, vec![VolumeWarning::BothVolumeAndAdjust]);
        assert!(!r.clamped, "precedence warning is not a clamp");
    }

    #[test]
    fn negative_absolute_clamps_to_zero() {
        let r = resolve(
            StreamType::Speech,
            &ctx(100, 150, 0),
            &VolumeRequest::absolute(-1.0),
            false,
        );
        assert_eq!(r.effective, 0);
        assert_eq!(r.warnings, vec![VolumeWarning::ClampAbsLow]);
        assert!(r.clamped);
    }

    #[test]
    fn absolute_above_max_clamps_to_max() {
        let r = resolve(
            StreamType::Speech,
            &ctx(100, 150, 0),
            &VolumeRequest::absolute(151.0),
            false,
        );
        assert_eq!(r.effective, 150);
        assert_eq!(r.warnings, vec![VolumeWarning::ClampAbsHigh]);
    }

    #[test]
    fn adjust_below_minimum_clamps_to_minus_100() {
        let r = resolve(
            StreamType::Background,
            &ctx(80, 150, 0),
            &VolumeRequest::adjust(-150.0),
            false,
        );
        assert_eq!(r.used.adjust_percent, Some(-100.0));
        assert_eq!(r.effective, 0);
        assert!(r.warnings.contains(&VolumeWarning::ClampAdjustLow));
    }

    #[test]
    fn adjust_scales_base() {
        let r = resolve(
            StreamType::Background,
            &ctx(100, 150, 0),
            &VolumeRequest::adjust(-20.0),
            false,
        );
        assert_eq!(r.effective, 80);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn adjust_result_above_max_clamps() {
        let r = resolve(
            StreamType::Background,
            &ctx(100, 150, 0),
            &VolumeRequest::adjust(80.0),
            false,
        );
        assert_eq!(r.effective, 150);
        assert!(r.warnings.contains(&VolumeWarning::ClampAdjustResultHigh));
    }

    #[test]
    fn base_above_max_clamps_with_warning() {
        let r = resolve(
            StreamType::Background,
            &ctx(180, 150, 0),
            &VolumeRequest::default(),
            false,
        );
        assert_eq!(r.effective, 150);
        assert_eq!(r.warnings, vec![VolumeWarning::ClampBaseHigh]);
    }

    #[test]
    fn ducking_applies_to_background_only() {
        let duck_ctx = ctx(100, 150, -50);
        let bg = resolve(
            StreamType::Background,
            &duck_ctx,
            &VolumeRequest::default(),
            true,
        );
        assert_eq!(bg.effective, 50);
        assert_eq!(bg.pre_duck, 100);
        assert!(bg.ducked);
        assert_eq!(bg.used.ducking_adjust, Some(-50));

        let speech = resolve(StreamType::Speech, &duck_ctx, &VolumeRequest::default(), true);
        assert_eq!(speech.effective, 100);
        assert!(!speech.ducked);
    }

    #[test]
    fn skip_ducking_bypasses_duck() {
        let request = VolumeRequest {
            skip_ducking: true,
            ..VolumeRequest::default()
        };
        let r = resolve(StreamType::Background, &ctx(100, 150, -50), &request, true);
        assert_eq!(r.effective, 100);
        assert!(!r.ducked);
    }

    #[test]
    fn duck_recompute_from_pre_duck_absolute() {
        // Ducking recompute scenario: preDuck 80, zone adjust -50 -> 40.
        let r = resolve(
            StreamType::Background,
            &ctx(100, 150, -50),
            &VolumeRequest::absolute(80.0),
            true,
        );
        assert_eq!(r.pre_duck, 80);
        assert_eq!(r.effective, 40);
        assert!(r.ducked);
    }

    #[test]
    fn rounding_is_half_to_even() {
        // base 25, adjust -50 -> 12.5 -> rounds to 12 (ties to even).
        let r = resolve(
            StreamType::Background,
            &ctx(25, 150, 0),
            &VolumeRequest::adjust(-50.0),
            false,
        );
        assert_eq!(r.effective, 12);

        // base 27, adjust -50 -> 13.5 -> rounds to 14.
        let r = resolve(
            StreamType::Background,
            &ctx(27, 150, 0),
            &VolumeRequest::adjust(-50.0),
            false,
        );
        assert_eq!(r.effective, 14);
    }

    #[test]
    fn missing_base_defaults_to_100() {
        let context = VolumeContext {
            base: None,
            max_volume: 150,
            ducking_adjust: 0,
        };
        let r = resolve(StreamType::Video, &context, &VolumeRequest::default(), false);
        assert_eq!(r.effective, 100);
        assert_eq!(r.used.base, 100);
    }

    #[test]
    fn max_volume_clamped_to_ceiling() {
        let context = VolumeContext {
            base: Some(100),
            max_volume: 500,
            ducking_adjust: 0,
        };
        let r = resolve(
            StreamType::Background,
            &context,
            &VolumeRequest::absolute(300.0),
            false,
        );
        assert_eq!(r.effective, 200);
    }

    #[test]
    fn effective_always_within_bounds() {
        let cases = [
            (Some(-500.0), None),
            (Some(500.0), None),
            (None, Some(-500.0)),
            (None, Some(500.0)),
            (None, None),
        ];
        for (absolute, adjust_percent) in cases {
            for duck in [true, false] {
                let request = VolumeRequest {
                    absolute,
                    adjust_percent,
                    skip_ducking: false,
                };
                let r = resolve(StreamType::Background, &ctx(120, 150, -60), &request, duck);
                assert!(
                    (0..=150).contains(&r.effective),
                    "effective {} out of range for {:?}",
                    r.effective,
                    request
                );
                assert!((0..=150).contains(&r.pre_duck));
            }
        }
    }

    #[test]
    fn warning_strings_are_snake_case() {
        let r = resolve(
            StreamType::Background,
            &ctx(100, 150, 0),
            &VolumeRequest::absolute(-5.0),
            false,
        );
        assert_eq!(r.warning_strings(), vec!["clamp_abs_low".to_string()]);
    }
}
