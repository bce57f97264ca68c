use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SettingsError;

/// Versioned wire form of task settings.
///
/// The store treats settings as opaque JSON; this layer owns the schema. An
/// unknown `version` tag (or any other parse failure) is never fatal to a
/// running worker — it means a newer deployment has redefined the task and
/// this worker should stand down. Unknown fields inside a known version are
/// ignored for the same forward-tolerance reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "version")]
enum WireSettings {
    #[serde(rename_all = "camelCase")]
    V1 {
        /// ISO-8601 duration between the end of one run and eligibility for
        /// the next.
        cadence: String,
        /// Optional ISO-8601 delay before the first run, applied only when
        /// the task record is first created.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_delay_duration: Option<String>,
    },
}

/// Validated, in-memory task settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSettings {
    /// Minimum duration between the end of one run and the next eligibility.
    pub cadence: Duration,
    /// Delay before the first eligible run; `None` means immediately.
    pub initial_delay: Option<Duration>,
}

impl TaskSettings {
    /// Programmatic constructor, validated the same way as the wire form.
    pub fn new(cadence: Duration) -> Result<Self, SettingsError> {
        if cadence <= Duration::zero() {
            return Err(SettingsError::NonPositiveCadence);
        }
        Ok(Self {
            cadence,
            initial_delay: None,
        })
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Parse and validate a settings payload already loaded as JSON.
    pub fn from_value(value: &Value) -> Result<Self, SettingsError> {
        let wire: WireSettings = serde_json::from_value(value.clone())?;
        Self::from_wire(wire)
    }

    /// Parse and validate a serialized settings payload, as read back from
    /// the store.
    pub fn parse(json: &str) -> Result<Self, SettingsError> {
        let wire: WireSettings = serde_json::from_str(json)?;
        Self::from_wire(wire)
    }

    /// Render the canonical V1 wire form.
    pub fn to_value(&self) -> Value {
        let mut value = serde_json::json!({
            "version": "V1",
            "cadence": format_duration(self.cadence),
        });
        if let Some(delay) = self.initial_delay {
            value["initialDelayDuration"] = Value::String(format_duration(delay));
        }
        value
    }

    fn from_wire(wire: WireSettings) -> Result<Self, SettingsError> {
        let WireSettings::V1 {
            cadence,
            initial_delay_duration,
        } = wire;

        let cadence = parse_duration(&cadence)?;
        if cadence <= Duration::zero() {
            return Err(SettingsError::NonPositiveCadence);
        }
        let initial_delay = initial_delay_duration
            .as_deref()
            .map(parse_duration)
            .transpose()?;

        Ok(Self {
            cadence,
            initial_delay,
        })
    }
}

/// Parse an ISO-8601 duration (`P[nW][nD][T[nH][nM][n[.f]S]]`).
///
/// Calendar-dependent units (years, months) have no fixed length and are
/// rejected. Fractions are accepted on the seconds component only. No
/// duration-parsing crate is pulled in for this: the grammar is ten lines of
/// designator handling.
fn parse_duration(value: &str) -> Result<Duration, SettingsError> {
    let invalid = |reason: &str| SettingsError::InvalidDuration {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let body = value
        .strip_prefix('P')
        .ok_or_else(|| invalid("missing 'P' designator"))?;

    let mut total_micros: i64 = 0;
    let mut in_time = false;
    let mut seen_component = false;
    let mut num = String::new();

    for ch in body.chars() {
        match ch {
            'T' if !in_time && num.is_empty() => in_time = true,
            '0'..='9' | '.' => num.push(ch),
            designator => {
                if num.is_empty() {
                    return Err(invalid("designator without a number"));
                }
                let micros = match (in_time, designator) {
                    (false, 'Y') | (false, 'M') => {
                        return Err(invalid("calendar units are not supported"))
                    }
                    (false, 'W') => whole_component_micros(&num, 604_800),
                    (false, 'D') => whole_component_micros(&num, 86_400),
                    (true, 'H') => whole_component_micros(&num, 3_600),
                    (true, 'M') => whole_component_micros(&num, 60),
                    (true, 'S') => seconds_component_micros(&num),
                    _ => return Err(invalid("unexpected designator")),
                }
                .ok_or_else(|| invalid("component is not a valid number or is out of range"))?;

                total_micros = total_micros
                    .checked_add(micros)
                    .ok_or_else(|| invalid("duration out of range"))?;
                seen_component = true;
                num.clear();
            }
        }
    }

    if !num.is_empty() {
        return Err(invalid("trailing number without a designator"));
    }
    if !seen_component {
        return Err(invalid("no components"));
    }

    Ok(Duration::microseconds(total_micros))
}

/// Microseconds for a whole-number component worth `secs_per_unit` each.
fn whole_component_micros(num: &str, secs_per_unit: i64) -> Option<i64> {
    if num.contains('.') {
        return None; // fractions are only allowed on seconds
    }
    let n: i64 = num.parse().ok()?;
    n.checked_mul(secs_per_unit)?.checked_mul(1_000_000)
}

/// Microseconds for the seconds component, which may carry a fraction.
fn seconds_component_micros(num: &str) -> Option<i64> {
    if !num.contains('.') {
        let n: i64 = num.parse().ok()?;
        return n.checked_mul(1_000_000);
    }
    let secs: f64 = num.parse().ok()?;
    if !secs.is_finite() || !(0.0..=9.0e12).contains(&secs) {
        return None;
    }
    Some((secs * 1_000_000.0).round() as i64)
}

/// Canonical rendering: everything as (possibly fractional) seconds.
fn format_duration(duration: Duration) -> String {
    // Durations here come from the parser or the validated constructor, both
    // of which stay far inside the microsecond-representable range.
    let micros = duration.num_microseconds().unwrap_or(i64::MAX);
    let secs = micros / 1_000_000;
    let frac = micros % 1_000_000;
    if frac == 0 {
        format!("PT{secs}S")
    } else {
        let frac = format!("{frac:06}");
        format!("PT{secs}.{}S", frac.trim_end_matches('0'))
    }
}
