//! Record Normalizer: coerces loosely shaped JSON records into canonical
//! [`PatientRecord`]s.
//!
//! Vitals that cannot be read as a number become
//! [`VitalReading::Unmeasured`]; they are never replaced by a default.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use triage_core::{
    AcuityColor, AnalyticsError, Arrival, ArrivalMode, Demographics, Esi, OutOfRangeValue,
    PatientRecord, RangeField, SexCode, TriageDecision, VitalKind, VitalReading, VitalSigns,
};

/// Normalize one raw record. `index` is only used to name records without an id.
pub fn normalize_record(raw: &Value, index: usize) -> Result<PatientRecord, AnalyticsError> {
    let Some(id) = record_id(raw) else {
        return Err(AnalyticsError::IneligibleRecord {
            record_id: format!("record-{index}"),
            reason: "missing id".to_string(),
        });
    };

    let Some(decision) = first_field(raw, &["decision", "triage", "triageDecision", "triage_decision"])
    else {
        return Err(AnalyticsError::IneligibleRecord {
            record_id: id,
            reason: "no triage decision".to_string(),
        });
    };

    let Some(level) = first_field(decision, &["esi", "esiLevel", "esi_level", "level"])
        .and_then(parse_esi)
    else {
        return Err(AnalyticsError::IneligibleRecord {
            record_id: id,
            reason: "missing ESI level".to_string(),
        });
    };

    let esi = whole_level(level)
        .and_then(|level| Esi::try_from(level).ok())
        .ok_or_else(|| OutOfRangeValue {
            record_id: id.clone(),
            field: RangeField::Esi,
            value: level,
            min: f64::from(Esi::MIN),
            max: f64::from(Esi::MAX),
        })?;

    let decision = TriageDecision {
        esi,
        confidence: first_field(decision, &["confidence", "confidenceScore", "confidence_score"])
            .and_then(parse_number),
        acuity_color: first_str(decision, &["acuityColor", "acuity_color", "color"])
            .and_then(AcuityColor::parse),
        specialists: first_field(decision, &["specialists", "departments", "specialist"])
            .map(parse_specialists)
            .unwrap_or_default(),
        bay: first_field(decision, &["bay", "location"]).and_then(scalar_text),
    };

    Ok(PatientRecord {
        id,
        version: raw.get("version").and_then(Value::as_u64),
        demographics: extract_demographics(raw),
        chief_complaint: first_str(raw, &["chiefComplaint", "chief_complaint", "complaint"])
            .map(|text| text.trim().to_string())
            .unwrap_or_default(),
        vitals: raw.get("vitals").map(extract_vitals).unwrap_or_default(),
        arrival: extract_arrival(raw),
        decision,
    })
}

pub(crate) fn record_id(raw: &Value) -> Option<String> {
    match raw.get("id")? {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn first_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find(|field| !field.is_null())
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    first_field(value, keys).and_then(Value::as_str)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// The raw ESI as a finite number; "ESI-2" and "3.0" are accepted.
fn parse_esi(value: &Value) -> Option<f64> {
    let level = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let trimmed = text.trim();
            let digits = match trimmed.get(..3) {
                Some(prefix) if prefix.eq_ignore_ascii_case("esi") => {
                    trimmed[3..].trim_start_matches(|c: char| c == '-' || c == ':' || c.is_whitespace())
                }
                _ => trimmed,
            };
            digits.parse::<f64>().ok()
        }
        _ => None,
    };
    level.filter(|level| level.is_finite())
}

/// Fractional levels are not on the ESI scale.
fn whole_level(level: f64) -> Option<i64> {
    (level.fract() == 0.0 && level.abs() < 1e6).then_some(level as i64)
}

/// Numbers, or strings whose leading token is numeric ("92%", "118 bpm").
fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|v| v.is_finite()),
        Value::String(text) => split_numeric(text).map(|(number, _)| number),
        _ => None,
    }
}

/// Split a leading number from its unit suffix: "38.2 °C" -> (38.2, "°C").
fn split_numeric(text: &str) -> Option<(f64, &str)> {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .find(|(idx, c)| !(c.is_ascii_digit() || *c == '.' || (*c == '-' && *idx == 0)))
        .map(|(idx, _)| idx)
        .unwrap_or(trimmed.len());
    let number = trimmed[..end].parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some((number, trimmed[end..].trim()))
}

fn parse_specialists(value: &Value) -> Vec<String> {
    let names: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(_) => first_str(item, &["name", "department", "display"])
                    .map(str::to_string),
                other => other.as_str().map(str::to_string),
            })
            .collect(),
        Value::String(text) => text.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };

    names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn extract_demographics(raw: &Value) -> Demographics {
    let source = raw.get("demographics").unwrap_or(raw);
    let age = source
        .get("age")
        .and_then(parse_number)
        .filter(|age| *age >= 0.0 && age.fract() == 0.0 && *age <= f64::from(u32::MAX))
        .map(|age| age as u32);
    let sex = first_str(source, &["sex", "gender"])
        .map(SexCode::parse)
        .unwrap_or_default();
    Demographics { age, sex }
}

fn extract_arrival(raw: &Value) -> Arrival {
    match raw.get("arrival") {
        Some(arrival @ Value::Object(_)) => Arrival {
            arrived_at: first_field(arrival, &["time", "timestamp", "at", "arrivedAt"])
                .and_then(parse_timestamp),
            mode: first_str(arrival, &["mode", "arrivalMode", "arrival_mode"])
                .map(ArrivalMode::parse)
                .unwrap_or_default(),
        },
        _ => Arrival {
            arrived_at: first_field(raw, &["arrivedAt", "arrived_at", "arrivalTime", "arrival_time"])
                .and_then(parse_timestamp),
            mode: first_str(raw, &["arrivalMode", "arrival_mode"])
                .map(ArrivalMode::parse)
                .unwrap_or_default(),
        },
    }
}

/// RFC 3339 strings or epoch milliseconds.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(number) => number.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn extract_vitals(value: &Value) -> VitalSigns {
    let mut vitals = VitalSigns::default();

    match value {
        Value::Object(map) => {
            for (name, reading) in map {
                if let Some(kind) = infer_vital_kind(name) {
                    vitals.set(kind, parse_vital(kind, reading));
                }
            }
        }
        // Observation-like list: [{ "name": "Heart rate", "value": 118, "unit": "bpm" }]
        Value::Array(items) => {
            for item in items {
                let Some(kind) = first_str(item, &["name", "code", "kind"]).and_then(infer_vital_kind)
                else {
                    continue;
                };
                vitals.set(kind, parse_vital(kind, item));
            }
        }
        _ => {}
    }

    vitals
}

fn infer_vital_kind(name: &str) -> Option<VitalKind> {
    let compact: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();

    if compact.contains("diastolic") {
        None
    } else if compact.contains("spo2") || compact.contains("oxygensaturation") || compact == "o2sat" {
        Some(VitalKind::Spo2)
    } else if compact.contains("heartrate") || compact.contains("pulse") || compact == "hr" {
        Some(VitalKind::HeartRate)
    } else if compact.contains("systolic")
        || compact.contains("bloodpressure")
        || compact == "bp"
        || compact == "sbp"
    {
        Some(VitalKind::SystolicBp)
    } else if compact.contains("respiratoryrate") || compact.contains("resprate") || compact == "rr" {
        Some(VitalKind::RespiratoryRate)
    } else if compact.contains("temperature")
        || compact.contains("bodytemp")
        || compact.starts_with("temp")
    {
        Some(VitalKind::Temperature)
    } else {
        None
    }
}

fn parse_vital(kind: VitalKind, value: &Value) -> VitalReading {
    let parsed = match value {
        Value::Number(number) => number.as_f64().filter(|v| v.is_finite()),
        Value::String(text) => parse_vital_text(kind, text),
        Value::Object(map) => parse_vital_object(kind, map),
        _ => None,
    };

    match parsed {
        Some(reading) => VitalReading::Measured(reading),
        None => VitalReading::Unmeasured,
    }
}

fn parse_vital_text(kind: VitalKind, text: &str) -> Option<f64> {
    if kind == VitalKind::SystolicBp {
        if let Some((systolic, _)) = text.split_once('/') {
            return split_numeric(systolic).map(|(value, _)| value);
        }
    }

    let (value, unit) = split_numeric(text)?;
    Some(to_fahrenheit_if_celsius(kind, value, unit))
}

fn parse_vital_object(kind: VitalKind, map: &Map<String, Value>) -> Option<f64> {
    if kind == VitalKind::SystolicBp {
        if let Some(systolic) = map.get("systolic").and_then(parse_number) {
            return Some(systolic);
        }
    }

    let unit = map.get("unit").and_then(Value::as_str).unwrap_or_default();
    match map.get("value")? {
        Value::Number(number) => number
            .as_f64()
            .filter(|v| v.is_finite())
            .map(|value| to_fahrenheit_if_celsius(kind, value, unit)),
        Value::String(text) if unit.is_empty() => parse_vital_text(kind, text),
        Value::String(text) => {
            let (value, _) = split_numeric(text)?;
            Some(to_fahrenheit_if_celsius(kind, value, unit))
        }
        _ => None,
    }
}

fn to_fahrenheit_if_celsius(kind: VitalKind, value: f64, unit: &str) -> f64 {
    if kind == VitalKind::Temperature && is_celsius(unit) {
        value * 9.0 / 5.0 + 32.0
    } else {
        value
    }
}

fn is_celsius(unit: &str) -> bool {
    let unit = unit.trim().trim_start_matches('°').to_lowercase();
    matches!(unit.as_str(), "c" | "cel" | "celsius" | "degc")
}
