//! Readings payload decoding
//!
//! The readings endpoint answers `{"values": [{"ts": "...", "v": ...}, ...]}`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::fetcher::DecodeError;
use crate::RawSeriesPoint;

#[derive(Debug, Deserialize)]
struct ReadingsPayload {
    values: Vec<RawReading>,
}

#[derive(Debug, Deserialize)]
struct RawReading {
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    v: Option<serde_json::Value>,
}

/// Decode a readings body into points, in payload order
///
/// # Errors
/// Returns [`DecodeError`] when the body is not the readings shape, a
/// timestamp is not RFC 3339 or a value is not numeric
pub fn parse_readings(body: &str) -> Result<Vec<RawSeriesPoint>, DecodeError> {
    let payload: ReadingsPayload =
        serde_json::from_str(body).map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;

    let mut points = Vec::with_capacity(payload.values.len());
    for reading in payload.values {
        let Some(ts) = reading.ts else {
            warn!("Skipping reading without timestamp");
            continue;
        };
        let timestamp = parse_timestamp(&ts)?;
        let value = parse_value(reading.v)?;
        points.push(RawSeriesPoint::new(timestamp, value));
    }

    Ok(points)
}

fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DecodeError::InvalidTimestamp(ts.to_string()))
}

fn parse_value(value: Option<serde_json::Value>) -> Result<Option<f64>, DecodeError> {
    use serde_json::Value;

    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| DecodeError::InvalidValue(n.to_string())),
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(DecodeError::InvalidValue(s)),
        },
        Some(other) => Err(DecodeError::InvalidValue(other.to_string())),
    }
}
