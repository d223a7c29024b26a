use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp layout written by the detector.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed line")]
    Malformed,

    #[error("invalid coordinates")]
    InvalidCoordinates,
}

/// One detection parsed from the watched file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Carried as written; the sink decides how to interpret it.
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl DetectionEvent {
    /// The timestamp as a calendar time, if it is in the detector's layout.
    pub fn recorded_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()
    }
}

/// Parse one complete line of the form `<timestamp>,<lat>,<lon>[,...]`.
///
/// Blank lines yield `Ok(None)`. Fields past the third are ignored and no
/// range check is applied to the coordinates.
pub fn parse_line(line: &str) -> Result<Option<DetectionEvent>, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let mut fields = trimmed.split(',');
    let (Some(timestamp), Some(lat), Some(lon)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(ParseError::Malformed);
    };

    let latitude = parse_coordinate(lat)?;
    let longitude = parse_coordinate(lon)?;

    Ok(Some(DetectionEvent {
        timestamp: timestamp.trim().to_string(),
        latitude,
        longitude,
    }))
}

fn parse_coordinate(field: &str) -> Result<f64, ParseError> {
    match field.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ParseError::InvalidCoordinates),
    }
}
