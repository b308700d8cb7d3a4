//! Record Types

use serde::{Deserialize, Serialize};

/// Accelerometer reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Store-assigned identifier (0 until inserted)
    #[serde(default)]
    pub id: i64,
    /// Capture time (Unix epoch milliseconds)
    pub timestamp_ms: i64,
    /// Acceleration on each axis (m/s²)
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Derived magnitude-like score
    pub magnitude: f64,
    /// Set by the detector when this reading may belong to a quake
    #[serde(default)]
    pub is_potential_event: bool,
}

impl Reading {
    /// Create an unassigned reading, deriving magnitude from the vector
    pub fn new(timestamp_ms: i64, x: f64, y: f64, z: f64) -> Self {
        Self {
            id: 0,
            timestamp_ms,
            x,
            y,
            z,
            magnitude: (x * x + y * y + z * z).sqrt(),
            is_potential_event: false,
        }
    }

    /// Mark this reading as a potential event
    pub fn flagged(mut self) -> Self {
        self.is_potential_event = true;
        self
    }

    /// Override the derived magnitude
    pub fn with_magnitude(mut self, magnitude: f64) -> Self {
        self.magnitude = magnitude;
        self
    }
}

impl Default for Reading {
    fn default() -> Self {
        Self::new(0, 0.0, 0.0, 0.0)
    }
}

/// Detected quake event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuakeEvent {
    #[serde(default)]
    pub id: i64,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub peak_magnitude: f64,
    pub average_magnitude: f64,
    /// Number of readings that contributed to the detection
    pub reading_count: u32,
}

impl QuakeEvent {
    /// Event duration in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end_time_ms - self.start_time_ms
    }
}

/// Detection settings singleton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Magnitude above which a reading counts as potential event
    pub magnitude_threshold: f64,
    /// Minimum sustained duration before an event is recorded
    pub min_event_duration_ms: u64,
    /// Accelerometer sampling rate
    pub sampling_rate_hz: f64,
    pub notifications_enabled: bool,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            magnitude_threshold: 3.0,
            min_event_duration_ms: 2000,
            sampling_rate_hz: 50.0,
            notifications_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_magnitude() {
        let reading = Reading::new(100, 3.0, 4.0, 0.0);
        assert_eq!(reading.magnitude, 5.0);
        assert!(!reading.is_potential_event);
        assert!(reading.flagged().is_potential_event);
    }

    #[test]
    fn test_settings_partial_json() {
        let settings: DetectionSettings =
            serde_json::from_str(r#"{"magnitude_threshold": 7.0}"#).unwrap();
        assert_eq!(settings.magnitude_threshold, 7.0);
        assert_eq!(settings.sampling_rate_hz, 50.0);
    }
}
