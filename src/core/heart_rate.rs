//! Heart Rate Measurement decoding
//! This module decodes the standard Heart Rate Measurement characteristic value (0x2A37).

/// Flag bit selecting a 16-bit pulse-rate field
const FLAG_RATE_U16: u8 = 1 << 0;
/// Flag bit marking the 2-byte energy expended field
const FLAG_ENERGY_EXPENDED: u8 = 1 << 3;
/// Flag bit marking trailing RR-interval data
const FLAG_RR_INTERVALS: u8 = 1 << 4;

/// RR intervals are transmitted in units of 1/1024 second
const RR_UNITS_PER_SECOND: f64 = 1024.0;

/// A decoded Heart Rate Measurement value
#[derive(Debug, Clone, PartialEq)]
pub struct HeartRateMeasurement {
    /// Pulse rate in beats per minute, `0` when the payload carried no usable value
    pub pulse_rate: u16,
    /// Beat-to-beat intervals in milliseconds, `None` when no complete pair was present
    pub rr_intervals_ms: Option<Vec<f64>>,
}

impl HeartRateMeasurement {
    /// The "no data" measurement returned for malformed payloads
    pub const EMPTY: HeartRateMeasurement = HeartRateMeasurement {
        pulse_rate: 0,
        rr_intervals_ms: None,
    };

    /// Returns true if this measurement carries a usable pulse rate
    pub fn has_pulse(&self) -> bool {
        self.pulse_rate != 0
    }
}

/// Parses raw characteristic bytes into a measurement.
///
/// Malformed input never fails: it yields [`HeartRateMeasurement::EMPTY`].
pub fn parse_measurement(data: &[u8]) -> HeartRateMeasurement {
    if data.len() < 2 {
        return HeartRateMeasurement::EMPTY;
    }

    let flags = data[0];
    let (pulse_rate, mut offset) = if flags & FLAG_RATE_U16 != 0 {
        if data.len() < 3 {
            return HeartRateMeasurement::EMPTY;
        }
        (u16::from_le_bytes([data[1], data[2]]), 3)
    } else {
        (data[1] as u16, 2)
    };

    if flags & FLAG_ENERGY_EXPENDED != 0 {
        offset += 2;
    }

    let rr_intervals_ms = if flags & FLAG_RR_INTERVALS != 0 && offset < data.len() {
        let intervals: Vec<f64> = data[offset..]
            .chunks_exact(2)
            .map(|pair| rr_to_millis(u16::from_le_bytes([pair[0], pair[1]])))
            .collect();
        (!intervals.is_empty()).then_some(intervals)
    } else {
        None
    };

    HeartRateMeasurement {
        pulse_rate,
        rr_intervals_ms,
    }
}

/// Converts a raw 1/1024-second RR value to milliseconds
pub fn rr_to_millis(raw: u16) -> f64 {
    raw as f64 / RR_UNITS_PER_SECOND * 1000.0
}
