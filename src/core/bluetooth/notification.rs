//! Notification handling for heart-rate monitors
//! This module turns raw measurement notifications into samples and publishes them

use chrono::Utc;
use log::debug;

use crate::core::bluetooth::sample_stream::SampleStream;
use crate::core::bluetooth::types::HeartRateSample;
use crate::core::heart_rate::parse_measurement;

/// Identity attached to every sample decoded from one link
#[derive(Debug, Clone)]
pub struct SampleOrigin {
    pub device_id: String,
    pub device_name: Option<String>,
    pub session_tag: Option<String>,
}

/// Notification handler for heart-rate measurement data
#[derive(Clone)]
pub struct NotificationHandler {
    samples: SampleStream,
}

impl NotificationHandler {
    /// Create a new NotificationHandler publishing into `samples`
    pub fn new(samples: SampleStream) -> Self {
        Self { samples }
    }

    /// Decodes one notification and publishes it.
    ///
    /// Payloads without a pulse rate are dropped and `None` is returned.
    pub fn handle(&self, value: &[u8], origin: &SampleOrigin) -> Option<HeartRateSample> {
        debug!("Received heart rate data: {:02x?}", value);

        let measurement = parse_measurement(value);
        if !measurement.has_pulse() {
            debug!("Discarding measurement without pulse rate from {}", origin.device_id);
            return None;
        }

        let sample = HeartRateSample {
            timestamp_ms: Utc::now().timestamp_millis(),
            heart_rate: measurement.pulse_rate,
            device_id: origin.device_id.clone(),
            device_name: origin.device_name.clone(),
            session_tag: origin.session_tag.clone(),
            rr_intervals_ms: measurement.rr_intervals_ms,
        };
        self.samples.publish(sample.clone());
        Some(sample)
    }
}
