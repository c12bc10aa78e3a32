//! Records returned by the valve's local API.
//!
//! Every field is optional on the wire; firmware revisions differ in what they report.

use std::collections::BTreeSet;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// General state of the valve (`GET /`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceState {
    /// "open", "closed", "opening", ...
    pub valve_state: Option<String>,
    pub water_flow_indicator: Option<bool>,
    pub mqtt_status: Option<bool>,
    pub wifi_status: Option<bool>,
    /// "battery", "external" or "both"
    pub power_supply: Option<String>,
    pub firmware_version: Option<String>,
    /// Milliseconds since boot
    pub uptime: Option<u64>,
    pub water_meter: Option<WaterMeter>,
    pub serial_number: Option<String>,
}

/// Cumulative usage counters
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WaterMeter {
    /// Millilitres
    pub volume: Option<u64>,
    /// Milliseconds
    pub duration: Option<u64>,
}

/// Telemetry fields the device can flag as invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryField {
    Flow,
    Pressure,
    Temperature,
    #[serde(other)]
    Other,
}

/// Live readings (`GET /telemetry`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetryData {
    /// Millilitres per minute
    pub flow: Option<f64>,
    /// Millibar
    pub pressure: Option<f64>,
    /// Degrees Celsius
    pub water_temperature: Option<f64>,
    /// Readings that are currently invalid and must not be shown
    pub errors: BTreeSet<TelemetryField>,
}

impl TelemetryData {
    fn valid(&self, field: TelemetryField, value: Option<f64>) -> Option<f64> {
        if self.errors.contains(&field) {
            None
        } else {
            value
        }
    }

    pub fn valid_flow(&self) -> Option<f64> {
        self.valid(TelemetryField::Flow, self.flow)
    }

    pub fn valid_pressure(&self) -> Option<f64> {
        self.valid(TelemetryField::Pressure, self.pressure)
    }

    pub fn valid_temperature(&self) -> Option<f64> {
        self.valid(TelemetryField::Temperature, self.water_temperature)
    }
}

/// Network details (`GET /networking`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkingData {
    pub mqtt_connected: Option<bool>,
    pub wifi_connected: Option<bool>,
    pub ip: Option<String>,
    pub gateway: Option<String>,
    pub subnet: Option<String>,
    pub ssid: Option<String>,
    /// dBm
    pub rssi: Option<i64>,
    /// Milliseconds
    pub wifi_uptime: Option<u64>,
    /// Milliseconds
    pub mqtt_uptime: Option<u64>,
}

/// Auto shut-off configuration (`GET /auto-shut-off`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoShutOffState {
    pub enabled: bool,
    /// Litres
    pub volume_threshold: u32,
    /// Minutes
    pub duration_threshold: u32,
}

/// Most recent auto shut-off trigger (`GET /auto-shut-off/report`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoShutOffReport {
    /// Which threshold fired, e.g. "VOLUME_THRESHOLD"
    #[serde(rename = "type")]
    pub event_type: String,
    pub volume: u64,
    pub duration: u64,
    /// Unix seconds
    pub timestamp: i64,
}

impl AutoShutOffReport {
    /// `None` if the timestamp is outside chrono's range.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// Partial update for `PATCH /auto-shut-off`; unset fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoShutOffPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_threshold: Option<u32>,
}

impl AutoShutOffPatch {
    pub const EMPTY: Self = Self {
        enabled: None,
        volume_threshold: None,
        duration_threshold: None,
    };
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_telemetry_errors_mask_readings() {
        let telemetry: TelemetryData = serde_json::from_value(json!({
            "flow": 2500.0,
            "pressure": 1013.0,
            "waterTemperature": 18.5,
            "errors": ["pressure", "somethingNew"]
        }))
        .unwrap();

        assert_eq!(telemetry.valid_flow(), Some(2500.0));
        assert_eq!(telemetry.valid_pressure(), None);
        assert_eq!(telemetry.valid_temperature(), Some(18.5));
        assert!(telemetry.errors.contains(&TelemetryField::Other));
    }

    #[test]
    fn test_device_state_tolerates_missing_fields() {
        let state: DeviceState = serde_json::from_value(json!({
            "uptime": 1000,
            "waterMeter": { "volume": 1500 }
        }))
        .unwrap();

        assert_eq!(state.uptime, Some(1000));
        assert_eq!(state.power_supply, None);
        let meter = state.water_meter.unwrap();
        assert_eq!(meter.volume, Some(1500));
        assert_eq!(meter.duration, None);
    }

    #[test]
    fn test_report_timestamp() {
        let report: AutoShutOffReport = serde_json::from_value(json!({
            "type": "VOLUME_THRESHOLD",
            "volume": 1500,
            "duration": 30,
            "timestamp": 1700000000
        }))
        .unwrap();

        assert_eq!(report.event_type, "VOLUME_THRESHOLD");
        assert_eq!(
            report.occurred_at().unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
    }

    #[test]
    fn test_patch_only_serializes_set_fields() {
        let patch = AutoShutOffPatch {
            volume_threshold: Some(200),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({ "volumeThreshold": 200 })
        );
    }
}
