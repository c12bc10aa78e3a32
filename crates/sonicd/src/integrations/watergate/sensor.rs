use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use tracing::debug;

use super::coordinator::Coordinator;
use super::coordinator::Snapshot;
use super::entity::DeviceContext;
use super::models::AutoShutOffReport;
use crate::engine::DeviceClass;
use crate::engine::Entity;
use crate::engine::EntityCategory;
use crate::engine::EntityDescriptor;
use crate::engine::EntityState;
use crate::engine::Platform;
use crate::engine::StateValue;

/// Static description of a read-only sensor and how it reads its value from a snapshot
pub struct SensorDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub category: Option<EntityCategory>,
    pub value_fn: fn(&Snapshot) -> Option<StateValue>,
}

impl std::fmt::Debug for SensorDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorDescription")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

pub const SENSORS: &[SensorDescription] = &[
    SensorDescription {
        key: "water_meter_volume",
        name: "Water meter volume",
        unit: Some("mL"),
        device_class: Some(DeviceClass::Volume),
        category: None,
        value_fn: water_meter_volume,
    },
    SensorDescription {
        key: "water_meter_duration",
        name: "Water meter duration",
        unit: Some("ms"),
        device_class: Some(DeviceClass::Duration),
        category: None,
        value_fn: water_meter_duration,
    },
    SensorDescription {
        key: "ip",
        name: "IP address",
        unit: None,
        device_class: None,
        category: Some(EntityCategory::Diagnostic),
        value_fn: ip,
    },
    SensorDescription {
        key: "gateway",
        name: "Gateway address",
        unit: None,
        device_class: None,
        category: Some(EntityCategory::Diagnostic),
        value_fn: gateway,
    },
    SensorDescription {
        key: "subnet",
        name: "Subnet",
        unit: None,
        device_class: None,
        category: Some(EntityCategory::Diagnostic),
        value_fn: subnet,
    },
    SensorDescription {
        key: "ssid",
        name: "SSID",
        unit: None,
        device_class: None,
        category: Some(EntityCategory::Diagnostic),
        value_fn: ssid,
    },
    SensorDescription {
        key: "rssi",
        name: "RSSI",
        unit: Some("dBm"),
        device_class: Some(DeviceClass::SignalStrength),
        category: Some(EntityCategory::Diagnostic),
        value_fn: rssi,
    },
    SensorDescription {
        key: "wifi_uptime",
        name: "WIFI Uptime",
        unit: Some("ms"),
        device_class: Some(DeviceClass::Duration),
        category: Some(EntityCategory::Diagnostic),
        value_fn: wifi_uptime,
    },
    SensorDescription {
        key: "mqtt_uptime",
        name: "MQTT Uptime",
        unit: Some("ms"),
        device_class: Some(DeviceClass::Duration),
        category: Some(EntityCategory::Diagnostic),
        value_fn: mqtt_uptime,
    },
    SensorDescription {
        key: "water_temperature",
        name: "Water temperature",
        unit: Some("°C"),
        device_class: Some(DeviceClass::Temperature),
        category: None,
        value_fn: water_temperature,
    },
    SensorDescription {
        key: "water_pressure",
        name: "Water pressure",
        unit: Some("mbar"),
        device_class: Some(DeviceClass::Pressure),
        category: None,
        value_fn: water_pressure,
    },
    SensorDescription {
        key: "water_flow_rate",
        name: "Water flow rate",
        unit: Some("L/min"),
        device_class: Some(DeviceClass::VolumeFlowRate),
        category: None,
        value_fn: water_flow_rate,
    },
    SensorDescription {
        key: "uptime",
        name: "Uptime",
        unit: Some("ms"),
        device_class: Some(DeviceClass::Duration),
        category: Some(EntityCategory::Diagnostic),
        value_fn: uptime,
    },
    SensorDescription {
        key: "power_supply",
        name: "Power supply",
        unit: None,
        device_class: None,
        category: Some(EntityCategory::Diagnostic),
        value_fn: power_supply,
    },
    SensorDescription {
        key: "wifi_status",
        name: "Wifi connection",
        unit: None,
        device_class: None,
        category: Some(EntityCategory::Diagnostic),
        value_fn: wifi_status,
    },
    SensorDescription {
        key: "mqtt_status",
        name: "MQTT connection",
        unit: None,
        device_class: None,
        category: Some(EntityCategory::Diagnostic),
        value_fn: mqtt_status,
    },
    SensorDescription {
        key: "water_flowing",
        name: "Water flowing",
        unit: None,
        device_class: None,
        category: None,
        value_fn: water_flowing,
    },
];

fn water_meter_volume(data: &Snapshot) -> Option<StateValue> {
    data.state.as_ref()?.water_meter.as_ref()?.volume.map(StateValue::from)
}

fn water_meter_duration(data: &Snapshot) -> Option<StateValue> {
    data.state.as_ref()?.water_meter.as_ref()?.duration.map(StateValue::from)
}

fn ip(data: &Snapshot) -> Option<StateValue> {
    data.networking.as_ref()?.ip.as_deref().map(StateValue::from)
}

fn gateway(data: &Snapshot) -> Option<StateValue> {
    data.networking.as_ref()?.gateway.as_deref().map(StateValue::from)
}

fn subnet(data: &Snapshot) -> Option<StateValue> {
    data.networking.as_ref()?.subnet.as_deref().map(StateValue::from)
}

fn ssid(data: &Snapshot) -> Option<StateValue> {
    data.networking.as_ref()?.ssid.as_deref().map(StateValue::from)
}

fn rssi(data: &Snapshot) -> Option<StateValue> {
    data.networking.as_ref()?.rssi.map(StateValue::from)
}

fn wifi_uptime(data: &Snapshot) -> Option<StateValue> {
    data.networking.as_ref()?.wifi_uptime.map(StateValue::from)
}

fn mqtt_uptime(data: &Snapshot) -> Option<StateValue> {
    data.networking.as_ref()?.mqtt_uptime.map(StateValue::from)
}

fn water_temperature(data: &Snapshot) -> Option<StateValue> {
    data.telemetry.as_ref()?.valid_temperature().map(StateValue::from)
}

fn water_pressure(data: &Snapshot) -> Option<StateValue> {
    data.telemetry.as_ref()?.valid_pressure().map(StateValue::from)
}

/// The device reports mL/min
fn water_flow_rate(data: &Snapshot) -> Option<StateValue> {
    data.telemetry
        .as_ref()?
        .valid_flow()
        .map(|flow| StateValue::from(flow / 1000.0))
}

fn uptime(data: &Snapshot) -> Option<StateValue> {
    data.state.as_ref()?.uptime.map(StateValue::from)
}

fn power_supply(data: &Snapshot) -> Option<StateValue> {
    data.state.as_ref()?.power_supply.as_deref().map(StateValue::from)
}

fn wifi_status(data: &Snapshot) -> Option<StateValue> {
    data.state
        .as_ref()
        .and_then(|state| state.wifi_status)
        .or_else(|| data.networking.as_ref()?.wifi_connected)
        .map(StateValue::from)
}

fn mqtt_status(data: &Snapshot) -> Option<StateValue> {
    data.state
        .as_ref()
        .and_then(|state| state.mqtt_status)
        .or_else(|| data.networking.as_ref()?.mqtt_connected)
        .map(StateValue::from)
}

fn water_flowing(data: &Snapshot) -> Option<StateValue> {
    data.state.as_ref()?.water_flow_indicator.map(StateValue::from)
}

/// A sensor that mirrors one field of the latest snapshot
#[derive(Debug)]
pub struct SonicSensor {
    descriptor: EntityDescriptor,
    description: &'static SensorDescription,
    value: Option<StateValue>,
    available: bool,
}

impl SonicSensor {
    pub fn new(ctx: &DeviceContext, description: &'static SensorDescription) -> Self {
        let mut descriptor = ctx.descriptor(Platform::Sensor, description.key, description.name);
        descriptor.unit = description.unit.map(str::to_string);
        descriptor.device_class = description.device_class;
        descriptor.category = description.category;
        Self {
            descriptor,
            description,
            value: None,
            available: false,
        }
    }

    pub fn handle_coordinator_update(&mut self, coordinator: &Coordinator) {
        self.available = coordinator.last_update_success();
        self.value = coordinator
            .data()
            .and_then(|data| (self.description.value_fn)(&data));
    }
}

impl Entity for SonicSensor {
    fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    fn state(&self) -> EntityState {
        EntityState::new(self.value.clone(), self.available)
    }
}

/// Time and details of the most recent auto shut-off
///
/// Unlike the other sensors it keeps showing the last event when a cycle carries no report.
#[derive(Debug)]
pub struct AutoShutOffEventSensor {
    descriptor: EntityDescriptor,
    occurred_at: Option<DateTime<Utc>>,
    attributes: BTreeMap<String, serde_json::Value>,
    available: bool,
}

impl AutoShutOffEventSensor {
    pub fn new(ctx: &DeviceContext) -> Self {
        let mut descriptor = ctx.descriptor(
            Platform::Sensor,
            "auto_shut_off_event",
            "Last Auto Shut off event",
        );
        descriptor.device_class = Some(DeviceClass::Timestamp);
        Self {
            descriptor,
            occurred_at: None,
            attributes: BTreeMap::new(),
            available: false,
        }
    }

    pub fn handle_coordinator_update(&mut self, coordinator: &Coordinator) {
        self.available = coordinator.last_update_success();
        if !self.available {
            return;
        }
        if let Some(report) = coordinator
            .data()
            .and_then(|data| data.auto_shut_off_report.clone())
        {
            self.update(&report);
        }
    }

    /// A report whose time cannot be shown is ignored and the previous event stays
    fn update(&mut self, report: &AutoShutOffReport) {
        let Some(occurred_at) = report.occurred_at() else {
            debug!(
                "ignoring auto shut-off report with out of range timestamp {}",
                report.timestamp
            );
            return;
        };
        self.occurred_at = Some(occurred_at);
        self.attributes = BTreeMap::from([
            ("type".to_string(), serde_json::Value::from(report.event_type.clone())),
            ("duration".to_string(), serde_json::Value::from(report.duration)),
            ("volume".to_string(), serde_json::Value::from(report.volume)),
        ]);
    }
}

impl Entity for AutoShutOffEventSensor {
    fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    fn state(&self) -> EntityState {
        EntityState {
            value: self.occurred_at.map(StateValue::from),
            attributes: self.attributes.clone(),
            available: self.available,
        }
    }
}
