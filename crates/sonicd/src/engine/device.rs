use serde::Serialize;

/// A device in the sonicd system.
///
/// A device represents a physical device (a valve) that contains one or more entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    pub serial_number: Option<String>,
    pub entity_ids: Vec<String>,
}

impl Device {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            identifiers: Vec::new(),
            name,
            manufacturer: None,
            model: None,
            sw_version: None,
            serial_number: None,
            entity_ids: Vec::new(),
        }
    }

    pub fn add_entity(&mut self, entity_id: String) {
        if !self.entity_ids.contains(&entity_id) {
            self.entity_ids.push(entity_id);
        }
    }

    /// Replace the descriptive fields with those of `other`, keeping known entities.
    pub fn merge_from(&mut self, other: Device) {
        let entity_ids = std::mem::take(&mut self.entity_ids);
        *self = other;
        for entity_id in entity_ids {
            self.add_entity(entity_id);
        }
    }
}
