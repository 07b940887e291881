use crate::connection::Transport;
use crate::error::{Result, WaspError};
use crate::protocol::{Request, OBJECTS_PATH, SCHEMAS_PATH, STATUS_OK};
use crate::session::Session;
use crate::types::{
    value_to_text, ControlKey, DeviceFacts, DeviceObject, IoDir, IoType, LocationKey, ObjectId,
    PropertyBounds,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

const SW_DESC: &str = "device:sw_desc";
const HW_DESC: &str = "device:hw_desc";
const HW_STATUS: &str = "ctrl:hw_status";

/// Name of the software descriptor carrying the device firmware version
pub const FIRMWARE_DESCRIPTOR_NAME: &str = "Iyo Dante Firmware";

/// Snapshot of a device's objects and schemas with derived lookup maps
///
/// The snapshot never changes after it is built. Writes made through the
/// client, and changes seen on the update stream, are not reflected until
/// the index is loaded again.
#[derive(Debug, Clone, Default)]
pub struct ObjectIndex {
    objects: Vec<DeviceObject>,
    schemas: BTreeMap<String, Value>,
    /// Object id -> position in `objects`
    positions: HashMap<ObjectId, usize>,
    /// Location -> position of its `block:io` object
    locations: HashMap<LocationKey, usize>,
    /// (location, control type) -> position of the control object
    controls: HashMap<ControlKey, usize>,
    facts: DeviceFacts,
}

impl ObjectIndex {
    /// Fetch the objects and schemas collections and build the maps
    pub async fn load<T: Transport>(session: &mut Session<T>) -> Result<Self> {
        tracing::info!("Reading objects and schemas");

        let objects: Vec<DeviceObject> = fetch_collection(session, OBJECTS_PATH).await?;
        let schemas: BTreeMap<String, Value> = fetch_collection(session, SCHEMAS_PATH).await?;

        let index = Self::from_parts(objects, schemas);
        tracing::info!(
            "Indexed {} objects, {} schemas, {} locations, {} controls",
            index.objects.len(),
            index.schemas.len(),
            index.locations.len(),
            index.controls.len()
        );

        Ok(index)
    }

    /// Build an index from already-fetched collections
    pub fn from_parts(objects: Vec<DeviceObject>, schemas: BTreeMap<String, Value>) -> Self {
        let mut index = Self {
            objects,
            schemas,
            ..Self::default()
        };
        index.build_maps();
        index
    }

    /// Rebuild every derived map from the stored collections
    ///
    /// One pass in collection order. The first block seen for a location
    /// wins and later duplicates are ignored along with their members; the
    /// last occurrence of a singleton fact wins.
    pub fn build_maps(&mut self) {
        let mut positions = HashMap::with_capacity(self.objects.len());
        for (pos, obj) in self.objects.iter().enumerate() {
            positions.entry(obj.id).or_insert(pos);
        }

        let mut locations = HashMap::new();
        let mut controls = HashMap::new();
        let mut facts = DeviceFacts::default();

        for (pos, obj) in self.objects.iter().enumerate() {
            match obj.object_type.as_str() {
                SW_DESC if obj.str_property("name") == Some(FIRMWARE_DESCRIPTOR_NAME) => {
                    facts.firmware_version = obj.property("version").map(value_to_text);
                }
                HW_DESC => {
                    facts.serial_number = obj.property("serial_number").map(value_to_text);
                    facts.hardware_rev = obj.property("revision").map(value_to_text);
                    facts.model_id = obj.property("part_number").map(value_to_text);
                }
                HW_STATUS => {
                    facts.hardware_errors = obj.property("error_log").cloned();
                }
                _ => {}
            }

            if !obj.is_io_block() {
                continue;
            }
            let Some(location) = obj.io_location() else {
                tracing::trace!("Skipping block {} with unsupported location", obj.id);
                continue;
            };
            if locations.contains_key(&location) {
                tracing::debug!("Ignoring duplicate block {} for {}", obj.id, location);
                continue;
            }
            locations.insert(location, pos);

            if location.io_type == IoType::Analog && location.io_dir == IoDir::In {
                let label = obj.label().unwrap_or_default();
                if label.contains("Mic") {
                    facts.mic_input_channels.push(location.io_idx);
                }
                if label.contains("Line") {
                    facts.line_input_channels.push(location.io_idx);
                }
            }

            for member_id in obj.members() {
                let Some(&member_pos) = positions.get(&member_id) else {
                    tracing::warn!("Block {} lists unknown member {}", obj.id, member_id);
                    continue;
                };
                let key = ControlKey::new(location, self.objects[member_pos].object_type.clone());
                controls.entry(key).or_insert(member_pos);
            }
        }

        self.positions = positions;
        self.locations = locations;
        self.controls = controls;
        self.facts = facts;
    }

    /// Resolve a control of a port to its object
    pub fn resolve_control(
        &self,
        location: &LocationKey,
        control_type: &str,
    ) -> Result<&DeviceObject> {
        let key = ControlKey::new(*location, control_type);
        self.controls
            .get(&key)
            .map(|&pos| &self.objects[pos])
            .ok_or_else(|| WaspError::NotFound(format!("no control {}", key)))
    }

    /// Get the `block:io` object of a port
    pub fn block(&self, location: &LocationKey) -> Result<&DeviceObject> {
        self.locations
            .get(location)
            .map(|&pos| &self.objects[pos])
            .ok_or_else(|| WaspError::NotFound(format!("no block at {}", location)))
    }

    /// Get an object by id
    pub fn object(&self, id: ObjectId) -> Option<&DeviceObject> {
        self.positions.get(&id).map(|&pos| &self.objects[pos])
    }

    /// Read a property from the snapshot without contacting the device
    pub fn cached_property(&self, id: ObjectId, name: &str) -> Option<&Value> {
        self.object(id).and_then(|obj| obj.property(name))
    }

    /// All objects, in device order
    pub fn objects(&self) -> &[DeviceObject] {
        &self.objects
    }

    /// Objects of one type, in device order
    pub fn objects_of_type<'a>(
        &'a self,
        object_type: &'a str,
    ) -> impl Iterator<Item = &'a DeviceObject> + 'a {
        self.objects.iter().filter(move |obj| obj.object_type == object_type)
    }

    /// All schemas by name
    pub fn schemas(&self) -> &BTreeMap<String, Value> {
        &self.schemas
    }

    /// Get a schema by name
    pub fn schema(&self, name: &str) -> Option<&Value> {
        self.schemas.get(name)
    }

    /// Bounds and unit of one property of a schema
    pub fn property_bounds(&self, schema: &str, property: &str) -> Result<PropertyBounds> {
        let definition = self
            .schema(schema)
            .and_then(|s| s.get("properties"))
            .and_then(|p| p.get(property))
            .ok_or_else(|| {
                WaspError::NotFound(format!("no property '{}' in schema '{}'", property, schema))
            })?;

        Ok(serde_json::from_value(definition.clone())?)
    }

    /// Locations of every indexed port, sorted
    pub fn locations(&self) -> Vec<LocationKey> {
        let mut locations: Vec<LocationKey> = self.locations.keys().copied().collect();
        locations.sort();
        locations
    }

    /// Control types available on a port, in device member order
    pub fn control_types(&self, location: &LocationKey) -> Vec<&str> {
        let Ok(block) = self.block(location) else {
            return Vec::new();
        };
        block
            .members()
            .into_iter()
            .filter_map(|id| self.object(id))
            .map(|obj| obj.object_type.as_str())
            .collect()
    }

    /// Device facts collected from descriptor objects
    pub fn facts(&self) -> &DeviceFacts {
        &self.facts
    }
}

/// GET one bulk collection and decode it
///
/// A wrong status, a body that is not JSON and a body of the wrong shape
/// all fail as [`WaspError::Discovery`].
async fn fetch_collection<T, C>(session: &mut Session<T>, path: &str) -> Result<C>
where
    T: Transport,
    C: DeserializeOwned,
{
    let discovery = |status: u16, reason: String| WaspError::Discovery {
        path: path.to_string(),
        status,
        reason,
    };

    let response = match session.execute_with_retry(Request::get(path)).await {
        Ok(response) => response,
        Err(WaspError::Json(e)) => {
            return Err(discovery(STATUS_OK, format!("body is not JSON: {}", e)));
        }
        Err(e) => return Err(e),
    };
    if response.status != STATUS_OK {
        return Err(discovery(response.status, "unexpected status".to_string()));
    }

    serde_json::from_value(response.body).map_err(|e| {
        tracing::warn!("Unexpected {} collection shape: {}", path, e);
        discovery(STATUS_OK, format!("unexpected collection shape: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn objects(value: Value) -> Vec<DeviceObject> {
        serde_json::from_value(value).unwrap()
    }

    fn sample() -> ObjectIndex {
        let objects = objects(json!([
            { "_id": 0, "_type": "device:hw_desc", "serial_number": 2018, "revision": "Z9", "part_number": "ASI2703" },
            { "_id": 1, "_type": "block:io", "io_type": "analog", "io_dir": "in", "io_idx": 0,
              "label": "Mic/Line In 1", "members": [4, 5, 6] },
            { "_id": 2, "_type": "block:io", "io_type": "analog", "io_dir": "in", "io_idx": 0,
              "label": "Duplicate", "members": [7] },
            { "_id": 3, "_type": "block:io", "io_type": "analog", "io_dir": "in", "io_idx": 1,
              "label": "Line In 2", "members": [99] },
            { "_id": 4, "_type": "ctrl:phantom", "_schema": "phantom", "active": false },
            { "_id": 5, "_type": "ctrl:trim_level", "_schema": "trim_level", "level": 4 },
            { "_id": 6, "_type": "ctrl:mute", "active": false },
            { "_id": 7, "_type": "ctrl:trim_level", "level": 0 },
            { "_id": 8, "_type": "device:sw_desc", "name": "Iyo Dante Firmware", "version": "2.1.0" },
            { "_id": 9, "_type": "device:sw_desc", "name": "Bootloader", "version": "0.9" },
            { "_id": 10, "_type": "ctrl:hw_status", "error_log": ["fan"] },
            { "_id": 11, "_type": "device:hw_desc", "serial_number": "SN-2", "revision": "A1", "part_number": "ASI2704" }
        ]));
        let schemas: BTreeMap<String, Value> = serde_json::from_value(json!({
            "trim_level": {
                "properties": {
                    "level": { "type": "number", "minimum": -10, "maximum": 24, "wasp-unit": "dBu" }
                }
            }
        }))
        .unwrap();
        ObjectIndex::from_parts(objects, schemas)
    }

    fn analog_in(idx: u32) -> LocationKey {
        LocationKey::new("analog", "in", idx).unwrap()
    }

    #[test]
    fn resolves_control_to_member_object() {
        let index = sample();
        let obj = index.resolve_control(&analog_in(0), "ctrl:trim_level").unwrap();
        assert_eq!(obj.id, 5);
    }

    #[test]
    fn single_block_example_resolves() {
        let objects = objects(json!([
            { "_id": 0, "_type": "block:io", "io_type": "analog", "io_dir": "in", "io_idx": 0, "label": "In 1", "members": [5] },
            { "_id": 1, "_type": "ctrl:mute" },
            { "_id": 2, "_type": "ctrl:mute" },
            { "_id": 3, "_type": "ctrl:mute" },
            { "_id": 4, "_type": "ctrl:mute" },
            { "_id": 5, "_type": "ctrl:trim_level" }
        ]));
        let index = ObjectIndex::from_parts(objects, BTreeMap::new());

        let obj = index.resolve_control(&analog_in(0), "ctrl:trim_level").unwrap();
        assert_eq!(obj.id, 5);
    }

    #[test]
    fn missing_control_is_not_found() {
        let index = sample();
        assert!(index.resolve_control(&analog_in(0), "ctrl:gpo").unwrap_err().is_not_found());
        assert!(index
            .resolve_control(&analog_in(7), "ctrl:trim_level")
            .unwrap_err()
            .is_not_found());
        // block 3 only lists an unknown member
        assert!(index.resolve_control(&analog_in(1), "ctrl:trim_level").is_err());
    }

    #[test]
    fn first_block_for_a_location_wins() {
        let index = sample();
        assert_eq!(index.block(&analog_in(0)).unwrap().id, 1);
        // the duplicate block's member never enters the control map
        assert_eq!(index.resolve_control(&analog_in(0), "ctrl:trim_level").unwrap().id, 5);
    }

    #[test]
    fn last_singleton_fact_wins() {
        let facts = sample().facts().clone();
        assert_eq!(facts.serial_number.as_deref(), Some("SN-2"));
        assert_eq!(facts.hardware_rev.as_deref(), Some("A1"));
        assert_eq!(facts.model_id.as_deref(), Some("ASI2704"));
        assert_eq!(facts.firmware_version.as_deref(), Some("2.1.0"));
        assert_eq!(facts.hardware_errors, Some(json!(["fan"])));
        assert_eq!(facts.mic_input_channels, vec![0]);
        assert_eq!(facts.line_input_channels, vec![0, 1]);
    }

    #[test]
    fn build_maps_is_idempotent() {
        let mut index = sample();
        let locations = index.locations.clone();
        let controls = index.controls.clone();
        let facts = index.facts.clone();

        index.build_maps();

        assert_eq!(index.locations, locations);
        assert_eq!(index.controls, controls);
        assert_eq!(index.facts, facts);
    }

    #[test]
    fn schema_bounds_and_cached_properties() {
        let index = sample();
        let bounds = index.property_bounds("trim_level", "level").unwrap();
        assert_eq!(bounds.minimum, Some(-10.0));
        assert_eq!(bounds.maximum, Some(24.0));
        assert_eq!(bounds.unit.as_deref(), Some("dBu"));
        assert!(index.property_bounds("trim_level", "gain").unwrap_err().is_not_found());

        assert_eq!(index.cached_property(5, "level"), Some(&json!(4)));
        assert_eq!(index.cached_property(42, "level"), None);
    }

    #[test]
    fn lists_locations_and_control_types() {
        let index = sample();
        assert_eq!(index.locations(), vec![analog_in(0), analog_in(1)]);
        assert_eq!(
            index.control_types(&analog_in(0)),
            vec!["ctrl:phantom", "ctrl:trim_level", "ctrl:mute"]
        );
        assert_eq!(index.objects_of_type("device:sw_desc").count(), 2);
    }
}
