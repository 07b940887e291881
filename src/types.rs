use crate::error::{Result, WaspError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Object identifier assigned by the device, stable within a session
pub type ObjectId = u64;

/// Object type tag of an I/O block
pub const BLOCK_IO: &str = "block:io";

/// One record of the device's flat object collection
///
/// Only the identity fields are typed; every other property is kept as JSON
/// because its shape depends on the object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceObject {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Type tag (e.g. "block:io", "ctrl:phantom", "device:hw_desc")
    #[serde(rename = "_type")]
    pub object_type: String,

    /// Name of the schema describing this object
    #[serde(rename = "_schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Type-dependent properties
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl DeviceObject {
    /// Get a property by name
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Get a string property by name
    pub fn str_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    /// Check whether this object is an I/O block
    pub fn is_io_block(&self) -> bool {
        self.object_type == BLOCK_IO
    }

    /// Get the block label, if any
    pub fn label(&self) -> Option<&str> {
        self.str_property("label")
    }

    /// Get the member ids of a block, in device order
    ///
    /// Entries that are not non-negative integers are skipped.
    pub fn members(&self) -> Vec<ObjectId> {
        self.properties
            .get("members")
            .and_then(Value::as_array)
            .map(|members| members.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default()
    }

    /// Location of an I/O block
    ///
    /// Returns `None` for non-block objects and for blocks whose `io_type`,
    /// `io_dir` or `io_idx` cannot form a valid [`LocationKey`].
    pub fn io_location(&self) -> Option<LocationKey> {
        if !self.is_io_block() {
            return None;
        }
        let io_type = self.str_property("io_type")?;
        let io_dir = self.str_property("io_dir")?;
        let io_idx = self
            .property("io_idx")
            .and_then(Value::as_u64)
            .and_then(|idx| u32::try_from(idx).ok())?;

        LocationKey::new(io_type, io_dir, io_idx).ok()
    }
}

/// Physical I/O type of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoType {
    Analog,
    Gpio,
    Avb,
}

impl IoType {
    /// Wire name of the I/O type
    pub fn as_str(&self) -> &'static str {
        match self {
            IoType::Analog => "analog",
            IoType::Gpio => "gpio",
            IoType::Avb => "avb",
        }
    }
}

impl FromStr for IoType {
    type Err = WaspError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "analog" => Ok(IoType::Analog),
            "gpio" => Ok(IoType::Gpio),
            "avb" => Ok(IoType::Avb),
            other => Err(WaspError::InvalidArgument(format!(
                "unsupported io_type '{}' (expected analog, gpio or avb)",
                other
            ))),
        }
    }
}

impl fmt::Display for IoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoDir {
    In,
    Out,
}

impl IoDir {
    /// Wire name of the direction
    pub fn as_str(&self) -> &'static str {
        match self {
            IoDir::In => "in",
            IoDir::Out => "out",
        }
    }
}

impl FromStr for IoDir {
    type Err = WaspError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in" => Ok(IoDir::In),
            "out" => Ok(IoDir::Out),
            other => Err(WaspError::InvalidArgument(format!(
                "unsupported io_dir '{}' (expected in or out)",
                other
            ))),
        }
    }
}

impl fmt::Display for IoDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical port location: `(io_type, io_dir, io_idx)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationKey {
    pub io_type: IoType,
    pub io_dir: IoDir,
    pub io_idx: u32,
}

impl LocationKey {
    /// Build a location key from wire names
    ///
    /// Fails with [`WaspError::InvalidArgument`] for an unknown type or
    /// direction. No lookup is attempted.
    ///
    /// # Example
    ///
    /// ```
    /// use wasp_client::LocationKey;
    ///
    /// let key = LocationKey::new("analog", "in", 4).unwrap();
    /// assert_eq!(key.to_string(), "analog,in,4");
    /// assert!(LocationKey::new("analog", "sideways", 0).is_err());
    /// ```
    pub fn new(io_type: &str, io_dir: &str, io_idx: u32) -> Result<Self> {
        Ok(Self {
            io_type: io_type.parse()?,
            io_dir: io_dir.parse()?,
            io_idx,
        })
    }

    /// Build a location key from already-validated parts
    pub const fn from_parts(io_type: IoType, io_dir: IoDir, io_idx: u32) -> Self {
        Self {
            io_type,
            io_dir,
            io_idx,
        }
    }
}

/// Parses the `type,dir,index` form, e.g. `analog,in,4`
impl FromStr for LocationKey {
    type Err = WaspError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [io_type, io_dir, io_idx] = parts.as_slice() else {
            return Err(WaspError::InvalidArgument(format!(
                "location '{}' is not of the form type,dir,index",
                s
            )));
        };
        let io_idx = io_idx.parse::<u32>().map_err(|_| {
            WaspError::InvalidArgument(format!("io_idx '{}' is not a non-negative integer", io_idx))
        })?;

        Self::new(io_type, io_dir, io_idx)
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.io_type, self.io_dir, self.io_idx)
    }
}

/// A specific control of a port's block
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlKey {
    pub location: LocationKey,
    /// Control object type, e.g. "ctrl:phantom"
    pub control_type: String,
}

impl ControlKey {
    pub fn new(location: LocationKey, control_type: impl Into<String>) -> Self {
        Self {
            location,
            control_type: control_type.into(),
        }
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.location, self.control_type)
    }
}

/// One entry of an atomic multi-control update
#[derive(Debug, Clone, PartialEq)]
pub struct ControlUpdate {
    pub key: ControlKey,
    /// Fields to change on the control
    pub update: Map<String, Value>,
}

impl ControlUpdate {
    pub fn new(
        location: LocationKey,
        control_type: impl Into<String>,
        update: Map<String, Value>,
    ) -> Self {
        Self {
            key: ControlKey::new(location, control_type),
            update,
        }
    }
}

/// Singleton facts extracted from the object collection
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceFacts {
    /// Firmware version from the firmware software descriptor
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
    pub hardware_rev: Option<String>,
    /// Part number from the hardware descriptor
    pub model_id: Option<String>,
    /// Error log reported by the hardware status control
    pub hardware_errors: Option<Value>,
    /// Analog input indices whose block label mentions "Mic"
    pub mic_input_channels: Vec<u32>,
    /// Analog input indices whose block label mentions "Line"
    pub line_input_channels: Vec<u32>,
}

/// Bounds and unit of one schema property
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyBounds {
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,

    /// Semantic unit annotation (e.g. "dBu")
    #[serde(default, rename = "wasp-unit")]
    pub unit: Option<String>,
}

impl PropertyBounds {
    /// Check whether a value lies within the bounds (missing bounds are open)
    pub fn contains(&self, value: f64) -> bool {
        self.minimum.map_or(true, |min| value >= min)
            && self.maximum.map_or(true, |max| value <= max)
    }
}

/// Render a scalar JSON value as text (strings without quotes)
pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn location_key_rejects_unknown_direction() {
        let err = LocationKey::new("analog", "sideways", 0).unwrap_err();
        assert!(matches!(err, WaspError::InvalidArgument(_)));
    }

    #[test]
    fn location_key_rejects_unknown_io_type() {
        let err = LocationKey::new("spdif", "in", 0).unwrap_err();
        assert!(matches!(err, WaspError::InvalidArgument(_)));
    }

    #[test]
    fn location_key_parses_comma_form() {
        let key: LocationKey = "analog, in, 4".parse().unwrap();
        assert_eq!(key, LocationKey::from_parts(IoType::Analog, IoDir::In, 4));
        assert_eq!(key.to_string(), "analog,in,4");

        assert!("analog,in".parse::<LocationKey>().is_err());
        assert!("analog,in,-1".parse::<LocationKey>().is_err());
    }

    #[test]
    fn device_object_keeps_untyped_properties() {
        let obj: DeviceObject = serde_json::from_value(json!({
            "_id": 3,
            "_type": "block:io",
            "_schema": "block_io",
            "io_type": "gpio",
            "io_dir": "out",
            "io_idx": 1,
            "label": "GPO 2",
            "members": [4, 5, "bogus"]
        }))
        .unwrap();

        assert_eq!(obj.id, 3);
        assert_eq!(obj.schema.as_deref(), Some("block_io"));
        assert_eq!(obj.label(), Some("GPO 2"));
        assert_eq!(obj.members(), vec![4, 5]);
        assert_eq!(
            obj.io_location(),
            Some(LocationKey::from_parts(IoType::Gpio, IoDir::Out, 1))
        );
    }

    #[test]
    fn io_location_is_none_for_unsupported_blocks() {
        let obj: DeviceObject = serde_json::from_value(json!({
            "_id": 0,
            "_type": "block:io",
            "io_type": "dante",
            "io_dir": "in",
            "io_idx": 0,
            "members": []
        }))
        .unwrap();
        assert_eq!(obj.io_location(), None);
    }

    #[test]
    fn property_bounds_are_open_when_missing() {
        let bounds = PropertyBounds {
            minimum: Some(-10.0),
            maximum: None,
            unit: Some("dBu".to_string()),
        };
        assert!(bounds.contains(100.0));
        assert!(!bounds.contains(-11.0));
    }
}
