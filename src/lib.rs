//! Rust library for controlling AudioScience devices over the WASP protocol
//!
//! WASP devices expose a flat, indexed collection of typed objects (I/O
//! blocks, controls, device descriptors) over HTTP. This library provides an
//! async API for working with them:
//!
//! - Challenge-based session authentication with transparent renewal
//! - Discovery of the object and schema collections
//! - Resolution of port locations (`analog,in,4`) and control types
//!   (`ctrl:phantom`) to object ids
//! - Control reads, partial updates and atomic multi-control updates
//! - Filtered change-notification streams
//!
//! # Quick Start
//!
//! ```no_run
//! use serde_json::json;
//! use wasp_client::{ControlUpdate, LocationKey, WaspClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect and read the object graph
//!     let mut client = WaspClient::connect("192.168.1.146", 80).await?;
//!     println!("Firmware: {:?}", client.facts().firmware_version);
//!
//!     // Read and write one control
//!     let input = LocationKey::new("analog", "in", 0)?;
//!     let level = client.get(&input, "ctrl:trim_level").await?;
//!     println!("Level: {}", level.body["level"]);
//!
//!     let update = json!({ "level": 7 }).as_object().cloned().unwrap_or_default();
//!     client.set(&input, "ctrl:trim_level", update).await?;
//!
//!     // Change phantom power and level in one request
//!     let phantom_off = json!({ "active": false }).as_object().cloned().unwrap_or_default();
//!     let level_24 = json!({ "level": 24 }).as_object().cloned().unwrap_or_default();
//!     client
//!         .set_many(&[
//!             ControlUpdate::new(input, "ctrl:phantom", phantom_off),
//!             ControlUpdate::new(input, "ctrl:trim_level", level_24),
//!         ])
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Update Stream
//!
//! ```no_run
//! use wasp_client::{StreamFilter, WaspClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = WaspClient::connect("192.168.1.146", 80).await?;
//!
//!     // Meter updates at most once a second
//!     let mut updates = client
//!         .subscribe(&[StreamFilter::MinUpdatePeriod {
//!             object_type: "ctrl:meter".into(),
//!             periods_ms: [1000, 100],
//!         }])
//!         .await?;
//!
//!     while let Some(event) = updates.next_event().await {
//!         for change in event?.changes() {
//!             println!("{} {} = {}", change.path, change.property, change.value);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Client**: `WaspClient`, the session plus the object snapshot
//! - **Control**: location-based reads and writes
//! - **Index**: object/schema snapshot and lookup maps
//! - **Session**: credential handling and the single-retry rule on 401
//! - **Subscription**: update stream decoding
//! - **Connection**: the `Transport` seam and its `reqwest` implementation
//! - **Protocol**: paths, headers and request/response values
//! - **Types**: domain types

mod client;
mod connection;
mod control;
mod error;
mod index;
mod protocol;
mod session;
mod subscription;
mod types;

// Public exports
pub use client::WaspClient;
pub use connection::{
    HttpTransport, LineStream, StreamResponse, Transport, TransportConfig, DEFAULT_PORT,
    MAX_STREAM_LINE_LENGTH,
};
pub use error::{Result, WaspError};
pub use index::{ObjectIndex, FIRMWARE_DESCRIPTOR_NAME};
pub use protocol::{
    api_path, object_path, Method, Request, Response, AUTH_PATH, DEVICE_INFO_PATH,
    EXCLUDE_OBJ_TYPE_HEADER, MIN_UPDATE_PERIOD_HEADER, OBJECTS_PATH, SCHEMAS_PATH, STATUS_ACCEPTED,
    STATUS_OK, STATUS_UNAUTHORIZED, UPDATE_STREAM_PATH,
};
pub use session::{Credential, Session};
pub use subscription::{ObjectChange, StreamFilter, UpdateEvent, UpdateStream};
pub use types::{
    ControlKey, ControlUpdate, DeviceFacts, DeviceObject, IoDir, IoType, LocationKey, ObjectId,
    PropertyBounds,
};
