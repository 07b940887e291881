// Control operations on `WaspClient`
//
// Locations are resolved against the loaded object index before any request
// is made; a failed lookup never reaches the device.

use crate::client::WaspClient;
use crate::connection::Transport;
use crate::error::Result;
use crate::protocol::{api_path, object_path, Request, Response, DEVICE_INFO_PATH, OBJECTS_PATH};
use crate::types::{ControlUpdate, LocationKey, ObjectId};
use serde_json::{Map, Value};

impl<T: Transport> WaspClient<T> {
    // ========== Controls by location ==========

    /// Read one control of a port
    ///
    /// Returns the device status and the full object. Statuses are passed
    /// through as sent; 200 and 202 both mean success.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use wasp_client::{LocationKey, WaspClient};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let mut client = WaspClient::connect("192.168.1.146", 80).await?;
    /// let input = LocationKey::new("analog", "in", 0)?;
    /// let level = client.get(&input, "ctrl:trim_level").await?;
    /// println!("level: {}", level.body["level"]);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get(&mut self, location: &LocationKey, control_type: &str) -> Result<Response> {
        let id = self.index.resolve_control(location, control_type)?.id;
        self.get_object(id).await
    }

    /// Update fields of one control of a port
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use wasp_client::{LocationKey, WaspClient};
    /// # use serde_json::json;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let mut client = WaspClient::connect("192.168.1.146", 80).await?;
    /// let input = LocationKey::new("analog", "in", 4)?;
    /// let update = json!({ "active": true }).as_object().cloned().unwrap_or_default();
    /// client.set(&input, "ctrl:phantom", update).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn set(
        &mut self,
        location: &LocationKey,
        control_type: &str,
        update: Map<String, Value>,
    ) -> Result<Response> {
        let id = self.index.resolve_control(location, control_type)?.id;
        self.set_object(id, update).await
    }

    /// Update several controls in one atomic request
    ///
    /// Every control is resolved before anything is sent, so one unknown
    /// control aborts the whole call without a request. Records are sent in
    /// the order given, each as `{"_id": id, ...fields}`.
    pub async fn set_many(&mut self, updates: &[ControlUpdate]) -> Result<Response> {
        let records = updates
            .iter()
            .map(|entry| {
                let id = self
                    .index
                    .resolve_control(&entry.key.location, &entry.key.control_type)?
                    .id;
                let mut record = Map::with_capacity(entry.update.len() + 1);
                record.insert("_id".to_string(), Value::from(id));
                record.extend(entry.update.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(Value::Object(record))
            })
            .collect::<Result<Vec<Value>>>()?;

        tracing::debug!("Bulk update of {} control(s)", records.len());
        self.session
            .execute_with_retry(Request::patch(OBJECTS_PATH, Value::Array(records)))
            .await
    }

    // ========== Objects by id ==========

    /// Read one object by id
    pub async fn get_object(&mut self, id: ObjectId) -> Result<Response> {
        self.session.execute_with_retry(Request::get(object_path(id))).await
    }

    /// Update fields of one object by id
    pub async fn set_object(
        &mut self,
        id: ObjectId,
        update: Map<String, Value>,
    ) -> Result<Response> {
        self.session
            .execute_with_retry(Request::patch(object_path(id), Value::Object(update)))
            .await
    }

    // ========== Raw paths ==========

    /// Read any path under the API root, e.g. `/device/info`
    pub async fn get_path(&mut self, path: &str) -> Result<Response> {
        self.session.execute_with_retry(Request::get(api_path(path))).await
    }

    /// Send a partial update to any path under the API root
    pub async fn patch_path(&mut self, path: &str, body: Value) -> Result<Response> {
        self.session
            .execute_with_retry(Request::patch(api_path(path), body))
            .await
    }

    /// Read the device information document
    pub async fn device_info(&mut self) -> Result<Response> {
        self.session.execute_with_retry(Request::get(DEVICE_INFO_PATH)).await
    }
}
