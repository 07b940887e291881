use crate::error::Result;
use crate::types::ObjectId;
use serde_json::Value;

/// Prefix of the request/response API
pub const API_PREFIX: &str = "/wasp/r2";

/// Challenge endpoint issuing session credentials
pub const AUTH_PATH: &str = "/wasp/r2/device/auth";

/// Bulk object collection
pub const OBJECTS_PATH: &str = "/wasp/r2/objects";

/// Schema collection
pub const SCHEMAS_PATH: &str = "/wasp/r2/schemas";

/// Device information document
pub const DEVICE_INFO_PATH: &str = "/wasp/r2/device/info";

/// Long-lived object update stream
pub const UPDATE_STREAM_PATH: &str = "/wasp/u2/objects";

/// Authorization scheme sent with every auth-related header
pub const AUTH_SCHEME: &str = "Hawk";

/// Throttles updates for one object type: `<ms>,<ms> <type>`
pub const MIN_UPDATE_PERIOD_HEADER: &str = "X-Wasp-Stream-Min-Update-Period";

/// Removes one object type from the update stream
pub const EXCLUDE_OBJ_TYPE_HEADER: &str = "X-Wasp-Stream-Exclude-Obj-Type";

/// Keep-alive line on the update stream
pub const KEEP_ALIVE_LINE: &str = "---";

pub const STATUS_OK: u16 = 200;
/// Deferred success, and the "stream accepted" status of the update endpoint
pub const STATUS_ACCEPTED: u16 = 202;
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// Path of a single object
pub fn object_path(id: ObjectId) -> String {
    format!("{}/{}", OBJECTS_PATH, id)
}

/// Prefix a path relative to the API root, e.g. `/device/info`
///
/// Paths that already carry the prefix are returned unchanged.
pub fn api_path(path: &str) -> String {
    if path.starts_with(API_PREFIX) {
        path.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", API_PREFIX, path)
    } else {
        format!("{}/{}", API_PREFIX, path)
    }
}

/// HTTP methods used by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
        }
    }
}

/// One request to the device
///
/// Requests are plain values so a refused request can be replayed verbatim
/// after re-authentication.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Absolute path on the device, e.g. `/wasp/r2/objects/5`
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Request {
    /// Create a new request with the given method and path
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path).with_body(body)
    }

    /// Append a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the JSON body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Look up a header value (case-insensitive name)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and decoded body of a device reply
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    /// Decoded JSON body; `null` when the device sent nothing
    pub body: Value,
}

impl Response {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Decode a raw reply body
    ///
    /// An empty body decodes to `null`. A success body must be JSON; any
    /// other status keeps a non-JSON body as a string so the status still
    /// reaches the caller.
    pub fn decode(status: u16, bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new(status, Value::Null));
        }

        match serde_json::from_slice(bytes) {
            Ok(body) => Ok(Self::new(status, body)),
            Err(_) if !(200..300).contains(&status) => Ok(Self::new(
                status,
                Value::String(String::from_utf8_lossy(bytes).into_owned()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// 2xx; the device uses both 200 (done) and 202 (accepted)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == STATUS_UNAUTHORIZED
    }
}

impl From<Response> for (u16, Value) {
    fn from(response: Response) -> Self {
        (response.status, response.body)
    }
}
