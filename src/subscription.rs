use crate::connection::LineStream;
use crate::error::{Result, WaspError};
use crate::protocol::{Request, EXCLUDE_OBJ_TYPE_HEADER, KEEP_ALIVE_LINE, MIN_UPDATE_PERIOD_HEADER};
use crate::types::ObjectId;
use futures_util::stream::{FusedStream, Stream, StreamExt};
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Record type of a single-object update
pub const UPDATE_OBJ: &str = "update:obj";

/// Record type of a one-property update across several objects
pub const UPDATE_GROUP_PREFIX: &str = "update:group_prefix";

/// Server-side filter applied to an update stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFilter {
    /// Throttle updates of one object type; both values are milliseconds
    MinUpdatePeriod {
        object_type: String,
        periods_ms: [u32; 2],
    },

    /// Leave one object type out of the stream
    ExcludeObjectType(String),

    /// Any other header to send with the stream request
    Header { name: String, value: String },
}

impl StreamFilter {
    /// Header name and value carrying this filter
    pub fn header(&self) -> (String, String) {
        match self {
            StreamFilter::MinUpdatePeriod {
                object_type,
                periods_ms: [first, second],
            } => (
                MIN_UPDATE_PERIOD_HEADER.to_string(),
                format!("{},{} {}", first, second, object_type),
            ),
            StreamFilter::ExcludeObjectType(object_type) => {
                (EXCLUDE_OBJ_TYPE_HEADER.to_string(), object_type.clone())
            }
            StreamFilter::Header { name, value } => (name.clone(), value.clone()),
        }
    }
}

/// Build the stream request carrying the given filters
pub(crate) fn stream_request(path: &str, filters: &[StreamFilter]) -> Request {
    filters.iter().fold(Request::get(path), |request, filter| {
        let (name, value) = filter.header();
        request.with_header(name, value)
    })
}

/// One decoded change record from the update stream
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent(pub Value);

/// One property change extracted from an [`UpdateEvent`]
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectChange {
    /// Object path relative to the API root, e.g. `/objects/12`
    pub path: String,
    pub property: String,
    pub value: Value,
}

impl UpdateEvent {
    /// The raw record
    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Record type (`_type`), if present
    pub fn record_type(&self) -> Option<&str> {
        self.0.get("_type").and_then(Value::as_str)
    }

    /// Flatten the record into per-object property changes
    ///
    /// Records of unknown type produce no changes.
    pub fn changes(&self) -> Vec<ObjectChange> {
        let body = match self.0.get("body").and_then(Value::as_object) {
            Some(body) => body,
            None => return Vec::new(),
        };

        match self.record_type() {
            Some(UPDATE_OBJ) => {
                let Some(path) = self.0.get("path").and_then(Value::as_str) else {
                    return Vec::new();
                };
                body.iter()
                    .map(|(property, value)| ObjectChange {
                        path: path.to_string(),
                        property: property.clone(),
                        value: value.clone(),
                    })
                    .collect()
            }
            Some(UPDATE_GROUP_PREFIX) => {
                let Some(property) = self.0.get("prop").and_then(Value::as_str) else {
                    return Vec::new();
                };
                group_changes(property, body)
            }
            _ => Vec::new(),
        }
    }
}

fn group_changes(property: &str, body: &Map<String, Value>) -> Vec<ObjectChange> {
    body.iter()
        .filter_map(|(id, value)| {
            let id: ObjectId = id.parse().ok()?;
            Some(ObjectChange {
                path: format!("/objects/{}", id),
                property: property.to_string(),
                value: value.clone(),
            })
        })
        .collect()
}

/// Decode one stream line; `None` for keep-alives and blank lines
pub(crate) fn decode_line(line: &str) -> Option<Result<UpdateEvent>> {
    let line = line.trim();
    if line.is_empty() || line == KEEP_ALIVE_LINE {
        return None;
    }
    Some(
        serde_json::from_str(line)
            .map(UpdateEvent)
            .map_err(WaspError::from),
    )
}

/// Lazy sequence of change events from an open update stream
///
/// The stream owns the connection. It ends for good after the connection
/// closes or after yielding its first error, and the connection is released
/// at that point; dropping the stream early releases it too. A new
/// subscription is needed to resume.
pub struct UpdateStream {
    lines: Option<LineStream>,
}

impl UpdateStream {
    pub(crate) fn new(lines: LineStream) -> Self {
        Self { lines: Some(lines) }
    }

    /// Receive the next change event
    ///
    /// Returns `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<Result<UpdateEvent>> {
        self.next().await
    }

    /// Check whether the connection is still held
    pub fn is_open(&self) -> bool {
        self.lines.is_some()
    }

    /// Close the connection now
    pub fn close(&mut self) {
        if self.lines.take().is_some() {
            tracing::debug!("Update stream closed by caller");
        }
    }
}

impl Stream for UpdateStream {
    type Item = Result<UpdateEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let Some(lines) = self.lines.as_mut() else {
                return Poll::Ready(None);
            };

            match lines.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    tracing::info!("Update stream ended");
                    self.lines = None;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::warn!("Update stream failed: {}", e);
                    self.lines = None;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Some(Ok(line))) => match decode_line(&line) {
                    None => continue,
                    Some(Ok(event)) => return Poll::Ready(Some(Ok(event))),
                    Some(Err(e)) => {
                        tracing::warn!("Undecodable update record: {}", e);
                        self.lines = None;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
            }
        }
    }
}

impl FusedStream for UpdateStream {
    fn is_terminated(&self) -> bool {
        self.lines.is_none()
    }
}

impl fmt::Debug for UpdateStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateStream")
            .field("open", &self.is_open())
            .finish()
    }
}
