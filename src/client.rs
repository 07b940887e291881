use crate::connection::{HttpTransport, Transport, TransportConfig};
use crate::error::{Result, WaspError};
use crate::index::ObjectIndex;
use crate::protocol::{STATUS_ACCEPTED, UPDATE_STREAM_PATH};
use crate::session::Session;
use crate::subscription::{stream_request, StreamFilter, UpdateStream};
use crate::types::DeviceFacts;

/// Client for one WASP device
///
/// A `WaspClient` owns the authenticated session and a snapshot of the
/// device's object graph, read once at connect time. Control operations
/// resolve locations against that snapshot without touching the network;
/// call [`reload`](Self::reload) to pick up changes made since.
///
/// The client is meant for one caller at a time: every operation that can
/// refresh the credential takes `&mut self`.
pub struct WaspClient<T = HttpTransport> {
    pub(crate) session: Session<T>,
    pub(crate) index: ObjectIndex,
}

impl WaspClient<HttpTransport> {
    /// Connect to a device over plain HTTP and read its object graph
    ///
    /// The default port is 80.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use wasp_client::{LocationKey, WaspClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let mut client = WaspClient::connect("192.168.1.146", 80).await?;
    ///     let input = LocationKey::new("analog", "in", 4)?;
    ///     let phantom = client.get(&input, "ctrl:phantom").await?;
    ///     println!("{} {}", phantom.status, phantom.body);
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_with(&TransportConfig::new(host, port)?).await
    }

    /// Connect using an explicit transport configuration
    pub async fn connect_with(config: &TransportConfig) -> Result<Self> {
        tracing::info!("Connecting to {}", config.base_url);
        Self::with_transport(HttpTransport::new(config)?).await
    }
}

impl<T: Transport> WaspClient<T> {
    /// Build a client on any transport and read the object graph
    pub async fn with_transport(transport: T) -> Result<Self> {
        let mut session = Session::new(transport);
        let index = ObjectIndex::load(&mut session).await?;
        Ok(Self { session, index })
    }

    /// Build a client from a session and an index loaded earlier
    pub fn from_parts(session: Session<T>, index: ObjectIndex) -> Self {
        Self { session, index }
    }

    /// Re-read the objects and schemas and replace the snapshot
    ///
    /// The previous snapshot stays in place if the reload fails.
    pub async fn reload(&mut self) -> Result<()> {
        self.index = ObjectIndex::load(&mut self.session).await?;
        Ok(())
    }

    /// Get the object graph snapshot
    pub fn index(&self) -> &ObjectIndex {
        &self.index
    }

    /// Get the device facts from the snapshot
    pub fn facts(&self) -> &DeviceFacts {
        self.index.facts()
    }

    /// Get the session
    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// Get the session for explicit credential handling
    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    /// Open the object update stream
    ///
    /// Each filter becomes one request header. The device keeps no
    /// subscription state, so filters must be passed again on every call.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use wasp_client::{StreamFilter, WaspClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let mut client = WaspClient::connect("192.168.1.146", 80).await?;
    ///     let mut updates = client
    ///         .subscribe(&[StreamFilter::ExcludeObjectType("ctrl:meter".into())])
    ///         .await?;
    ///
    ///     while let Some(event) = updates.next_event().await {
    ///         println!("Update: {:?}", event?);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn subscribe(&mut self, filters: &[StreamFilter]) -> Result<UpdateStream> {
        let request = stream_request(UPDATE_STREAM_PATH, filters);
        let stream = self.session.open_stream_with_retry(request).await?;

        if stream.status != STATUS_ACCEPTED {
            return Err(WaspError::StreamRejected {
                status: stream.status,
            });
        }

        tracing::info!("Update stream opened with {} filter(s)", filters.len());
        Ok(UpdateStream::new(stream.lines))
    }
}
