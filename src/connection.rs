use crate::error::{Result, WaspError};
use crate::protocol::{Method, Request, Response};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt, TryStreamExt};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use url::Url;

/// Default HTTP port of WASP devices
pub const DEFAULT_PORT: u16 = 80;

/// Longest update stream line accepted before the stream fails
pub const MAX_STREAM_LINE_LENGTH: usize = 1024 * 1024;

const USER_AGENT: &str = concat!("wasp-client/", env!("CARGO_PKG_VERSION"));

/// Lines read from an open streaming reply, without line terminators
pub type LineStream = BoxStream<'static, Result<String>>;

/// Status and line reader of a streaming reply
///
/// Dropping the value closes the underlying connection.
pub struct StreamResponse {
    pub status: u16,
    pub lines: LineStream,
}

impl fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Issues single HTTP requests against one device
///
/// Implementations deal with the mechanics of HTTP (connections, TLS,
/// framing) and report every status back unchanged; interpreting statuses is
/// left to the session.
pub trait Transport: Send + Sync {
    /// Send a request and read the whole reply
    fn send(&self, request: Request) -> BoxFuture<'_, Result<Response>>;

    /// Send a request and hand back the reply as a stream of lines
    fn open_stream(&self, request: Request) -> BoxFuture<'_, Result<StreamResponse>>;
}

/// Settings for building the HTTP client
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Device root, e.g. `http://192.168.1.146:80/`
    pub base_url: Url,
    /// Whole-request timeout; leave unset when streaming updates
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub user_agent: String,
}

impl TransportConfig {
    /// Configuration for a device reachable over plain HTTP
    ///
    /// IPv6 literals may be given with or without brackets.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        if host.contains(':') && !host.starts_with('[') {
            Self::from_url(&format!("http://[{}]:{}/", host, port))
        } else {
            Self::from_url(&format!("http://{}:{}/", host, port))
        }
    }

    /// Configuration for an explicit device root URL
    pub fn from_url(url: &str) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(url)?,
            timeout: None,
            connect_timeout: None,
            user_agent: USER_AGENT.to_string(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build a `reqwest::Client` from this config
    pub fn build_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().user_agent(self.user_agent.as_str());

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        Ok(builder.build()?)
    }
}

/// [`Transport`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Create a transport from a config
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            http: config.build_client()?,
            base_url: config.base_url.clone(),
        })
    }

    /// Create a transport with a pre-built `reqwest::Client`
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The device root URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn builder(&self, request: &Request) -> Result<reqwest::RequestBuilder> {
        let url = self.base_url.join(&request.path)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
        };

        let mut builder = self.http.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        Ok(builder)
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
        async move {
            let builder = self.builder(&request)?;
            tracing::debug!("{} {}", request.method.as_str(), request.path);

            let resp = builder.send().await?;
            let status = resp.status().as_u16();
            let bytes = resp.bytes().await?;
            tracing::trace!(
                "{} {} -> {} ({} bytes)",
                request.method.as_str(),
                request.path,
                status,
                bytes.len()
            );

            Response::decode(status, &bytes)
        }
        .boxed()
    }

    fn open_stream(&self, request: Request) -> BoxFuture<'_, Result<StreamResponse>> {
        async move {
            let builder = self.builder(&request)?;
            tracing::debug!("{} {} (stream)", request.method.as_str(), request.path);

            let resp = builder.send().await?;
            let status = resp.status().as_u16();

            let reader = StreamReader::new(resp.bytes_stream().map_err(io::Error::other));
            let codec = LinesCodec::new_with_max_length(MAX_STREAM_LINE_LENGTH);
            let lines = FramedRead::new(reader, codec)
                .map_err(|e| match e {
                    LinesCodecError::Io(e) => stream_read_error(e),
                    LinesCodecError::MaxLineLengthExceeded => WaspError::Stream(format!(
                        "line longer than {} bytes",
                        MAX_STREAM_LINE_LENGTH
                    )),
                })
                .boxed();

            Ok(StreamResponse { status, lines })
        }
        .boxed()
    }
}

/// Unwrap a `reqwest` error that surfaced through the line reader
fn stream_read_error(e: io::Error) -> WaspError {
    if !e.get_ref().is_some_and(|inner| inner.is::<reqwest::Error>()) {
        return WaspError::Io(e);
    }
    let kind = e.kind();
    match e.into_inner().map(|inner| inner.downcast::<reqwest::Error>()) {
        Some(Ok(err)) => WaspError::Transport(*err),
        Some(Err(inner)) => WaspError::Io(io::Error::new(kind, inner)),
        None => WaspError::Io(kind.into()),
    }
}
