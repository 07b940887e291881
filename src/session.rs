use crate::connection::{StreamResponse, Transport};
use crate::error::{Result, WaspError};
use crate::protocol::{Request, Response, AUTH_PATH, AUTH_SCHEME, STATUS_OK, STATUS_UNAUTHORIZED};
use crate::types::value_to_text;
use std::fmt;

/// Session identifier issued by the device's auth endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Value of the `Authorization` header carrying this credential
    pub fn authorization(&self) -> String {
        format!("{} id=\"{}\"", AUTH_SCHEME, self.0)
    }
}

// Keeps the identifier out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(..)")
    }
}

/// Authenticated exchange with one device
///
/// Holds the transport and the current credential. The credential starts
/// out absent, is obtained the first time the device answers 401, and is
/// replaced in place whenever the device answers 401 again.
pub struct Session<T> {
    transport: T,
    credential: Option<Credential>,
}

impl<T: Transport> Session<T> {
    /// Create a session without a credential
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            credential: None,
        }
    }

    /// Get the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get the credential currently held, if any
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Forget the current credential
    pub fn clear_credential(&mut self) {
        self.credential = None;
    }

    /// Return the held credential, authenticating only if there is none
    pub async fn ensure_authenticated(&mut self) -> Result<Credential> {
        if let Some(credential) = &self.credential {
            return Ok(credential.clone());
        }
        self.authenticate().await
    }

    /// Request a fresh credential and store it
    pub async fn authenticate(&mut self) -> Result<Credential> {
        tracing::debug!("Requesting session credential from {}", AUTH_PATH);

        let request = Request::post(AUTH_PATH).with_header("Authorization", AUTH_SCHEME);
        let response = self.transport.send(request).await?;

        if response.status != STATUS_OK {
            return Err(WaspError::Auth(format!(
                "{} returned HTTP {}",
                AUTH_PATH, response.status
            )));
        }

        let id = response
            .body
            .get("id")
            .filter(|id| id.is_string() || id.is_number())
            .map(value_to_text)
            .ok_or_else(|| WaspError::Auth("auth response carries no id".to_string()))?;

        let credential = Credential::new(id);
        self.credential = Some(credential.clone());
        tracing::info!("Obtained session credential");

        Ok(credential)
    }

    /// Send a request, re-authenticating and retrying once on 401
    ///
    /// The retried request is the original one with only its
    /// `Authorization` header replaced. A second 401 fails with
    /// [`WaspError::AuthRetryExhausted`]; every other status is returned
    /// unchanged.
    pub async fn execute_with_retry(&mut self, request: Request) -> Result<Response> {
        let response = self.transport.send(self.authorize(&request)).await?;
        if response.status != STATUS_UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!(
            "{} {} requires authorization, re-authenticating",
            request.method.as_str(),
            request.path
        );
        self.authenticate().await?;

        let response = self.transport.send(self.authorize(&request)).await?;
        if response.status == STATUS_UNAUTHORIZED {
            return Err(WaspError::AuthRetryExhausted { path: request.path });
        }

        Ok(response)
    }

    /// Streaming counterpart of [`execute_with_retry`](Self::execute_with_retry)
    pub async fn open_stream_with_retry(&mut self, request: Request) -> Result<StreamResponse> {
        let stream = self.transport.open_stream(self.authorize(&request)).await?;
        if stream.status != STATUS_UNAUTHORIZED {
            return Ok(stream);
        }
        drop(stream);

        tracing::info!("{} (stream) requires authorization, re-authenticating", request.path);
        self.authenticate().await?;

        let stream = self.transport.open_stream(self.authorize(&request)).await?;
        if stream.status == STATUS_UNAUTHORIZED {
            return Err(WaspError::AuthRetryExhausted { path: request.path });
        }

        Ok(stream)
    }

    /// Copy of the request carrying the current credential, if any
    fn authorize(&self, request: &Request) -> Request {
        let mut request = request.clone();
        request
            .headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case("Authorization"));
        if let Some(credential) = &self.credential {
            request
                .headers
                .push(("Authorization".to_string(), credential.authorization()));
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LineStream;
    use futures_util::future::BoxFuture;
    use futures_util::{stream, FutureExt, StreamExt};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned statuses and records every request
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Response>>,
        sent: Mutex<Vec<Request>>,
    }

    impl Scripted {
        fn new(replies: Vec<Response>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<Request> {
            self.sent.lock().unwrap().clone()
        }

        fn next(&self, request: Request) -> Response {
            self.sent.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request")
        }
    }

    impl Transport for Scripted {
        fn send(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
            let response = self.next(request);
            async move { Ok(response) }.boxed()
        }

        fn open_stream(&self, request: Request) -> BoxFuture<'_, Result<StreamResponse>> {
            let response = self.next(request);
            let lines: LineStream = stream::empty().boxed();
            async move {
                Ok(StreamResponse {
                    status: response.status,
                    lines,
                })
            }
            .boxed()
        }
    }

    fn auth_ok(id: Value) -> Response {
        Response::new(200, json!({ "id": id }))
    }

    #[tokio::test]
    async fn first_request_goes_out_without_credential() {
        let mut session = Session::new(Scripted::new(vec![Response::new(200, json!([]))]));

        let resp = session.execute_with_retry(Request::get("/wasp/r2/objects")).await.unwrap();

        assert_eq!(resp.status, 200);
        let sent = session.transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header("Authorization"), None);
    }

    #[tokio::test]
    async fn unauthorized_triggers_exactly_one_reauth_and_retry() {
        let mut session = Session::new(Scripted::new(vec![
            Response::new(401, Value::Null),
            auth_ok(json!("abc123")),
            Response::new(202, Value::Null),
        ]));

        let request = Request::patch("/wasp/r2/objects/5", json!({ "level": 7 }));
        let resp = session.execute_with_retry(request.clone()).await.unwrap();

        assert_eq!(resp.status, 202);
        let sent = session.transport().sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].path, AUTH_PATH);
        assert_eq!(sent[1].header("Authorization"), Some("Hawk"));

        let retried = &sent[2];
        assert_eq!(retried.method, request.method);
        assert_eq!(retried.path, request.path);
        assert_eq!(retried.body, request.body);
        assert_eq!(retried.header("Authorization"), Some("Hawk id=\"abc123\""));
    }

    #[tokio::test]
    async fn second_unauthorized_is_not_retried() {
        let mut session = Session::new(Scripted::new(vec![
            Response::new(401, Value::Null),
            auth_ok(json!("abc123")),
            Response::new(401, Value::Null),
        ]));

        let err = session
            .execute_with_retry(Request::get("/wasp/r2/objects/1"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WaspError::AuthRetryExhausted { ref path } if path == "/wasp/r2/objects/1"
        ));
        assert_eq!(session.transport().sent().len(), 3);
    }

    #[tokio::test]
    async fn credential_is_replaced_in_place() {
        let mut session = Session::new(Scripted::new(vec![
            Response::new(401, Value::Null),
            auth_ok(json!("first")),
            Response::new(200, Value::Null),
            Response::new(200, Value::Null),
            Response::new(401, Value::Null),
            auth_ok(json!(42)),
            Response::new(200, Value::Null),
        ]));

        session.execute_with_retry(Request::get("/wasp/r2/a")).await.unwrap();
        session.execute_with_retry(Request::get("/wasp/r2/b")).await.unwrap();
        assert_eq!(session.credential().map(Credential::id), Some("first"));

        session.execute_with_retry(Request::get("/wasp/r2/c")).await.unwrap();
        assert_eq!(session.credential().map(Credential::id), Some("42"));

        let sent = session.transport().sent();
        assert_eq!(sent[3].header("Authorization"), Some("Hawk id=\"first\""));
        assert_eq!(sent[4].header("Authorization"), Some("Hawk id=\"first\""));
        assert_eq!(sent[6].header("Authorization"), Some("Hawk id=\"42\""));
    }

    #[tokio::test]
    async fn auth_endpoint_rejection_is_auth_error() {
        let mut session = Session::new(Scripted::new(vec![
            Response::new(401, Value::Null),
            Response::new(403, Value::Null),
        ]));

        let err = session
            .execute_with_retry(Request::get("/wasp/r2/objects"))
            .await
            .unwrap_err();

        assert!(matches!(err, WaspError::Auth(_)));
        assert!(session.credential().is_none());
    }

    #[tokio::test]
    async fn auth_response_without_id_is_auth_error() {
        let mut session = Session::new(Scripted::new(vec![Response::new(200, json!({}))]));
        assert!(matches!(session.authenticate().await, Err(WaspError::Auth(_))));
    }

    #[tokio::test]
    async fn ensure_authenticated_reuses_held_credential() {
        let mut session = Session::new(Scripted::new(vec![auth_ok(json!("abc"))]));

        let first = session.ensure_authenticated().await.unwrap();
        let second = session.ensure_authenticated().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(session.transport().sent().len(), 1);
    }

    #[tokio::test]
    async fn stream_open_retries_once_on_unauthorized() {
        let mut session = Session::new(Scripted::new(vec![
            Response::new(401, Value::Null),
            auth_ok(json!("s1")),
            Response::new(202, Value::Null),
        ]));

        let request = Request::get("/wasp/u2/objects")
            .with_header("X-Wasp-Stream-Exclude-Obj-Type", "ctrl:meter");
        let stream = session.open_stream_with_retry(request).await.unwrap();

        assert_eq!(stream.status, 202);
        let sent = session.transport().sent();
        assert_eq!(sent[2].header("X-Wasp-Stream-Exclude-Obj-Type"), Some("ctrl:meter"));
        assert_eq!(sent[2].header("Authorization"), Some("Hawk id=\"s1\""));
    }

    #[tokio::test]
    async fn stream_open_second_unauthorized_is_not_retried() {
        let mut session = Session::new(Scripted::new(vec![
            Response::new(401, Value::Null),
            auth_ok(json!("s1")),
            Response::new(401, Value::Null),
        ]));

        let err = session
            .open_stream_with_retry(Request::get("/wasp/u2/objects"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WaspError::AuthRetryExhausted { ref path } if path == "/wasp/u2/objects"
        ));
        assert_eq!(session.transport().sent().len(), 3);
    }

    #[test]
    fn credential_debug_hides_id() {
        let credential = Credential::new("secret");
        assert_eq!(format!("{:?}", credential), "Credential(..)");
        assert_eq!(credential.authorization(), "Hawk id=\"secret\"");
    }
}
