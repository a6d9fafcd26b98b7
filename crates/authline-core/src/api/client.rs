//! Request engine.
//!
//! `HttpClient` resolves request targets against a base URL, injects the
//! current bearer token and drives each request on its own task. Reads loop
//! under a [`RetryPolicy`]; writes are sent exactly once. Every request is
//! observed through a [`RequestHandle`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method, Request, Url};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::handle::Emitter;
use super::retry::{AttemptOutcome, RetryPolicy};
use super::{ApiError, Reply, RequestHandle};
use crate::config::Config;

/// HTTP transfer timeout in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Request engine.
/// Clone is cheap - reqwest::Client uses Arc internally, and clones share
/// the bearer token.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Option<Url>,
    bearer: Arc<watch::Sender<Option<String>>>,
    next_id: Arc<AtomicU64>,
}

impl HttpClient {
    /// Create a client with the default timeout and no base URL
    pub fn new() -> Result<Self, ApiError> {
        Self::with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Configuration(e.to_string()))?;

        let (bearer, _) = watch::channel(None);

        Ok(Self {
            client,
            base_url: None,
            bearer: Arc::new(bearer),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let mut client = Self::with_timeout(Duration::from_secs(config.request_timeout_secs))?;
        client.set_base_url(&config.base_url)?;
        Ok(client)
    }

    pub fn set_base_url(&mut self, base_url: &str) -> Result<(), ApiError> {
        let url = Url::parse(base_url)
            .map_err(|e| ApiError::Configuration(format!("invalid base URL {}: {}", base_url, e)))?;
        self.base_url = Some(url);
        Ok(())
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Set the bearer token for requests dispatched from now on.
    /// An empty token clears it.
    pub fn set_bearer_token(&self, token: &str) {
        let token = (!token.is_empty()).then(|| token.to_string());
        self.bearer.send_replace(token);
    }

    pub fn clear_bearer_token(&self) {
        self.bearer.send_replace(None);
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.bearer.borrow().clone()
    }

    // ===== Verbs =====

    /// GET under the default retry policy
    pub fn get(&self, target: &str) -> RequestHandle {
        self.get_with_policy(target, RetryPolicy::default())
    }

    pub fn get_with_policy(&self, target: &str, policy: RetryPolicy) -> RequestHandle {
        self.dispatch(Method::GET, target, None, policy)
    }

    pub fn post(&self, target: &str, body: impl Into<Vec<u8>>) -> RequestHandle {
        self.dispatch(Method::POST, target, Some(body.into()), RetryPolicy::single_attempt())
    }

    pub fn put(&self, target: &str, body: impl Into<Vec<u8>>) -> RequestHandle {
        self.dispatch(Method::PUT, target, Some(body.into()), RetryPolicy::single_attempt())
    }

    pub fn patch(&self, target: &str, body: impl Into<Vec<u8>>) -> RequestHandle {
        self.dispatch(Method::PATCH, target, Some(body.into()), RetryPolicy::single_attempt())
    }

    pub fn delete(&self, target: &str) -> RequestHandle {
        self.dispatch(Method::DELETE, target, None, RetryPolicy::single_attempt())
    }

    /// Serialize `body` as JSON and POST it once
    pub fn post_json<B: Serialize>(&self, target: &str, body: &B) -> Result<RequestHandle, ApiError> {
        let bytes = serde_json::to_vec(body).map_err(|e| ApiError::parse(0, e.to_string()))?;
        Ok(self.post(target, bytes))
    }

    // ===== Request building =====

    /// Resolve a target: absolute http(s) URLs are used verbatim, anything
    /// else is appended to the base URL path.
    fn resolve(&self, target: &str) -> Result<Url, ApiError> {
        if let Ok(url) = Url::parse(target) {
            if matches!(url.scheme(), "http" | "https") && url.has_host() {
                return Ok(url);
            }
            return Err(ApiError::InvalidUrl(target.to_string()));
        }

        let base = self
            .base_url
            .as_ref()
            .ok_or_else(|| ApiError::InvalidUrl(target.to_string()))?;

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };

        let mut url = base.clone();
        let joined = format!(
            "{}/{}",
            base.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(query);
        Ok(url)
    }

    /// Build the request with the token current at dispatch time
    fn build_request(&self, method: Method, target: &str, body: Option<Vec<u8>>) -> Result<Request, ApiError> {
        let url = self.resolve(target)?;
        let mut builder = self.client.request(method, url);

        if let Some(token) = self.bearer.borrow().as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        Ok(builder.build()?)
    }

    fn dispatch(&self, method: Method, target: &str, body: Option<Vec<u8>>, policy: RetryPolicy) -> RequestHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (handle, emitter) = RequestHandle::new(id);
        let request = self.build_request(method, target, body);
        let client = self.client.clone();

        tokio::spawn(run_attempts(client, id, request, policy, emitter));
        handle
    }
}

/// Send one attempt and buffer its reply; non-2xx becomes `ApiError::Http`
async fn send_once(client: &Client, request: Request) -> Result<Reply, ApiError> {
    let response = client.execute(request).await?;
    let reply = Reply::read(response).await?;

    if reply.is_success() {
        Ok(reply)
    } else {
        Err(ApiError::from_reply(reply))
    }
}

/// Drive a request to its single terminal outcome
async fn run_attempts(
    client: Client,
    id: u64,
    request: Result<Request, ApiError>,
    policy: RetryPolicy,
    emitter: Emitter,
) {
    let mut attempt: u32 = 1;

    loop {
        if emitter.is_cancelled() {
            debug!(request = id, attempt, "Request aborted");
            return;
        }
        emitter.attempt(attempt);

        let request = match request.as_ref() {
            Ok(request) => request.try_clone().ok_or_else(|| {
                ApiError::Configuration("request body cannot be cloned".to_string())
            }),
            Err(err) => Err(err.clone()),
        };
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                warn!(request = id, error = %err, "Request could not be built");
                emitter.finish(Err(err));
                return;
            }
        };

        let method = request.method().clone();
        let url = request.url().clone();
        debug!(request = id, attempt, %method, %url, "Sending request");

        let result = tokio::select! {
            result = send_once(&client, request) => result,
            _ = emitter.cancelled() => {
                debug!(request = id, attempt, "Request aborted in flight");
                return;
            }
        };

        let err = match result {
            Ok(reply) => {
                debug!(request = id, attempt, status = %reply.status(), "Request finished");
                emitter.finish(Ok(reply));
                return;
            }
            Err(err) => err,
        };

        let decision = AttemptOutcome::from_error(&err).map(|outcome| policy.decide(attempt, &outcome));
        match decision {
            Some(decision) if decision.retry => {
                warn!(
                    request = id,
                    %url,
                    attempt,
                    status = err.http_status(),
                    backoff_ms = decision.delay.as_millis() as u64,
                    "Transient failure, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(decision.delay) => {}
                    _ = emitter.cancelled() => {
                        debug!(request = id, attempt, "Request aborted during backoff");
                        return;
                    }
                }
                attempt += 1;
            }
            _ => {
                let body = err.reply().map(|r| ApiError::truncate_body(&r.text())).unwrap_or_default();
                warn!(
                    request = id,
                    %method,
                    %url,
                    attempt,
                    status = err.http_status(),
                    error = %err,
                    body = %body,
                    "Request failed"
                );
                emitter.finish(Err(err));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;

    use reqwest::StatusCode;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::api::RequestEvent;

    fn client_for(server: &MockServer) -> HttpClient {
        let mut client = HttpClient::new().expect("http client");
        client.set_base_url(&server.uri()).expect("base url");
        client
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default().with_base_delay(Duration::from_millis(10))
    }

    async fn collect_events(mut handle: RequestHandle) -> Vec<RequestEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn test_get_success_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/items"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let events = collect_events(client.get("/api/items")).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RequestEvent::Attempt(1)));
        match &events[1] {
            RequestEvent::Finished(reply) => assert_eq!(reply.text(), "[]"),
            other => panic!("expected finished, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_gives_up_after_three_503s() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let events = collect_events(client.get("/health")).await;

        let attempts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                RequestEvent::Attempt(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);

        match events.last() {
            Some(RequestEvent::Failed(err)) => {
                assert_eq!(err.http_status(), 503);
                assert_eq!(err.reply().expect("raw reply").text(), "down");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_recovers_after_one_503() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        Mock::given(method("GET"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_string("ok")
                }
            })
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let events = collect_events(client.get("/items")).await;

        assert_eq!(events.iter().filter(|e| !e.is_terminal()).count(), 2);
        assert!(matches!(events.last(), Some(RequestEvent::Finished(_))));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let outcome = client.get_with_policy("/missing", fast_policy()).outcome().await;
        let err = outcome.expect("terminal outcome").unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // release the port so that requests fail with ECONNREFUSED

        let client = HttpClient::new().expect("http client");
        let policy = fast_policy().with_max_attempts(2);
        let events = collect_events(client.get_with_policy(&format!("http://{}/x", addr), policy)).await;

        assert_eq!(events.iter().filter(|e| !e.is_terminal()).count(), 2);
        match events.last() {
            Some(RequestEvent::Failed(err)) => {
                assert!(err.is_transport());
                assert_eq!(err.http_status(), 0);
                assert!(err.reply().is_none());
            }
            other => panic!("expected transport failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writes_execute_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/items"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let events = collect_events(client.post("/api/items", br#"{"name":"a"}"#.to_vec())).await;
        assert!(matches!(events[0], RequestEvent::Attempt(1)));
        assert!(matches!(events[1], RequestEvent::Failed(_)));
        assert_eq!(events.len(), 2);

        let err = client.delete("/api/items/1").outcome().await.expect("outcome").unwrap_err();
        assert_eq!(err.http_status(), 500);
    }

    #[tokio::test]
    async fn test_put_and_patch_send_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":1}"#))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.put("/items/1", b"{}".to_vec()).outcome().await.expect("outcome").is_ok());
        let reply = client.patch("/items/1", b"{}".to_vec()).outcome().await.expect("outcome").expect("reply");
        assert_eq!(reply.status(), StatusCode::NO_CONTENT);

        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.body == b"{}"));
    }

    #[tokio::test]
    async fn test_bearer_token_injection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.set_bearer_token("abc123");
        assert_eq!(client.bearer_token().as_deref(), Some("abc123"));
        client.get("/one").outcome().await.expect("outcome").expect("reply");

        client.clear_bearer_token();
        client.get("/two").outcome().await.expect("outcome").expect("reply");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let auth = requests[0].headers.get("authorization").expect("auth header");
        assert_eq!(auth.to_str().unwrap(), "Bearer abc123");
        assert!(requests[1].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_token_change_does_not_affect_dispatched_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.set_bearer_token("first");
        let handle = client.get("/x");
        client.set_bearer_token("second");
        handle.outcome().await.expect("outcome").expect("reply");

        let requests = server.received_requests().await.unwrap();
        let auth = requests[0].headers.get("authorization").expect("auth header");
        assert_eq!(auth.to_str().unwrap(), "Bearer first");
    }

    #[tokio::test]
    async fn test_abort_before_retry_suppresses_everything() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let policy = RetryPolicy::default().with_base_delay(Duration::from_millis(300));
        let mut handle = client.get_with_policy("/slow", policy);
        assert!(matches!(handle.next_event().await, Some(RequestEvent::Attempt(1))));

        // Wait for the first attempt to reach the server, then abort during backoff
        for _ in 0..100 {
            if !server.received_requests().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(handle.next_event().await.is_none());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_abort_after_outcome_is_noop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let handle = client.get("/done");
        let abort = handle.abort_handle();
        assert!(handle.outcome().await.expect("outcome").is_ok());
        abort.abort();
        assert!(!abort.is_aborted());
    }

    #[tokio::test]
    async fn test_unresolvable_target_fails_without_network() {
        let client = HttpClient::new().expect("http client");
        let events = collect_events(client.get("relative/path")).await;

        assert!(matches!(events[0], RequestEvent::Attempt(1)));
        match &events[1] {
            RequestEvent::Failed(err) => {
                assert!(matches!(err, ApiError::InvalidUrl(_)));
                assert_eq!(err.http_status(), 0);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_targets() {
        let mut client = HttpClient::new().expect("http client");
        client.set_base_url("http://localhost:7000/api/").expect("base url");

        assert_eq!(
            client.resolve("/items?page=2").unwrap().as_str(),
            "http://localhost:7000/api/items?page=2"
        );
        assert_eq!(client.resolve("items").unwrap().as_str(), "http://localhost:7000/api/items");
        assert_eq!(
            client.resolve("https://other.example.com/x").unwrap().as_str(),
            "https://other.example.com/x"
        );
        assert!(client.set_base_url("not a url").is_err());
    }
}
