//! Client for the remote auth service.
//!
//! Every call is dispatched immediately, so the request carries the bearer
//! token current at call time; the returned future only waits for and
//! decodes the outcome.

use std::future::Future;

use serde::{Deserialize, Serialize};

use super::{ApiError, HttpClient, Reply, RequestHandle};
use crate::models::{Credential, UserProfile};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: UserProfile,
}

/// Credential and profile obtained from a login or refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResult {
    pub credential: Credential,
    pub user: UserProfile,
}

impl LoginResult {
    fn decode(reply: &Reply) -> Result<Self, ApiError> {
        let status = reply.status().as_u16();
        let response: LoginResponse = reply.json()?;

        let result = LoginResult {
            credential: Credential::new(response.access_token, response.refresh_token, response.expires_in),
            user: response.user,
        };

        if !result.credential.is_valid() {
            return Err(ApiError::parse(status, "empty access token"));
        }
        if !result.user.is_valid() {
            return Err(ApiError::parse(status, "user profile is missing id or username"));
        }
        Ok(result)
    }
}

#[derive(Clone)]
pub struct AuthApi {
    client: HttpClient,
}

impl AuthApi {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn login(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<LoginResult, ApiError>> + Send + 'static {
        let handle = self.client.post_json(LOGIN_PATH, &LoginRequest { username, password });
        async move { LoginResult::decode(&await_reply(handle?).await?) }
    }

    pub fn refresh(&self, refresh_token: &str) -> impl Future<Output = Result<LoginResult, ApiError>> + Send + 'static {
        let handle = self.client.post_json(REFRESH_PATH, &RefreshRequest { refresh_token });
        async move { LoginResult::decode(&await_reply(handle?).await?) }
    }

    pub fn logout(&self) -> impl Future<Output = Result<(), ApiError>> + Send + 'static {
        let handle = self.client.post(LOGOUT_PATH, Vec::new());
        async move { await_reply(handle).await.map(|_| ()) }
    }
}

async fn await_reply(handle: RequestHandle) -> Result<Reply, ApiError> {
    handle.outcome().await.unwrap_or(Err(ApiError::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn login_body(access: &str) -> serde_json::Value {
        json!({
            "accessToken": access,
            "refreshToken": "refresh-1",
            "expiresIn": 900,
            "user": {
                "id": "u-1",
                "username": "jdoe",
                "displayName": "Jane Doe",
                "email": "jane@example.com",
                "roles": ["admin"],
                "permissions": ["items.read"]
            }
        })
    }

    async fn api_for(server: &MockServer) -> AuthApi {
        let mut client = HttpClient::new().expect("http client");
        client.set_base_url(&server.uri()).expect("base url");
        AuthApi::new(client)
    }

    #[tokio::test]
    async fn test_login_decodes_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_json(json!({"username": "jdoe", "password": "secret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_body("access-1")))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server).await;
        let result = api.login("jdoe", "secret").await.expect("login");
        assert_eq!(result.credential, Credential::new("access-1", "refresh-1", 900));
        assert_eq!(result.user.display_name, "Jane Doe");
        assert_eq!(result.user.roles, vec!["admin".to_string()]);
    }

    #[tokio::test]
    async fn test_login_error_message_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Invalid credentials"})))
            .mount(&server)
            .await;

        let api = api_for(&server).await;
        let err = api.login("jdoe", "wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid credentials");
        assert_eq!(err.http_status(), 401);
    }

    #[tokio::test]
    async fn test_refresh_sends_token_and_rejects_bad_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .and(body_json(json!({"refreshToken": "r-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "a"})))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server).await;
        let err = api.refresh("r-1").await.unwrap_err();
        assert!(matches!(err, ApiError::Parse { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_empty_access_token_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_body("")))
            .mount(&server)
            .await;

        let api = api_for(&server).await;
        assert!(matches!(api.refresh("r").await, Err(ApiError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_logout_carries_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGOUT_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server).await;
        api.client().set_bearer_token("tok");
        let pending = api.logout();
        api.client().clear_bearer_token();
        pending.await.expect("logout");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].headers.get("authorization").unwrap().to_str().unwrap(), "Bearer tok");
    }
}
