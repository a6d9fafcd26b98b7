//! Buffered HTTP response delivered with every terminal request event.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use super::ApiError;

/// A fully read response: status, headers and body bytes.
#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Reply {
    pub fn from_parts(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Read the whole body of a live response
    pub(crate) async fn read(response: reqwest::Response) -> Result<Self, ApiError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(Self::from_parts(status, headers, body))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body into a typed shape
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::parse(self.status.as_u16(), e.to_string()))
    }

    /// The `error` string of a JSON object body, if there is one
    pub fn error_field(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        value.get("error")?.as_str().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Item {
        id: i64,
    }

    #[test]
    fn test_json_decode_and_parse_error() {
        let ok = Reply::from_parts(StatusCode::OK, HeaderMap::new(), br#"{"id": 7}"#.to_vec());
        assert_eq!(ok.json::<Item>().expect("item").id, 7);

        let bad = Reply::from_parts(StatusCode::OK, HeaderMap::new(), b"<html>".to_vec());
        let err = bad.json::<Item>().unwrap_err();
        assert!(matches!(err, ApiError::Parse { status: 200, .. }));
    }

    #[test]
    fn test_error_field() {
        let reply = Reply::from_parts(StatusCode::FORBIDDEN, HeaderMap::new(), br#"{"error":"nope"}"#.to_vec());
        assert_eq!(reply.error_field().as_deref(), Some("nope"));

        let reply = Reply::from_parts(StatusCode::FORBIDDEN, HeaderMap::new(), br#"["error"]"#.to_vec());
        assert_eq!(reply.error_field(), None);
        assert_eq!(reply.text(), r#"["error"]"#);
    }
}
