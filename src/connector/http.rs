//! HTTP plumbing for the Server connector and the scoring client.
//!
//! Requests go through the [`HttpTransport`] trait so the connector can be driven by a scripted
//! transport in tests. [`ReqwestTransport`] is the production implementation.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value as Json;

use crate::error::{ConnectorError, ConnectorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text { content_type: String, text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Value of the `Authorization` header, if any.
    pub authorization: Option<String>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            authorization: None,
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            authorization: None,
            body: Some(RequestBody::Json(body)),
        }
    }

    pub fn post_text(url: impl Into<String>, content_type: &str, text: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            authorization: None,
            body: Some(RequestBody::Text {
                content_type: content_type.to_string(),
                text: text.into(),
            }),
        }
    }

    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// The JSON body, if this request carries one.
    pub fn json_body(&self) -> Option<&serde_json::Value> {
        match &self.body {
            Some(RequestBody::Json(v)) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> ConnectorResult<serde_json::Value> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Fail with [`ConnectorError::Transport`] unless the status is `expected`.
    pub fn expect_status(self, expected: u16, operation: &str) -> ConnectorResult<Self> {
        if self.status == expected {
            Ok(self)
        } else {
            Err(ConnectorError::transport(operation, Some(self.status), truncate(&self.body)))
        }
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Sends one request and returns the response, whatever its status.
///
/// Only failures to get any response at all are errors.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> ConnectorResult<HttpResponse>;
}

/// Blocking `reqwest` transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Option<Duration>) -> ConnectorResult<Self> {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> ConnectorResult<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if let Some(auth) = &request.authorization {
            builder = builder.header(AUTHORIZATION, auth);
        }
        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Text { content_type, text }) => {
                builder.header(CONTENT_TYPE, content_type).body(text.clone())
            }
            None => builder,
        };

        let response = builder.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(HttpResponse { status, body })
    }
}

/// `Authorization` value for HTTP basic authentication.
pub fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64_STANDARD.encode(format!("{username}:{password}")))
}

/// `Authorization` value for a bearer token.
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Base64 of a UTF-8 string, as used for process submission.
pub fn encode_base64(text: &str) -> String {
    BASE64_STANDARD.encode(text.as_bytes())
}

/// Turn a structured `{"error": ...}` answer into [`ConnectorError::BackendReported`].
pub(crate) fn check_for_error(document: &Json, operation: &str) -> ConnectorResult<()> {
    let Some(error) = document.get("error").filter(|e| !e.is_null()) else {
        return Ok(());
    };
    let field = |name: &str| error.get(name).and_then(Json::as_str).map(str::to_string);
    let (kind, title, message) = match error {
        Json::String(message) => (None, None, Some(message.clone())),
        _ => (field("type"), field("title"), field("message")),
    };
    Err(ConnectorError::BackendReported {
        operation: operation.to_string(),
        kind,
        title,
        message,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn basic_auth_header() {
        assert_eq!(basic_auth("Aladdin", "open sesame"), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }

    #[test]
    fn unexpected_status_is_a_transport_error() {
        let err = HttpResponse::new(404, "not here").expect_status(200, "read").unwrap_err();
        assert_eq!(err.to_string(), "read failed, status: 404: not here");
    }

    #[test]
    fn structured_errors_are_reported() {
        let doc = json!({
            "error": {"type": "RepositoryException", "title": "Not found", "message": "no entry"}
        });
        let err = check_for_error(&doc, "reading input").unwrap_err();
        assert_eq!(err.to_string(), "reading input: RepositoryException: Not found: no entry");

        let err = check_for_error(&json!({"error": "boom"}), "test").unwrap_err();
        assert_eq!(err.to_string(), "test: boom");
    }

    #[test]
    fn documents_without_error_pass() {
        assert!(check_for_error(&json!({"data": []}), "read").is_ok());
        assert!(check_for_error(&json!({"error": null}), "read").is_ok());
        assert!(check_for_error(&json!([1, 2]), "read").is_ok());
    }
}
