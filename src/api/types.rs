//! Api request options and wire types

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};
use serde::{Deserialize, Serialize};

/// Per-call request options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// http method, GET by default
    pub method: Method,
    /// json body
    pub body: Option<serde_json::Value>,
    /// extra headers, override the default ones with the same name
    pub headers: HeaderMap,
}

impl RequestOptions {
    /// Create options for `method` without body
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    /// Set json body
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Add a header
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// body of refresh endpoint
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    /// current refresh token
    pub refresh_token: &'a str,
}

/// response of refresh endpoint
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    /// new access token
    pub access_token: String,
    /// rotated refresh token, keep the old one if absent
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// refreshed user profile
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}

/// Error body returned by the api, `{statusCode, message, error}`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorBody {
    /// http status code echoed by server
    pub status_code: Option<u16>,
    /// a message, or a list of validation messages
    pub message: Option<serde_json::Value>,
    /// short error name, like `Bad Request`
    pub error: Option<String>,
}

impl ErrorBody {
    /// Flatten message field to one line
    pub fn message_text(&self) -> Option<String> {
        match self.message.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => Some(
                items
                    .iter()
                    .map(|item| match item {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_body_string_message() {
        let body: ErrorBody = serde_json::from_value(json!({
            "statusCode": 404,
            "message": "Generation not found",
            "error": "Not Found",
        }))
        .unwrap();

        assert_eq!(body.status_code, Some(404));
        assert_eq!(body.error.as_deref(), Some("Not Found"));
        assert_eq!(body.message_text().as_deref(), Some("Generation not found"));
    }

    #[test]
    fn test_error_body_validation_messages() {
        let body: ErrorBody = serde_json::from_value(json!({
            "statusCode": 400,
            "message": ["prompt should not be empty", "tone must be a string"],
        }))
        .unwrap();

        assert_eq!(
            body.message_text().as_deref(),
            Some("prompt should not be empty; tone must be a string")
        );
        assert!(body.error.is_none());
    }

    #[test]
    fn test_refresh_response_without_rotation() {
        let resp: RefreshResponse =
            serde_json::from_value(json!({ "access_token": "new", "user": { "id": 1 } })).unwrap();

        assert_eq!(resp.access_token, "new");
        assert!(resp.refresh_token.is_none());
        assert!(resp.user.is_some());
    }

    #[test]
    fn test_request_options_json_body() {
        let options = RequestOptions::new(Method::POST)
            .json(&json!({ "prompt": "coffee ad" }))
            .unwrap();

        assert_eq!(options.method, Method::POST);
        assert_eq!(options.body, Some(json!({ "prompt": "coffee ad" })));
    }
}
