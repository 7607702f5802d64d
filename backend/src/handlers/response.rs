use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};

/// Envelope every REST route answers with.
#[derive(Debug, Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            data: Some(data),
            meta: Map::new(),
            error: None,
            code: None,
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }
}

impl<T: Serialize> IntoResponse for JsonResponse<T> {
    fn into_response(self) -> Response {
        let status = self
            .code
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

pub fn write_response<T: Serialize>(data: T) -> Response {
    JsonResponse::data(data).into_response()
}

pub fn error_response(message: impl Into<String>, status: StatusCode) -> Response {
    JsonResponse::<()> {
        data: None,
        meta: Map::new(),
        error: Some(message.into()),
        code: Some(status.as_u16()),
    }
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let envelope = JsonResponse::data(vec![1, 2]).with_meta("next_cursor", "abc");
        let body = serde_json::to_value(envelope).unwrap();
        assert_eq!(body, serde_json::json!({"data": [1, 2], "meta": {"next_cursor": "abc"}}));

        let err = JsonResponse::<()> {
            data: None,
            meta: Map::new(),
            error: Some("nope".into()),
            code: Some(403),
        };
        assert_eq!(
            serde_json::to_value(err).unwrap(),
            serde_json::json!({"data": null, "error": "nope", "code": 403})
        );
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response("gone", StatusCode::GONE);
        assert_eq!(response.status(), StatusCode::GONE);
    }
}
