use axum::{http::StatusCode, response::Response};

use super::response::{error_response, write_response};
use crate::constants::NOT_FOUND_MESSAGE;

pub async fn ping() -> Response {
    write_response("pong")
}

pub async fn version() -> Response {
    write_response(env!("CARGO_PKG_VERSION"))
}

pub async fn not_found() -> Response {
    error_response(NOT_FOUND_MESSAGE, StatusCode::NOT_FOUND)
}
