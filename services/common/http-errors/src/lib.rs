use axum::{http::{StatusCode, HeaderValue}, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")] pub trace_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")] pub message: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    Forbidden { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    BadRequest { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    UnprocessableEntity { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    Conflict { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    NotFound { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    BadGateway { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    Internal { trace_id: Option<Uuid>, message: Option<String> },
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(e: E, trace_id: Option<Uuid>) -> Self {
        Self::Internal { trace_id, message: Some(e.to_string()) }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest { code, trace_id: None, message: Some(message.into()) }
    }

    pub fn unprocessable(code: &'static str, message: impl Into<String>) -> Self {
        Self::UnprocessableEntity { code, trace_id: None, message: Some(message.into()) }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict { code, trace_id: None, message: Some(message.into()) }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound { code, trace_id: None, message: Some(message.into()) }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, trace_id, message) = match self {
            ApiError::Forbidden { code, trace_id, message } => (StatusCode::FORBIDDEN, code, trace_id, message),
            ApiError::BadRequest { code, trace_id, message } => (StatusCode::BAD_REQUEST, code, trace_id, message),
            ApiError::UnprocessableEntity { code, trace_id, message } => (StatusCode::UNPROCESSABLE_ENTITY, code, trace_id, message),
            ApiError::Conflict { code, trace_id, message } => (StatusCode::CONFLICT, code, trace_id, message),
            ApiError::NotFound { code, trace_id, message } => (StatusCode::NOT_FOUND, code, trace_id, message),
            ApiError::BadGateway { code, trace_id, message } => (StatusCode::BAD_GATEWAY, code, trace_id, message),
            ApiError::Internal { trace_id, message } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", trace_id, message),
        };
        let body = ErrorBody { code: code.into(), trace_id, message };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
