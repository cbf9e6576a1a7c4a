//! Response assembly and error translation.
//!
//! Pre-execution failures become small `{"error": ...}` envelopes with a
//! non-200 status. Execution outcomes always become a 200 result envelope
//! whose error objects carry extended fields only as far as the debug flag
//! allows. Internal causes are reported to the operator sink in full
//! regardless of the flag.

use crate::report::ErrorReporter;
use crate::schema::{InternalFailure, SchemaError};
use crate::settings::DebugFlag;
use async_graphql::{PathSegment, ServerError};
use bytes::Bytes;
use http::header::{ACCESS_CONTROL_ALLOW_METHODS, ALLOW, CONTENT_TYPE};
use http::{HeaderValue, Response, StatusCode};
use serde_json::{Map, Value, json};

pub const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const JSON_CONTENT_TYPE: &str = "application/json";
const ASSEMBLE_ORIGIN: &str = "Dispatcher::assemble";

/// Failures that end a dispatch before a result envelope can be returned.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed processing schema from {uri}: {source}")]
    Schema { uri: String, source: SchemaError },
    #[error("Failed decoding request body")]
    RequestDecode(#[source] serde_json::Error),
    #[error("Failed encoding GraphQL response")]
    ResponseEncode(#[source] serde_json::Error),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::Schema { .. } | DispatchError::ResponseEncode(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            DispatchError::RequestDecode(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Client-facing envelope for this failure.
    pub fn into_response(self) -> Response<Bytes> {
        let body = json!({ "error": self.to_string() });
        json_response(self.status(), Bytes::from(body.to_string()))
    }
}

/// CORS preflight answer: 200, allowed methods, no body.
pub fn preflight() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    let allowed = HeaderValue::from_static(ALLOWED_METHODS);
    response.headers_mut().insert(ALLOW, allowed.clone());
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_METHODS, allowed);
    response
}

pub fn json_response(status: StatusCode, body: Bytes) -> Response<Bytes> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

/// Report every internal cause behind `errors`, once each.
pub fn report_internal_causes(errors: &[ServerError], reporter: &dyn ErrorReporter) {
    for error in errors {
        if let Some(failure) = error.source::<InternalFailure>() {
            reporter.internal_cause(&failure.0);
        }
    }
}

/// Build the `{ data?, errors? }` envelope for an execution outcome.
pub fn result_envelope(
    response: &async_graphql::Response,
    flag: DebugFlag,
) -> serde_json::Result<Value> {
    let mut envelope = Map::new();
    if !matches!(response.data, async_graphql::Value::Null) {
        envelope.insert("data".to_string(), response.data.clone().into_json()?);
    }
    if !response.errors.is_empty() {
        let errors = response
            .errors
            .iter()
            .map(|error| format_error(error, flag))
            .collect::<serde_json::Result<Vec<_>>>()?;
        envelope.insert("errors".to_string(), Value::Array(errors));
    }
    Ok(Value::Object(envelope))
}

/// Format one error object, adding debug fields permitted by `flag`.
pub fn format_error(error: &ServerError, flag: DebugFlag) -> serde_json::Result<Value> {
    let mut object = Map::new();
    object.insert("message".to_string(), Value::String(error.message.clone()));
    if !error.locations.is_empty() {
        let locations = error
            .locations
            .iter()
            .map(|pos| json!({ "line": pos.line, "column": pos.column }))
            .collect();
        object.insert("locations".to_string(), Value::Array(locations));
    }
    if !error.path.is_empty() {
        let path = error
            .path
            .iter()
            .map(|segment| match segment {
                PathSegment::Field(name) => Value::String(name.clone()),
                PathSegment::Index(index) => Value::from(*index),
            })
            .collect();
        object.insert("path".to_string(), Value::Array(path));
    }
    if let Some(extensions) = &error.extensions {
        object.insert("extensions".to_string(), serde_json::to_value(extensions)?);
    }
    if let Some(failure) = error.source::<InternalFailure>() {
        let cause = &failure.0;
        if flag.contains(DebugFlag::INCLUDE_DEBUG_MESSAGE) {
            object.insert(
                "debugMessage".to_string(),
                Value::String(cause.message.clone()),
            );
        }
        if flag.contains(DebugFlag::INCLUDE_TRACE) {
            let trace = std::iter::once(&cause.message)
                .chain(&cause.chain)
                .map(|line| Value::String(line.clone()))
                .collect();
            object.insert("trace".to_string(), Value::Array(trace));
        }
    }
    Ok(Value::Object(object))
}

/// Log a notice for every error in an already serialized result body.
pub fn audit_errors(body: &[u8], reporter: &dyn ErrorReporter) {
    let envelope: Value = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            reporter.notice(
                ASSEMBLE_ORIGIN,
                &format!("Failed decoding GraphQL JSON response: {err}"),
            );
            return;
        }
    };
    let Some(errors) = envelope.get("errors").and_then(Value::as_array) else {
        return;
    };
    for error in errors {
        reporter.notice(ASSEMBLE_ORIGIN, &error_summary(error));
    }
}

fn error_summary(error: &Value) -> String {
    let message = error.get("message").and_then(Value::as_str).unwrap_or_default();
    let locations = error
        .get("locations")
        .and_then(Value::as_array)
        .map(|locations| {
            locations
                .iter()
                .map(|location| {
                    format!(
                        "line {} column {}",
                        location.get("line").and_then(Value::as_u64).unwrap_or_default(),
                        location.get("column").and_then(Value::as_u64).unwrap_or_default()
                    )
                })
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();

    let mut summary = format!("GraphQL response contained errors: {message}");
    if !locations.is_empty() {
        summary.push_str(&format!(" ({locations})"));
    }
    if let Some(debug_message) = error.get("debugMessage").and_then(Value::as_str) {
        summary.push(' ');
        summary.push_str(debug_message);
    }
    summary
}
