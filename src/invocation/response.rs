//! # Response Translator
//!
//! Turns what a function printed into an HTTP response, following the payload
//! format 2.0 rules: a JSON object with a `statusCode` is a structured
//! response, any other valid JSON is returned as-is with status 200, and
//! everything else is a malformed result that the client sees as a 500.
//!
//! Failures keep the same shape the cloud gateway gives them: a crash becomes
//! a 502 carrying the Lambda error object, a timeout a 504.

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::{Map, Value};

use crate::core::error::GatewayError;

/// Outcome of one invocation
#[derive(Debug, Clone)]
pub enum InvocationResult {
    Success(FunctionResponse),
    Failure(InvocationFailure),
}

impl InvocationResult {
    /// Outcome label for logs and metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            InvocationResult::Success(_) => "success",
            InvocationResult::Failure(failure) => failure.kind(),
        }
    }
}

/// Validated function response
#[derive(Debug, Clone)]
pub struct FunctionResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub cookies: Vec<HeaderValue>,
    /// Decoded body bytes
    pub body: Bytes,
    pub is_base64_encoded: bool,
}

/// Why an invocation did not produce a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationFailure {
    /// The function exceeded its deadline
    Timeout { timeout_ms: u64 },

    /// The sandbox exited abnormally or the function raised an unhandled error
    Crash { error_type: String, message: String },

    /// The function's output is not a valid response
    MalformedOutput { reason: String },
}

impl InvocationFailure {
    pub fn crash(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Crash {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedOutput {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Crash { .. } => "crash",
            Self::MalformedOutput { .. } => "malformed-output",
        }
    }

    /// Whether the sandbox that produced this failure must be recycled
    pub fn poisons_sandbox(&self) -> bool {
        !matches!(self, Self::MalformedOutput { .. })
    }

    pub fn into_error(self, function: &str) -> GatewayError {
        match self {
            Self::Timeout { timeout_ms } => GatewayError::InvocationTimeout {
                function: function.to_string(),
                timeout_ms,
            },
            Self::Crash {
                error_type,
                message,
            } => GatewayError::invocation_failure(function, error_type, message),
            Self::MalformedOutput { reason } => GatewayError::response_format(function, reason),
        }
    }
}

/// Final non-empty line of the function's stdout
pub fn last_line(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Recognize the error object a shim prints for an unhandled function error
///
/// Returns `(errorType, errorMessage)`.
pub fn error_object(value: &Value) -> Option<(String, String)> {
    let object = value.as_object()?;
    if object.contains_key("statusCode") {
        return None;
    }
    if !object.contains_key("errorMessage") && !object.contains_key("errorType") {
        return None;
    }

    let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
    Some((
        text("errorType").unwrap_or_else(|| "Error".to_string()),
        text("errorMessage").unwrap_or_default(),
    ))
}

/// Parse the output of a run that exited successfully
pub fn parse_output(stdout: &[u8]) -> InvocationResult {
    let Some(line) = last_line(stdout) else {
        return InvocationResult::Failure(InvocationFailure::malformed(
            "function produced no output",
        ));
    };

    let value: Value = match serde_json::from_str(&line) {
        Ok(value) => value,
        Err(e) => {
            return InvocationResult::Failure(InvocationFailure::malformed(format!(
                "output is not valid JSON: {}",
                e
            )))
        }
    };

    if let Some((error_type, message)) = error_object(&value) {
        return InvocationResult::Failure(InvocationFailure::crash(error_type, message));
    }

    let parsed = match value {
        Value::Object(object) if object.contains_key("statusCode") => structured(object),
        other => Ok(inferred(other)),
    };

    match parsed {
        Ok(response) => InvocationResult::Success(response),
        Err(reason) => InvocationResult::Failure(InvocationFailure::malformed(reason)),
    }
}

/// Response for JSON without a `statusCode`
fn inferred(value: Value) -> FunctionResponse {
    let body = match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    FunctionResponse {
        status: StatusCode::OK,
        headers,
        cookies: Vec::new(),
        body: Bytes::from(body),
        is_base64_encoded: false,
    }
}

fn structured(object: Map<String, Value>) -> Result<FunctionResponse, String> {
    let status = object
        .get("statusCode")
        .and_then(Value::as_u64)
        .filter(|code| (100..=599).contains(code))
        .and_then(|code| StatusCode::from_u16(code as u16).ok())
        .ok_or_else(|| format!("invalid statusCode: {}", object["statusCode"]))?;

    let mut headers = HeaderMap::new();

    match object.get("headers") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (name, value) in map {
                let value = scalar(value).ok_or_else(|| format!("header '{}' is not a scalar", name))?;
                headers.insert(header_name(name)?, header_value(&value)?);
            }
        }
        Some(_) => return Err("headers must be an object".to_string()),
    }

    match object.get("multiValueHeaders") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (name, values) in map {
                let values = values
                    .as_array()
                    .ok_or_else(|| format!("multiValueHeaders '{}' is not an array", name))?;
                let name = header_name(name)?;
                for value in values {
                    let value = scalar(value)
                        .ok_or_else(|| format!("multiValueHeaders '{}' holds a non-scalar", name))?;
                    headers.append(name.clone(), header_value(&value)?);
                }
            }
        }
        Some(_) => return Err("multiValueHeaders must be an object".to_string()),
    }

    let cookies = match object.get("cookies") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| "cookies must be strings".to_string())
                    .and_then(header_value)
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err("cookies must be an array".to_string()),
    };

    let is_base64_encoded = match object.get("isBase64Encoded") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(_) => return Err("isBase64Encoded must be a boolean".to_string()),
    };

    let body = match object.get("body") {
        None | Some(Value::Null) => Bytes::new(),
        Some(Value::String(text)) if is_base64_encoded => BASE64
            .decode(text.as_bytes())
            .map(Bytes::from)
            .map_err(|e| format!("body is not valid base64: {}", e))?,
        Some(Value::String(text)) => Bytes::from(text.clone()),
        Some(_) => return Err("body must be a string".to_string()),
    };

    if !body.is_empty() && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    Ok(FunctionResponse {
        status,
        headers,
        cookies,
        body,
        is_base64_encoded,
    })
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn header_name(name: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
        .map_err(|_| format!("invalid header name '{}'", name))
}

fn header_value(value: &str) -> Result<HeaderValue, String> {
    HeaderValue::from_str(value).map_err(|_| format!("invalid header value '{}'", value))
}

impl IntoResponse for FunctionResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        for cookie in self.cookies {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        response
    }
}

/// Convert an invocation result into the client-facing response
pub fn into_response(result: InvocationResult, function: &str) -> Response {
    match result {
        InvocationResult::Success(response) => response.into_response(),
        InvocationResult::Failure(failure) => failure.into_error(function).into_response(),
    }
}
