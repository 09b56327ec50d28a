//! # Request Translator
//!
//! Builds the HTTP API payload format 2.0 event a function receives. The
//! translation is a pure function of the inbound request, the route match and
//! the per-request metadata (request id and receive time), so it is fully
//! deterministic under test.

use axum::http::{header, HeaderMap, Method, Uri, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::routing::router::RouteMatch;

/// Payload format version
pub const PAYLOAD_VERSION: &str = "2.0";

const DEFAULT_DOMAIN: &str = "localhost";
const DEFAULT_SOURCE_IP: &str = "127.0.0.1";

/// The request as received by the HTTP front
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub peer: Option<SocketAddr>,
}

/// Per-request values that are not derived from the request itself
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
    pub received_at: DateTime<Utc>,
}

impl RequestMeta {
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            received_at: Utc::now(),
        }
    }
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload 2.0 invocation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationEvent {
    pub version: String,
    pub route_key: String,
    pub raw_path: String,
    pub raw_query_string: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<String>,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string_parameters: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_parameters: Option<BTreeMap<String, String>>,
    pub request_context: RequestContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub account_id: String,
    pub api_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer: Option<Authorizer>,
    pub domain_name: String,
    pub domain_prefix: String,
    pub http: HttpContext,
    pub request_id: String,
    pub route_key: String,
    pub stage: String,
    pub time: String,
    pub time_epoch: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpContext {
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub source_ip: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorizer {
    pub jwt: JwtContext,
}

/// Decoded, unverified JWT claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwtContext {
    pub claims: serde_json::Map<String, Value>,
    pub scopes: Option<Vec<String>>,
}

/// Build the invocation event for a matched request
pub fn build_event(
    request: &InboundRequest,
    route: &RouteMatch,
    meta: &RequestMeta,
    stage: &str,
) -> InvocationEvent {
    let (headers, cookies) = collect_headers(&request.headers);

    let raw_query_string = request.uri.query().unwrap_or_default().to_string();
    let query_string_parameters = parse_query(&raw_query_string);

    let domain_name = headers
        .get("host")
        .map(|host| strip_port(host))
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| DEFAULT_DOMAIN.to_string());
    let domain_prefix = domain_name.split('.').next().unwrap_or_default().to_string();

    let user_agent = headers.get("user-agent").cloned().unwrap_or_default();
    let authorizer = headers.get("authorization").and_then(|value| decode_jwt_claims(value));

    let (body, is_base64_encoded) = encode_body(&request.headers, &request.body);

    InvocationEvent {
        version: PAYLOAD_VERSION.to_string(),
        route_key: route.route_key.clone(),
        raw_path: request.uri.path().to_string(),
        raw_query_string,
        cookies,
        headers,
        query_string_parameters,
        path_parameters: (!route.path_params.is_empty()).then(|| route.path_params.clone()),
        request_context: RequestContext {
            account_id: "anonymous".to_string(),
            api_id: "local".to_string(),
            authorizer,
            domain_name,
            domain_prefix,
            http: HttpContext {
                method: request.method.to_string(),
                path: request.uri.path().to_string(),
                protocol: protocol_name(request.version).to_string(),
                source_ip: request
                    .peer
                    .map(|addr| addr.ip().to_string())
                    .unwrap_or_else(|| DEFAULT_SOURCE_IP.to_string()),
                user_agent,
            },
            request_id: meta.request_id.clone(),
            route_key: route.route_key.clone(),
            stage: stage.to_string(),
            time: meta.received_at.format("%d/%b/%Y:%H:%M:%S %z").to_string(),
            time_epoch: meta.received_at.timestamp_millis(),
        },
        body,
        is_base64_encoded,
    }
}

/// Lower-cased headers with repeated values joined by `,`; cookies split out
fn collect_headers(map: &HeaderMap) -> (BTreeMap<String, String>, Vec<String>) {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    let mut cookies = Vec::new();

    for (name, value) in map {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();

        if name == header::COOKIE {
            cookies.extend(
                value
                    .split(';')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string),
            );
            continue;
        }

        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    (headers, cookies)
}

/// Percent-decoded query parameters, repeated keys joined by `,`
fn parse_query(raw: &str) -> Option<BTreeMap<String, String>> {
    let mut params: BTreeMap<String, String> = BTreeMap::new();

    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        let value = decode_component(value);

        params
            .entry(key)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    (!params.is_empty()).then_some(params)
}

fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn strip_port(host: &str) -> String {
    if let Some(end) = host.strip_prefix('[').and_then(|rest| rest.find(']')) {
        // IPv6 literal
        return host[..end + 2].to_string();
    }
    host.split(':').next().unwrap_or_default().to_string()
}

fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Decode the claims of a JWT without verifying it
///
/// Returns `None` for anything that is not a decodable JWT.
pub fn decode_jwt_claims(authorization: &str) -> Option<Authorizer> {
    let token = authorization.trim();
    let token = match token.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => token[7..].trim(),
        _ => token,
    };

    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<serde_json::Map<String, Value>>(
        token,
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .ok()?;

    Some(Authorizer {
        jwt: JwtContext {
            claims: data.claims,
            scopes: None,
        },
    })
}

/// Whether a content type carries text
pub fn is_textual(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence.starts_with("text/")
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
        || matches!(
            essence.as_str(),
            "application/json"
                | "application/xml"
                | "application/javascript"
                | "application/x-www-form-urlencoded"
                | "application/graphql"
        )
}

/// Body as text when it is textual and valid UTF-8, otherwise base64
fn encode_body(headers: &HeaderMap, body: &Bytes) -> (Option<String>, bool) {
    if body.is_empty() {
        return (None, false);
    }

    let textual = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(is_textual)
        .unwrap_or(true);

    match std::str::from_utf8(body) {
        Ok(text) if textual => (Some(text.to_string()), false),
        _ => (Some(BASE64.encode(body)), true),
    }
}
