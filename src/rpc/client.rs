//! JSON-RPC client for a single pod endpoint
//!
//! Request envelope:
//! ```json
//! {"id": "<uuid>", "jsonrpc": "2.0", "method": "get-stats", "params": []}
//! ```
//!
//! Response envelope:
//! ```json
//! {"jsonrpc": "2.0", "id": "<uuid>", "result": {...}}
//! {"jsonrpc": "2.0", "id": "<uuid>", "error": {"code": -32601, "message": "..."}}
//! ```
//!
//! Checks run in a fixed order: transport, HTTP status, envelope shape,
//! remote error, missing result, result schema. Callers only ever observe
//! `Transport`, `ProtocolValidation` or `Rpc` errors from this module.

use super::types::{PodList, PodStats, PodVersion};
use crate::error::{PodError, Result, NO_RESULT_CODE};
use crate::http;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_GET_VERSION: &str = "get-version";
pub const METHOD_GET_STATS: &str = "get-stats";
pub const METHOD_GET_PODS: &str = "get-pods";
pub const METHOD_GET_PODS_WITH_STATS: &str = "get-pods-with-stats";

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    id: String,
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    jsonrpc: String,
    /// Must be present; its value is not matched against the request
    #[serde(rename = "id")]
    _id: IgnoredAny,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Stateless RPC client; cheap to clone and safe to share between tasks
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
}

impl RpcClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: http::build_client()?,
        })
    }

    pub fn with_http(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Call `method` on `endpoint` and decode the result as `T`
    pub async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: &str,
        params: Option<Vec<Value>>,
    ) -> Result<T> {
        let result = self.call_raw(endpoint, method, params).await?;

        serde_json::from_value(result).map_err(|e| PodError::ProtocolValidation {
            method: method.to_string(),
            message: format!("unexpected result shape: {}", e),
        })
    }

    /// Call `method` and return the undecoded `result` member
    pub async fn call_raw(
        &self,
        endpoint: &str,
        method: &str,
        params: Option<Vec<Value>>,
    ) -> Result<Value> {
        let request = RpcRequest {
            id: uuid::Uuid::new_v4().to_string(),
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        };

        log::debug!("📡 RPC {} -> {} (id={})", method, endpoint, request.id);

        let response = self
            .http
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| PodError::transport(endpoint, http::describe(&e)))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(PodError::Transport {
                endpoint: endpoint.to_string(),
                status: Some(status.as_u16()),
                message: format!("HTTP error: {}", status),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| PodError::transport(endpoint, format!("failed to read response: {}", e)))?;

        parse_envelope(method, &body)
    }

    pub async fn get_version(&self, endpoint: &str) -> Result<PodVersion> {
        self.call(endpoint, METHOD_GET_VERSION, None).await
    }

    pub async fn get_stats(&self, endpoint: &str) -> Result<PodStats> {
        self.call(endpoint, METHOD_GET_STATS, None).await
    }

    pub async fn get_pods(&self, endpoint: &str) -> Result<PodList> {
        self.call(endpoint, METHOD_GET_PODS, None).await
    }

    pub async fn get_pods_with_stats(&self, endpoint: &str) -> Result<PodList> {
        self.call(endpoint, METHOD_GET_PODS_WITH_STATS, None).await
    }
}

/// Validate a response body and extract its `result` member
fn parse_envelope(method: &str, body: &str) -> Result<Value> {
    let envelope: RpcResponse =
        serde_json::from_str(body).map_err(|e| PodError::ProtocolValidation {
            method: method.to_string(),
            message: format!("malformed envelope: {}", e),
        })?;

    if envelope.jsonrpc != JSONRPC_VERSION {
        return Err(PodError::ProtocolValidation {
            method: method.to_string(),
            message: format!("unsupported jsonrpc version {:?}", envelope.jsonrpc),
        });
    }

    if let Some(error) = envelope.error {
        return Err(PodError::Rpc {
            method: method.to_string(),
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }

    envelope.result.ok_or_else(|| PodError::Rpc {
        method: method.to_string(),
        code: NO_RESULT_CODE,
        message: "no result in response".to_string(),
        data: None,
    })
}

/// Build the RPC URL for a host, e.g. `http://1.2.3.4:6000/rpc`
///
/// IPv6 literals are bracketed: `http://[2001:db8::1]:6000/rpc`.
pub fn rpc_endpoint(scheme: &str, host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("{}://[{}]:{}/rpc", scheme, host, port)
    } else {
        format!("{}://{}:{}/rpc", scheme, host, port)
    }
}

/// Strip any port (and scheme/path) from an address, leaving the host
///
/// Handles `1.2.3.4`, `1.2.3.4:9001`, `http://1.2.3.4:9001/rpc` and
/// bracketed IPv6 like `[::1]:9001`.
pub fn host_of(address: &str) -> &str {
    let without_scheme = address
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(address);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);

    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }

    match authority.rsplit_once(':') {
        // A second colon means an unbracketed IPv6 literal with no port
        Some((host, _)) if !host.contains(':') => host,
        _ => authority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let body = r#"{"jsonrpc":"2.0","id":"a","result":{"version":"1.2.0"}}"#;
        let value = parse_envelope(METHOD_GET_VERSION, body).unwrap();
        assert_eq!(value["version"], "1.2.0");
    }

    #[test]
    fn test_parse_rpc_error() {
        let body = r#"{"jsonrpc":"2.0","id":"x","error":{"code":-32601,"message":"method not found"}}"#;
        let err = parse_envelope("get-foo", body).unwrap_err();
        match err {
            PodError::Rpc { method, code, message, data } => {
                assert_eq!(method, "get-foo");
                assert_eq!(code, -32601);
                assert_eq!(message, "method not found");
                assert!(data.is_none());
            }
            other => panic!("expected Rpc error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rpc_error_keeps_data() {
        let body = r#"{"jsonrpc":"2.0","id":"x","error":{"code":-1,"message":"busy","data":{"retry":3}}}"#;
        let err = parse_envelope(METHOD_GET_STATS, body).unwrap_err();
        if let PodError::Rpc { data, .. } = err {
            assert_eq!(data.unwrap()["retry"], 3);
        } else {
            panic!("expected Rpc error");
        }
    }

    #[test]
    fn test_parse_missing_result_and_error() {
        let body = r#"{"jsonrpc":"2.0","id":"x"}"#;
        let err = parse_envelope(METHOD_GET_STATS, body).unwrap_err();
        assert_eq!(err.rpc_code(), Some(NO_RESULT_CODE));

        // Null result is treated the same as a missing one
        let body = r#"{"jsonrpc":"2.0","id":"x","result":null}"#;
        let err = parse_envelope(METHOD_GET_STATS, body).unwrap_err();
        assert_eq!(err.rpc_code(), Some(NO_RESULT_CODE));
    }

    #[test]
    fn test_parse_missing_envelope_fields() {
        let body = r#"{"result":{"version":"1"}}"#;
        let err = parse_envelope(METHOD_GET_VERSION, body).unwrap_err();
        assert!(matches!(err, PodError::ProtocolValidation { ref method, .. } if method == METHOD_GET_VERSION));

        let err = parse_envelope(METHOD_GET_VERSION, "not json").unwrap_err();
        assert!(matches!(err, PodError::ProtocolValidation { .. }));
    }

    #[test]
    fn test_parse_requires_id_but_not_a_matching_one() {
        let body = r#"{"jsonrpc":"2.0","result":{"version":"1"}}"#;
        let err = parse_envelope(METHOD_GET_VERSION, body).unwrap_err();
        assert!(matches!(err, PodError::ProtocolValidation { .. }));

        // Peers answer with their own id values
        for id in [r#""other""#, "7", "null"] {
            let body = format!(r#"{{"jsonrpc":"2.0","id":{},"result":{{"version":"1"}}}}"#, id);
            assert!(parse_envelope(METHOD_GET_VERSION, &body).is_ok());
        }
    }

    #[test]
    fn test_parse_wrong_version_tag() {
        let body = r#"{"jsonrpc":"1.0","id":"x","result":{}}"#;
        let err = parse_envelope(METHOD_GET_VERSION, body).unwrap_err();
        assert!(matches!(err, PodError::ProtocolValidation { .. }));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("1.2.3.4"), "1.2.3.4");
        assert_eq!(host_of("1.2.3.4:9001"), "1.2.3.4");
        assert_eq!(host_of("http://1.2.3.4:9001/rpc"), "1.2.3.4");
        assert_eq!(host_of("[::1]:9001"), "::1");
        assert_eq!(host_of("pod.example.org:6000"), "pod.example.org");
    }

    #[test]
    fn test_rpc_endpoint() {
        assert_eq!(rpc_endpoint("http", "1.2.3.4", 6000), "http://1.2.3.4:6000/rpc");
        assert_eq!(rpc_endpoint("http", "::1", 6000), "http://[::1]:6000/rpc");
    }
}
