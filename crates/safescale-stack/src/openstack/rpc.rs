//! Raw REST plumbing for the OpenStack-family driver.
//!
//! Everything that touches the wire lives here: token management, the
//! retry envelope, HTTP status normalization into the closed error
//! taxonomy, and the typed request/response shapes of the Nova and
//! Neutron APIs the driver uses.

use parking_lot::RwLock;
use reqwest::{Method, StatusCode};
use safescale_core::{retry_with_budget, Error, Result, RetryBudget, RetryPolicy};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::OpenStackConfig;

/// Translate an HTTP failure status into the closed taxonomy.
///
/// Transient statuses map to transient kinds so the retry envelope picks
/// them up; permanent statuses short-circuit.
pub(super) fn normalize_status(status: StatusCode, body: &str) -> Error {
    let detail = if body.is_empty() {
        format!("provider returned {status}")
    } else {
        format!("provider returned {status}: {body}")
    };
    match status.as_u16() {
        400 => Error::invalid_request(detail),
        401 => Error::not_authenticated(detail),
        403 => Error::forbidden(detail),
        404 | 410 => Error::not_found(detail),
        408 => Error::timeout(detail),
        409 => Error::duplicate(detail),
        429 => Error::overload(detail),
        500 => Error::execution(detail),
        503 => Error::not_available(detail),
        _ => Error::execution(detail),
    }
}

pub(super) struct RpcClient {
    http: reqwest::Client,
    config: OpenStackConfig,
    token: RwLock<Option<String>>,
}

impl RpcClient {
    pub(super) fn new(config: OpenStackConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeouts.default_op)
            .build()
            .map_err(|e| Error::execution(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            token: RwLock::new(None),
        })
    }

    pub(super) fn config(&self) -> &OpenStackConfig {
        &self.config
    }

    /// Obtain a scoped token, authenticating if none is cached.
    async fn ensure_token(&self) -> Result<String> {
        if let Some(token) = self.token.read().clone() {
            return Ok(token);
        }
        let payload = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.config.username,
                            "domain": { "name": self.config.domain_name },
                            "password": self.config.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "id": self.config.project_id,
                        "domain": { "name": self.config.domain_name },
                    }
                }
            }
        });
        let url = format!("{}/auth/tokens", self.config.auth_url);
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::not_available(format!("authentication unreachable: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(normalize_status(status, &body));
        }
        let token = response
            .headers()
            .get("x-subject-token")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .ok_or_else(|| Error::not_authenticated("no token in authentication response"))?;
        *self.token.write() = Some(token.clone());
        debug!("authenticated against keystone");
        Ok(token)
    }

    fn invalidate_token(&self) {
        *self.token.write() = None;
    }

    async fn roundtrip(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.ensure_token().await?;
        let mut request = self
            .http
            .request(method.clone(), url)
            .header("X-Auth-Token", &token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::not_available(format!("provider unreachable: {e}")))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED {
            // Expired token: drop it so the retry envelope re-authenticates.
            warn!(url, "token rejected, re-authenticating");
            self.invalidate_token();
            return Err(Error::not_available("token expired"));
        }
        if !status.is_success() {
            return Err(normalize_status(status, &text));
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::syntax(format!("malformed provider response: {e}")))
    }

    /// One provider call inside the standard retry envelope.
    pub(super) async fn call(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<Value> {
        let budget = RetryBudget::new(self.config.timeouts.default_op, self.config.timeouts.context);
        retry_with_budget(budget, RetryPolicy::ProviderApi, || {
            self.roundtrip(method.clone(), &url, body.as_ref())
        })
        .await
    }

    pub(super) fn compute_url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.compute_url)
    }

    pub(super) fn network_url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.network_url)
    }

    /// Decode a sub-tree of a provider response.
    pub(super) fn decode<T: for<'de> Deserialize<'de>>(value: &Value, pointer: &str) -> Result<T> {
        let node = value
            .pointer(pointer)
            .ok_or_else(|| Error::syntax(format!("missing '{pointer}' in provider response")))?;
        serde_json::from_value(node.clone())
            .map_err(|e| Error::syntax(format!("malformed '{pointer}' in provider response: {e}")))
    }
}

// =============================================================================
// Wire shapes
// =============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct WireServer {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub addresses: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireAddress {
    pub addr: String,
    pub version: u8,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireFlavor {
    pub id: String,
    pub name: String,
    pub vcpus: u32,
    /// Nova reports RAM in MiB.
    pub ram: u64,
    pub disk: u32,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireImage {
    pub id: String,
    pub name: String,
    #[serde(rename = "minDisk", default)]
    pub min_disk: u32,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireKeyPair {
    pub name: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub private_key: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireNetwork {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub subnets: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireSubnet {
    #[serde(default)]
    pub cidr: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireSecurityGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub security_group_rules: Vec<WireSecurityGroupRule>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireSecurityGroupRule {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub direction: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub port_range_min: Option<u16>,
    #[serde(default)]
    pub port_range_max: Option<u16>,
    #[serde(default)]
    pub remote_ip_prefix: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_core::ErrorKind;

    #[test]
    fn status_normalization_is_closed() {
        let cases = [
            (400, ErrorKind::InvalidRequest),
            (401, ErrorKind::NotAuthenticated),
            (403, ErrorKind::Forbidden),
            (404, ErrorKind::NotFound),
            (408, ErrorKind::Timeout),
            (409, ErrorKind::Duplicate),
            (410, ErrorKind::NotFound),
            (429, ErrorKind::Overload),
            (500, ErrorKind::Execution),
            (503, ErrorKind::NotAvailable),
        ];
        for (status, kind) in cases {
            let err = normalize_status(StatusCode::from_u16(status).unwrap(), "");
            assert_eq!(err.kind(), kind, "status {status}");
        }
    }

    #[test]
    fn transient_statuses_drive_retries() {
        for status in [408u16, 429, 500, 503] {
            let err = normalize_status(StatusCode::from_u16(status).unwrap(), "busy");
            assert!(err.is_transient(), "status {status} must be retried");
        }
        for status in [400u16, 401, 403, 404, 409, 410] {
            let err = normalize_status(StatusCode::from_u16(status).unwrap(), "no");
            assert!(!err.is_transient(), "status {status} must short-circuit");
        }
    }

    #[test]
    fn wire_server_decodes_addresses_lazily() {
        let raw = serde_json::json!({
            "id": "srv-1",
            "name": "gw",
            "status": "ACTIVE",
            "addresses": {
                "private": [{"addr": "10.0.0.4", "version": 4}]
            }
        });
        let server: WireServer = serde_json::from_value(raw).unwrap();
        assert_eq!(server.id, "srv-1");
        let entries: Vec<WireAddress> =
            serde_json::from_value(server.addresses["private"].clone()).unwrap();
        assert_eq!(entries[0].addr, "10.0.0.4");
        assert_eq!(entries[0].version, 4);
    }
}
