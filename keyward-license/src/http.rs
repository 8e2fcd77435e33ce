//! HTTP transport (feature `online`).
//!
//! Maps requests onto the licensing API and turns responses into
//! [`SignedEnvelope`]s from the `Keygen-Signature`, `Digest` and `Date`
//! headers. Error statuses are returned as envelopes as well so their
//! bodies are authenticated before the error code is read.

use crate::config::LicenseConfig;
use crate::envelope::{RequestTarget, SignedEnvelope};
use crate::error::{LicenseError, LicenseResult};
use crate::machine::EntityKind;
use crate::transport::{Request, Transport};
use async_trait::async_trait;
use keyward_crypto::SignatureAlgorithm;
use reqwest::{Client, Method, Url};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const SIGNATURE_HEADER: &str = "Keygen-Signature";
const TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to the licensing API over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
    account: String,
    token: Option<String>,
    license_key: String,
}

impl HttpTransport {
    /// Creates a transport for `config`.
    pub fn new(config: &LicenseConfig) -> LicenseResult<Self> {
        if config.account.is_empty() {
            return Err(LicenseError::Config("account is required".into()));
        }
        let base = Url::parse(&config.api_url)
            .map_err(|e| LicenseError::Config(format!("invalid api url: {e}")))?;
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(TIMEOUT)
            .build()
            .map_err(|e| LicenseError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base,
            account: config.account.clone(),
            token: config.token.clone(),
            license_key: config.license_key.clone(),
        })
    }

    fn collection(kind: EntityKind) -> &'static str {
        match kind {
            EntityKind::Machine => "machines",
            EntityKind::Process => "processes",
        }
    }

    fn route(&self, request: &Request) -> (Method, String, Option<serde_json::Value>) {
        let account = &self.account;
        match request {
            Request::Validate {
                license_key,
                fingerprint,
                product,
            } => (
                Method::POST,
                format!("/v1/accounts/{account}/licenses/actions/validate-key"),
                Some(json!({
                    "meta": {
                        "key": license_key,
                        "scope": { "fingerprint": fingerprint, "product": product },
                    }
                })),
            ),
            Request::Activate {
                license_id,
                kind,
                fingerprint,
            } => (
                Method::POST,
                format!("/v1/accounts/{account}/{}", Self::collection(*kind)),
                Some(json!({
                    "data": { "fingerprint": fingerprint, "license": license_id }
                })),
            ),
            Request::Deactivate {
                kind, fingerprint, ..
            } => (
                Method::DELETE,
                format!(
                    "/v1/accounts/{account}/{}/{fingerprint}",
                    Self::collection(*kind)
                ),
                None,
            ),
            Request::Ping {
                kind, fingerprint, ..
            } => (
                Method::POST,
                format!(
                    "/v1/accounts/{account}/{}/{fingerprint}/actions/ping",
                    Self::collection(*kind)
                ),
                None,
            ),
            Request::Upgrade {
                product,
                current_version,
            } => {
                let mut path =
                    format!("/v1/accounts/{account}/releases/actions/upgrade?version={current_version}");
                if let Some(product) = product {
                    path.push_str(&format!("&product={product}"));
                }
                (Method::GET, path, None)
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> LicenseResult<SignedEnvelope> {
        let (method, path, body) = self.route(&request);
        let url = self
            .base
            .join(&path)
            .map_err(|e| LicenseError::Config(format!("invalid request path: {e}")))?;
        let host = url.host_str().unwrap_or_default().to_string();

        let mut builder = self
            .client
            .request(method.clone(), url)
            .header("Accept", "application/json");
        builder = match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder.header("Authorization", format!("License {}", self.license_key)),
        };
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        debug!("{} {path}", method.as_str());
        let response = builder
            .send()
            .await
            .map_err(|e| LicenseError::Network(e.to_string()))?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let signature_header = header(SIGNATURE_HEADER);
        let digest = header("Digest");
        let date = header("Date");

        let body = response
            .bytes()
            .await
            .map_err(|e| LicenseError::Network(e.to_string()))?;

        let mut envelope = SignedEnvelope::new(body.to_vec())
            .with_request_target(RequestTarget::new(method.as_str(), path, host));
        if let Some(digest) = digest {
            envelope = envelope.with_digest(digest);
        }
        if let Some(date) = date {
            envelope = envelope.with_date(date);
        }
        if let Some(params) = signature_header {
            if let Some(algorithm) = signature_param(&params, "algorithm") {
                envelope.algorithm = algorithm
                    .parse::<SignatureAlgorithm>()
                    .map_err(|_| LicenseError::SignatureAlgorithmNotSupported(algorithm))?;
            }
            if let Some(signature) = signature_param(&params, "signature") {
                envelope = envelope.with_signature(signature);
            }
        }
        Ok(envelope)
    }
}

/// Extracts `name="value"` from a signature header.
fn signature_param(header: &str, name: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"').to_string())
    })
}
