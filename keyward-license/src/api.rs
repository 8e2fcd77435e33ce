//! Wire documents exchanged with the licensing API.
//!
//! These are only ever decoded from authenticated bodies.

use crate::authenticator::Authenticated;
use crate::error::{LicenseError, LicenseResult};
use crate::license::{Entitlement, LicenseStatus};
use crate::machine::EntityKind;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// License attributes as issued by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseData {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default = "default_status")]
    pub status: LicenseStatus,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_machines: Option<u32>,
    #[serde(default)]
    pub max_processes: Option<u32>,
    #[serde(default)]
    pub require_heartbeat: bool,
    #[serde(default)]
    pub entitlements: Vec<Entitlement>,
}

fn default_status() -> LicenseStatus {
    LicenseStatus::Active
}

/// Result of a validation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMeta {
    pub valid: bool,
    pub code: String,
    #[serde(default)]
    pub detail: String,
}

/// Validation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationDocument {
    #[serde(default)]
    pub data: Option<LicenseData>,
    pub meta: ValidationMeta,
}

/// A machine or process as known to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineData {
    pub id: String,
    pub fingerprint: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

/// Activation and ping response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineDocument {
    pub data: MachineData,
}

/// A published release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseData {
    pub version: String,
    #[serde(default)]
    pub location: Option<String>,
}

/// Upgrade response. `data` is null when there is nothing newer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDocument {
    #[serde(default)]
    pub data: Option<ReleaseData>,
}

/// A single API error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDocument {
    pub errors: Vec<ApiError>,
}

/// What a request was about, used to give API errors a precise variant.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ErrorContext<'a> {
    pub kind: EntityKind,
    pub fingerprint: Option<&'a str>,
    pub limit: Option<u32>,
}

impl<'a> ErrorContext<'a> {
    pub(crate) fn none() -> Self {
        Self {
            kind: EntityKind::Machine,
            fingerprint: None,
            limit: None,
        }
    }

    pub(crate) fn entity(kind: EntityKind, fingerprint: &'a str, limit: Option<u32>) -> Self {
        Self {
            kind,
            fingerprint: Some(fingerprint),
            limit,
        }
    }
}

impl ApiError {
    /// Maps the error code to a [`LicenseError`].
    pub(crate) fn into_license_error(self, ctx: ErrorContext<'_>) -> LicenseError {
        let fingerprint = ctx.fingerprint.unwrap_or_default().to_string();
        let detail = if self.detail.is_empty() {
            self.title
        } else {
            self.detail
        };
        let code = self.code.unwrap_or_default();

        match code.as_str() {
            "TOKEN_INVALID" => LicenseError::TokenInvalid(detail),
            "LICENSE_INVALID" => LicenseError::LicenseKeyInvalid(detail),
            "FORBIDDEN" | "NOT_AUTHORIZED" => LicenseError::NotAuthorized(detail),
            "FINGERPRINT_TAKEN" => match ctx.kind {
                EntityKind::Machine => LicenseError::MachineAlreadyActivated { fingerprint },
                EntityKind::Process => LicenseError::FingerprintTaken { fingerprint },
            },
            "MACHINE_LIMIT_EXCEEDED" => LicenseError::MachineLimitExceeded {
                limit: ctx.limit.unwrap_or_default(),
            },
            "MACHINE_PROCESS_LIMIT_EXCEEDED" => LicenseError::ProcessLimitExceeded {
                limit: ctx.limit.unwrap_or_default(),
            },
            "MACHINE_HEARTBEAT_DEAD" => LicenseError::HeartbeatDead {
                kind: EntityKind::Machine,
                fingerprint,
                misses: 0,
            },
            "PROCESS_HEARTBEAT_DEAD" => LicenseError::HeartbeatDead {
                kind: EntityKind::Process,
                fingerprint,
                misses: 0,
            },
            "NOT_FOUND" => match ctx.fingerprint {
                Some(fp) => LicenseError::not_found(ctx.kind, fp),
                None => LicenseError::NotFound(detail),
            },
            _ => LicenseError::Api { code, detail },
        }
    }
}

/// Decodes an authenticated body as `T`, or as the API error it carries.
pub(crate) fn decode<T: DeserializeOwned>(
    auth: &Authenticated,
    ctx: ErrorContext<'_>,
) -> LicenseResult<T> {
    // 204 responses carry no body.
    let value: serde_json::Value = if auth.body.iter().all(u8::is_ascii_whitespace) {
        serde_json::Value::Null
    } else {
        auth.json()?
    };
    if value.get("errors").is_some() {
        let doc: ErrorDocument = serde_json::from_value(value)?;
        let err = doc.errors.into_iter().next().map_or_else(
            || LicenseError::Api {
                code: String::new(),
                detail: "empty error document".into(),
            },
            |e| e.into_license_error(ctx),
        );
        return Err(err);
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(code: &str) -> ApiError {
        ApiError {
            title: "Title".into(),
            detail: String::new(),
            code: Some(code.into()),
        }
    }

    #[test]
    fn maps_fingerprint_taken_by_kind() {
        let ctx = ErrorContext::entity(EntityKind::Machine, "fp", None);
        assert!(matches!(
            error("FINGERPRINT_TAKEN").into_license_error(ctx),
            LicenseError::MachineAlreadyActivated { fingerprint } if fingerprint == "fp"
        ));

        let ctx = ErrorContext::entity(EntityKind::Process, "fp", None);
        assert!(matches!(
            error("FINGERPRINT_TAKEN").into_license_error(ctx),
            LicenseError::FingerprintTaken { .. }
        ));
    }

    #[test]
    fn maps_not_found_with_and_without_entity() {
        let ctx = ErrorContext::entity(EntityKind::Process, "p1", None);
        assert!(matches!(
            error("NOT_FOUND").into_license_error(ctx),
            LicenseError::ProcessNotFound { .. }
        ));
        assert!(matches!(
            error("NOT_FOUND").into_license_error(ErrorContext::none()),
            LicenseError::NotFound(detail) if detail == "Title"
        ));
    }

    #[test]
    fn unknown_code_is_preserved() {
        match error("SOMETHING_NEW").into_license_error(ErrorContext::none()) {
            LicenseError::Api { code, .. } => assert_eq!(code, "SOMETHING_NEW"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
