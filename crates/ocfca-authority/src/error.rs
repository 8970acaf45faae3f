//! Authority errors.
//!
//! [`CaError`] is the failure taxonomy of the signing pipeline and the
//! authority. [`ApiError`] wraps a cause with the operation that produced it,
//! a status class and diagnostic context, and is what callers receive.

use std::collections::BTreeMap;
use std::fmt;

use ocfca_core::IdentityError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::provisioner::ProvisionerError;
use crate::request::RequestError;
use crate::store::StoreError;

/// Status class of a failed authority operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    BadRequest,
    Unauthorized,
    NotFound,
    InternalServerError,
    NotImplemented,
}

impl Status {
    /// HTTP status code for this class.
    pub fn code(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::InternalServerError => 500,
            Self::NotImplemented => 501,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::NotFound => "Not Found",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
        };
        write!(f, "{} {}", self.code(), text)
    }
}

/// Errors that can occur while authorizing or issuing certificates.
#[derive(Debug, Error)]
pub enum CaError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("{0}")]
    Unauthorized(String),

    #[error("invalid certificate request: {0}")]
    InvalidSignature(String),

    #[error("error creating certificate profile: {0}")]
    ProfileBuild(String),

    #[error("error encoding certificate extension: {0}")]
    ExtensionEncoding(String),

    #[error("error parsing {what} certificate: {reason}")]
    CertificateParse { what: &'static str, reason: String },

    #[error("error signing certificate: {0}")]
    Signing(String),

    #[error("error storing certificate in db: {0}")]
    Storage(#[source] StoreError),

    #[error("unexpected options type {0}")]
    UnexpectedOption(String),

    #[error("provisioner not found: {0}")]
    ProvisionerNotFound(String),

    #[error(transparent)]
    Provisioner(#[from] ProvisionerError),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("certificate not found: {0}")]
    CertificateNotFound(String),

    #[error("token already used")]
    TokenReused,
}

impl CaError {
    /// Status class this error maps to when nothing more specific is known.
    pub fn status(&self) -> Status {
        match self {
            Self::Identity(_) | Self::Unauthorized(_) | Self::TokenReused => Status::Unauthorized,
            Self::Provisioner(e) if e.is_unauthorized() => Status::Unauthorized,
            Self::InvalidSignature(_) | Self::Request(_) => Status::BadRequest,
            Self::ProvisionerNotFound(_) | Self::CertificateNotFound(_) => Status::NotFound,
            Self::NotImplemented(_) => Status::NotImplemented,
            _ => Status::InternalServerError,
        }
    }
}

/// Error returned to callers of the authority.
#[derive(Debug, Error)]
#[error("{op}: {cause}")]
pub struct ApiError {
    op: &'static str,

    #[source]
    cause: CaError,

    status: Status,

    context: BTreeMap<String, String>,
}

impl ApiError {
    /// Wrap a cause with an explicit status class.
    pub fn new(op: &'static str, cause: impl Into<CaError>, status: Status) -> Self {
        Self {
            op,
            cause: cause.into(),
            status,
            context: BTreeMap::new(),
        }
    }

    /// Wrap a cause using its default status class.
    pub fn from_cause(op: &'static str, cause: impl Into<CaError>) -> Self {
        let cause = cause.into();
        let status = cause.status();
        Self::new(op, cause, status)
    }

    pub fn unauthorized(op: &'static str, cause: impl Into<CaError>) -> Self {
        Self::new(op, cause, Status::Unauthorized)
    }

    pub fn bad_request(op: &'static str, cause: impl Into<CaError>) -> Self {
        Self::new(op, cause, Status::BadRequest)
    }

    pub fn internal(op: &'static str, cause: impl Into<CaError>) -> Self {
        Self::new(op, cause, Status::InternalServerError)
    }

    /// Builder method to attach a diagnostic key/value pair.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach every pair of a prepared context map.
    pub fn with_context_map(mut self, context: &BTreeMap<String, String>) -> Self {
        self.context
            .extend(context.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Operation that failed, e.g. "authority.Sign".
    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn cause(&self) -> &CaError {
        &self.cause
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::BadRequest.code(), 400);
        assert_eq!(Status::Unauthorized.code(), 401);
        assert_eq!(Status::NotFound.code(), 404);
        assert_eq!(Status::InternalServerError.code(), 500);
        assert_eq!(Status::NotImplemented.code(), 501);
        assert_eq!(Status::Unauthorized.to_string(), "401 Unauthorized");
    }

    #[test]
    fn test_default_status() {
        let identity = IdentityError::InvalidDeviceUuid {
            common_name: "uuid:nope".to_string(),
        };
        assert_eq!(CaError::from(identity).status(), Status::Unauthorized);
        assert_eq!(
            CaError::InvalidSignature("bad".to_string()).status(),
            Status::BadRequest
        );
        assert_eq!(
            CaError::UnexpectedOption("Foo".to_string()).status(),
            Status::InternalServerError
        );
        assert_eq!(
            CaError::NotImplemented("sign ssh").status(),
            Status::NotImplemented
        );
    }

    #[test]
    fn test_api_error_display_and_context() {
        let err = ApiError::internal("authority.Sign", CaError::Signing("boom".to_string()))
            .with_context("csr", "uuid:x")
            .with_context("stage", "Finalizing");

        assert_eq!(
            err.to_string(),
            "authority.Sign: error signing certificate: boom"
        );
        assert_eq!(err.status(), Status::InternalServerError);
        assert_eq!(err.context().get("csr").map(String::as_str), Some("uuid:x"));
        assert_eq!(err.context().len(), 2);
    }
}
