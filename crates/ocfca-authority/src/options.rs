//! Sign options.
//!
//! Provisioners authorize a signing call by returning a sequence of
//! [`SignOption`]s. Each option either validates the request, validates the
//! built certificate, or modifies the certificate profile. Order matters:
//! validators run and modifiers apply in the order they appear.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rcgen::CertificateParams;
use thiserror::Error;

use crate::request::CertificateRequest;

/// Failure reported by a sign option.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct OptionError(String);

impl OptionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Caller-supplied signing parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignOptions {
    /// Requested start of validity.
    pub not_before: Option<DateTime<Utc>>,

    /// Requested end of validity.
    pub not_after: Option<DateTime<Utc>>,

    /// How far to move `not_before` into the past when it is not requested.
    pub backdate: Option<Duration>,
}

impl SignOptions {
    /// Builder method to request an explicit validity window.
    pub fn with_validity(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self.not_after = Some(not_after);
        self
    }

    /// Builder method to set the backdate.
    pub fn with_backdate(mut self, backdate: Duration) -> Self {
        self.backdate = Some(backdate);
        self
    }
}

/// Validates the certificate profile after it has been built.
pub trait CertificateValidator: fmt::Debug + Send + Sync {
    fn valid(&self, params: &CertificateParams) -> Result<(), OptionError>;
}

/// Validates the raw certificate request.
pub trait CertificateRequestValidator: fmt::Debug + Send + Sync {
    fn valid(&self, csr: &CertificateRequest) -> Result<(), OptionError>;
}

/// Mutates the certificate profile while it is being built.
pub trait ProfileModifier: fmt::Debug + Send + Sync {
    fn modify(&self, params: &mut CertificateParams, opts: &SignOptions)
        -> Result<(), OptionError>;
}

/// One authorized sign option.
#[derive(Debug, Clone)]
pub enum SignOption {
    CertificateValidator(Arc<dyn CertificateValidator>),
    CertificateRequestValidator(Arc<dyn CertificateRequestValidator>),
    ProfileModifier(Arc<dyn ProfileModifier>),

    /// Tags the call as an OCF identity flow. Carries no behavior.
    OcfMarker,

    /// An option this authority does not know how to apply, by type name.
    Unknown(String),
}

impl SignOption {
    pub fn certificate_validator(v: impl CertificateValidator + 'static) -> Self {
        Self::CertificateValidator(Arc::new(v))
    }

    pub fn request_validator(v: impl CertificateRequestValidator + 'static) -> Self {
        Self::CertificateRequestValidator(Arc::new(v))
    }

    pub fn modifier(m: impl ProfileModifier + 'static) -> Self {
        Self::ProfileModifier(Arc::new(m))
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, Self::OcfMarker)
    }

    /// Short type name used in diagnostics.
    pub fn kind(&self) -> &str {
        match self {
            Self::CertificateValidator(_) => "CertificateValidator",
            Self::CertificateRequestValidator(_) => "CertificateRequestValidator",
            Self::ProfileModifier(_) => "ProfileModifier",
            Self::OcfMarker => "OcfMarker",
            Self::Unknown(name) => name,
        }
    }
}

/// Profile modifiers of an option sequence, in order.
pub fn profile_modifiers(
    options: &[SignOption],
) -> impl Iterator<Item = &Arc<dyn ProfileModifier>> {
    options.iter().filter_map(|opt| match opt {
        SignOption::ProfileModifier(m) => Some(m),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Noop;

    impl ProfileModifier for Noop {
        fn modify(&self, _: &mut CertificateParams, _: &SignOptions) -> Result<(), OptionError> {
            Ok(())
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(SignOption::OcfMarker.kind(), "OcfMarker");
        assert_eq!(SignOption::modifier(Noop).kind(), "ProfileModifier");
        assert_eq!(
            SignOption::Unknown("SshCertOptions".to_string()).kind(),
            "SshCertOptions"
        );
        assert!(SignOption::OcfMarker.is_marker());
        assert!(!SignOption::modifier(Noop).is_marker());
    }

    #[test]
    fn test_profile_modifiers_filter() {
        let options = vec![
            SignOption::OcfMarker,
            SignOption::modifier(Noop),
            SignOption::Unknown("x".to_string()),
            SignOption::modifier(Noop),
        ];
        assert_eq!(profile_modifiers(&options).count(), 2);
    }

    #[test]
    fn test_sign_options_builders() {
        let now = Utc::now();
        let opts = SignOptions::default()
            .with_validity(now, now + Duration::hours(1))
            .with_backdate(Duration::minutes(1));
        assert_eq!(opts.not_before, Some(now));
        assert_eq!(opts.backdate, Some(Duration::minutes(1)));
    }
}
