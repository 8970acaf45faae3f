//! Intermediate issuer identity.

use std::fmt;
use std::path::Path;

use rcgen::{CertificateParams, KeyPair};
use rustls_pki_types::CertificateDer;

use crate::certificate::Certificate;
use crate::error::CaError;

/// Issuer certificate and private key used to sign leaves.
///
/// Read-only once loaded; share it behind an `Arc`.
pub struct IntermediateIdentity {
    /// Issuer certificate as parsed from its original encoding.
    certificate: Certificate,

    /// Issuer private key.
    key_pair: KeyPair,

    /// Issuer reconstructed for rcgen's `signed_by`.
    issuer: rcgen::Certificate,
}

impl IntermediateIdentity {
    /// Load the issuer from certificate and key files (PEM).
    pub fn from_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, CaError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let cert_pem = std::fs::read_to_string(cert_path).map_err(|e| CaError::CertificateParse {
            what: "intermediate",
            reason: format!("{}: {}", cert_path.display(), e),
        })?;
        let key_pem = std::fs::read_to_string(key_path)
            .map_err(|e| CaError::Signing(format!("{}: {}", key_path.display(), e)))?;

        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Load the issuer from PEM text.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CaError> {
        let certificate = Certificate::from_pem(cert_pem, "intermediate")?;
        let key_pair =
            KeyPair::from_pem(key_pem).map_err(|e| CaError::Signing(format!("issuer key: {}", e)))?;
        Self::new(certificate, key_pair)
    }

    /// Build the issuer from an already parsed certificate and its key.
    pub fn new(certificate: Certificate, key_pair: KeyPair) -> Result<Self, CaError> {
        if key_pair.public_key_raw() != certificate.public_key().raw() {
            return Err(CaError::Signing(
                "issuer key does not match issuer certificate".to_string(),
            ));
        }

        let der = CertificateDer::from(certificate.der().to_vec());
        let issuer = CertificateParams::from_ca_cert_der(&der)
            .and_then(|params| params.self_signed(&key_pair))
            .map_err(|e| CaError::CertificateParse {
                what: "intermediate",
                reason: e.to_string(),
            })?;

        Ok(Self {
            certificate,
            key_pair,
            issuer,
        })
    }

    /// Issuer certificate as loaded.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub(crate) fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub(crate) fn issuer(&self) -> &rcgen::Certificate {
        &self.issuer
    }
}

impl fmt::Debug for IntermediateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntermediateIdentity")
            .field("subject", &self.certificate.common_name())
            .field("serial", &self.certificate.serial())
            .finish_non_exhaustive()
    }
}
