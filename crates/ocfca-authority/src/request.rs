//! Certificate signing requests.
//!
//! A [`CertificateRequest`] is parsed once with x509-parser and kept as owned
//! values, so it can be shared across validators and the profile builder
//! without holding on to borrowed parser structures.

use thiserror::Error;
use x509_parser::prelude::{FromDer, ParsedCriAttribute, X509CertificationRequest};

use crate::x509::{self, DecodeError};

pub use crate::x509::{
    KeyAlgorithm, NameAttribute, RawExtension, SubjectAltNames, SubjectPublicKey,
};

/// Errors that can occur while reading a certificate request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("failed to decode PEM: {0}")]
    Pem(String),

    #[error("expected a CERTIFICATE REQUEST PEM block, got {0}")]
    PemTag(String),

    #[error("failed to parse CSR: {0}")]
    Parse(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("CSR signature verification failed: {0}")]
    Signature(String),
}

/// A parsed, immutable certificate signing request.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    der: Vec<u8>,
    subject: Vec<NameAttribute>,
    common_name: String,
    public_key: SubjectPublicKey,
    alt_names: SubjectAltNames,
    extensions: Vec<RawExtension>,
}

impl CertificateRequest {
    /// Parse a DER-encoded PKCS#10 request.
    pub fn from_der(der: &[u8]) -> Result<Self, RequestError> {
        let (_, csr) = X509CertificationRequest::from_der(der)
            .map_err(|e| RequestError::Parse(e.to_string()))?;
        let info = &csr.certification_request_info;

        let subject = x509::name_attributes(&info.subject)?;
        let common_name = x509::common_name(&subject).unwrap_or_default();
        let public_key = x509::subject_public_key(&info.subject_pki)?;

        let mut alt_names = SubjectAltNames::default();
        let mut extensions = Vec::new();
        for attr in info.iter_attributes() {
            if let ParsedCriAttribute::ExtensionRequest(request) = attr.parsed_attribute() {
                for ext in &request.extensions {
                    x509::collect_alt_names(ext, &mut alt_names);
                    extensions.push(x509::raw_extension(ext)?);
                }
            }
        }

        Ok(Self {
            der: der.to_vec(),
            subject,
            common_name,
            public_key,
            alt_names,
            extensions,
        })
    }

    /// Parse a PEM-encoded request.
    pub fn from_pem(pem_text: &str) -> Result<Self, RequestError> {
        let block = pem::parse(pem_text).map_err(|e| RequestError::Pem(e.to_string()))?;
        match block.tag() {
            "CERTIFICATE REQUEST" | "NEW CERTIFICATE REQUEST" => Self::from_der(block.contents()),
            other => Err(RequestError::PemTag(other.to_string())),
        }
    }

    /// Verify the self-signature of the request.
    pub fn check_signature(&self) -> Result<(), RequestError> {
        let (_, csr) = X509CertificationRequest::from_der(&self.der)
            .map_err(|e| RequestError::Parse(e.to_string()))?;
        csr.verify_signature()
            .map_err(|e| RequestError::Signature(e.to_string()))
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject attributes in encoding order.
    pub fn subject(&self) -> &[NameAttribute] {
        &self.subject
    }

    /// Subject CommonName, empty when the request has none.
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn public_key(&self) -> &SubjectPublicKey {
        &self.public_key
    }

    /// Alternative names requested through the extension request attribute.
    pub fn alt_names(&self) -> &SubjectAltNames {
        &self.alt_names
    }

    pub fn dns_names(&self) -> &[String] {
        &self.alt_names.dns_names
    }

    /// All requested extensions, raw.
    pub fn extensions(&self) -> &[RawExtension] {
        &self.extensions
    }
}
