//! Parsed X.509 certificates.

use chrono::{DateTime, Utc};
use const_oid::ObjectIdentifier;
use der::{Decode, Encode};
use ocfca_core::oid;
use sha2::{Digest, Sha256};
use x509_parser::prelude::{FromDer, ParsedExtension, X509Certificate};

use crate::error::CaError;
use crate::x509::{self, NameAttribute, RawExtension, SubjectAltNames, SubjectPublicKey};

/// Key usage bits relevant to issued leaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyUsage {
    pub digital_signature: bool,
    pub non_repudiation: bool,
    pub key_encipherment: bool,
    pub data_encipherment: bool,
    pub key_agreement: bool,
    pub key_cert_sign: bool,
    pub crl_sign: bool,
}

impl KeyUsage {
    /// Usage of every OCF identity certificate.
    pub fn ocf_identity() -> Self {
        Self {
            digital_signature: true,
            key_agreement: true,
            ..Self::default()
        }
    }
}

/// A certificate parsed into owned values.
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
    serial: String,
    subject: Vec<NameAttribute>,
    issuer: Vec<NameAttribute>,
    common_name: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    public_key: SubjectPublicKey,
    key_usage: Option<KeyUsage>,
    alt_names: SubjectAltNames,
    extensions: Vec<RawExtension>,
}

impl Certificate {
    /// Parse a DER-encoded certificate.
    ///
    /// `what` names the certificate in parse errors ("leaf", "issuer", ...).
    pub fn parse(der: &[u8], what: &'static str) -> Result<Self, CaError> {
        let parse_error = |reason: String| CaError::CertificateParse { what, reason };

        let (_, cert) = X509Certificate::from_der(der).map_err(|e| parse_error(e.to_string()))?;

        let subject =
            x509::name_attributes(cert.subject()).map_err(|e| parse_error(e.to_string()))?;
        let issuer = x509::name_attributes(cert.issuer()).map_err(|e| parse_error(e.to_string()))?;
        let common_name = x509::common_name(&subject).unwrap_or_default();
        let public_key =
            x509::subject_public_key(cert.public_key()).map_err(|e| parse_error(e.to_string()))?;

        let validity = cert.validity();
        let not_before = timestamp(validity.not_before.timestamp())
            .ok_or_else(|| parse_error("notBefore out of range".to_string()))?;
        let not_after = timestamp(validity.not_after.timestamp())
            .ok_or_else(|| parse_error("notAfter out of range".to_string()))?;

        let mut key_usage = None;
        let mut alt_names = SubjectAltNames::default();
        let mut extensions = Vec::new();
        for ext in cert.extensions() {
            if let ParsedExtension::KeyUsage(ku) = ext.parsed_extension() {
                key_usage = Some(KeyUsage {
                    digital_signature: ku.digital_signature(),
                    non_repudiation: ku.non_repudiation(),
                    key_encipherment: ku.key_encipherment(),
                    data_encipherment: ku.data_encipherment(),
                    key_agreement: ku.key_agreement(),
                    key_cert_sign: ku.key_cert_sign(),
                    crl_sign: ku.crl_sign(),
                });
            }
            x509::collect_alt_names(ext, &mut alt_names);
            extensions.push(x509::raw_extension(ext).map_err(|e| parse_error(e.to_string()))?);
        }

        Ok(Self {
            der: der.to_vec(),
            serial: hex::encode(cert.raw_serial()),
            subject,
            issuer,
            common_name,
            not_before,
            not_after,
            public_key,
            key_usage,
            alt_names,
            extensions,
        })
    }

    /// Parse a PEM-encoded certificate.
    pub fn from_pem(pem_text: &str, what: &'static str) -> Result<Self, CaError> {
        let block = pem::parse(pem_text).map_err(|e| CaError::CertificateParse {
            what,
            reason: e.to_string(),
        })?;
        Self::parse(block.contents(), what)
    }

    /// Parse every certificate of a PEM bundle, in order.
    pub fn bundle_from_pem(pem_text: &str, what: &'static str) -> Result<Vec<Self>, CaError> {
        let blocks = pem::parse_many(pem_text).map_err(|e| CaError::CertificateParse {
            what,
            reason: e.to_string(),
        })?;
        blocks
            .iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .map(|block| Self::parse(block.contents(), what))
            .collect()
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding of the certificate.
    pub fn pem(&self) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", self.der.clone()))
    }

    /// SHA-256 fingerprint, hex encoded.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    /// Serial number, hex encoded.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn subject(&self) -> &[NameAttribute] {
        &self.subject
    }

    pub fn issuer(&self) -> &[NameAttribute] {
        &self.issuer
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn public_key(&self) -> &SubjectPublicKey {
        &self.public_key
    }

    pub fn key_usage(&self) -> Option<KeyUsage> {
        self.key_usage
    }

    pub fn alt_names(&self) -> &SubjectAltNames {
        &self.alt_names
    }

    pub fn extensions(&self) -> &[RawExtension] {
        &self.extensions
    }

    /// Every extension with the given OID, in certificate order.
    pub fn extensions_with<'a>(
        &'a self,
        id: &'a ObjectIdentifier,
    ) -> impl Iterator<Item = &'a RawExtension> + 'a {
        self.extensions.iter().filter(move |ext| ext.is(id))
    }

    /// Decoded Extended Key Usage, `None` when the extension is absent.
    pub fn extended_key_usage(&self) -> Result<Option<Vec<ObjectIdentifier>>, CaError> {
        self.extensions_with(&oid::EXTENDED_KEY_USAGE)
            .next()
            .map(|ext| decode_extended_key_usage(&ext.value))
            .transpose()
    }
}

/// DER SEQUENCE OF KeyPurposeId.
pub(crate) fn encode_extended_key_usage(usages: &[ObjectIdentifier]) -> Result<Vec<u8>, CaError> {
    usages
        .to_vec()
        .to_der()
        .map_err(|e| CaError::ExtensionEncoding(e.to_string()))
}

pub(crate) fn decode_extended_key_usage(value: &[u8]) -> Result<Vec<ObjectIdentifier>, CaError> {
    Vec::<ObjectIdentifier>::from_der(value).map_err(|e| CaError::CertificateParse {
        what: "extended key usage",
        reason: e.to_string(),
    })
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

/// Leaf and issuer returned by a successful sign or renew call.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub leaf: Certificate,
    pub issuer: Certificate,
}

impl IssuedCertificate {
    /// Leaf followed by issuer, PEM encoded.
    pub fn chain_pem(&self) -> String {
        format!("{}{}", self.leaf.pem(), self.issuer.pem())
    }
}
