//! Conversions from borrowed x509-parser structures to owned values.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use const_oid::ObjectIdentifier;
use ocfca_core::oid;
use thiserror::Error;
use x509_parser::der_parser::oid::Oid;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

/// Errors converting parsed X.509 structures.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("object identifier {0} has an arc wider than 64 bits")]
    Oid(String),

    #[error("failed to parse {attribute}: {reason}")]
    Attribute {
        attribute: &'static str,
        reason: String,
    },
}

/// A single subject attribute (type and string value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAttribute {
    /// Attribute type arcs, e.g. `[2, 5, 4, 3]` for CommonName.
    pub oid: Vec<u64>,

    /// Attribute value as text.
    pub value: String,
}

/// An extension kept as raw DER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExtension {
    pub oid: Vec<u64>,
    pub critical: bool,
    pub value: Vec<u8>,
}

impl RawExtension {
    /// Check whether this extension has the given OID.
    pub fn is(&self, id: &ObjectIdentifier) -> bool {
        oid::matches(&self.oid, id)
    }
}

/// Subject alternative name components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectAltNames {
    pub dns_names: Vec<String>,
    pub email_addresses: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub uris: Vec<String>,
}

impl SubjectAltNames {
    /// True when no component is present.
    pub fn is_empty(&self) -> bool {
        self.dns_names.is_empty()
            && self.email_addresses.is_empty()
            && self.ip_addresses.is_empty()
            && self.uris.is_empty()
    }
}

/// Public key algorithms the authority knows how to certify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    EcdsaP256,
    EcdsaP384,
    Ed25519,
    Rsa { bits: usize },
    Unsupported,
}

/// Subject public key of a request or certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPublicKey {
    algorithm: KeyAlgorithm,

    /// Content of the subjectPublicKey BIT STRING.
    raw: Vec<u8>,
}

impl SubjectPublicKey {
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

pub(crate) fn oid_arcs(id: &Oid<'_>) -> Result<Vec<u64>, DecodeError> {
    id.iter()
        .map(|arcs| arcs.collect())
        .ok_or_else(|| DecodeError::Oid(id.to_id_string()))
}

/// Extract the attributes of a distinguished name, in encoding order.
pub(crate) fn name_attributes(name: &X509Name<'_>) -> Result<Vec<NameAttribute>, DecodeError> {
    let mut attributes = Vec::new();
    for rdn in name.iter() {
        for attr in rdn.iter() {
            let value = attr.as_str().map_err(|e| DecodeError::Attribute {
                attribute: "subject attribute",
                reason: format!("{:?}", e),
            })?;
            attributes.push(NameAttribute {
                oid: oid_arcs(attr.attr_type())?,
                value: value.to_string(),
            });
        }
    }
    Ok(attributes)
}

/// First CommonName of a distinguished name.
pub(crate) fn common_name(attributes: &[NameAttribute]) -> Option<String> {
    attributes
        .iter()
        .find(|attr| attr.oid == [2, 5, 4, 3])
        .map(|attr| attr.value.clone())
}

pub(crate) fn subject_public_key(
    spki: &SubjectPublicKeyInfo<'_>,
) -> Result<SubjectPublicKey, DecodeError> {
    let algorithm_arcs = oid_arcs(&spki.algorithm.algorithm)?;
    let curve = spki
        .algorithm
        .parameters
        .as_ref()
        .and_then(|params| params.as_oid().ok())
        .map(|curve| oid_arcs(&curve))
        .transpose()?;

    let algorithm = if oid::matches(&algorithm_arcs, &oid::EC_PUBLIC_KEY) {
        match curve {
            Some(c) if oid::matches(&c, &oid::SECP256R1) => KeyAlgorithm::EcdsaP256,
            Some(c) if oid::matches(&c, &oid::SECP384R1) => KeyAlgorithm::EcdsaP384,
            _ => KeyAlgorithm::Unsupported,
        }
    } else if oid::matches(&algorithm_arcs, &oid::ED25519) {
        KeyAlgorithm::Ed25519
    } else if oid::matches(&algorithm_arcs, &oid::RSA_ENCRYPTION) {
        match spki.parsed() {
            Ok(PublicKey::RSA(rsa)) => KeyAlgorithm::Rsa {
                bits: rsa.key_size(),
            },
            _ => KeyAlgorithm::Unsupported,
        }
    } else {
        KeyAlgorithm::Unsupported
    };

    Ok(SubjectPublicKey {
        algorithm,
        raw: spki.subject_public_key.data.to_vec(),
    })
}

pub(crate) fn raw_extension(ext: &X509Extension<'_>) -> Result<RawExtension, DecodeError> {
    Ok(RawExtension {
        oid: oid_arcs(&ext.oid)?,
        critical: ext.critical,
        value: ext.value.to_vec(),
    })
}

/// Collect SAN components of a parsed SubjectAlternativeName extension.
pub(crate) fn collect_alt_names(ext: &X509Extension<'_>, names: &mut SubjectAltNames) {
    if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
        for name in &san.general_names {
            match name {
                GeneralName::DNSName(dns) => names.dns_names.push(dns.to_string()),
                GeneralName::RFC822Name(email) => names.email_addresses.push(email.to_string()),
                GeneralName::URI(uri) => names.uris.push(uri.to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        names.ip_addresses.push(ip);
                    }
                }
                _ => {}
            }
        }
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(bytes) {
        return Some(IpAddr::V4(Ipv4Addr::from(v4)));
    }
    <[u8; 16]>::try_from(bytes)
        .ok()
        .map(|v6| IpAddr::V6(Ipv6Addr::from(v6)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_from_bytes() {
        assert_eq!(
            ip_from_bytes(&[10, 0, 0, 1]),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
        );
        assert_eq!(
            ip_from_bytes(&[0; 16]),
            Some(IpAddr::V6(Ipv6Addr::UNSPECIFIED))
        );
        assert_eq!(ip_from_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn test_alt_names_empty() {
        let mut names = SubjectAltNames::default();
        assert!(names.is_empty());
        names.uris.push("coaps://device".to_string());
        assert!(!names.is_empty());
    }
}
