//! Provisioner identity extension.
//!
//! Step-compatible authorities stamp every issued certificate with an
//! extension (OID `1.3.6.1.4.1.37476.9000.64.1`) naming the provisioner that
//! authorized it:
//!
//! ```text
//! Provisioner ::= SEQUENCE {
//!     type           INTEGER,
//!     name           OCTET STRING,
//!     credentialId   OCTET STRING,
//!     keyValuePairs  SEQUENCE OF UTF8String OPTIONAL
//! }
//! ```

use std::fmt;

use der::asn1::OctetString;
use der::{Any, Decode, Encode, Sequence, Tag, Tagged};
use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;

/// Kind of provisioner, with the numeric codes used in the extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisionerType {
    #[serde(rename = "NOOP")]
    Noop,
    #[default]
    #[serde(rename = "JWK")]
    Jwk,
    #[serde(rename = "OIDC")]
    Oidc,
    #[serde(rename = "GCP")]
    Gcp,
    #[serde(rename = "AWS")]
    Aws,
    #[serde(rename = "Azure")]
    Azure,
    #[serde(rename = "ACME")]
    Acme,
    #[serde(rename = "X5C")]
    X5c,
    #[serde(rename = "K8sSA")]
    K8sSa,
    #[serde(rename = "SSHPOP")]
    SshPop,
}

impl ProvisionerType {
    /// Numeric code written into the provisioner extension.
    pub fn code(&self) -> i32 {
        match self {
            Self::Noop => 0,
            Self::Jwk => 1,
            Self::Oidc => 2,
            Self::Gcp => 3,
            Self::Aws => 4,
            Self::Azure => 5,
            Self::Acme => 6,
            Self::X5c => 7,
            Self::K8sSa => 8,
            Self::SshPop => 9,
        }
    }

    /// Inverse of [`ProvisionerType::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        let kind = match code {
            0 => Self::Noop,
            1 => Self::Jwk,
            2 => Self::Oidc,
            3 => Self::Gcp,
            4 => Self::Aws,
            5 => Self::Azure,
            6 => Self::Acme,
            7 => Self::X5c,
            8 => Self::K8sSa,
            9 => Self::SshPop,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ProvisionerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Noop => "NOOP",
            Self::Jwk => "JWK",
            Self::Oidc => "OIDC",
            Self::Gcp => "GCP",
            Self::Aws => "AWS",
            Self::Azure => "Azure",
            Self::Acme => "ACME",
            Self::X5c => "X5C",
            Self::K8sSa => "K8sSA",
            Self::SshPop => "SSHPOP",
        };
        f.write_str(name)
    }
}

/// Wire form of the extension payload.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct ProvisionerExtension {
    provisioner_type: i32,
    name: OctetString,
    credential_id: OctetString,
    #[asn1(optional = "true")]
    key_value_pairs: Option<Vec<Any>>,
}

/// Decoded provisioner identity extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerDescriptor {
    /// Provisioner kind.
    pub provisioner_type: ProvisionerType,

    /// Provisioner name, e.g. "ocf-devices".
    pub name: String,

    /// Credential identifier (key id for JWK provisioners).
    pub credential_id: String,

    /// Optional flat list of alternating keys and values.
    pub key_value_pairs: Vec<String>,
}

impl ProvisionerDescriptor {
    /// Create a descriptor without key-value pairs.
    pub fn new(
        provisioner_type: ProvisionerType,
        name: impl Into<String>,
        credential_id: impl Into<String>,
    ) -> Self {
        Self {
            provisioner_type,
            name: name.into(),
            credential_id: credential_id.into(),
            key_value_pairs: Vec::new(),
        }
    }

    /// Builder method to add a key-value pair.
    pub fn with_pair(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.key_value_pairs.push(key.into());
        self.key_value_pairs.push(value.into());
        self
    }

    /// Identifier the owning authority registers this provisioner under.
    pub fn provisioner_id(&self) -> String {
        format!("{}:{}", self.name, self.credential_id)
    }

    /// Decode the DER payload of the extension.
    pub fn from_der(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let ext = ProvisionerExtension::from_der(bytes)?;

        let provisioner_type = ProvisionerType::from_code(ext.provisioner_type)
            .ok_or(DescriptorError::UnknownType(ext.provisioner_type))?;

        let name = String::from_utf8(ext.name.as_bytes().to_vec())
            .map_err(|_| DescriptorError::InvalidField { field: "name" })?;
        let credential_id = String::from_utf8(ext.credential_id.as_bytes().to_vec())
            .map_err(|_| DescriptorError::InvalidField {
                field: "credentialId",
            })?;

        let key_value_pairs = ext
            .key_value_pairs
            .unwrap_or_default()
            .iter()
            .map(decode_text)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            provisioner_type,
            name,
            credential_id,
            key_value_pairs,
        })
    }

    /// Encode as the DER payload of the extension.
    pub fn to_der(&self) -> Result<Vec<u8>, DescriptorError> {
        let key_value_pairs = if self.key_value_pairs.is_empty() {
            None
        } else {
            Some(
                self.key_value_pairs
                    .iter()
                    .map(Any::encode_from)
                    .collect::<Result<Vec<_>, _>>()?,
            )
        };

        let ext = ProvisionerExtension {
            provisioner_type: self.provisioner_type.code(),
            name: OctetString::new(self.name.as_bytes())?,
            credential_id: OctetString::new(self.credential_id.as_bytes())?,
            key_value_pairs,
        };

        Ok(ext.to_der()?)
    }
}

/// Go encoders pick PrintableString when they can, so accept the common string tags.
fn decode_text(value: &Any) -> Result<String, DescriptorError> {
    match value.tag() {
        Tag::Utf8String | Tag::PrintableString | Tag::Ia5String => {
            String::from_utf8(value.value().to_vec()).map_err(|_| DescriptorError::InvalidField {
                field: "keyValuePairs",
            })
        }
        _ => Err(DescriptorError::InvalidField {
            field: "keyValuePairs",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_round_trip() {
        let descriptor = ProvisionerDescriptor::new(ProvisionerType::Jwk, "ocf-devices", "kid-1")
            .with_pair("tenant", "plgd");

        let der = descriptor.to_der().unwrap();
        let decoded = ProvisionerDescriptor::from_der(&der).unwrap();

        assert_eq!(decoded, descriptor);
        assert_eq!(decoded.provisioner_id(), "ocf-devices:kid-1");
    }

    #[test]
    fn test_key_value_pairs_omitted_when_empty() {
        let descriptor = ProvisionerDescriptor::new(ProvisionerType::Acme, "acme", "");
        let der = descriptor.to_der().unwrap();

        // SEQUENCE { INTEGER 6, OCTET STRING "acme", OCTET STRING "" }
        assert_eq!(
            der,
            vec![0x30, 0x0b, 0x02, 0x01, 0x06, 0x04, 0x04, b'a', b'c', b'm', b'e', 0x04, 0x00]
        );
    }

    #[test]
    fn test_printable_string_pairs_accepted() {
        // SEQUENCE { INTEGER 1, OCTET STRING "p", OCTET STRING "k",
        //   SEQUENCE { PrintableString "a" } }
        let der = [
            0x30, 0x0e, 0x02, 0x01, 0x01, 0x04, 0x01, b'p', 0x04, 0x01, b'k', 0x30, 0x03, 0x13,
            0x01, b'a',
        ];
        let decoded = ProvisionerDescriptor::from_der(&der).unwrap();
        assert_eq!(decoded.name, "p");
        assert_eq!(decoded.credential_id, "k");
        assert_eq!(decoded.key_value_pairs, vec!["a".to_string()]);
    }

    #[test]
    fn test_unknown_type_rejected() {
        // SEQUENCE { INTEGER 42, OCTET STRING "", OCTET STRING "" }
        let der = [0x30, 0x07, 0x02, 0x01, 0x2a, 0x04, 0x00, 0x04, 0x00];
        assert!(matches!(
            ProvisionerDescriptor::from_der(&der),
            Err(DescriptorError::UnknownType(42))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            ProvisionerDescriptor::from_der(&[0x04, 0x01, 0x00]),
            Err(DescriptorError::Asn1(_))
        ));
    }

    #[test]
    fn test_type_codes() {
        for code in 0..10 {
            let kind = ProvisionerType::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(ProvisionerType::from_code(10), None);
        assert_eq!(ProvisionerType::K8sSa.to_string(), "K8sSA");
    }
}
