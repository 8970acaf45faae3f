//! Core domain errors.

use thiserror::Error;

/// Errors produced while validating a device identity CommonName.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The CommonName does not follow the `uuid:<id>` shape.
    #[error("invalid common name {common_name} of Identity device OCF CSR: {reason}")]
    InvalidIdentity {
        common_name: String,
        reason: &'static str,
    },

    /// The CommonName has the right shape but the device id is not a UUID.
    #[error("invalid common name {common_name} UUID of Identity device OCF CSR")]
    InvalidDeviceUuid { common_name: String },
}

impl IdentityError {
    /// The CommonName that was rejected, verbatim.
    pub fn common_name(&self) -> &str {
        match self {
            Self::InvalidIdentity { common_name, .. } => common_name,
            Self::InvalidDeviceUuid { common_name } => common_name,
        }
    }
}

/// Errors produced while encoding or decoding a provisioner descriptor.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// ASN.1 encoding or decoding failed.
    #[error("malformed provisioner extension: {0}")]
    Asn1(#[from] der::Error),

    /// The provisioner type code is not one we know.
    #[error("unknown provisioner type {0}")]
    UnknownType(i32),

    /// A text field was not valid UTF-8 or not a string type.
    #[error("invalid provisioner extension field {field}")]
    InvalidField { field: &'static str },
}
