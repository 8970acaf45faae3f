//! Device identity carried in the CommonName of an OCF identity CSR.
//!
//! Expected format: "uuid:<device-uuid>", prefix compared case-insensitively.

use std::fmt;

use uuid::Uuid;

use crate::error::IdentityError;

/// Prefix every device identity CommonName starts with.
pub const DEVICE_ID_PREFIX: &str = "uuid:";

/// A validated device identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// CommonName exactly as presented in the request.
    common_name: String,

    /// Device UUID parsed from the second segment.
    device_id: Uuid,
}

impl DeviceIdentity {
    /// Validate a CommonName and extract the device UUID.
    pub fn from_common_name(common_name: &str) -> Result<Self, IdentityError> {
        let cn = common_name.to_lowercase();

        if !cn.starts_with(DEVICE_ID_PREFIX) {
            return Err(IdentityError::InvalidIdentity {
                common_name: common_name.to_string(),
                reason: "missing 'uuid:' prefix",
            });
        }

        let segments: Vec<&str> = cn.split(':').collect();
        if segments.len() != 2 {
            return Err(IdentityError::InvalidIdentity {
                common_name: common_name.to_string(),
                reason: "number of elements separated by ':' must be 2",
            });
        }

        let device_id =
            parse_canonical_uuid(segments[1]).ok_or_else(|| IdentityError::InvalidDeviceUuid {
                common_name: common_name.to_string(),
            })?;

        Ok(Self {
            common_name: common_name.to_string(),
            device_id,
        })
    }

    /// The CommonName as it appeared in the request.
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// The device UUID.
    pub fn device_id(&self) -> Uuid {
        self.device_id
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", DEVICE_ID_PREFIX, self.device_id.hyphenated())
    }
}

/// Validate a CommonName as an OCF device identity.
pub fn validate(common_name: &str) -> Result<DeviceIdentity, IdentityError> {
    DeviceIdentity::from_common_name(common_name)
}

/// Only the 36 character hyphenated form is accepted.
fn parse_canonical_uuid(text: &str) -> Option<Uuid> {
    let id = Uuid::parse_str(text).ok()?;
    (id.hyphenated().to_string() == text).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: &str = "uuid:6e8d3b2f-1c4a-4f7e-9a0b-3d2c1b0a9f8e";

    #[test]
    fn test_valid_identity() {
        let identity = validate(DEVICE).unwrap();
        assert_eq!(identity.common_name(), DEVICE);
        assert_eq!(
            identity.device_id(),
            Uuid::parse_str("6e8d3b2f-1c4a-4f7e-9a0b-3d2c1b0a9f8e").unwrap()
        );
        assert_eq!(identity.to_string(), DEVICE);
    }

    #[test]
    fn test_prefix_is_case_insensitive() {
        let cn = "UUID:6E8D3B2F-1C4A-4F7E-9A0B-3D2C1B0A9F8E";
        let identity = validate(cn).unwrap();
        // CommonName is kept verbatim, the Display form is canonical.
        assert_eq!(identity.common_name(), cn);
        assert_eq!(identity.to_string(), DEVICE);
    }

    #[test]
    fn test_missing_prefix() {
        let result = validate("device:6e8d3b2f-1c4a-4f7e-9a0b-3d2c1b0a9f8e");
        assert!(matches!(result, Err(IdentityError::InvalidIdentity { .. })));

        let result = validate("");
        assert!(matches!(result, Err(IdentityError::InvalidIdentity { .. })));
    }

    #[test]
    fn test_too_many_segments() {
        let result = validate("uuid:6e8d3b2f-1c4a-4f7e-9a0b-3d2c1b0a9f8e:extra");
        assert!(matches!(result, Err(IdentityError::InvalidIdentity { .. })));

        let result = validate("urn:uuid:6e8d3b2f-1c4a-4f7e-9a0b-3d2c1b0a9f8e");
        assert!(matches!(result, Err(IdentityError::InvalidIdentity { .. })));
    }

    #[test]
    fn test_invalid_uuid() {
        let err = validate("uuid:not-a-uuid").unwrap_err();
        assert!(matches!(err, IdentityError::InvalidDeviceUuid { .. }));
        assert_eq!(err.common_name(), "uuid:not-a-uuid");

        assert!(matches!(
            validate("uuid:"),
            Err(IdentityError::InvalidDeviceUuid { .. })
        ));
    }

    #[test]
    fn test_non_canonical_uuid_forms_rejected() {
        // simple (no hyphens) and braced forms parse as UUIDs but are not canonical
        assert!(matches!(
            validate("uuid:6e8d3b2f1c4a4f7e9a0b3d2c1b0a9f8e"),
            Err(IdentityError::InvalidDeviceUuid { .. })
        ));
        assert!(matches!(
            validate("uuid:{6e8d3b2f-1c4a-4f7e-9a0b-3d2c1b0a9f8e}"),
            Err(IdentityError::InvalidDeviceUuid { .. })
        ));
    }
}
