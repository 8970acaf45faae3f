//! Object identifiers used by the OCF identity profile.

use const_oid::ObjectIdentifier;

/// Subject Key Identifier extension.
pub const SUBJECT_KEY_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");

/// Key Usage extension.
pub const KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.15");

/// Subject Alternative Name extension.
pub const SUBJECT_ALT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");

/// Basic Constraints extension.
pub const BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");

/// Authority Key Identifier extension.
pub const AUTHORITY_KEY_IDENTIFIER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.5.29.35");

/// Extended Key Usage extension.
pub const EXTENDED_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37");

/// TLS WWW server authentication.
pub const KP_SERVER_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.1");

/// TLS WWW client authentication.
pub const KP_CLIENT_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.2");

/// OCF identity certificate purpose (Open Connectivity Foundation arc).
pub const OCF_IDENTITY_CERTIFICATE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.44924.1.6");

/// Provisioner identity extension written by step-compatible authorities.
pub const STEP_PROVISIONER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.37476.9000.64.1");

/// Extended key usages of every OCF identity certificate, in encoding order.
pub const OCF_EXTENDED_KEY_USAGES: [ObjectIdentifier; 3] =
    [KP_SERVER_AUTH, KP_CLIENT_AUTH, OCF_IDENTITY_CERTIFICATE];

/// id-ecPublicKey.
pub const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// NIST P-256 named curve.
pub const SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

/// NIST P-384 named curve.
pub const SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

/// Ed25519.
pub const ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// rsaEncryption.
pub const RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// Arcs of an OID, in the `&[u64]` form rcgen and x509-parser use.
pub fn arcs(oid: &ObjectIdentifier) -> Vec<u64> {
    oid.arcs().map(u64::from).collect()
}

/// Check whether a list of arcs names the given OID.
pub fn matches(arcs: &[u64], oid: &ObjectIdentifier) -> bool {
    oid.arcs().map(u64::from).eq(arcs.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arcs() {
        assert_eq!(arcs(&EXTENDED_KEY_USAGE), vec![2, 5, 29, 37]);
        assert_eq!(
            arcs(&OCF_IDENTITY_CERTIFICATE),
            vec![1, 3, 6, 1, 4, 1, 44924, 1, 6]
        );
    }

    #[test]
    fn test_matches() {
        assert!(matches(&[2, 5, 29, 37], &EXTENDED_KEY_USAGE));
        assert!(!matches(&[2, 5, 29, 15], &EXTENDED_KEY_USAGE));
        assert!(!matches(&[2, 5, 29], &EXTENDED_KEY_USAGE));
        assert!(matches(
            &[1, 3, 6, 1, 4, 1, 37476, 9000, 64, 1],
            &STEP_PROVISIONER
        ));
    }
}
