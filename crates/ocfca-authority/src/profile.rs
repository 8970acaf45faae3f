//! Leaf certificate profiles.
//!
//! A [`LeafProfile`] is the mutable certificate under construction for a
//! single sign or renew call. It owns the rcgen parameters and the subject
//! public key, and is consumed when signed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use const_oid::ObjectIdentifier;
use ocfca_core::oid;
use rand::RngCore;
use rcgen::{
    CertificateParams, CustomExtension, DistinguishedName, DnType, Ia5String, IsCa,
    KeyUsagePurpose, PublicKeyData, SanType, SerialNumber, SignatureAlgorithm,
};
use time::OffsetDateTime;

use crate::certificate::{encode_extended_key_usage, Certificate};
use crate::error::CaError;
use crate::intermediate::IntermediateIdentity;
use crate::options::{ProfileModifier, SignOptions};
use crate::request::{CertificateRequest, KeyAlgorithm, NameAttribute, SubjectAltNames};
use crate::x509::{RawExtension, SubjectPublicKey};

/// Validity of a leaf, in seconds, when nothing else decides it.
pub const DEFAULT_LEAF_DURATION_SECS: i64 = 24 * 60 * 60;

/// Subject public key in the form rcgen signs over.
#[derive(Debug, Clone)]
pub struct SubjectKey {
    raw: Vec<u8>,
    algorithm: &'static SignatureAlgorithm,
}

impl SubjectKey {
    pub fn from_public_key(key: &SubjectPublicKey) -> Result<Self, CaError> {
        let algorithm = match key.algorithm() {
            KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeyAlgorithm::Ed25519 => &rcgen::PKCS_ED25519,
            KeyAlgorithm::Rsa { .. } => &rcgen::PKCS_RSA_SHA256,
            KeyAlgorithm::Unsupported => {
                return Err(CaError::ProfileBuild(
                    "unsupported subject public key algorithm".to_string(),
                ))
            }
        };
        Ok(Self {
            raw: key.raw().to_vec(),
            algorithm,
        })
    }
}

impl PublicKeyData for SubjectKey {
    fn der_bytes(&self) -> &[u8] {
        &self.raw
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        self.algorithm
    }
}

/// Certificate under construction.
#[derive(Debug)]
pub struct LeafProfile {
    params: CertificateParams,
    subject_key: SubjectKey,
}

impl LeafProfile {
    /// Build a leaf profile from a request, then apply modifiers in order.
    ///
    /// The subject, alternative names and any requested Extended Key Usage
    /// come from the request. Key usage defaults to digital signature (plus
    /// key encipherment for RSA) and the extended key usage, unless
    /// requested, to server and client authentication.
    pub fn from_request(
        csr: &CertificateRequest,
        opts: &SignOptions,
        modifiers: &[Arc<dyn ProfileModifier>],
    ) -> Result<Self, CaError> {
        let subject_key = SubjectKey::from_public_key(csr.public_key())?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(csr.subject());
        params.subject_alt_names = san_entries(csr.alt_names())?;
        params.serial_number = Some(random_serial());
        params.is_ca = IsCa::NoCa;
        params.use_authority_key_identifier_extension = true;

        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        if matches!(csr.public_key().algorithm(), KeyAlgorithm::Rsa { .. }) {
            params.key_usages.push(KeyUsagePurpose::KeyEncipherment);
        }

        let requested_eku = csr
            .extensions()
            .iter()
            .find(|ext| ext.is(&oid::EXTENDED_KEY_USAGE));
        match requested_eku {
            Some(ext) => params.custom_extensions.push(custom_extension(ext)),
            None => {
                params.extended_key_usages = vec![
                    rcgen::ExtendedKeyUsagePurpose::ServerAuth,
                    rcgen::ExtendedKeyUsagePurpose::ClientAuth,
                ]
            }
        }

        let not_before = opts
            .not_before
            .unwrap_or_else(|| Utc::now() - opts.backdate.unwrap_or_else(Duration::zero));
        let not_after = opts
            .not_after
            .unwrap_or(not_before + Duration::seconds(DEFAULT_LEAF_DURATION_SECS));
        set_validity(&mut params, not_before, not_after)?;

        for modifier in modifiers {
            modifier
                .modify(&mut params, opts)
                .map_err(|e| CaError::ProfileBuild(e.to_string()))?;
        }

        Ok(Self {
            params,
            subject_key,
        })
    }

    /// Build a renewal profile: same subject, key and extensions as `cert`,
    /// with a fresh serial and a validity window of the same length.
    pub fn from_certificate(cert: &Certificate, backdate: Duration) -> Result<Self, CaError> {
        let subject_key = SubjectKey::from_public_key(cert.public_key())?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(cert.subject());
        params.subject_alt_names = san_entries(cert.alt_names())?;
        params.serial_number = Some(random_serial());
        params.is_ca = IsCa::NoCa;
        params.use_authority_key_identifier_extension = true;

        const REGENERATED: [ObjectIdentifier; 4] = [
            oid::SUBJECT_KEY_IDENTIFIER,
            oid::AUTHORITY_KEY_IDENTIFIER,
            oid::SUBJECT_ALT_NAME,
            oid::BASIC_CONSTRAINTS,
        ];
        params.custom_extensions = cert
            .extensions()
            .iter()
            .filter(|ext| !REGENERATED.iter().any(|id| ext.is(id)))
            .map(custom_extension)
            .collect();

        let not_before = Utc::now() - backdate;
        let not_after = not_before + (cert.not_after() - cert.not_before());
        set_validity(&mut params, not_before, not_after)?;

        Ok(Self {
            params,
            subject_key,
        })
    }

    pub fn params(&self) -> &CertificateParams {
        &self.params
    }

    /// Reshape the profile into an OCF identity certificate.
    ///
    /// Alternative names are cleared, key usage becomes exactly digital
    /// signature and key agreement, and the profile ends up with exactly one
    /// Extended Key Usage extension holding server auth, client auth and the
    /// OCF identity purpose. An existing EKU extension is overwritten in
    /// place; otherwise one is appended.
    pub fn apply_ocf_policy(&mut self) -> Result<(), CaError> {
        let value = encode_extended_key_usage(&oid::OCF_EXTENDED_KEY_USAGES)?;
        let eku = oid::arcs(&oid::EXTENDED_KEY_USAGE);
        let is = |ext: &CustomExtension, id: &ObjectIdentifier| {
            oid::matches(&ext.oid_components().collect::<Vec<_>>(), id)
        };

        self.params.subject_alt_names.clear();
        self.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyAgreement,
        ];
        self.params.extended_key_usages.clear();

        let mut replaced = false;
        let mut extensions = Vec::with_capacity(self.params.custom_extensions.len() + 1);
        for ext in self.params.custom_extensions.drain(..) {
            if is(&ext, &oid::SUBJECT_ALT_NAME) || is(&ext, &oid::KEY_USAGE) {
                continue;
            }
            if is(&ext, &oid::EXTENDED_KEY_USAGE) {
                if !replaced {
                    let mut overwritten = CustomExtension::from_oid_content(&eku, value.clone());
                    overwritten.set_criticality(ext.criticality());
                    extensions.push(overwritten);
                    replaced = true;
                }
                continue;
            }
            extensions.push(ext);
        }
        if !replaced {
            extensions.push(CustomExtension::from_oid_content(&eku, value));
        }
        self.params.custom_extensions = extensions;

        Ok(())
    }

    /// Sign the profile with the intermediate and return the leaf DER.
    pub fn sign(self, issuer: &IntermediateIdentity) -> Result<Vec<u8>, CaError> {
        let cert = self
            .params
            .signed_by(&self.subject_key, issuer.issuer(), issuer.key_pair())
            .map_err(|e| CaError::Signing(e.to_string()))?;
        Ok(cert.der().to_vec())
    }
}

fn distinguished_name(attributes: &[NameAttribute]) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    for attr in attributes {
        dn.push(DnType::from_oid(&attr.oid), attr.value.clone());
    }
    dn
}

fn san_entries(names: &SubjectAltNames) -> Result<Vec<SanType>, CaError> {
    let ia5 = |value: &String| {
        Ia5String::try_from(value.as_str()).map_err(|e| CaError::ProfileBuild(e.to_string()))
    };

    let mut entries = Vec::new();
    for dns in &names.dns_names {
        entries.push(SanType::DnsName(ia5(dns)?));
    }
    for email in &names.email_addresses {
        entries.push(SanType::Rfc822Name(ia5(email)?));
    }
    for ip in &names.ip_addresses {
        entries.push(SanType::IpAddress(*ip));
    }
    for uri in &names.uris {
        entries.push(SanType::URI(ia5(uri)?));
    }
    Ok(entries)
}

fn custom_extension(ext: &RawExtension) -> CustomExtension {
    let mut custom = CustomExtension::from_oid_content(&ext.oid, ext.value.clone());
    custom.set_criticality(ext.critical);
    custom
}

/// 128-bit positive serial.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    if bytes[0] == 0 {
        bytes[0] = 0x01;
    }
    SerialNumber::from_slice(&bytes)
}

fn set_validity(
    params: &mut CertificateParams,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<(), CaError> {
    let convert = |dt: DateTime<Utc>| {
        OffsetDateTime::from_unix_timestamp(dt.timestamp())
            .map_err(|e| CaError::ProfileBuild(e.to_string()))
    };
    params.not_before = convert(not_before)?;
    params.not_after = convert(not_after)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::KeyUsage;
    use crate::testutil;

    const CN: &str = "uuid:8c9a1a3e-7f36-4e5e-b5b3-2b0f1c1f7a10";

    fn eku_count(params: &CertificateParams) -> usize {
        params
            .custom_extensions
            .iter()
            .filter(|ext| ext.oid_components().eq(oid::arcs(&oid::EXTENDED_KEY_USAGE)))
            .count()
    }

    #[test]
    fn test_from_request_defaults() {
        let csr = testutil::device_csr(CN);
        let profile = LeafProfile::from_request(&csr, &SignOptions::default(), &[]).unwrap();
        let params = profile.params();

        assert!(matches!(params.is_ca, IsCa::NoCa));
        assert_eq!(params.key_usages, vec![KeyUsagePurpose::DigitalSignature]);
        assert_eq!(params.extended_key_usages.len(), 2);
        assert_eq!(
            params.not_after.unix_timestamp() - params.not_before.unix_timestamp(),
            DEFAULT_LEAF_DURATION_SECS
        );
    }

    #[test]
    fn test_requested_eku_is_carried_raw() {
        let csr = testutil::device_csr_with(CN, |p| {
            p.custom_extensions
                .push(testutil::eku_extension(&[oid::KP_CLIENT_AUTH]));
        });
        let profile = LeafProfile::from_request(&csr, &SignOptions::default(), &[]).unwrap();

        assert!(profile.params().extended_key_usages.is_empty());
        assert_eq!(eku_count(profile.params()), 1);
    }

    #[test]
    fn test_ocf_policy_without_existing_eku() {
        let csr = testutil::device_csr_with(CN, |p| {
            p.subject_alt_names = vec![testutil::dns_san("device.local")];
        });
        let mut profile = LeafProfile::from_request(&csr, &SignOptions::default(), &[]).unwrap();
        profile.apply_ocf_policy().unwrap();

        let params = profile.params();
        assert!(params.subject_alt_names.is_empty());
        assert!(params.extended_key_usages.is_empty());
        assert_eq!(
            params.key_usages,
            vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyAgreement]
        );
        assert_eq!(eku_count(params), 1);
    }

    #[test]
    fn test_ocf_policy_overwrites_duplicate_eku() {
        let csr = testutil::device_csr(CN);
        let mut profile = LeafProfile::from_request(&csr, &SignOptions::default(), &[]).unwrap();
        profile
            .params
            .custom_extensions
            .push(testutil::eku_extension(&[oid::KP_SERVER_AUTH]));
        profile
            .params
            .custom_extensions
            .push(testutil::eku_extension(&[oid::KP_CLIENT_AUTH]));

        profile.apply_ocf_policy().unwrap();
        profile.apply_ocf_policy().unwrap();

        assert_eq!(eku_count(profile.params()), 1);
    }

    #[test]
    fn test_sign_and_parse() {
        let ca = testutil::TestCa::new();
        let csr = testutil::device_csr(CN);
        let mut profile = LeafProfile::from_request(&csr, &SignOptions::default(), &[]).unwrap();
        profile.apply_ocf_policy().unwrap();

        let der = profile.sign(&ca.identity).unwrap();
        let leaf = Certificate::parse(&der, "leaf").unwrap();

        assert_eq!(leaf.common_name(), CN);
        assert!(leaf.alt_names().is_empty());
        assert_eq!(leaf.key_usage(), Some(KeyUsage::ocf_identity()));
        assert_eq!(
            leaf.extended_key_usage().unwrap(),
            Some(oid::OCF_EXTENDED_KEY_USAGES.to_vec())
        );
        assert_eq!(leaf.public_key(), csr.public_key());
    }

    #[test]
    fn test_from_certificate_keeps_extensions() {
        let ca = testutil::TestCa::new();
        let csr = testutil::device_csr(CN);
        let mut profile = LeafProfile::from_request(&csr, &SignOptions::default(), &[]).unwrap();
        profile.apply_ocf_policy().unwrap();
        let leaf = Certificate::parse(&profile.sign(&ca.identity).unwrap(), "leaf").unwrap();

        let renewed = LeafProfile::from_certificate(&leaf, Duration::minutes(1)).unwrap();
        let renewed = Certificate::parse(&renewed.sign(&ca.identity).unwrap(), "leaf").unwrap();

        assert_eq!(renewed.common_name(), CN);
        assert_ne!(renewed.serial(), leaf.serial());
        assert_eq!(renewed.key_usage(), Some(KeyUsage::ocf_identity()));
        assert_eq!(
            renewed.extended_key_usage().unwrap(),
            Some(oid::OCF_EXTENDED_KEY_USAGES.to_vec())
        );
        assert_eq!(
            renewed.extensions_with(&oid::AUTHORITY_KEY_IDENTIFIER).count(),
            1
        );
    }
}
