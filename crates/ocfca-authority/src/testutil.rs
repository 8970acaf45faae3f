//! Fixtures shared by unit tests.

use std::sync::Arc;

use const_oid::ObjectIdentifier;
use ocfca_core::{oid, ProvisionerType};
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType, Ia5String,
    IsCa, KeyPair, KeyUsagePurpose, SanType,
};

use crate::authority::BaseAuthority;
use crate::certificate::{encode_extended_key_usage, Certificate};
use crate::config::{Claims, ProvisionerConfig, ProvisionerSpec};
use crate::intermediate::IntermediateIdentity;
use crate::provisioner::{hash_token, Provisioner, ProvisionerRef, TokenProvisioner};
use crate::request::CertificateRequest;
use crate::store::CertificateStore;

/// Two-level CA: a self-signed root and an intermediate it signed.
pub struct TestCa {
    pub identity: IntermediateIdentity,
    pub root_pem: String,
    pub intermediate_pem: String,
    pub intermediate_key_pem: String,
}

impl TestCa {
    pub fn new() -> Self {
        let root_key = KeyPair::generate().unwrap();
        let root = ca_params("Test Root CA").self_signed(&root_key).unwrap();

        let intermediate_key = KeyPair::generate().unwrap();
        let intermediate = ca_params("Test Intermediate CA")
            .signed_by(&intermediate_key, &root, &root_key)
            .unwrap();

        let intermediate_pem = intermediate.pem();
        let intermediate_key_pem = intermediate_key.serialize_pem();
        let identity = IntermediateIdentity::new(
            Certificate::parse(intermediate.der(), "intermediate").unwrap(),
            intermediate_key,
        )
        .unwrap();

        Self {
            identity,
            root_pem: root.pem(),
            intermediate_pem,
            intermediate_key_pem,
        }
    }
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params
}

fn csr_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params
}

/// P-256 CSR with only a common name.
pub fn device_csr(common_name: &str) -> CertificateRequest {
    device_csr_with(common_name, |_| {})
}

/// P-256 CSR; `customize` edits the request before it is signed.
pub fn device_csr_with(
    common_name: &str,
    customize: impl FnOnce(&mut CertificateParams),
) -> CertificateRequest {
    let key = KeyPair::generate().unwrap();
    let mut params = csr_params(common_name);
    customize(&mut params);
    let csr = params.serialize_request(&key).unwrap();
    CertificateRequest::from_der(csr.der()).unwrap()
}

pub fn device_csr_pem(common_name: &str) -> String {
    let key = KeyPair::generate().unwrap();
    csr_params(common_name)
        .serialize_request(&key)
        .unwrap()
        .pem()
        .unwrap()
}

/// CSR whose signature no longer matches its contents.
pub fn tampered_csr(common_name: &str) -> CertificateRequest {
    let key = KeyPair::generate().unwrap();
    let csr = csr_params(common_name).serialize_request(&key).unwrap();
    let mut der = csr.der().to_vec();
    if let Some(last) = der.last_mut() {
        *last ^= 0x01;
    }
    CertificateRequest::from_der(&der).unwrap()
}

pub fn dns_san(name: &str) -> SanType {
    SanType::DnsName(Ia5String::try_from(name).unwrap())
}

/// Extended key usage extension carried as raw DER.
pub fn eku_extension(usages: &[ObjectIdentifier]) -> CustomExtension {
    CustomExtension::from_oid_content(
        &oid::arcs(&oid::EXTENDED_KEY_USAGE),
        encode_extended_key_usage(usages).unwrap(),
    )
}

pub fn spec(name: &str, kid: &str, token: &str) -> ProvisionerSpec {
    ProvisionerSpec {
        provisioner_type: ProvisionerType::Jwk,
        name: name.to_string(),
        kid: kid.to_string(),
        token_hashes: vec![hash_token(token)],
        dns_names: Vec::new(),
        encrypted_key: None,
        claims: None,
    }
}

/// Initialized token provisioner accepting `token`.
pub fn provisioner(name: &str, token: &str) -> ProvisionerRef {
    provisioner_with_claims(name, token, Claims::default())
}

pub fn provisioner_with_claims(name: &str, token: &str, claims: Claims) -> ProvisionerRef {
    from_spec(&spec(name, "k1", token), claims)
}

fn from_spec(spec: &ProvisionerSpec, claims: Claims) -> ProvisionerRef {
    let mut provisioner = TokenProvisioner::from_spec(spec).unwrap();
    provisioner.init(&ProvisionerConfig { claims }).unwrap();
    Arc::new(provisioner)
}

/// Authority with two provisioners:
///
/// - `devices:k1`, token `devices-token`, authorizing `device.local`
/// - `ocf-devices:k2`, token `ocf-token`, encrypted key `encrypted-k2`
pub fn base_authority(store: Arc<dyn CertificateStore>) -> BaseAuthority {
    let ca = TestCa::new();
    let root = Certificate::from_pem(&ca.root_pem, "root").unwrap();

    let mut devices = spec("devices", "k1", "devices-token");
    devices.dns_names = vec!["device.local".to_string()];
    let mut ocf = spec("ocf-devices", "k2", "ocf-token");
    ocf.encrypted_key = Some("encrypted-k2".to_string());

    BaseAuthority::from_parts(ca.identity, vec![root], store)
        .with_provisioner(from_spec(&ocf, Claims::default()))
        .with_provisioner(from_spec(&devices, Claims::default()))
}
