//! OCF authority facade.
//!
//! [`OcfAuthority`] wraps any [`Authority`]. Signing calls the classifier
//! recognizes as OCF flows go through the identity [`Signer`]; everything
//! else is forwarded. Provisioners leaving the facade pass through the
//! classifier's decoration.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::authority::{
    authorize_token, Authority, AuthorizeMethod, BaseAuthority, RevokeOptions, SshOptions,
    TlsCertificate,
};
use crate::certificate::{Certificate, IssuedCertificate};
use crate::classifier::Classifier;
use crate::config::{Claims, Config};
use crate::error::{ApiError, CaError};
use crate::intermediate::IntermediateIdentity;
use crate::options::{SignOption, SignOptions};
use crate::pipeline::{Signer, SigningProfile};
use crate::provisioner::{Provisioner, ProvisionerRef};
use crate::request::CertificateRequest;
use crate::store::CertificateStore;

pub struct OcfAuthority<A: Authority = BaseAuthority> {
    inner: A,
    signer: Signer,
    classifier: Box<dyn Classifier>,
}

impl OcfAuthority<BaseAuthority> {
    /// Build the generic authority from `config` and wrap it with the
    /// configured classifier.
    pub fn new(config: &Config) -> Result<Self, CaError> {
        let inner = BaseAuthority::new(config)?;
        let classifier = config.ocf.classifier.build(&config.ocf.prefix);
        info!(
            classifier = ?config.ocf.classifier,
            prefix = %config.ocf.prefix,
            "OCF authority initialized"
        );
        Ok(Self::wrap(inner, classifier))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CaError> {
        Self::new(&Config::load(path)?)
    }
}

impl<A: Authority> OcfAuthority<A> {
    /// Wrap `inner`. The identity signer shares its intermediate and store.
    pub fn wrap(inner: A, classifier: Box<dyn Classifier>) -> Self {
        let signer = Signer::new(
            inner.intermediate_identity(),
            inner.get_database(),
            SigningProfile::OcfIdentity,
        );
        Self {
            inner,
            signer,
            classifier,
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    fn decorate(&self, provisioner: ProvisionerRef) -> ProvisionerRef {
        let decorated = self.classifier.decorate(provisioner);
        debug!(provisioner = %decorated.id(), "provisioner leaving OCF authority");
        decorated
    }
}

impl<A: Authority> Authority for OcfAuthority<A> {
    /// Tokens are checked against the decorated provisioner, so a reserved
    /// provisioner's sign options carry the OCF marker.
    fn authorize(&self, token: &str, method: AuthorizeMethod) -> Result<Vec<SignOption>, ApiError> {
        let provisioner = self.load_provisioner_by_token(token)?;
        authorize_token(
            provisioner.as_ref(),
            self.inner.get_database().as_ref(),
            token,
            method,
        )
    }

    fn sign(
        &self,
        csr: &CertificateRequest,
        opts: &SignOptions,
        extra: &[SignOption],
    ) -> Result<IssuedCertificate, ApiError> {
        if !self.classifier.is_ocf_flow(extra, opts) {
            debug!(common_name = %csr.common_name(), "standard signing flow");
            return self.inner.sign(csr, opts, extra);
        }

        let mut opts = opts.clone();
        if opts.backdate.is_none() {
            opts.backdate = Some(self.inner.claims().backdate());
        }

        match self.signer.sign(csr, &opts, extra) {
            Ok(issued) => {
                info!(
                    common_name = %issued.leaf.common_name(),
                    serial = %issued.leaf.serial(),
                    "issued OCF identity certificate"
                );
                Ok(issued)
            }
            Err(err) => {
                warn!(
                    common_name = %csr.common_name(),
                    status = %err.status(),
                    error = %err,
                    "OCF identity signing failed"
                );
                Err(err)
            }
        }
    }

    fn renew(&self, peer: &Certificate) -> Result<IssuedCertificate, ApiError> {
        self.inner.renew(peer)
    }

    fn sign_ssh(
        &self,
        public_key: &[u8],
        opts: &SshOptions,
        extra: &[SignOption],
    ) -> Result<Vec<u8>, ApiError> {
        self.inner.sign_ssh(public_key, opts, extra)
    }

    fn revoke(&self, opts: &RevokeOptions) -> Result<(), ApiError> {
        self.inner.revoke(opts)
    }

    fn get_provisioners(
        &self,
        cursor: &str,
        limit: usize,
    ) -> Result<(Vec<ProvisionerRef>, String), ApiError> {
        let (page, next) = self.inner.get_provisioners(cursor, limit)?;
        let page = page.into_iter().map(|p| self.decorate(p)).collect();
        Ok((page, next))
    }

    fn load_provisioner_by_id(&self, id: &str) -> Result<ProvisionerRef, ApiError> {
        self.inner
            .load_provisioner_by_id(id)
            .map(|p| self.decorate(p))
    }

    fn load_provisioner_by_certificate(
        &self,
        cert: &Certificate,
    ) -> Result<ProvisionerRef, ApiError> {
        self.inner
            .load_provisioner_by_certificate(cert)
            .map(|p| self.decorate(p))
    }

    fn load_provisioner_by_token(&self, token: &str) -> Result<ProvisionerRef, ApiError> {
        self.inner
            .load_provisioner_by_token(token)
            .map(|p| self.decorate(p))
    }

    fn root(&self, sha256: &str) -> Result<Certificate, ApiError> {
        self.inner.root(sha256)
    }

    fn get_roots(&self) -> Result<Vec<Certificate>, ApiError> {
        self.inner.get_roots()
    }

    fn get_federation(&self) -> Result<Vec<Certificate>, ApiError> {
        self.inner.get_federation()
    }

    fn get_tls_certificate(&self) -> Result<TlsCertificate, ApiError> {
        self.inner.get_tls_certificate()
    }

    fn get_encrypted_key(&self, kid: &str) -> Result<String, ApiError> {
        self.inner.get_encrypted_key(kid)
    }

    fn get_database(&self) -> Arc<dyn CertificateStore> {
        self.inner.get_database()
    }

    fn intermediate_identity(&self) -> Arc<IntermediateIdentity> {
        self.inner.intermediate_identity()
    }

    fn claims(&self) -> &Claims {
        self.inner.claims()
    }

    fn shutdown(&self) -> Result<(), ApiError> {
        self.inner.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ExtensionClassifier, NameClassifier};
    use crate::error::Status;
    use crate::store::MemoryStore;
    use crate::testutil;
    use ocfca_core::oid;

    const CN: &str = "uuid:8c9a1a3e-7f36-4e5e-b5b3-2b0f1c1f7a10";

    fn facade(classifier: Box<dyn Classifier>) -> OcfAuthority {
        OcfAuthority::wrap(
            testutil::base_authority(Arc::new(MemoryStore::new())),
            classifier,
        )
    }

    fn assert_ocf_leaf(leaf: &Certificate) {
        assert_eq!(leaf.common_name(), CN);
        assert!(leaf.alt_names().is_empty());
        assert_eq!(leaf.key_usage(), Some(crate::KeyUsage::ocf_identity()));
        assert_eq!(
            leaf.extended_key_usage().unwrap(),
            Some(oid::OCF_EXTENDED_KEY_USAGES.to_vec())
        );
    }

    #[test]
    fn test_reserved_provisioner_signs_ocf_identity() {
        let authority = facade(Box::new(NameClassifier::default()));

        let options = authority.authorize_sign("ocf-token").unwrap();
        assert!(options.last().unwrap().is_marker());

        let issued = authority
            .sign(&testutil::device_csr(CN), &SignOptions::default(), &options)
            .unwrap();
        assert_ocf_leaf(&issued.leaf);
        assert_eq!(issued.issuer.common_name(), "Test Intermediate CA");

        let stored = authority
            .get_database()
            .get_certificate(issued.leaf.serial())
            .unwrap();
        assert!(stored.is_some());

        let provisioner = authority
            .load_provisioner_by_certificate(&issued.leaf)
            .unwrap();
        assert_eq!(provisioner.id(), "ocf-devices:k2");
        assert!(provisioner
            .authorize_sign("ocf-token")
            .unwrap()
            .iter()
            .any(SignOption::is_marker));
    }

    #[test]
    fn test_reserved_provisioner_rejects_non_uuid_subject() {
        let authority = facade(Box::new(NameClassifier::default()));
        let options = authority.authorize_sign("ocf-token").unwrap();

        let err = authority
            .sign(&testutil::device_csr("device.local"), &SignOptions::default(), &options)
            .unwrap_err();
        assert_eq!(err.status(), Status::Unauthorized);
    }

    #[test]
    fn test_plain_provisioner_uses_inner_authority() {
        let authority = facade(Box::new(NameClassifier::default()));
        let options = authority.authorize_sign("devices-token").unwrap();
        assert!(!options.iter().any(SignOption::is_marker));

        let csr = testutil::device_csr_with("device.local", |p| {
            p.subject_alt_names = vec![testutil::dns_san("device.local")];
        });
        let issued = authority
            .sign(&csr, &SignOptions::default(), &options)
            .unwrap();

        assert_eq!(issued.leaf.common_name(), "device.local");
        assert_eq!(
            issued.leaf.alt_names().dns_names,
            vec!["device.local".to_string()]
        );
        assert_eq!(
            issued.leaf.extended_key_usage().unwrap(),
            Some(vec![oid::KP_SERVER_AUTH, oid::KP_CLIENT_AUTH])
        );
    }

    #[test]
    fn test_listing_and_lookup_decorate() {
        let authority = facade(Box::new(NameClassifier::default()));

        let (page, next) = authority.get_provisioners("", 0).unwrap();
        assert_eq!(next, "");
        let marked: Vec<bool> = page
            .iter()
            .map(|p| {
                let token = if p.name() == "devices" { "devices-token" } else { "ocf-token" };
                p.authorize_sign(token).unwrap().iter().any(SignOption::is_marker)
            })
            .collect();
        assert_eq!(marked, vec![false, true]);

        let by_id = authority.load_provisioner_by_id("ocf-devices:k2").unwrap();
        assert!(by_id
            .authorize_sign("ocf-token")
            .unwrap()
            .last()
            .unwrap()
            .is_marker());
        assert_eq!(
            authority.load_provisioner_by_id("nope:k").unwrap_err().status(),
            Status::NotFound
        );
    }

    #[test]
    fn test_extension_classifier_routes_by_stamped_name() {
        let authority = facade(Box::new(ExtensionClassifier::default()));

        let options = authority.authorize_sign("ocf-token").unwrap();
        assert!(!options.iter().any(SignOption::is_marker));

        let issued = authority
            .sign(&testutil::device_csr(CN), &SignOptions::default(), &options)
            .unwrap();
        assert_ocf_leaf(&issued.leaf);

        let options = authority.authorize_sign("devices-token").unwrap();
        let issued = authority
            .sign(&testutil::device_csr("device.local"), &SignOptions::default(), &options[..1])
            .unwrap();
        assert_eq!(issued.leaf.common_name(), "device.local");
    }

    #[test]
    fn test_tokens_stay_single_use() {
        let authority = facade(Box::new(NameClassifier::default()));
        authority.authorize_sign("ocf-token").unwrap();
        let err = authority.authorize_sign("ocf-token").unwrap_err();
        assert!(matches!(err.cause(), CaError::TokenReused));
    }

    #[test]
    fn test_other_operations_forward() {
        let authority = facade(Box::new(NameClassifier::default()));

        assert_eq!(
            authority.get_roots().unwrap().len(),
            authority.inner().get_roots().unwrap().len()
        );
        assert_eq!(authority.get_encrypted_key("k2").unwrap(), "encrypted-k2");
        assert_eq!(
            authority
                .sign_ssh(&[], &SshOptions::default(), &[])
                .unwrap_err()
                .status(),
            Status::NotImplemented
        );
        assert_eq!(
            authority.claims().backdate_secs,
            authority.inner().claims().backdate_secs
        );
        authority.shutdown().unwrap();
    }
}
