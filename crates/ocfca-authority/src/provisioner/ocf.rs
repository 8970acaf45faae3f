use ocfca_core::ProvisionerType;

use super::{Provisioner, ProvisionerError, ProvisionerRef};
use crate::certificate::Certificate;
use crate::config::ProvisionerConfig;
use crate::options::SignOption;

/// Decorator tagging a provisioner's sign authorizations as OCF identity
/// flows.
///
/// Every operation forwards to the wrapped provisioner. `authorize_sign`
/// additionally appends one [`SignOption::OcfMarker`] after the wrapped
/// provisioner's own options.
#[derive(Debug, Clone)]
pub struct OcfProvisioner<P = ProvisionerRef> {
    inner: P,
}

impl<P: Provisioner> OcfProvisioner<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Provisioner> Provisioner for OcfProvisioner<P> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn token_id(&self, token: &str) -> Result<String, ProvisionerError> {
        self.inner.token_id(token)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn provisioner_type(&self) -> ProvisionerType {
        self.inner.provisioner_type()
    }

    fn encrypted_key(&self) -> Option<(String, String)> {
        self.inner.encrypted_key()
    }

    fn init(&mut self, config: &ProvisionerConfig) -> Result<(), ProvisionerError> {
        self.inner.init(config)
    }

    fn authorize_revoke(&self, token: &str) -> Result<(), ProvisionerError> {
        self.inner.authorize_revoke(token)
    }

    fn authorize_sign(&self, token: &str) -> Result<Vec<SignOption>, ProvisionerError> {
        let mut options = self.inner.authorize_sign(token)?;
        options.push(SignOption::OcfMarker);
        Ok(options)
    }

    fn authorize_renewal(&self, cert: &Certificate) -> Result<(), ProvisionerError> {
        self.inner.authorize_renewal(cert)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ProvisionerSpec;
    use crate::provisioner::{hash_token, TokenProvisioner};

    fn token_provisioner(name: &str, token: &str) -> TokenProvisioner {
        let spec = ProvisionerSpec {
            provisioner_type: ProvisionerType::Jwk,
            name: name.to_string(),
            kid: "k1".to_string(),
            token_hashes: vec![hash_token(token)],
            dns_names: Vec::new(),
            encrypted_key: Some("encrypted".to_string()),
            claims: None,
        };
        let mut provisioner = TokenProvisioner::from_spec(&spec).unwrap();
        provisioner.init(&ProvisionerConfig::default()).unwrap();
        provisioner
    }

    #[test]
    fn test_marker_appended_last() {
        let inner = token_provisioner("ocf-devices", "secret");
        let own = inner.authorize_sign("secret").unwrap();

        let wrapped = OcfProvisioner::new(inner);
        let options = wrapped.authorize_sign("secret").unwrap();

        assert_eq!(options.len(), own.len() + 1);
        assert!(options[..own.len()].iter().all(|opt| !opt.is_marker()));
        assert!(options.last().unwrap().is_marker());
        for (got, want) in options.iter().zip(own.iter()) {
            assert_eq!(got.kind(), want.kind());
        }
    }

    #[test]
    fn test_other_operations_forward() {
        let inner: ProvisionerRef = Arc::new(token_provisioner("ocf-devices", "secret"));
        let wrapped = OcfProvisioner::new(Arc::clone(&inner));

        assert_eq!(wrapped.id(), inner.id());
        assert_eq!(wrapped.name(), "ocf-devices");
        assert_eq!(wrapped.provisioner_type(), ProvisionerType::Jwk);
        assert_eq!(
            wrapped.encrypted_key(),
            Some(("k1".to_string(), "encrypted".to_string()))
        );
        assert_eq!(
            wrapped.token_id("secret").unwrap(),
            inner.token_id("secret").unwrap()
        );
        assert!(wrapped.authorize_revoke("secret").is_ok());
        assert!(wrapped.authorize_revoke("wrong").is_err());
    }

    #[test]
    fn test_failed_authorization_adds_no_marker() {
        let wrapped = OcfProvisioner::new(token_provisioner("ocf-devices", "secret"));
        assert!(matches!(
            wrapped.authorize_sign("wrong"),
            Err(ProvisionerError::InvalidToken { .. })
        ));
    }
}
