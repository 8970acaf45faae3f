//! Pre-shared token provisioner.
//!
//! Tokens are opaque random strings handed to device operators. The
//! provisioner never stores plaintext tokens, only their SHA-256 digests,
//! and a token's id is its digest.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ocfca_core::{ProvisionerDescriptor, ProvisionerType};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::{Provisioner, ProvisionerError};
use crate::certificate::Certificate;
use crate::config::{Claims, ProvisionerConfig, ProvisionerSpec};
use crate::options::SignOption;
use crate::validators::{
    DefaultDuration, DnsNamesValidator, ProvisionerExtension, PublicKeyValidator,
    ValidityValidator,
};

/// Provisioner authorizing requests that present a known token.
#[derive(Debug, Clone)]
pub struct TokenProvisioner {
    id: String,
    name: String,
    kid: String,
    provisioner_type: ProvisionerType,
    token_hashes: Vec<String>,
    dns_names: Vec<String>,
    encrypted_key: Option<String>,
    claims_override: Option<Claims>,

    /// Effective claims, set by `init`.
    claims: Claims,
}

impl TokenProvisioner {
    /// Create a provisioner from its configuration entry.
    pub fn from_spec(spec: &ProvisionerSpec) -> Result<Self, ProvisionerError> {
        if spec.name.is_empty() {
            return Err(ProvisionerError::Config {
                name: spec.id(),
                reason: "name cannot be empty".to_string(),
            });
        }
        if let Some(bad) = spec
            .token_hashes
            .iter()
            .find(|hash| hash.len() != 64 || hex::decode(hash).is_err())
        {
            return Err(ProvisionerError::Config {
                name: spec.id(),
                reason: format!("token hash {} is not a SHA-256 hex digest", bad),
            });
        }

        Ok(Self {
            id: spec.id(),
            name: spec.name.clone(),
            kid: spec.kid.clone(),
            provisioner_type: spec.provisioner_type,
            token_hashes: spec.token_hashes.iter().map(|h| h.to_lowercase()).collect(),
            dns_names: spec.dns_names.clone(),
            encrypted_key: spec.encrypted_key.clone(),
            claims_override: spec.claims.clone(),
            claims: spec.claims.clone().unwrap_or_default(),
        })
    }

    /// Effective claims.
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    fn verify(&self, token: &str) -> Result<String, ProvisionerError> {
        let digest = hash_token(token);
        if self.token_hashes.iter().any(|known| *known == digest) {
            Ok(digest)
        } else {
            Err(ProvisionerError::InvalidToken {
                provisioner: self.id.clone(),
            })
        }
    }
}

impl Provisioner for TokenProvisioner {
    fn id(&self) -> &str {
        &self.id
    }

    fn token_id(&self, token: &str) -> Result<String, ProvisionerError> {
        self.verify(token)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn provisioner_type(&self) -> ProvisionerType {
        self.provisioner_type
    }

    fn encrypted_key(&self) -> Option<(String, String)> {
        self.encrypted_key
            .as_ref()
            .map(|key| (self.kid.clone(), key.clone()))
    }

    fn init(&mut self, config: &ProvisionerConfig) -> Result<(), ProvisionerError> {
        self.claims = self
            .claims_override
            .clone()
            .unwrap_or_else(|| config.claims.clone());
        Ok(())
    }

    fn authorize_revoke(&self, token: &str) -> Result<(), ProvisionerError> {
        self.verify(token).map(|_| ())
    }

    fn authorize_sign(&self, token: &str) -> Result<Vec<SignOption>, ProvisionerError> {
        self.verify(token)?;

        let descriptor = ProvisionerDescriptor::new(self.provisioner_type, &self.name, &self.kid);
        Ok(vec![
            SignOption::modifier(ProvisionerExtension::new(descriptor)),
            SignOption::modifier(DefaultDuration::new(self.claims.default_duration())),
            SignOption::request_validator(PublicKeyValidator),
            SignOption::request_validator(DnsNamesValidator::new(self.dns_names.clone())),
            SignOption::certificate_validator(ValidityValidator::new(
                self.claims.min_duration(),
                self.claims.max_duration(),
            )),
        ])
    }

    fn authorize_renewal(&self, _: &Certificate) -> Result<(), ProvisionerError> {
        if self.claims.disable_renewal {
            return Err(ProvisionerError::RenewalDisabled(self.id.clone()));
        }
        Ok(())
    }
}

/// Generate a new token.
///
/// Returns a tuple of (plaintext_token, token_hash). Only the hash belongs in
/// the configuration.
pub fn generate_token() -> (String, String) {
    let mut token_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut token_bytes);

    let plaintext = URL_SAFE_NO_PAD.encode(token_bytes);
    let token_hash = hash_token(&plaintext);

    (plaintext, token_hash)
}

/// Hash a token using SHA-256.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(token: &str) -> ProvisionerSpec {
        ProvisionerSpec {
            provisioner_type: ProvisionerType::Jwk,
            name: "ocf-devices".to_string(),
            kid: "k1".to_string(),
            token_hashes: vec![hash_token(token)],
            dns_names: vec!["device.local".to_string()],
            encrypted_key: None,
            claims: None,
        }
    }

    #[test]
    fn test_generate_token() {
        let (plaintext, hash) = generate_token();

        // 32 bytes base64 encoded
        assert_eq!(plaintext.len(), 43);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash_token(&plaintext), hash);
    }

    #[test]
    fn test_authorize_sign_options() {
        let provisioner = TokenProvisioner::from_spec(&spec("secret")).unwrap();
        let options = provisioner.authorize_sign("secret").unwrap();

        let kinds: Vec<&str> = options.iter().map(SignOption::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "ProfileModifier",
                "ProfileModifier",
                "CertificateRequestValidator",
                "CertificateRequestValidator",
                "CertificateValidator",
            ]
        );
    }

    #[test]
    fn test_unknown_token_rejected() {
        let provisioner = TokenProvisioner::from_spec(&spec("secret")).unwrap();
        assert!(matches!(
            provisioner.authorize_sign("other"),
            Err(ProvisionerError::InvalidToken { .. })
        ));
        assert!(provisioner.token_id("other").is_err());
        assert_eq!(
            provisioner.token_id("secret").unwrap(),
            hash_token("secret")
        );
    }

    #[test]
    fn test_bad_hash_rejected() {
        let mut bad = spec("secret");
        bad.token_hashes = vec!["not-hex".to_string()];
        assert!(matches!(
            TokenProvisioner::from_spec(&bad),
            Err(ProvisionerError::Config { .. })
        ));
    }

    #[test]
    fn test_init_applies_global_claims() {
        let mut provisioner = TokenProvisioner::from_spec(&spec("secret")).unwrap();
        let config = ProvisionerConfig {
            claims: Claims {
                disable_renewal: true,
                ..Claims::default()
            },
        };
        provisioner.init(&config).unwrap();
        assert!(provisioner.claims().disable_renewal);
    }

    #[test]
    fn test_claims_override_wins() {
        let mut with_override = spec("secret");
        with_override.claims = Some(Claims {
            default_tls_cert_duration_secs: 3600,
            ..Claims::default()
        });
        let mut provisioner = TokenProvisioner::from_spec(&with_override).unwrap();
        provisioner.init(&ProvisionerConfig::default()).unwrap();
        assert_eq!(provisioner.claims().default_tls_cert_duration_secs, 3600);
    }
}
