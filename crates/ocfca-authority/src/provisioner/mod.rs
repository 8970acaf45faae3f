//! Provisioners.
//!
//! A provisioner authorizes sign, revoke and renew requests and, for sign
//! requests, returns the options that shape the issued certificate.

mod ocf;
mod token;

use std::fmt;
use std::sync::Arc;

use ocfca_core::ProvisionerType;
use thiserror::Error;

use crate::certificate::Certificate;
use crate::config::ProvisionerConfig;
use crate::options::SignOption;

pub use ocf::OcfProvisioner;
pub use token::{generate_token, hash_token, TokenProvisioner};

/// Errors returned by provisioners.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("invalid token for provisioner {provisioner}")]
    InvalidToken { provisioner: String },

    #[error("renew is disabled for provisioner {0}")]
    RenewalDisabled(String),

    #[error("provisioner {0} is shared and cannot be re-initialized")]
    Shared(String),

    #[error("invalid provisioner {name}: {reason}")]
    Config { name: String, reason: String },
}

impl ProvisionerError {
    /// True when the error is a rejection of the caller rather than a fault.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::InvalidToken { .. } | Self::RenewalDisabled(_))
    }
}

/// Capability set of a provisioner.
pub trait Provisioner: fmt::Debug + Send + Sync {
    /// Registry identifier.
    fn id(&self) -> &str;

    /// Identifier of a token, used to enforce single use.
    fn token_id(&self, token: &str) -> Result<String, ProvisionerError>;

    fn name(&self) -> &str;

    fn provisioner_type(&self) -> ProvisionerType;

    /// Key id and encrypted private key, if the provisioner publishes one.
    fn encrypted_key(&self) -> Option<(String, String)>;

    fn init(&mut self, config: &ProvisionerConfig) -> Result<(), ProvisionerError>;

    fn authorize_revoke(&self, token: &str) -> Result<(), ProvisionerError>;

    fn authorize_sign(&self, token: &str) -> Result<Vec<SignOption>, ProvisionerError>;

    fn authorize_renewal(&self, cert: &Certificate) -> Result<(), ProvisionerError>;
}

/// Shared, immutable provisioner handle.
pub type ProvisionerRef = Arc<dyn Provisioner>;

impl Provisioner for ProvisionerRef {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn token_id(&self, token: &str) -> Result<String, ProvisionerError> {
        (**self).token_id(token)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn provisioner_type(&self) -> ProvisionerType {
        (**self).provisioner_type()
    }

    fn encrypted_key(&self) -> Option<(String, String)> {
        (**self).encrypted_key()
    }

    fn init(&mut self, config: &ProvisionerConfig) -> Result<(), ProvisionerError> {
        let id = self.id().to_string();
        Arc::get_mut(self)
            .ok_or(ProvisionerError::Shared(id))?
            .init(config)
    }

    fn authorize_revoke(&self, token: &str) -> Result<(), ProvisionerError> {
        (**self).authorize_revoke(token)
    }

    fn authorize_sign(&self, token: &str) -> Result<Vec<SignOption>, ProvisionerError> {
        (**self).authorize_sign(token)
    }

    fn authorize_renewal(&self, cert: &Certificate) -> Result<(), ProvisionerError> {
        (**self).authorize_renewal(cert)
    }
}
