//! Built-in sign options handed out by provisioners.

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use ocfca_core::{oid, ProvisionerDescriptor};
use rcgen::{CertificateParams, CustomExtension};
use time::OffsetDateTime;

use crate::options::{
    CertificateRequestValidator, CertificateValidator, OptionError, ProfileModifier, SignOptions,
};
use crate::request::{CertificateRequest, KeyAlgorithm};

/// Prefix of the DNS-names validator failure message.
pub const DNS_NAMES_MISMATCH: &str = "certificate request does not contain the valid DNS names";

/// Stamps the leaf with the provisioner identity extension.
#[derive(Debug, Clone)]
pub struct ProvisionerExtension {
    descriptor: ProvisionerDescriptor,
}

impl ProvisionerExtension {
    pub fn new(descriptor: ProvisionerDescriptor) -> Self {
        Self { descriptor }
    }
}

impl ProfileModifier for ProvisionerExtension {
    fn modify(&self, params: &mut CertificateParams, _: &SignOptions) -> Result<(), OptionError> {
        let value = self
            .descriptor
            .to_der()
            .map_err(|e| OptionError::new(e.to_string()))?;
        let arcs = oid::arcs(&oid::STEP_PROVISIONER);

        params
            .custom_extensions
            .retain(|ext| ext.oid_components().ne(arcs.iter().copied()));
        params
            .custom_extensions
            .push(CustomExtension::from_oid_content(&arcs, value));
        Ok(())
    }
}

/// Sets the validity window from the sign options, falling back to a
/// default duration starting now (minus the backdate).
#[derive(Debug, Clone)]
pub struct DefaultDuration {
    duration: Duration,
}

impl DefaultDuration {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl ProfileModifier for DefaultDuration {
    fn modify(
        &self,
        params: &mut CertificateParams,
        opts: &SignOptions,
    ) -> Result<(), OptionError> {
        let not_before = opts
            .not_before
            .unwrap_or_else(|| Utc::now() - opts.backdate.unwrap_or_else(Duration::zero));
        let not_after = opts.not_after.unwrap_or(not_before + self.duration);

        params.not_before = to_offset(not_before.timestamp())?;
        params.not_after = to_offset(not_after.timestamp())?;
        Ok(())
    }
}

/// Accepts EC P-256/P-384, Ed25519 and RSA keys of at least 2048 bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicKeyValidator;

impl CertificateRequestValidator for PublicKeyValidator {
    fn valid(&self, csr: &CertificateRequest) -> Result<(), OptionError> {
        match csr.public_key().algorithm() {
            KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384 | KeyAlgorithm::Ed25519 => Ok(()),
            KeyAlgorithm::Rsa { bits } if bits >= 2048 => Ok(()),
            KeyAlgorithm::Rsa { bits } => Err(OptionError::new(format!(
                "certificate request RSA key must be at least 2048 bits, got {}",
                bits
            ))),
            KeyAlgorithm::Unsupported => Err(OptionError::new(
                "certificate request uses an unsupported public key algorithm",
            )),
        }
    }
}

/// Requires the requested DNS names to equal the authorized set.
#[derive(Debug, Clone, Default)]
pub struct DnsNamesValidator {
    want: BTreeSet<String>,
}

impl DnsNamesValidator {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            want: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl CertificateRequestValidator for DnsNamesValidator {
    fn valid(&self, csr: &CertificateRequest) -> Result<(), OptionError> {
        let got: BTreeSet<String> = csr.dns_names().iter().cloned().collect();
        if got == self.want {
            return Ok(());
        }
        Err(OptionError::new(format!(
            "{} - got {:?}, want {:?}",
            DNS_NAMES_MISMATCH,
            csr.dns_names(),
            self.want.iter().collect::<Vec<_>>()
        )))
    }
}

/// Checks the validity window of the built profile against a duration range.
#[derive(Debug, Clone)]
pub struct ValidityValidator {
    min: Duration,
    max: Duration,
}

impl ValidityValidator {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }
}

impl CertificateValidator for ValidityValidator {
    fn valid(&self, params: &CertificateParams) -> Result<(), OptionError> {
        let not_before = params.not_before.unix_timestamp();
        let not_after = params.not_after.unix_timestamp();
        if not_after <= not_before {
            return Err(OptionError::new(
                "notAfter cannot be before or equal to notBefore",
            ));
        }

        let duration = Duration::seconds(not_after - not_before);
        if duration < self.min {
            return Err(OptionError::new(format!(
                "requested duration of {}s is less than the authorized minimum \
                 certificate duration of {}s",
                duration.num_seconds(),
                self.min.num_seconds()
            )));
        }
        if duration > self.max {
            return Err(OptionError::new(format!(
                "requested duration of {}s is more than the authorized maximum \
                 certificate duration of {}s",
                duration.num_seconds(),
                self.max.num_seconds()
            )));
        }
        Ok(())
    }
}

fn to_offset(secs: i64) -> Result<OffsetDateTime, OptionError> {
    OffsetDateTime::from_unix_timestamp(secs).map_err(|e| OptionError::new(e.to_string()))
}
