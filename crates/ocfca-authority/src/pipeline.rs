//! Signing pipeline.
//!
//! [`Signer::sign`] turns a certificate request plus the options a
//! provisioner authorized into an issued leaf:
//!
//! ```text
//! Received -> ValidatingIdentity -> ClassifyingOptions -> ValidatingSignature
//!   -> BuildingProfile -> ValidatingCertificate -> ShapingProfile -> Finalizing
//!   -> Persisted | PersistSkipped -> Done
//! ```
//!
//! Any failure ends the call with an [`ApiError`] recording the stage it
//! failed in. There are no retries. The OCF identity profile validates the
//! subject identity and reshapes the leaf; the standard profile skips both.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::certificate::{Certificate, IssuedCertificate};
use crate::error::{ApiError, CaError, Status};
use crate::intermediate::IntermediateIdentity;
use crate::options::{CertificateValidator, ProfileModifier, SignOption, SignOptions};
use crate::profile::LeafProfile;
use crate::request::CertificateRequest;
use crate::store::CertificateStore;
use crate::validators::DNS_NAMES_MISMATCH;

const OP: &str = "sign";

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    ValidatingIdentity,
    ClassifyingOptions,
    ValidatingSignature,
    BuildingProfile,
    ValidatingCertificate,
    ShapingProfile,
    Finalizing,
    Persisted,
    PersistSkipped,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Certificate profile a [`Signer`] issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningProfile {
    /// Generic leaf: subject, names and usages as requested.
    Standard,

    /// OCF device identity: `uuid:` subject, no alternative names, fixed
    /// key usage and extended key usage.
    OcfIdentity,
}

/// Issues leaves with the intermediate identity.
pub struct Signer {
    identity: Arc<IntermediateIdentity>,
    store: Arc<dyn CertificateStore>,
    profile: SigningProfile,
}

impl Signer {
    pub fn new(
        identity: Arc<IntermediateIdentity>,
        store: Arc<dyn CertificateStore>,
        profile: SigningProfile,
    ) -> Self {
        Self {
            identity,
            store,
            profile,
        }
    }

    /// Sign `csr` with the options a provisioner authorized.
    pub fn sign(
        &self,
        csr: &CertificateRequest,
        opts: &SignOptions,
        extra: &[SignOption],
    ) -> Result<IssuedCertificate, ApiError> {
        let ocf = self.profile == SigningProfile::OcfIdentity;
        let mut run = Run::new(self.profile, csr, opts);

        if ocf {
            run.advance(Stage::ValidatingIdentity);
            ocfca_core::validate(csr.common_name())
                .map_err(|e| run.fail(Status::Unauthorized, e))?;
        }

        run.advance(Stage::ClassifyingOptions);
        let mut cert_validators: Vec<&Arc<dyn CertificateValidator>> = Vec::new();
        let mut modifiers: Vec<Arc<dyn ProfileModifier>> = Vec::new();
        let mut markers = 0usize;
        for option in extra {
            match option {
                SignOption::CertificateValidator(v) => cert_validators.push(v),
                SignOption::CertificateRequestValidator(v) => {
                    if let Err(e) = v.valid(csr) {
                        if ocf && e.message().contains(DNS_NAMES_MISMATCH) {
                            debug!(error = %e, "ignoring DNS names validation");
                        } else {
                            return Err(run.fail(
                                Status::Unauthorized,
                                CaError::Unauthorized(e.to_string()),
                            ));
                        }
                    }
                }
                SignOption::ProfileModifier(m) => modifiers.push(Arc::clone(m)),
                SignOption::OcfMarker => markers += 1,
                SignOption::Unknown(kind) => {
                    return Err(run.fail(
                        Status::InternalServerError,
                        CaError::UnexpectedOption(kind.clone()),
                    ));
                }
            }
        }
        if markers > 1 {
            debug!(markers, "collapsed repeated OCF markers");
        }

        run.advance(Stage::ValidatingSignature);
        csr.check_signature().map_err(|e| {
            run.fail(Status::BadRequest, CaError::InvalidSignature(e.to_string()))
        })?;

        run.advance(Stage::BuildingProfile);
        let mut profile = LeafProfile::from_request(csr, opts, &modifiers)
            .map_err(|e| run.fail(Status::InternalServerError, e))?;

        run.advance(Stage::ValidatingCertificate);
        for validator in cert_validators {
            validator.valid(profile.params()).map_err(|e| {
                run.fail(Status::Unauthorized, CaError::Unauthorized(e.to_string()))
            })?;
        }

        if ocf {
            run.advance(Stage::ShapingProfile);
            profile
                .apply_ocf_policy()
                .map_err(|e| run.fail(Status::InternalServerError, e))?;
        }

        run.advance(Stage::Finalizing);
        let der = profile
            .sign(&self.identity)
            .map_err(|e| run.fail(Status::InternalServerError, e))?;
        let leaf =
            Certificate::parse(&der, "leaf").map_err(|e| run.fail(Status::InternalServerError, e))?;
        let issuer = Certificate::parse(self.identity.certificate().der(), "intermediate")
            .map_err(|e| run.fail(Status::InternalServerError, e))?;

        match self.store.store_certificate(&leaf) {
            Ok(()) => run.advance(Stage::Persisted),
            Err(e) if e.is_not_implemented() => run.advance(Stage::PersistSkipped),
            Err(e) => return Err(run.fail(Status::InternalServerError, CaError::Storage(e))),
        }

        run.advance(Stage::Done);
        Ok(IssuedCertificate { leaf, issuer })
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("identity", &self.identity)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

/// Per-call state: current stage and error context.
struct Run {
    profile: SigningProfile,
    stage: Stage,
    context: BTreeMap<String, String>,
}

impl Run {
    fn new(profile: SigningProfile, csr: &CertificateRequest, opts: &SignOptions) -> Self {
        let mut context = BTreeMap::new();
        context.insert("csr".to_string(), csr.common_name().to_string());
        context.insert("signOptions".to_string(), format!("{:?}", opts));
        debug!(?profile, common_name = %csr.common_name(), stage = %Stage::Received, "sign");
        Self {
            profile,
            stage: Stage::Received,
            context,
        }
    }

    fn advance(&mut self, stage: Stage) {
        debug!(profile = ?self.profile, %stage, "sign");
        self.stage = stage;
    }

    fn fail(&self, status: Status, cause: impl Into<CaError>) -> ApiError {
        let cause = cause.into();
        debug!(profile = ?self.profile, stage = %self.stage, error = %cause, "sign failed");
        ApiError::new(OP, cause, status)
            .with_context_map(&self.context)
            .with_context("stage", self.stage.to_string())
    }
}
