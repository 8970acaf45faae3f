//! Provisioner classification.
//!
//! Decides whether a signing call belongs to the OCF identity profile. Two
//! strategies share the same reserved-prefix rule:
//!
//! - [`NameClassifier`] (default) wraps provisioners whose name carries the
//!   prefix in an [`OcfProvisioner`] when they are looked up or listed, and
//!   recognizes OCF flows by the marker option the wrapper adds.
//! - [`ExtensionClassifier`] leaves provisioners untouched and probes the
//!   profile modifiers of each signing call for the provisioner identity
//!   extension instead.

use std::fmt;
use std::sync::Arc;

use ocfca_core::{oid, ProvisionerDescriptor};
use rcgen::CertificateParams;
use serde::{Deserialize, Serialize};

use crate::options::{profile_modifiers, ProfileModifier, SignOption, SignOptions};
use crate::provisioner::{OcfProvisioner, Provisioner, ProvisionerRef};

/// Default reserved provisioner name prefix.
pub const DEFAULT_OCF_PREFIX: &str = "ocf-";

/// Case-insensitive prefix check on a provisioner name.
pub fn has_reserved_prefix(name: &str, prefix: &str) -> bool {
    name.to_lowercase().starts_with(&prefix.to_lowercase())
}

/// Strategy deciding which provisioners and signing calls are OCF flows.
pub trait Classifier: fmt::Debug + Send + Sync {
    /// Applied to every provisioner returned by lookup or listing.
    fn decorate(&self, provisioner: ProvisionerRef) -> ProvisionerRef;

    /// Applied to the options of every signing call.
    fn is_ocf_flow(&self, options: &[SignOption], opts: &SignOptions) -> bool;
}

/// Name-based classification at lookup time.
#[derive(Debug, Clone)]
pub struct NameClassifier {
    prefix: String,
}

impl NameClassifier {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for NameClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_OCF_PREFIX)
    }
}

impl Classifier for NameClassifier {
    fn decorate(&self, provisioner: ProvisionerRef) -> ProvisionerRef {
        if has_reserved_prefix(provisioner.name(), &self.prefix) {
            Arc::new(OcfProvisioner::new(provisioner))
        } else {
            provisioner
        }
    }

    fn is_ocf_flow(&self, options: &[SignOption], _: &SignOptions) -> bool {
        options.iter().any(SignOption::is_marker)
    }
}

/// Extension-based classification at sign time.
#[derive(Debug, Clone)]
pub struct ExtensionClassifier {
    prefix: String,
}

impl ExtensionClassifier {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for ExtensionClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_OCF_PREFIX)
    }
}

impl Classifier for ExtensionClassifier {
    fn decorate(&self, provisioner: ProvisionerRef) -> ProvisionerRef {
        provisioner
    }

    fn is_ocf_flow(&self, options: &[SignOption], opts: &SignOptions) -> bool {
        probe_descriptor(profile_modifiers(options), opts)
            .is_some_and(|descriptor| has_reserved_prefix(&descriptor.name, &self.prefix))
    }
}

/// Apply `modifiers` to a blank probe profile and decode the provisioner
/// identity extension they leave on it.
///
/// Modifiers that fail on the probe are skipped. Returns `None` when no
/// modifier adds the extension or its payload does not decode.
pub fn probe_descriptor<'a>(
    modifiers: impl IntoIterator<Item = &'a Arc<dyn ProfileModifier>>,
    opts: &SignOptions,
) -> Option<ProvisionerDescriptor> {
    let mut probe = CertificateParams::default();
    for modifier in modifiers {
        let _ = modifier.modify(&mut probe, opts);
    }

    let arcs = oid::arcs(&oid::STEP_PROVISIONER);
    probe
        .custom_extensions
        .iter()
        .rev()
        .find(|ext| ext.oid_components().eq(arcs.iter().copied()))
        .and_then(|ext| ProvisionerDescriptor::from_der(ext.content()).ok())
}

/// Configured classification strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Name,
    Extension,
}

impl ClassifierKind {
    pub fn build(&self, prefix: &str) -> Box<dyn Classifier> {
        match self {
            Self::Name => Box::new(NameClassifier::new(prefix)),
            Self::Extension => Box::new(ExtensionClassifier::new(prefix)),
        }
    }
}
