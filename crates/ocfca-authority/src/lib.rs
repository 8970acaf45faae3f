//! OCF Identity Authority
//!
//! This crate layers the OCF device-identity signing profile on top of a
//! generic X.509 authority:
//! - [`pipeline`] validates, builds and reshapes device leaf certificates
//! - [`provisioner`] and [`classifier`] decide which provisioners take part
//! - [`facade`] composes both with any [`Authority`] implementation

pub mod authority;
pub mod certificate;
pub mod classifier;
pub mod config;
pub mod error;
pub mod facade;
pub mod intermediate;
pub mod options;
pub mod pipeline;
pub mod profile;
pub mod provisioner;
pub mod request;
pub mod store;
pub mod validators;

mod x509;

#[cfg(test)]
pub(crate) mod testutil;

pub use authority::{
    Authority, AuthorizeMethod, BaseAuthority, RevokeOptions, SshOptions, TlsCertificate,
};
pub use certificate::{Certificate, IssuedCertificate, KeyUsage};
pub use classifier::{Classifier, ClassifierKind, ExtensionClassifier, NameClassifier};
pub use config::{Claims, Config};
pub use error::{ApiError, CaError, Status};
pub use facade::OcfAuthority;
pub use intermediate::IntermediateIdentity;
pub use options::{SignOption, SignOptions};
pub use pipeline::{Signer, SigningProfile, Stage};
pub use provisioner::{OcfProvisioner, Provisioner, ProvisionerRef, TokenProvisioner};
pub use request::CertificateRequest;
pub use store::{CertificateStore, MemoryStore, NoStore, StoreError};
