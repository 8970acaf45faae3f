//! OCF Identity Authority Core Domain Types
//!
//! This crate contains the pure domain types of the OCF device-identity
//! profile with no dependencies on:
//! - X.509 builders or parsers
//! - Key material
//! - Storage or transport
//!
//! Everything here is cheap to construct and safe to share across threads.

pub mod descriptor;
pub mod error;
pub mod identity;
pub mod oid;

// Re-export commonly used types
pub use descriptor::{ProvisionerDescriptor, ProvisionerType};
pub use error::{DescriptorError, IdentityError};
pub use identity::{validate, DeviceIdentity, DEVICE_ID_PREFIX};
