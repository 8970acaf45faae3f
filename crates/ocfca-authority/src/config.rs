//! Authority configuration.
//!
//! The file format is JSON with camelCase keys, e.g.:
//!
//! ```json
//! {
//!   "root": "certs/root_ca.crt",
//!   "crt": "certs/intermediate_ca.crt",
//!   "key": "secrets/intermediate_ca_key",
//!   "dnsNames": ["ca.local"],
//!   "db": { "type": "memory" },
//!   "authority": {
//!     "provisioners": [
//!       { "type": "JWK", "name": "ocf-devices", "kid": "k1", "tokenHashes": ["..."] }
//!     ]
//!   },
//!   "ocf": { "prefix": "ocf-", "classifier": "name" }
//! }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use ocfca_core::ProvisionerType;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::classifier::{ClassifierKind, DEFAULT_OCF_PREFIX};
use crate::store::{CertificateStore, MemoryStore, NoStore};

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Authority configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Root certificate files.
    #[serde(default, deserialize_with = "one_or_many")]
    pub root: Vec<PathBuf>,

    /// Additional roots trusted for federation.
    #[serde(default, deserialize_with = "one_or_many")]
    pub federated_roots: Vec<PathBuf>,

    /// Intermediate certificate file (PEM).
    pub crt: PathBuf,

    /// Intermediate private key file (PEM, PKCS#8).
    pub key: PathBuf,

    /// Names the authority's own TLS certificate is issued for.
    #[serde(default)]
    pub dns_names: Vec<String>,

    #[serde(default)]
    pub db: DbConfig,

    #[serde(default)]
    pub authority: AuthorityConfig,

    #[serde(default)]
    pub ocf: OcfConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: vec![PathBuf::from("certs/root_ca.crt")],
            federated_roots: Vec::new(),
            crt: PathBuf::from("certs/intermediate_ca.crt"),
            key: PathBuf::from("secrets/intermediate_ca_key"),
            dns_names: vec!["localhost".to_string()],
            db: DbConfig::default(),
            authority: AuthorityConfig::default(),
            ocf: OcfConfig::default(),
        }
    }
}

impl Config {
    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crt.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("crt cannot be empty".to_string()));
        }
        if self.key.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("key cannot be empty".to_string()));
        }
        if self.ocf.prefix.is_empty() {
            return Err(ConfigError::Invalid("ocf.prefix cannot be empty".to_string()));
        }

        self.authority.claims.validate()?;

        let mut ids = HashSet::new();
        for spec in &self.authority.provisioners {
            if spec.name.is_empty() {
                return Err(ConfigError::Invalid(
                    "provisioner name cannot be empty".to_string(),
                ));
            }
            if let Some(claims) = &spec.claims {
                claims.validate()?;
            }
            if !ids.insert(spec.id()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicated provisioner {}",
                    spec.id()
                )));
            }
        }
        Ok(())
    }
}

/// Certificate store selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(rename = "type", default)]
    pub db_type: DbType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    #[default]
    Memory,
    None,
}

impl DbConfig {
    /// Open the configured store.
    pub fn open(&self) -> Arc<dyn CertificateStore> {
        match self.db_type {
            DbType::Memory => Arc::new(MemoryStore::new()),
            DbType::None => Arc::new(NoStore),
        }
    }
}

/// Provisioners and global claims.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityConfig {
    #[serde(default)]
    pub provisioners: Vec<ProvisionerSpec>,

    #[serde(default)]
    pub claims: Claims,
}

/// Certificate duration policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Claims {
    pub min_tls_cert_duration_secs: i64,
    pub max_tls_cert_duration_secs: i64,
    pub default_tls_cert_duration_secs: i64,
    pub backdate_secs: i64,
    pub disable_renewal: bool,
}

impl Default for Claims {
    fn default() -> Self {
        Self {
            min_tls_cert_duration_secs: 5 * 60,
            max_tls_cert_duration_secs: 24 * 60 * 60,
            default_tls_cert_duration_secs: 24 * 60 * 60,
            backdate_secs: 60,
            disable_renewal: false,
        }
    }
}

/// Largest duration a claim may hold: 100 years.
pub const MAX_CLAIM_SECS: i64 = 100 * 365 * 24 * 60 * 60;

impl Claims {
    pub fn min_duration(&self) -> Duration {
        claim_duration(self.min_tls_cert_duration_secs)
    }

    pub fn max_duration(&self) -> Duration {
        claim_duration(self.max_tls_cert_duration_secs)
    }

    pub fn default_duration(&self) -> Duration {
        claim_duration(self.default_tls_cert_duration_secs)
    }

    pub fn backdate(&self) -> Duration {
        claim_duration(self.backdate_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_tls_cert_duration_secs <= 0 {
            return Err(ConfigError::Invalid(
                "claims: minimum duration must be positive".to_string(),
            ));
        }
        if self.max_tls_cert_duration_secs < self.min_tls_cert_duration_secs {
            return Err(ConfigError::Invalid(
                "claims: maximum duration cannot be lower than the minimum".to_string(),
            ));
        }
        if self.default_tls_cert_duration_secs < self.min_tls_cert_duration_secs
            || self.default_tls_cert_duration_secs > self.max_tls_cert_duration_secs
        {
            return Err(ConfigError::Invalid(
                "claims: default duration must be between minimum and maximum".to_string(),
            ));
        }
        if self.backdate_secs < 0 {
            return Err(ConfigError::Invalid(
                "claims: backdate cannot be negative".to_string(),
            ));
        }
        if self.max_tls_cert_duration_secs > MAX_CLAIM_SECS
            || self.backdate_secs > MAX_CLAIM_SECS
        {
            return Err(ConfigError::Invalid(format!(
                "claims: durations cannot exceed {} seconds",
                MAX_CLAIM_SECS
            )));
        }
        Ok(())
    }
}

/// Out-of-range values saturate so a hand-built `Claims` cannot overflow
/// date arithmetic.
fn claim_duration(secs: i64) -> Duration {
    Duration::seconds(secs.clamp(-MAX_CLAIM_SECS, MAX_CLAIM_SECS))
}

/// OCF identity profile settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OcfConfig {
    /// Reserved provisioner name prefix, compared case-insensitively.
    pub prefix: String,

    /// Strategy deciding which signing calls are OCF identity flows.
    pub classifier: ClassifierKind,
}

impl Default for OcfConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_OCF_PREFIX.to_string(),
            classifier: ClassifierKind::default(),
        }
    }
}

/// One configured provisioner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerSpec {
    #[serde(rename = "type", default)]
    pub provisioner_type: ProvisionerType,

    pub name: String,

    /// Credential (key) identifier.
    #[serde(default)]
    pub kid: String,

    /// SHA-256 hex digests of the tokens this provisioner accepts.
    #[serde(default)]
    pub token_hashes: Vec<String>,

    /// DNS names a token of this provisioner authorizes.
    #[serde(default)]
    pub dns_names: Vec<String>,

    /// Encrypted private key handed to clients, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,

    /// Overrides the global claims.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
}

impl ProvisionerSpec {
    /// Registry identifier, `name:kid`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.name, self.kid)
    }
}

/// Settings handed to a provisioner on init.
#[derive(Debug, Clone, Default)]
pub struct ProvisionerConfig {
    pub claims: Claims,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(PathBuf),
        Many(Vec<PathBuf>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}
