//! Generic certificate authority.
//!
//! [`Authority`] is the operation surface the OCF facade composes with.
//! [`BaseAuthority`] implements it with an in-memory provisioner registry,
//! the intermediate identity and a certificate store.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use ocfca_core::{oid, ProvisionerDescriptor};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::certificate::{Certificate, IssuedCertificate};
use crate::config::{Claims, Config, ProvisionerConfig};
use crate::error::{ApiError, CaError, Status};
use crate::intermediate::IntermediateIdentity;
use crate::options::{SignOption, SignOptions};
use crate::pipeline::{Signer, SigningProfile};
use crate::profile::LeafProfile;
use crate::provisioner::{Provisioner, ProvisionerRef, TokenProvisioner};
use crate::request::CertificateRequest;
use crate::store::{CertificateStore, RevokedCertificateInfo, StoreError};

/// Page size when the caller does not ask for one.
pub const DEFAULT_PROVISIONER_LIMIT: usize = 20;

/// Largest page size served.
pub const MAX_PROVISIONER_LIMIT: usize = 100;

/// Operation a token is presented for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizeMethod {
    Sign,
    Revoke,
    SignSsh,
}

/// Revocation request.
#[derive(Debug, Clone, Default)]
pub struct RevokeOptions {
    /// Hex serial of the certificate to revoke.
    pub serial: String,
    pub reason: String,
    pub reason_code: i32,

    /// One-time token authorizing the revocation.
    pub token: Option<String>,

    /// Peer certificate, when the holder revokes its own certificate.
    pub certificate: Option<Certificate>,
}

/// SSH certificate request parameters.
#[derive(Debug, Clone, Default)]
pub struct SshOptions {
    pub key_id: String,
    pub principals: Vec<String>,
}

/// Certificate chain and key the authority serves TLS with.
#[derive(Clone)]
pub struct TlsCertificate {
    /// Leaf first, then the intermediate.
    pub chain: Vec<Certificate>,
    pub private_key_pem: String,
}

impl TlsCertificate {
    pub fn chain_pem(&self) -> String {
        self.chain.iter().map(Certificate::pem).collect()
    }
}

impl fmt::Debug for TlsCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCertificate")
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

/// Operations of a certificate authority.
pub trait Authority: Send + Sync {
    /// Authorize a one-time token for `method`, returning the sign options
    /// of the provisioner that accepted it.
    fn authorize(&self, token: &str, method: AuthorizeMethod) -> Result<Vec<SignOption>, ApiError>;

    fn authorize_sign(&self, token: &str) -> Result<Vec<SignOption>, ApiError> {
        self.authorize(token, AuthorizeMethod::Sign)
    }

    fn sign(
        &self,
        csr: &CertificateRequest,
        opts: &SignOptions,
        extra: &[SignOption],
    ) -> Result<IssuedCertificate, ApiError>;

    fn renew(&self, peer: &Certificate) -> Result<IssuedCertificate, ApiError>;

    fn sign_ssh(
        &self,
        public_key: &[u8],
        opts: &SshOptions,
        extra: &[SignOption],
    ) -> Result<Vec<u8>, ApiError>;

    fn revoke(&self, opts: &RevokeOptions) -> Result<(), ApiError>;

    /// Page of provisioners starting at `cursor` (a provisioner id, or empty
    /// for the first page), and the cursor of the next page (empty when done).
    fn get_provisioners(
        &self,
        cursor: &str,
        limit: usize,
    ) -> Result<(Vec<ProvisionerRef>, String), ApiError>;

    fn load_provisioner_by_id(&self, id: &str) -> Result<ProvisionerRef, ApiError>;

    /// Provisioner named by the provisioner extension of `cert`.
    fn load_provisioner_by_certificate(&self, cert: &Certificate)
        -> Result<ProvisionerRef, ApiError>;

    /// Provisioner accepting `token`. Does not consume the token.
    fn load_provisioner_by_token(&self, token: &str) -> Result<ProvisionerRef, ApiError>;

    /// Root with the given SHA-256 fingerprint.
    fn root(&self, sha256: &str) -> Result<Certificate, ApiError>;

    fn get_roots(&self) -> Result<Vec<Certificate>, ApiError>;

    /// Roots plus federated roots.
    fn get_federation(&self) -> Result<Vec<Certificate>, ApiError>;

    fn get_tls_certificate(&self) -> Result<TlsCertificate, ApiError>;

    fn get_encrypted_key(&self, kid: &str) -> Result<String, ApiError>;

    fn get_database(&self) -> Arc<dyn CertificateStore>;

    fn intermediate_identity(&self) -> Arc<IntermediateIdentity>;

    fn claims(&self) -> &Claims;

    fn shutdown(&self) -> Result<(), ApiError>;
}

/// Authorize `token` against `provisioner`, consuming its id in `store`.
pub fn authorize_token(
    provisioner: &dyn Provisioner,
    store: &dyn CertificateStore,
    token: &str,
    method: AuthorizeMethod,
) -> Result<Vec<SignOption>, ApiError> {
    const OP: &str = "authority.Authorize";

    if method == AuthorizeMethod::SignSsh {
        return Err(ApiError::from_cause(OP, CaError::NotImplemented("ssh authorization")));
    }

    let token_id = provisioner
        .token_id(token)
        .map_err(|e| ApiError::unauthorized(OP, e))?;
    let fresh = store
        .use_token(&token_id)
        .map_err(|e| ApiError::internal(OP, CaError::Storage(e)))?;
    if !fresh {
        return Err(ApiError::unauthorized(OP, CaError::TokenReused)
            .with_context("provisioner", provisioner.id()));
    }

    match method {
        AuthorizeMethod::Sign => provisioner
            .authorize_sign(token)
            .map_err(|e| ApiError::unauthorized(OP, e)),
        _ => provisioner
            .authorize_revoke(token)
            .map(|_| Vec::new())
            .map_err(|e| ApiError::unauthorized(OP, e)),
    }
}

/// Authority backed by configuration files and an in-memory registry.
pub struct BaseAuthority {
    identity: Arc<IntermediateIdentity>,
    roots: Vec<Certificate>,
    federated_roots: Vec<Certificate>,

    /// Sorted by id.
    provisioners: Vec<ProvisionerRef>,
    store: Arc<dyn CertificateStore>,
    signer: Signer,
    claims: Claims,
    dns_names: Vec<String>,
}

impl BaseAuthority {
    /// Load configuration from `path` and build the authority.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CaError> {
        let config = Config::load(path)?;
        Self::new(&config)
    }

    /// Build the authority: load roots and the intermediate, open the store
    /// and initialize every configured provisioner.
    pub fn new(config: &Config) -> Result<Self, CaError> {
        config.validate()?;

        let roots = read_bundles(&config.root, "root")?;
        let federated_roots = read_bundles(&config.federated_roots, "federated root")?;
        let identity = IntermediateIdentity::from_files(&config.crt, &config.key)?;
        let store = config.db.open();
        let claims = config.authority.claims.clone();

        let provisioner_config = ProvisionerConfig {
            claims: claims.clone(),
        };
        let mut authority = Self::from_parts(identity, roots, store)
            .with_claims(claims)
            .with_federated_roots(federated_roots)
            .with_dns_names(config.dns_names.clone());
        for spec in &config.authority.provisioners {
            let mut provisioner = TokenProvisioner::from_spec(spec)?;
            provisioner.init(&provisioner_config)?;
            authority = authority.with_provisioner(Arc::new(provisioner));
        }

        info!(
            provisioners = authority.provisioners.len(),
            roots = authority.roots.len(),
            intermediate = %authority.identity.certificate().common_name(),
            "authority initialized"
        );
        Ok(authority)
    }

    /// Assemble an authority from already loaded parts.
    pub fn from_parts(
        identity: IntermediateIdentity,
        roots: Vec<Certificate>,
        store: Arc<dyn CertificateStore>,
    ) -> Self {
        let identity = Arc::new(identity);
        let signer = Signer::new(
            Arc::clone(&identity),
            Arc::clone(&store),
            SigningProfile::Standard,
        );
        Self {
            identity,
            roots,
            federated_roots: Vec::new(),
            provisioners: Vec::new(),
            store,
            signer,
            claims: Claims::default(),
            dns_names: Vec::new(),
        }
    }

    /// Builder method to register a provisioner. Replaces one with the same id.
    pub fn with_provisioner(mut self, provisioner: ProvisionerRef) -> Self {
        let id = provisioner.id().to_string();
        match self
            .provisioners
            .binary_search_by(|p| p.id().cmp(id.as_str()))
        {
            Ok(i) => self.provisioners[i] = provisioner,
            Err(i) => self.provisioners.insert(i, provisioner),
        }
        self
    }

    pub fn with_claims(mut self, claims: Claims) -> Self {
        self.claims = claims;
        self
    }

    pub fn with_federated_roots(mut self, roots: Vec<Certificate>) -> Self {
        self.federated_roots = roots;
        self
    }

    pub fn with_dns_names(mut self, dns_names: Vec<String>) -> Self {
        self.dns_names = dns_names;
        self
    }

    fn with_backdate(&self, opts: &SignOptions) -> SignOptions {
        let mut opts = opts.clone();
        if opts.backdate.is_none() {
            opts.backdate = Some(self.claims.backdate());
        }
        opts
    }

    /// Sign, parse and persist a profile outside the request pipeline.
    fn issue(&self, op: &'static str, profile: LeafProfile) -> Result<IssuedCertificate, ApiError> {
        let der = profile
            .sign(&self.identity)
            .map_err(|e| ApiError::internal(op, e))?;
        let leaf = Certificate::parse(&der, "leaf").map_err(|e| ApiError::internal(op, e))?;
        let issuer = self.identity.certificate().clone();

        match self.store.store_certificate(&leaf) {
            Ok(()) => {}
            Err(e) if e.is_not_implemented() => {}
            Err(e) => return Err(ApiError::internal(op, CaError::Storage(e))),
        }
        Ok(IssuedCertificate { leaf, issuer })
    }
}

impl Authority for BaseAuthority {
    fn authorize(&self, token: &str, method: AuthorizeMethod) -> Result<Vec<SignOption>, ApiError> {
        let provisioner = self.load_provisioner_by_token(token)?;
        authorize_token(provisioner.as_ref(), self.store.as_ref(), token, method)
    }

    fn sign(
        &self,
        csr: &CertificateRequest,
        opts: &SignOptions,
        extra: &[SignOption],
    ) -> Result<IssuedCertificate, ApiError> {
        self.signer.sign(csr, &self.with_backdate(opts), extra)
    }

    fn renew(&self, peer: &Certificate) -> Result<IssuedCertificate, ApiError> {
        const OP: &str = "authority.Renew";

        let revoked = self
            .store
            .is_revoked(peer.serial())
            .map_err(|e| ApiError::internal(OP, CaError::Storage(e)))?;
        if revoked {
            return Err(ApiError::unauthorized(
                OP,
                CaError::Unauthorized(format!("certificate {} has been revoked", peer.serial())),
            ));
        }

        match self.load_provisioner_by_certificate(peer) {
            Ok(provisioner) => provisioner
                .authorize_renewal(peer)
                .map_err(|e| ApiError::unauthorized(OP, e))?,
            Err(e) if e.status() == Status::NotFound => {
                debug!(serial = %peer.serial(), "renewing certificate without provisioner")
            }
            Err(e) => return Err(e),
        }

        let profile = LeafProfile::from_certificate(peer, self.claims.backdate())
            .map_err(|e| ApiError::internal(OP, e))?;
        let issued = self.issue(OP, profile)?;
        info!(old = %peer.serial(), new = %issued.leaf.serial(), "certificate renewed");
        Ok(issued)
    }

    fn sign_ssh(&self, _: &[u8], _: &SshOptions, _: &[SignOption]) -> Result<Vec<u8>, ApiError> {
        Err(ApiError::from_cause(
            "authority.SignSSH",
            CaError::NotImplemented("ssh certificate signing"),
        ))
    }

    fn revoke(&self, opts: &RevokeOptions) -> Result<(), ApiError> {
        const OP: &str = "authority.Revoke";

        let provisioner_id = match (&opts.token, &opts.certificate) {
            (Some(token), _) => {
                let provisioner = self.load_provisioner_by_token(token)?;
                authorize_token(
                    provisioner.as_ref(),
                    self.store.as_ref(),
                    token,
                    AuthorizeMethod::Revoke,
                )?;
                provisioner.id().to_string()
            }
            (None, Some(cert)) => {
                if cert.serial() != opts.serial {
                    return Err(ApiError::unauthorized(
                        OP,
                        CaError::Unauthorized(
                            "serial number does not match the peer certificate".to_string(),
                        ),
                    ));
                }
                self.load_provisioner_by_certificate(cert)?.id().to_string()
            }
            (None, None) => {
                return Err(ApiError::unauthorized(
                    OP,
                    CaError::Unauthorized("revoke requires a token or a certificate".to_string()),
                ))
            }
        };

        let info = RevokedCertificateInfo {
            serial: opts.serial.clone(),
            provisioner_id,
            reason: opts.reason.clone(),
            reason_code: opts.reason_code,
            revoked_at: Utc::now(),
        };
        match self.store.revoke(info) {
            Ok(()) => {
                info!(serial = %opts.serial, reason = %opts.reason, "certificate revoked");
                Ok(())
            }
            Err(StoreError::NotImplemented(what)) => {
                Err(ApiError::from_cause(OP, CaError::NotImplemented(what)))
            }
            Err(e @ StoreError::AlreadyRevoked(_)) => {
                Err(ApiError::bad_request(OP, CaError::Storage(e)))
            }
            Err(e) => Err(ApiError::internal(OP, CaError::Storage(e))),
        }
    }

    fn get_provisioners(
        &self,
        cursor: &str,
        limit: usize,
    ) -> Result<(Vec<ProvisionerRef>, String), ApiError> {
        let limit = match limit {
            0 => DEFAULT_PROVISIONER_LIMIT,
            n => n.min(MAX_PROVISIONER_LIMIT),
        };
        let start = self.provisioners.partition_point(|p| p.id() < cursor);
        let end = (start + limit).min(self.provisioners.len());

        let page = self.provisioners[start..end].to_vec();
        let next = self
            .provisioners
            .get(end)
            .map(|p| p.id().to_string())
            .unwrap_or_default();
        Ok((page, next))
    }

    fn load_provisioner_by_id(&self, id: &str) -> Result<ProvisionerRef, ApiError> {
        self.provisioners
            .binary_search_by(|p| p.id().cmp(id))
            .map(|i| Arc::clone(&self.provisioners[i]))
            .map_err(|_| {
                ApiError::from_cause(
                    "authority.LoadProvisionerByID",
                    CaError::ProvisionerNotFound(id.to_string()),
                )
            })
    }

    fn load_provisioner_by_certificate(
        &self,
        cert: &Certificate,
    ) -> Result<ProvisionerRef, ApiError> {
        const OP: &str = "authority.LoadProvisionerByCertificate";

        let ext = cert.extensions_with(&oid::STEP_PROVISIONER).next().ok_or_else(|| {
            ApiError::from_cause(
                OP,
                CaError::ProvisionerNotFound(format!(
                    "certificate {} has no provisioner extension",
                    cert.serial()
                )),
            )
        })?;
        let descriptor = ProvisionerDescriptor::from_der(&ext.value).map_err(|e| {
            ApiError::bad_request(
                OP,
                CaError::CertificateParse {
                    what: "provisioner extension of",
                    reason: e.to_string(),
                },
            )
        })?;
        self.load_provisioner_by_id(&descriptor.provisioner_id())
    }

    fn load_provisioner_by_token(&self, token: &str) -> Result<ProvisionerRef, ApiError> {
        self.provisioners
            .iter()
            .find(|p| p.token_id(token).is_ok())
            .cloned()
            .ok_or_else(|| {
                ApiError::unauthorized(
                    "authority.Authorize",
                    CaError::Unauthorized("no provisioner accepts the token".to_string()),
                )
            })
    }

    fn root(&self, sha256: &str) -> Result<Certificate, ApiError> {
        let wanted = sha256.to_lowercase();
        self.roots
            .iter()
            .find(|root| root.fingerprint() == wanted)
            .cloned()
            .ok_or_else(|| {
                ApiError::from_cause(
                    "authority.Root",
                    CaError::CertificateNotFound(format!("root with fingerprint {}", sha256)),
                )
            })
    }

    fn get_roots(&self) -> Result<Vec<Certificate>, ApiError> {
        Ok(self.roots.clone())
    }

    fn get_federation(&self) -> Result<Vec<Certificate>, ApiError> {
        Ok(self
            .roots
            .iter()
            .chain(self.federated_roots.iter())
            .cloned()
            .collect())
    }

    fn get_tls_certificate(&self) -> Result<TlsCertificate, ApiError> {
        const OP: &str = "authority.GetTLSCertificate";

        let key_pair = KeyPair::generate()
            .map_err(|e| ApiError::internal(OP, CaError::Signing(e.to_string())))?;
        let params = tls_params(
            &self.dns_names,
            self.claims.default_duration(),
            self.claims.backdate(),
        )
        .map_err(|e| ApiError::internal(OP, e))?;
        let cert = params
            .signed_by(&key_pair, self.identity.issuer(), self.identity.key_pair())
            .map_err(|e| ApiError::internal(OP, CaError::Signing(e.to_string())))?;
        let leaf = Certificate::parse(cert.der(), "tls").map_err(|e| ApiError::internal(OP, e))?;

        Ok(TlsCertificate {
            chain: vec![leaf, self.identity.certificate().clone()],
            private_key_pem: key_pair.serialize_pem(),
        })
    }

    fn get_encrypted_key(&self, kid: &str) -> Result<String, ApiError> {
        self.provisioners
            .iter()
            .filter_map(|p| p.encrypted_key())
            .find(|(key_id, _)| key_id == kid)
            .map(|(_, key)| key)
            .ok_or_else(|| {
                ApiError::from_cause(
                    "authority.GetEncryptedKey",
                    CaError::ProvisionerNotFound(format!("encrypted key with kid {}", kid)),
                )
            })
    }

    fn get_database(&self) -> Arc<dyn CertificateStore> {
        Arc::clone(&self.store)
    }

    fn intermediate_identity(&self) -> Arc<IntermediateIdentity> {
        Arc::clone(&self.identity)
    }

    fn claims(&self) -> &Claims {
        &self.claims
    }

    fn shutdown(&self) -> Result<(), ApiError> {
        self.store
            .shutdown()
            .map_err(|e| ApiError::internal("authority.Shutdown", CaError::Storage(e)))
    }
}

impl fmt::Debug for BaseAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseAuthority")
            .field("identity", &self.identity)
            .field("roots", &self.roots.len())
            .field("provisioners", &self.provisioners)
            .field("claims", &self.claims)
            .finish_non_exhaustive()
    }
}

fn read_bundles(
    paths: &[impl AsRef<Path>],
    what: &'static str,
) -> Result<Vec<Certificate>, CaError> {
    let mut certs = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CaError::CertificateParse {
            what,
            reason: format!("{}: {}", path.display(), e),
        })?;
        certs.extend(Certificate::bundle_from_pem(&text, what)?);
    }
    Ok(certs)
}

fn tls_params(
    dns_names: &[String],
    duration: Duration,
    backdate: Duration,
) -> Result<CertificateParams, CaError> {
    let common_name = dns_names
        .first()
        .ok_or_else(|| CaError::ProfileBuild("no dnsNames configured".to_string()))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name.clone());
    params.distinguished_name = dn;

    for name in dns_names {
        let entry = match name.parse() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(
                Ia5String::try_from(name.as_str())
                    .map_err(|e| CaError::ProfileBuild(e.to_string()))?,
            ),
        };
        params.subject_alt_names.push(entry);
    }

    params.is_ca = IsCa::NoCa;
    params.use_authority_key_identifier_extension = true;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];

    let not_before = Utc::now() - backdate;
    let not_after = not_before + duration;
    params.not_before = OffsetDateTime::from_unix_timestamp(not_before.timestamp())
        .map_err(|e| CaError::ProfileBuild(e.to_string()))?;
    params.not_after = OffsetDateTime::from_unix_timestamp(not_after.timestamp())
        .map_err(|e| CaError::ProfileBuild(e.to_string()))?;

    Ok(params)
}
