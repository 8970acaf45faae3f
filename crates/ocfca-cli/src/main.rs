//! OCF CA CLI - Command line interface for the OCF identity authority.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ocfca_authority::classifier::has_reserved_prefix;
use ocfca_authority::provisioner::generate_token;
use ocfca_authority::{
    Authority, Certificate, CertificateRequest, Config, IssuedCertificate, OcfAuthority,
    Provisioner, RevokeOptions, SignOptions,
};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// OCF CA - device identity certificate authority
#[derive(Parser)]
#[command(name = "ocfca")]
#[command(about = "CLI for the OCF identity authority", long_about = None)]
struct Cli {
    /// Authority configuration file
    #[arg(short, long, default_value = "config/ca.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a certificate request
    Sign {
        /// One-time provisioning token
        #[arg(short, long)]
        token: String,

        /// Certificate request (PEM)
        csr: PathBuf,

        /// Write the chain here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Requested validity in hours
        #[arg(long)]
        hours: Option<i64>,
    },

    /// Renew a certificate issued by this authority
    Renew {
        /// Certificate to renew (PEM)
        cert: PathBuf,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Revoke a certificate
    Revoke {
        /// Hex serial number
        serial: String,

        #[arg(short, long)]
        token: String,

        #[arg(long, default_value = "")]
        reason: String,

        #[arg(long, default_value = "0")]
        reason_code: i32,
    },

    /// List provisioners
    Provisioners {
        /// Provisioner id to start from
        #[arg(long, default_value = "")]
        cursor: String,

        #[arg(long, default_value = "0")]
        limit: usize,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// List root certificates
    Roots {
        /// Include federated roots
        #[arg(long)]
        federation: bool,
    },

    /// Generate a provisioning token and its hash
    Token {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a common name against the device identity format
    CheckIdentity {
        common_name: String,
    },
}

fn main() -> CliResult {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ocfca=info,ocfca_authority=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Token { json } => token(json),
        Commands::CheckIdentity { common_name } => check_identity(&common_name),
        command => {
            let config = Config::load(&cli.config)?;
            let authority = OcfAuthority::new(&config)?;
            debug!(config = %cli.config.display(), "authority loaded");

            let result = run(&authority, &config, command);
            authority.shutdown()?;
            result
        }
    }
}

fn run(authority: &OcfAuthority, config: &Config, command: Commands) -> CliResult {
    match command {
        Commands::Sign {
            token,
            csr,
            out,
            hours,
        } => sign(authority, &token, &csr, out.as_deref(), hours),
        Commands::Renew { cert, out } => renew(authority, &cert, out.as_deref()),
        Commands::Revoke {
            serial,
            token,
            reason,
            reason_code,
        } => {
            authority.revoke(&RevokeOptions {
                serial: serial.clone(),
                reason,
                reason_code,
                token: Some(token),
                certificate: None,
            })?;
            println!("Revoked {}", serial);
            Ok(())
        }
        Commands::Provisioners {
            cursor,
            limit,
            json,
        } => provisioners(authority, &config.ocf.prefix, &cursor, limit, json),
        Commands::Roots { federation } => roots(authority, federation),
        Commands::Token { json } => token(json),
        Commands::CheckIdentity { common_name } => check_identity(&common_name),
    }
}

fn sign(
    authority: &OcfAuthority,
    token: &str,
    csr_path: &Path,
    out: Option<&Path>,
    hours: Option<i64>,
) -> CliResult {
    let csr = CertificateRequest::from_pem(&std::fs::read_to_string(csr_path)?)?;
    let options = authority.authorize_sign(token)?;

    let opts = match hours {
        Some(hours) => {
            let not_before = chrono::Utc::now();
            let not_after = chrono::Duration::try_hours(hours)
                .and_then(|d| not_before.checked_add_signed(d))
                .ok_or_else(|| format!("validity of {} hours is out of range", hours))?;
            SignOptions::default().with_validity(not_before, not_after)
        }
        None => SignOptions::default(),
    };

    let issued = authority.sign(&csr, &opts, &options)?;
    info!(serial = %issued.leaf.serial(), "certificate issued");
    write_chain(&issued, out)
}

fn renew(authority: &OcfAuthority, cert_path: &Path, out: Option<&Path>) -> CliResult {
    let peer = Certificate::from_pem(&std::fs::read_to_string(cert_path)?, "peer")?;
    let issued = authority.renew(&peer)?;
    write_chain(&issued, out)
}

fn write_chain(issued: &IssuedCertificate, out: Option<&Path>) -> CliResult {
    let chain = issued.chain_pem();
    match out {
        Some(path) => {
            std::fs::write(path, chain)?;
            println!("Certificate written to {}", path.display());
            print_certificate(&issued.leaf);
        }
        None => print!("{}", chain),
    }
    Ok(())
}

fn provisioners(
    authority: &OcfAuthority,
    prefix: &str,
    cursor: &str,
    limit: usize,
    json: bool,
) -> CliResult {
    let (page, next) = authority.get_provisioners(cursor, limit)?;

    if json {
        let items: Vec<serde_json::Value> = page
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id(),
                    "type": p.provisioner_type().to_string(),
                    "name": p.name(),
                    "ocf": has_reserved_prefix(p.name(), prefix),
                })
            })
            .collect();
        let body = serde_json::json!({ "provisioners": items, "nextCursor": next });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("Provisioners ({}):", page.len());
    println!("{:<32}  {:<8}  {:<24}  {}", "ID", "TYPE", "NAME", "OCF");
    println!("{}", "-".repeat(72));
    for p in &page {
        let ocf = if has_reserved_prefix(p.name(), prefix) { "yes" } else { "no" };
        println!(
            "{:<32}  {:<8}  {:<24}  {}",
            p.id(),
            p.provisioner_type(),
            p.name(),
            ocf
        );
    }
    if !next.is_empty() {
        println!("Next cursor: {}", next);
    }

    Ok(())
}

fn roots(authority: &OcfAuthority, federation: bool) -> CliResult {
    let certs = if federation {
        authority.get_federation()?
    } else {
        authority.get_roots()?
    };

    println!("Roots ({}):", certs.len());
    for cert in &certs {
        print_certificate(cert);
    }
    Ok(())
}

fn token(json: bool) -> CliResult {
    let (plaintext, hash) = generate_token();
    if json {
        let body = serde_json::json!({ "token": plaintext, "tokenHash": hash });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("Token:      {}", plaintext);
        println!("Token hash: {}", hash);
        println!();
        println!("Add the hash to a provisioner's tokenHashes. The token is not stored.");
    }
    Ok(())
}

fn check_identity(common_name: &str) -> CliResult {
    let identity = ocfca_core::validate(common_name)?;
    println!("Device ID: {}", identity.device_id());
    Ok(())
}

fn print_certificate(cert: &Certificate) {
    println!("  Subject:     {}", cert.common_name());
    println!("  Serial:      {}", cert.serial());
    println!("  SHA-256:     {}", cert.fingerprint());
    println!("  Not before:  {}", format_timestamp(cert.not_before()));
    println!("  Not after:   {}", format_timestamp(cert.not_after()));
}

fn format_timestamp(dt: chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}
