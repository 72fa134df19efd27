//! PKI operations for operand TLS
//!
//! The operator runs a self-signed CA that signs serving certificates for
//! TLS-terminating operand services (the KubeMacPool webhook and the metrics
//! proxies). Validity bounds are always supplied by the caller so the rotation
//! engine fully controls certificate lifetimes.
//!
//! # Security Model
//!
//! - Keys are ECDSA P-256 generated locally and never leave the cluster
//! - Private key PEMs are held in [`Zeroizing`] buffers
//! - Leaf certificates carry only the ServerAuth extended key usage

use chrono::{DateTime, Utc};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;
use x509_parser::prelude::*;
use zeroize::Zeroizing;

/// Organization written into every certificate subject
pub const ORGANIZATION: &str = "cluster-network-addons";

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Certificate or key parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),

    /// Validity bounds are empty or not representable
    #[error("invalid validity window: {0}")]
    InvalidValidity(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes of the first block
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Split a PEM bundle into its individual certificate blocks
pub fn split_bundle(bundle: &str) -> Result<Vec<String>> {
    let blocks = ::pem::parse_many(bundle.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM bundle: {}", e)))?;
    Ok(blocks.iter().map(::pem::encode).collect())
}

/// Validity and subject of a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
}

impl CertificateInfo {
    /// Read validity and subject from a PEM certificate
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
        })
    }

    /// Whether `now` falls inside the validity window
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let now = now.timestamp();
        self.not_before <= now && now <= self.not_after
    }
}

/// Validity window for a certificate about to be issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    /// First instant the certificate is valid
    pub not_before: DateTime<Utc>,
    /// Last instant the certificate is valid
    pub not_after: DateTime<Utc>,
}

impl Validity {
    fn apply(&self, params: &mut CertificateParams) -> Result<()> {
        if self.not_after <= self.not_before {
            return Err(PkiError::InvalidValidity(format!(
                "not_after {} is not after not_before {}",
                self.not_after, self.not_before
            )));
        }
        params.not_before = to_offset(self.not_before)?;
        params.not_after = to_offset(self.not_after)?;
        Ok(())
    }
}

fn to_offset(instant: DateTime<Utc>) -> Result<::time::OffsetDateTime> {
    ::time::OffsetDateTime::from_unix_timestamp(instant.timestamp())
        .map_err(|e| PkiError::InvalidValidity(e.to_string()))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

/// A signed certificate and its private key
#[derive(Clone)]
pub struct KeyedCertificate {
    /// PEM-encoded certificate
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key
    pub key_pem: Zeroizing<String>,
}

impl std::fmt::Debug for KeyedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedCertificate")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Self-signed certificate authority
#[derive(Clone)]
pub struct CertificateAuthority {
    ca_key_pem: Zeroizing<String>,
    ca_cert_pem: String,
}

impl CertificateAuthority {
    /// Create a new self-signed CA valid for `validity`
    pub fn new(common_name: &str, validity: Validity) -> Result<Self> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        validity.apply(&mut params)?;

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate CA key: {}", e))
        })?;

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {}", e))
        })?;

        Ok(Self {
            ca_key_pem: Zeroizing::new(key_pair.serialize_pem()),
            ca_cert_pem: cert.pem(),
        })
    }

    /// Load a CA from stored PEMs
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA key: {}", e)))?;
        parse_pem(cert_pem)?;

        Ok(Self {
            ca_key_pem: Zeroizing::new(key_pem.to_string()),
            ca_cert_pem: cert_pem.to_string(),
        })
    }

    /// PEM-encoded CA certificate
    pub fn cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// PEM-encoded CA private key
    pub fn key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    /// Validity and subject of the CA certificate
    pub fn cert_info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(&self.ca_cert_pem)
    }

    /// Issue a serving certificate for the given DNS names or IPs
    pub fn issue_server_cert(
        &self,
        common_name: &str,
        sans: &[String],
        validity: Validity,
    ) -> Result<KeyedCertificate> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        validity.apply(&mut params)?;

        params.subject_alt_names = sans
            .iter()
            .map(|san| {
                if let Ok(ip) = san.parse::<std::net::IpAddr>() {
                    Ok(SanType::IpAddress(ip))
                } else {
                    Ia5String::try_from(san.clone())
                        .map(SanType::DnsName)
                        .map_err(|e| {
                            PkiError::CertificateGenerationFailed(format!(
                                "invalid DNS name '{}': {}",
                                san, e
                            ))
                        })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let server_key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate server key: {}", e))
        })?;

        let ca_key = KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {}", e)))?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;

        let cert = params.signed_by(&server_key, &issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign server cert: {}", e))
        })?;

        Ok(KeyedCertificate {
            cert_pem: cert.pem(),
            key_pem: Zeroizing::new(server_key.serialize_pem()),
        })
    }
}
