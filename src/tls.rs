//! TLS security profile resolution
//!
//! The profile is declared on the NetworkAddonsConfig as a `type` string plus
//! an optional custom body. It is parsed into [`TlsProfile`] and resolved into
//! a minimum protocol version and cipher list that the metrics proxies receive
//! as command-line flags. Profiles use the OpenSSL cipher names of the
//! Mozilla server-side TLS guidelines. The proxies are Go programs and only
//! accept IANA names, so the flag value is translated through
//! [`OPENSSL_TO_IANA`].

use crate::crd::TlsSecurityProfile;
use crate::{Error, Result};

const FIELD: &str = "tlsSecurityProfile";

/// TLS protocol versions accepted in profiles
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Highest minimum version operands currently accept
    pub const MAX_SUPPORTED_MINIMUM: TlsVersion = TlsVersion::Tls12;

    /// Name as used by the Kubernetes ecosystem, e.g. `VersionTLS12`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tls10 => "VersionTLS10",
            Self::Tls11 => "VersionTLS11",
            Self::Tls12 => "VersionTLS12",
            Self::Tls13 => "VersionTLS13",
        }
    }
}

impl std::str::FromStr for TlsVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "VersionTLS10" | "TLSv1.0" => Ok(Self::Tls10),
            "VersionTLS11" | "TLSv1.1" => Ok(Self::Tls11),
            "VersionTLS12" | "TLSv1.2" => Ok(Self::Tls12),
            "VersionTLS13" | "TLSv1.3" => Ok(Self::Tls13),
            other => Err(Error::configuration(
                format!("{FIELD}.custom.minTLSVersion"),
                format!(
                    "unknown TLS version {other:?}, expected one of VersionTLS10, VersionTLS11, VersionTLS12, VersionTLS13"
                ),
            )),
        }
    }
}

impl std::fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predefined profile tiers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsTier {
    /// Backward compatible with very old clients
    Old,
    /// Recommended general-purpose profile
    Intermediate,
    /// TLS 1.3 only
    Modern,
}

const TLS13_CIPHERS: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
];

const INTERMEDIATE_CIPHERS: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "DHE-RSA-AES128-GCM-SHA256",
    "DHE-RSA-AES256-GCM-SHA384",
];

const OLD_CIPHERS: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "DHE-RSA-AES128-GCM-SHA256",
    "DHE-RSA-AES256-GCM-SHA384",
    "DHE-RSA-CHACHA20-POLY1305",
    "ECDHE-ECDSA-AES128-SHA256",
    "ECDHE-RSA-AES128-SHA256",
    "ECDHE-ECDSA-AES128-SHA",
    "ECDHE-RSA-AES128-SHA",
    "ECDHE-ECDSA-AES256-SHA384",
    "ECDHE-RSA-AES256-SHA384",
    "ECDHE-ECDSA-AES256-SHA",
    "ECDHE-RSA-AES256-SHA",
    "DHE-RSA-AES128-SHA256",
    "DHE-RSA-AES256-SHA256",
    "AES128-GCM-SHA256",
    "AES256-GCM-SHA384",
    "AES128-SHA256",
    "AES256-SHA256",
    "AES128-SHA",
    "AES256-SHA",
    "DES-CBC3-SHA",
];

/// OpenSSL cipher names and the IANA names Go's crypto/tls knows them by
///
/// Ciphers without an entry (TLS 1.3 suites, DHE, CBC-SHA384) cannot be
/// configured in Go and are dropped from the proxy flags.
pub const OPENSSL_TO_IANA: &[(&str, &str)] = &[
    ("ECDHE-ECDSA-AES128-GCM-SHA256", "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"),
    ("ECDHE-RSA-AES128-GCM-SHA256", "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"),
    ("ECDHE-ECDSA-AES256-GCM-SHA384", "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384"),
    ("ECDHE-RSA-AES256-GCM-SHA384", "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384"),
    ("ECDHE-ECDSA-CHACHA20-POLY1305", "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256"),
    ("ECDHE-RSA-CHACHA20-POLY1305", "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256"),
    ("ECDHE-ECDSA-AES128-SHA256", "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256"),
    ("ECDHE-RSA-AES128-SHA256", "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256"),
    ("ECDHE-ECDSA-AES128-SHA", "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA"),
    ("ECDHE-RSA-AES128-SHA", "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA"),
    ("ECDHE-ECDSA-AES256-SHA", "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA"),
    ("ECDHE-RSA-AES256-SHA", "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA"),
    ("AES128-GCM-SHA256", "TLS_RSA_WITH_AES_128_GCM_SHA256"),
    ("AES256-GCM-SHA384", "TLS_RSA_WITH_AES_256_GCM_SHA384"),
    ("AES128-SHA256", "TLS_RSA_WITH_AES_128_CBC_SHA256"),
    ("AES128-SHA", "TLS_RSA_WITH_AES_128_CBC_SHA"),
    ("AES256-SHA", "TLS_RSA_WITH_AES_256_CBC_SHA"),
    ("DES-CBC3-SHA", "TLS_RSA_WITH_3DES_EDE_CBC_SHA"),
];

/// IANA name of a cipher given by either name, `None` if Go cannot use it
pub fn iana_cipher(name: &str) -> Option<&'static str> {
    OPENSSL_TO_IANA
        .iter()
        .find(|(openssl, iana)| *openssl == name || *iana == name)
        .map(|(_, iana)| *iana)
}

impl TlsTier {
    /// Hard-coded minimum version and ciphers for the tier
    pub fn spec(&self) -> ResolvedTlsProfile {
        let (min_version, ciphers) = match self {
            Self::Old => (TlsVersion::Tls10, OLD_CIPHERS),
            Self::Intermediate => (TlsVersion::Tls12, INTERMEDIATE_CIPHERS),
            Self::Modern => (TlsVersion::Tls13, TLS13_CIPHERS),
        };
        ResolvedTlsProfile {
            min_version,
            ciphers: ciphers.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Parsed profile selection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TlsProfile {
    /// One of the predefined tiers
    Tier(TlsTier),
    /// User-supplied minimum version and ciphers
    Custom {
        /// Minimum protocol version
        min_version: TlsVersion,
        /// Cipher list in preference order
        ciphers: Vec<String>,
    },
}

/// Tier used when the config has no profile
pub const DEFAULT_TIER: TlsTier = TlsTier::Intermediate;

/// Minimum version and ciphers handed to TLS-terminating operands
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTlsProfile {
    /// Minimum protocol version
    pub min_version: TlsVersion,
    /// Cipher list in preference order
    pub ciphers: Vec<String>,
}

impl Default for ResolvedTlsProfile {
    fn default() -> Self {
        DEFAULT_TIER.spec()
    }
}

impl ResolvedTlsProfile {
    /// Configurable ciphers in IANA naming, preference order kept
    pub fn iana_ciphers(&self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = Vec::new();
        for iana in self.ciphers.iter().filter_map(|c| iana_cipher(c)) {
            if !out.contains(&iana) {
                out.push(iana);
            }
        }
        out
    }

    /// Flags for kube-rbac-proxy
    ///
    /// The cipher flag is left out when nothing translates, which leaves the
    /// proxy on Go's defaults for the negotiated version.
    pub fn proxy_args(&self) -> Vec<String> {
        let mut args = vec![format!("--tls-min-version={}", self.min_version)];
        let ciphers = self.iana_ciphers();
        if !ciphers.is_empty() {
            args.push(format!("--tls-cipher-suites={}", ciphers.join(",")));
        }
        args
    }
}

impl TlsProfile {
    /// Parse the CRD shape into a selection. `None` means "use the default tier".
    pub fn parse(declared: Option<&TlsSecurityProfile>) -> Result<Option<Self>> {
        let Some(declared) = declared else {
            return Ok(None);
        };
        let Some(type_) = declared.type_.as_deref() else {
            return Ok(None);
        };
        match type_ {
            "Old" => Ok(Some(Self::Tier(TlsTier::Old))),
            "Intermediate" => Ok(Some(Self::Tier(TlsTier::Intermediate))),
            "Modern" => Ok(Some(Self::Tier(TlsTier::Modern))),
            "Custom" => {
                let custom = declared.custom.as_ref().ok_or_else(|| {
                    Error::configuration(
                        format!("{FIELD}.custom"),
                        "type Custom requires a custom profile body",
                    )
                })?;
                Ok(Some(Self::Custom {
                    min_version: custom.min_tls_version.parse()?,
                    ciphers: custom.ciphers.clone(),
                }))
            }
            other => Err(Error::configuration(
                format!("{FIELD}.type"),
                format!("unknown profile type {other:?}, expected Old, Intermediate, Modern or Custom"),
            )),
        }
    }
}

/// Resolve a selection into concrete settings
///
/// `Modern` and custom minimums above TLS 1.2 are rejected because the
/// operands cannot yet be configured with them. They are never downgraded.
pub fn resolve(selection: Option<&TlsProfile>) -> Result<ResolvedTlsProfile> {
    let resolved = match selection {
        None => DEFAULT_TIER.spec(),
        Some(TlsProfile::Tier(TlsTier::Modern)) => {
            return Err(Error::configuration(
                format!("{FIELD}.type"),
                "the Modern profile is not supported by the operands",
            ))
        }
        Some(TlsProfile::Tier(tier)) => tier.spec(),
        Some(TlsProfile::Custom {
            min_version,
            ciphers,
        }) => {
            if *min_version > TlsVersion::MAX_SUPPORTED_MINIMUM {
                return Err(Error::configuration(
                    format!("{FIELD}.custom.minTLSVersion"),
                    format!(
                        "{min_version} is above the highest supported minimum {}",
                        TlsVersion::MAX_SUPPORTED_MINIMUM
                    ),
                ));
            }
            if ciphers.is_empty() {
                return Err(Error::configuration(
                    format!("{FIELD}.custom.ciphers"),
                    "custom profile must list at least one cipher",
                ));
            }
            ResolvedTlsProfile {
                min_version: *min_version,
                ciphers: ciphers.clone(),
            }
        }
    };
    Ok(resolved)
}

/// Parse and resolve in one step
pub fn resolve_declared(declared: Option<&TlsSecurityProfile>) -> Result<ResolvedTlsProfile> {
    let selection = TlsProfile::parse(declared)?;
    resolve(selection.as_ref())
}
