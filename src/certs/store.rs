//! Secret-backed storage for certificate material
//!
//! Each identity lives in one Secret. The current certificate and key use the
//! conventional `tls.crt`/`tls.key` keys so operand pods can mount the Secret
//! directly; `ca-bundle.crt` carries every CA currently trusted. Rotation
//! bookkeeping is kept in annotations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::Client;
use tracing::debug;
use zeroize::Zeroizing;

#[cfg(test)]
use mockall::automock;

use super::{Credential, StoredIdentity};
use crate::{Error, Result, MANAGED_BY_CERTIFICATES, MANAGED_BY_LABEL, OPERATOR_NAME};

/// Data key of the current certificate
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Data key of the current private key
pub const TLS_KEY_KEY: &str = "tls.key";
/// Data key of the trusted CA bundle
pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";
/// Data key of the superseded certificate still in its overlap window
pub const PREVIOUS_CERT_KEY: &str = "previous.crt";

const ANNOTATION_PREFIX: &str = "certificates.networkaddonsoperator.network.kubevirt.io";

fn annotation(name: &str) -> String {
    format!("{ANNOTATION_PREFIX}/{name}")
}

/// Persistence for certificate material, one entry per identity
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertStore: Send + Sync {
    /// Load an identity, `None` when it was never issued
    async fn load(&self, name: &str) -> Result<Option<StoredIdentity>>;

    /// Persist an identity together with the CA bundle its consumers trust
    async fn save(&self, name: &str, identity: &StoredIdentity, ca_bundle: &str) -> Result<()>;

    /// Names of every stored identity
    async fn list(&self) -> Result<Vec<String>>;

    /// Remove an identity. Removing a missing identity succeeds.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// [`CertStore`] keeping each identity in a Secret of the operand namespace
pub struct SecretCertStore {
    client: Client,
    namespace: String,
}

impl SecretCertStore {
    /// Create a store writing into `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl CertStore for SecretCertStore {
    async fn load(&self, name: &str) -> Result<Option<StoredIdentity>> {
        match self.api().get_opt(name).await? {
            Some(secret) => identity_from_secret(&secret).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, name: &str, identity: &StoredIdentity, ca_bundle: &str) -> Result<()> {
        let secret = identity_to_secret(name, &self.namespace, identity, ca_bundle);
        self.api()
            .patch(
                name,
                &PatchParams::apply(OPERATOR_NAME).force(),
                &Patch::Apply(&secret),
            )
            .await?;
        debug!(secret = %name, namespace = %self.namespace, "stored certificate material");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let params =
            ListParams::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGED_BY_CERTIFICATES}"));
        let secrets = self.api().list(&params).await?;
        Ok(secrets
            .items
            .into_iter()
            .filter_map(|s| s.metadata.name)
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.api().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Render an identity as a Secret
pub fn identity_to_secret(
    name: &str,
    namespace: &str,
    identity: &StoredIdentity,
    ca_bundle: &str,
) -> Secret {
    let mut data = BTreeMap::from([
        (
            TLS_CERT_KEY.to_string(),
            ByteString(identity.current.cert_pem.as_bytes().to_vec()),
        ),
        (
            TLS_KEY_KEY.to_string(),
            ByteString(identity.key_pem.as_bytes().to_vec()),
        ),
        (
            CA_BUNDLE_KEY.to_string(),
            ByteString(ca_bundle.as_bytes().to_vec()),
        ),
    ]);

    let mut annotations = BTreeMap::from([
        (annotation("issued-at"), identity.current.issued_at.to_rfc3339()),
        (annotation("rotate-at"), identity.current.rotate_at.to_rfc3339()),
        (annotation("trust-until"), identity.current.trust_until.to_rfc3339()),
    ]);
    if let Some(signer) = identity.current.signer {
        annotations.insert(annotation("signer"), signer.to_rfc3339());
    }

    if let Some(previous) = &identity.previous {
        data.insert(
            PREVIOUS_CERT_KEY.to_string(),
            ByteString(previous.cert_pem.as_bytes().to_vec()),
        );
        annotations.insert(
            annotation("previous-issued-at"),
            previous.issued_at.to_rfc3339(),
        );
        annotations.insert(
            annotation("previous-trust-until"),
            previous.trust_until.to_rfc3339(),
        );
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY_CERTIFICATES.to_string(),
            )])),
            annotations: Some(annotations),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Read an identity back from its Secret
pub fn identity_from_secret(secret: &Secret) -> Result<StoredIdentity> {
    let name = secret.metadata.name.as_deref().unwrap_or_default();
    let data = secret
        .data
        .as_ref()
        .ok_or_else(|| Error::serialization(format!("secret {name} has no data")))?;
    let annotations = secret.metadata.annotations.clone().unwrap_or_default();

    let text = |key: &str| -> Result<Option<String>> {
        data.get(key)
            .map(|b| {
                String::from_utf8(b.0.clone())
                    .map_err(|e| Error::serialization(format!("secret {name} key {key}: {e}")))
            })
            .transpose()
    };
    let time = |key: &str| -> Result<Option<DateTime<Utc>>> {
        annotations
            .get(&annotation(key))
            .map(|v| {
                DateTime::parse_from_rfc3339(v)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| Error::serialization(format!("secret {name} annotation {key}: {e}")))
            })
            .transpose()
    };
    let required = |key: &str, value: Option<DateTime<Utc>>| {
        value.ok_or_else(|| Error::serialization(format!("secret {name} missing annotation {key}")))
    };

    let cert_pem = text(TLS_CERT_KEY)?
        .ok_or_else(|| Error::serialization(format!("secret {name} missing {TLS_CERT_KEY}")))?;
    let key_pem = text(TLS_KEY_KEY)?
        .ok_or_else(|| Error::serialization(format!("secret {name} missing {TLS_KEY_KEY}")))?;

    let current = Credential {
        cert_pem,
        issued_at: required("issued-at", time("issued-at")?)?,
        rotate_at: required("rotate-at", time("rotate-at")?)?,
        trust_until: required("trust-until", time("trust-until")?)?,
        signer: time("signer")?,
    };

    let previous = match text(PREVIOUS_CERT_KEY)? {
        Some(cert_pem) => {
            let trust_until = required("previous-trust-until", time("previous-trust-until")?)?;
            let issued_at = time("previous-issued-at")?.unwrap_or(trust_until);
            Some(Credential {
                cert_pem,
                issued_at,
                rotate_at: trust_until,
                trust_until,
                signer: None,
            })
        }
        None => None,
    };

    Ok(StoredIdentity {
        current,
        key_pem: Zeroizing::new(key_pem),
        previous,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn identity(with_previous: bool) -> StoredIdentity {
        let t0 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        StoredIdentity {
            current: Credential {
                cert_pem: "CURRENT".to_string(),
                issued_at: t0,
                rotate_at: t0 + Duration::hours(12),
                trust_until: t0 + Duration::hours(13),
                signer: Some(t0 - Duration::hours(1)),
            },
            key_pem: Zeroizing::new("KEY".to_string()),
            previous: with_previous.then(|| Credential {
                cert_pem: "PREVIOUS".to_string(),
                issued_at: t0 - Duration::hours(12),
                rotate_at: t0,
                trust_until: t0 + Duration::hours(1),
                signer: None,
            }),
        }
    }

    #[test]
    fn test_secret_carries_tls_keys_and_label() {
        let secret = identity_to_secret("kubemacpool-service", "ns", &identity(false), "BUNDLE");
        let data = secret.data.as_ref().unwrap();
        assert_eq!(data[TLS_CERT_KEY].0, b"CURRENT");
        assert_eq!(data[TLS_KEY_KEY].0, b"KEY");
        assert_eq!(data[CA_BUNDLE_KEY].0, b"BUNDLE");
        assert!(!data.contains_key(PREVIOUS_CERT_KEY));
        assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/tls"));
        assert_eq!(
            secret.metadata.labels.as_ref().unwrap()[MANAGED_BY_LABEL],
            MANAGED_BY_CERTIFICATES
        );
    }

    #[test]
    fn test_identity_survives_secret_storage() {
        let original = identity(true);
        let secret = identity_to_secret("svc", "ns", &original, "BUNDLE");
        let loaded = identity_from_secret(&secret).unwrap();
        assert_eq!(loaded.current, original.current);
        assert_eq!(*loaded.key_pem, *original.key_pem);
        let previous = loaded.previous.unwrap();
        assert_eq!(previous.cert_pem, "PREVIOUS");
        assert_eq!(previous.trust_until, original.previous.unwrap().trust_until);
    }

    #[test]
    fn test_secret_missing_bookkeeping_is_rejected() {
        let mut secret = identity_to_secret("svc", "ns", &identity(false), "BUNDLE");
        secret.metadata.annotations = None;
        assert!(identity_from_secret(&secret).is_err());
    }
}
