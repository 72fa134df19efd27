//! Certificate rotation engine
//!
//! Keeps a self-signed CA and one serving certificate per TLS-terminating
//! operand service. Every identity moves through the same lifecycle:
//!
//! ```text
//! Fresh --(predecessor expires)--> Active --(rotate interval)--> Overlapping --(overlap)--> Expired
//! ```
//!
//! Rotation issues a new credential and keeps the superseded one trusted for
//! the overlap interval, so consumers that still present or verify against the
//! old credential keep working. A service certificate never outlives the CA
//! that signed it, and rotating the CA re-issues every service certificate on
//! the new CA.
//!
//! The engine runs on its own timer. Its only output is the stored material;
//! the controller picks up changes through its Secret watch.

mod store;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use zeroize::Zeroizing;

#[cfg(test)]
use mockall::automock;

pub use store::{
    identity_from_secret, identity_to_secret, CertStore, SecretCertStore, CA_BUNDLE_KEY,
    PREVIOUS_CERT_KEY, TLS_CERT_KEY, TLS_KEY_KEY,
};

#[cfg(test)]
pub use store::MockCertStore;

use crate::crd::SelfSignConfiguration;
use crate::duration::{format_duration, parse_duration};
use crate::pki::{self, CertificateAuthority, KeyedCertificate, Validity};
use crate::{Error, Result};

/// Name of the Secret holding the CA
pub const CA_SECRET_NAME: &str = "cluster-network-addons-ca";

/// Common name of the operator CA
pub const CA_COMMON_NAME: &str = "cluster-network-addons-ca";

/// How often the engine re-evaluates the schedule
pub const DEFAULT_TICK_INTERVAL: StdDuration = StdDuration::from_secs(60);

const FIELD: &str = "selfSignConfiguration";

// =============================================================================
// Schedule and plan
// =============================================================================

/// Rotate and overlap intervals for the CA and the service certificates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationSchedule {
    /// CA rotate interval
    pub ca_rotate: Duration,
    /// CA overlap interval
    pub ca_overlap: Duration,
    /// Service certificate rotate interval
    pub cert_rotate: Duration,
    /// Service certificate overlap interval
    pub cert_overlap: Duration,
}

impl Default for RotationSchedule {
    fn default() -> Self {
        Self {
            ca_rotate: Duration::hours(168),
            ca_overlap: Duration::hours(24),
            cert_rotate: Duration::hours(24),
            cert_overlap: Duration::hours(8),
        }
    }
}

impl RotationSchedule {
    /// Parse and validate the schedule declared on the config
    pub fn from_config(config: Option<&SelfSignConfiguration>) -> Result<Self> {
        let defaults = Self::default();
        let Some(config) = config else {
            return Ok(defaults);
        };

        let parse = |name: &str, raw: Option<&String>, default: Duration| -> Result<Duration> {
            let Some(raw) = raw else {
                return Ok(default);
            };
            let value = parse_duration(raw)
                .map_err(|message| Error::configuration(format!("{FIELD}.{name}"), message))?;
            if value <= Duration::zero() {
                return Err(Error::configuration(
                    format!("{FIELD}.{name}"),
                    format!("{raw:?} must be positive"),
                ));
            }
            Ok(value)
        };

        let schedule = Self {
            ca_rotate: parse("caRotateInterval", config.ca_rotate_interval.as_ref(), defaults.ca_rotate)?,
            ca_overlap: parse("caOverlapInterval", config.ca_overlap_interval.as_ref(), defaults.ca_overlap)?,
            cert_rotate: parse("certRotateInterval", config.cert_rotate_interval.as_ref(), defaults.cert_rotate)?,
            cert_overlap: parse("certOverlapInterval", config.cert_overlap_interval.as_ref(), defaults.cert_overlap)?,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    fn validate(&self) -> Result<()> {
        if self.ca_overlap > self.ca_rotate {
            return Err(Error::configuration(
                format!("{FIELD}.caOverlapInterval"),
                format!(
                    "{} exceeds caRotateInterval {}",
                    format_duration(self.ca_overlap),
                    format_duration(self.ca_rotate)
                ),
            ));
        }
        if self.cert_overlap > self.cert_rotate {
            return Err(Error::configuration(
                format!("{FIELD}.certOverlapInterval"),
                format!(
                    "{} exceeds certRotateInterval {}",
                    format_duration(self.cert_overlap),
                    format_duration(self.cert_rotate)
                ),
            ));
        }
        if self.cert_rotate > self.ca_rotate {
            return Err(Error::configuration(
                format!("{FIELD}.certRotateInterval"),
                format!(
                    "{} exceeds caRotateInterval {}",
                    format_duration(self.cert_rotate),
                    format_duration(self.ca_rotate)
                ),
            ));
        }
        Ok(())
    }
}

/// A TLS-serving operand service that needs a certificate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Service name, also the name of its Secret and the certificate CN
    pub name: String,
    /// DNS names the certificate is valid for
    pub sans: Vec<String>,
}

impl ServiceIdentity {
    /// Identity for a Service with the usual in-cluster DNS names
    pub fn for_service(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            sans: vec![
                name.to_string(),
                format!("{name}.{namespace}"),
                format!("{name}.{namespace}.svc"),
                format!("{name}.{namespace}.svc.cluster.local"),
            ],
        }
    }
}

/// What the engine should maintain, published by the controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotationPlan {
    /// Rotation schedule
    pub schedule: RotationSchedule,
    /// Services needing certificates
    pub services: Vec<ServiceIdentity>,
}

// =============================================================================
// Credentials and their lifecycle
// =============================================================================

/// Lifecycle state of a credential
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialState {
    /// Just issued, or its predecessor is still overlapping
    Fresh,
    /// The only trusted credential for its identity
    Active,
    /// Superseded but still trusted
    Overlapping,
    /// No longer trusted
    Expired,
}

/// One issued certificate with its rotation bookkeeping
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    /// PEM-encoded certificate
    pub cert_pem: String,
    /// Issuance time, also the certificate's notBefore
    pub issued_at: DateTime<Utc>,
    /// When a successor must be issued
    pub rotate_at: DateTime<Utc>,
    /// When the credential stops being trusted
    pub trust_until: DateTime<Utc>,
    /// For service certificates, the issuance time of the signing CA
    pub signer: Option<DateTime<Utc>>,
}

impl Credential {
    fn is_trusted_at(&self, now: DateTime<Utc>) -> bool {
        now < self.trust_until
    }
}

/// Current credential with its key, plus at most one trusted predecessor
#[derive(Clone, Debug)]
pub struct StoredIdentity {
    /// Credential in use
    pub current: Credential,
    /// Private key of the current credential
    pub key_pem: Zeroizing<String>,
    /// Superseded credential, kept until its overlap ends
    pub previous: Option<Credential>,
}

impl StoredIdentity {
    fn issued(cert: KeyedCertificate, validity: Validity, rotate_at: DateTime<Utc>, signer: Option<DateTime<Utc>>) -> Self {
        Self {
            current: Credential {
                cert_pem: cert.cert_pem,
                issued_at: validity.not_before,
                rotate_at,
                trust_until: validity.not_after,
                signer,
            },
            key_pem: cert.key_pem,
            previous: None,
        }
    }

    /// State of the current credential at `now`
    pub fn current_state(&self, now: DateTime<Utc>) -> CredentialState {
        if !self.current.is_trusted_at(now) {
            CredentialState::Expired
        } else if now == self.current.issued_at || self.previous_state(now) == Some(CredentialState::Overlapping) {
            CredentialState::Fresh
        } else {
            CredentialState::Active
        }
    }

    /// State of the predecessor at `now`, if there is one
    pub fn previous_state(&self, now: DateTime<Utc>) -> Option<CredentialState> {
        self.previous.as_ref().map(|p| {
            if p.is_trusted_at(now) {
                CredentialState::Overlapping
            } else {
                CredentialState::Expired
            }
        })
    }

    /// Certificates consumers must trust at `now`, newest first
    pub fn trusted_certs(&self, now: DateTime<Utc>) -> Vec<&str> {
        let mut certs = vec![self.current.cert_pem.as_str()];
        if let Some(previous) = self.previous.as_ref().filter(|p| p.is_trusted_at(now)) {
            certs.push(previous.cert_pem.as_str());
        }
        certs
    }

    /// PEM bundle of every trusted certificate
    pub fn trust_bundle(&self, now: DateTime<Utc>) -> String {
        self.trusted_certs(now).join("\n")
    }

    /// Replace the current credential, keeping it trusted until `overlap_end`
    fn supersede(&mut self, successor: StoredIdentity, overlap_end: DateTime<Utc>) {
        let mut outgoing = std::mem::replace(&mut self.current, successor.current);
        outgoing.trust_until = outgoing.trust_until.min(overlap_end);
        self.key_pem = successor.key_pem;
        self.previous = Some(outgoing);
    }

    /// Drop the predecessor once its overlap has ended. Returns true if dropped.
    fn prune(&mut self, now: DateTime<Utc>) -> bool {
        if self.previous_state(now) == Some(CredentialState::Expired) {
            self.previous = None;
            return true;
        }
        false
    }
}

// =============================================================================
// Issuance
// =============================================================================

/// Key and certificate generation, separated out so failures can be injected
#[cfg_attr(test, automock)]
pub trait CertIssuer: Send + Sync {
    /// Issue a self-signed CA
    fn issue_ca(&self, common_name: &str, validity: Validity) -> pki::Result<KeyedCertificate>;

    /// Issue a serving certificate signed by the given CA
    fn issue_server(
        &self,
        ca_cert_pem: &str,
        ca_key_pem: &str,
        common_name: &str,
        sans: &[String],
        validity: Validity,
    ) -> pki::Result<KeyedCertificate>;
}

/// [`CertIssuer`] backed by [`CertificateAuthority`]
#[derive(Clone, Copy, Debug, Default)]
pub struct RcgenIssuer;

impl CertIssuer for RcgenIssuer {
    fn issue_ca(&self, common_name: &str, validity: Validity) -> pki::Result<KeyedCertificate> {
        let ca = CertificateAuthority::new(common_name, validity)?;
        Ok(KeyedCertificate {
            cert_pem: ca.cert_pem().to_string(),
            key_pem: Zeroizing::new(ca.key_pem().to_string()),
        })
    }

    fn issue_server(
        &self,
        ca_cert_pem: &str,
        ca_key_pem: &str,
        common_name: &str,
        sans: &[String],
        validity: Validity,
    ) -> pki::Result<KeyedCertificate> {
        CertificateAuthority::from_pem(ca_cert_pem, ca_key_pem)?.issue_server_cert(common_name, sans, validity)
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Outcome of one evaluation of the schedule
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// A new CA was issued
    pub ca_rotated: bool,
    /// Services that received a new certificate
    pub issued: Vec<String>,
    /// Identities whose stored material changed without issuance (expired predecessor removed)
    pub pruned: Vec<String>,
    /// Identities deleted because they left the plan
    pub removed: Vec<String>,
    /// Services whose rotation failed and kept their previous material
    pub failed: Vec<String>,
}

impl TickReport {
    /// Whether any stored material changed
    pub fn changed(&self) -> bool {
        self.ca_rotated || !self.issued.is_empty() || !self.pruned.is_empty() || !self.removed.is_empty()
    }
}

/// Drives certificate rotation against a [`CertStore`]
pub struct RotationEngine {
    store: Arc<dyn CertStore>,
    issuer: Arc<dyn CertIssuer>,
}

impl RotationEngine {
    /// Create an engine over the given store and issuer
    pub fn new(store: Arc<dyn CertStore>, issuer: Arc<dyn CertIssuer>) -> Self {
        Self { store, issuer }
    }

    /// Evaluate the schedule at `now` and persist whatever changed
    ///
    /// A CA failure aborts the tick before any service is touched. A service
    /// failure is recorded in the report and the other services proceed. In
    /// both cases the stored material is left as it was.
    #[instrument(skip(self, plan), fields(services = plan.services.len()))]
    pub async fn tick(&self, plan: &RotationPlan, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        if plan.services.is_empty() {
            self.remove_unplanned(&[], &mut report).await?;
            return Ok(report);
        }

        let ca = self.ensure_ca(&plan.schedule, now, &mut report).await?;
        let ca_bundle = ca.trust_bundle(now);
        let ca_changed = CaChange {
            rotated: report.ca_rotated,
            bundle_shrunk: report.pruned.iter().any(|n| n == CA_SECRET_NAME),
        };

        for service in &plan.services {
            match self.ensure_service(service, &ca, &ca_bundle, &plan.schedule, now, ca_changed).await {
                Ok(ServiceOutcome::Issued) => report.issued.push(service.name.clone()),
                Ok(ServiceOutcome::Pruned) => report.pruned.push(service.name.clone()),
                Ok(ServiceOutcome::Unchanged) => {}
                Err(e) => {
                    error!(service = %service.name, error = %e, "certificate rotation failed, keeping previous material");
                    report.failed.push(service.name.clone());
                }
            }
        }

        let keep: Vec<&str> = plan.services.iter().map(|s| s.name.as_str()).collect();
        self.remove_unplanned(&keep, &mut report).await?;
        Ok(report)
    }

    async fn ensure_ca(
        &self,
        schedule: &RotationSchedule,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<StoredIdentity> {
        let stored = self.store.load(CA_SECRET_NAME).await?;

        let (identity, changed) = match stored {
            None => {
                info!("issuing initial CA");
                report.ca_rotated = true;
                (self.issue_ca(schedule, now)?, true)
            }
            Some(mut identity) if now >= identity.current.rotate_at => {
                info!(
                    previous_issued_at = %identity.current.issued_at,
                    overlap = %format_duration(schedule.ca_overlap),
                    "rotating CA"
                );
                let successor = self.issue_ca(schedule, now)?;
                identity.supersede(successor, now + schedule.ca_overlap);
                report.ca_rotated = true;
                (identity, true)
            }
            Some(mut identity) => {
                let pruned = identity.prune(now);
                if pruned {
                    debug!("outgoing CA left its overlap window");
                    report.pruned.push(CA_SECRET_NAME.to_string());
                }
                (identity, pruned)
            }
        };

        if changed {
            self.store
                .save(CA_SECRET_NAME, &identity, &identity.trust_bundle(now))
                .await?;
        }
        Ok(identity)
    }

    fn issue_ca(&self, schedule: &RotationSchedule, now: DateTime<Utc>) -> Result<StoredIdentity> {
        let validity = Validity {
            not_before: now,
            not_after: now + schedule.ca_rotate + schedule.ca_overlap,
        };
        let cert = self.issuer.issue_ca(CA_COMMON_NAME, validity)?;
        Ok(StoredIdentity::issued(cert, validity, now + schedule.ca_rotate, None))
    }

    async fn ensure_service(
        &self,
        service: &ServiceIdentity,
        ca: &StoredIdentity,
        ca_bundle: &str,
        schedule: &RotationSchedule,
        now: DateTime<Utc>,
        ca_changed: CaChange,
    ) -> Result<ServiceOutcome> {
        let stored = self.store.load(&service.name).await?;

        let signed_by_current_ca = |identity: &StoredIdentity| identity.current.signer == Some(ca.current.issued_at);

        let outcome = match stored {
            None => {
                let identity = self.issue_service(service, ca, schedule, now)?;
                self.store.save(&service.name, &identity, ca_bundle).await?;
                info!(service = %service.name, "issued initial service certificate");
                ServiceOutcome::Issued
            }
            Some(mut identity)
                if ca_changed.rotated
                    || now >= identity.current.rotate_at
                    || !signed_by_current_ca(&identity) =>
            {
                let forced = now < identity.current.rotate_at;
                let successor = self.issue_service(service, ca, schedule, now)?;
                // The outgoing certificate cannot stay trusted longer than its own CA.
                let signer_trust_until = match identity.current.signer {
                    Some(signer) if signer == ca.current.issued_at => ca.current.trust_until,
                    _ => ca
                        .previous
                        .as_ref()
                        .map(|p| p.trust_until)
                        .unwrap_or(now),
                };
                identity.supersede(successor, (now + schedule.cert_overlap).min(signer_trust_until));
                self.store.save(&service.name, &identity, ca_bundle).await?;
                info!(service = %service.name, forced, "rotated service certificate");
                ServiceOutcome::Issued
            }
            Some(mut identity) => {
                let pruned = identity.prune(now);
                if pruned || ca_changed.bundle_shrunk {
                    self.store.save(&service.name, &identity, ca_bundle).await?;
                    ServiceOutcome::Pruned
                } else {
                    ServiceOutcome::Unchanged
                }
            }
        };
        Ok(outcome)
    }

    fn issue_service(
        &self,
        service: &ServiceIdentity,
        ca: &StoredIdentity,
        schedule: &RotationSchedule,
        now: DateTime<Utc>,
    ) -> Result<StoredIdentity> {
        let not_after = (now + schedule.cert_rotate + schedule.cert_overlap).min(ca.current.trust_until);
        let validity = Validity {
            not_before: now,
            not_after,
        };
        let rotate_at = (now + schedule.cert_rotate).min(not_after);
        let cert = self.issuer.issue_server(
            &ca.current.cert_pem,
            &ca.key_pem,
            &service.name,
            &service.sans,
            validity,
        )?;
        Ok(StoredIdentity::issued(cert, validity, rotate_at, Some(ca.current.issued_at)))
    }

    async fn remove_unplanned(&self, keep: &[&str], report: &mut TickReport) -> Result<()> {
        let stored = self.store.list().await?;
        for name in stored {
            let needed = if keep.is_empty() {
                false
            } else {
                name == CA_SECRET_NAME || keep.contains(&name.as_str())
            };
            if !needed {
                self.store.delete(&name).await?;
                info!(identity = %name, "removed certificate material no longer needed");
                report.removed.push(name);
            }
        }
        Ok(())
    }

    /// Run the engine until cancelled
    ///
    /// Evaluates the latest published plan every `interval` and whenever a new
    /// plan is published. A `None` plan leaves stored material alone; teardown
    /// is handled by the controller.
    pub async fn run(
        self,
        mut plans: watch::Receiver<Option<RotationPlan>>,
        interval: StdDuration,
        cancel: CancellationToken,
    ) {
        info!(interval_secs = interval.as_secs(), "certificate rotation engine started");
        loop {
            let plan = plans.borrow_and_update().clone();
            if let Some(plan) = plan {
                match self.tick(&plan, Utc::now()).await {
                    Ok(report) if report.changed() => info!(?report, "certificate material updated"),
                    Ok(report) if !report.failed.is_empty() => {
                        warn!(failed = ?report.failed, "certificate rotation incomplete, retrying next tick")
                    }
                    Ok(_) => debug!("certificate rotation not needed"),
                    Err(e) => error!(error = %e, "certificate rotation tick failed, retrying next tick"),
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
                changed = plans.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("certificate rotation engine stopped");
    }
}

#[derive(Clone, Copy)]
struct CaChange {
    rotated: bool,
    // outgoing CA left its overlap, service bundles must drop it
    bundle_shrunk: bool,
}

enum ServiceOutcome {
    Issued,
    Pruned,
    Unchanged,
}
