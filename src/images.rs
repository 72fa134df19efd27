//! Container image resolution
//!
//! Every operand image is either supplied through the environment or falls
//! back to a digest-pinned default. The short name extracted from a reference
//! is only used for the related-images inventory that mirroring tools consume;
//! pulling always uses the full reference.

use serde::{Deserialize, Serialize};

/// Default Multus image
pub const DEFAULT_MULTUS_IMAGE: &str = "ghcr.io/k8snetworkplumbingwg/multus-cni@sha256:829c27e9392d013eee5086ca7670d7326d723ebaec526237215e86086b5a3234";
/// Default Linux bridge CNI plugin image
pub const DEFAULT_LINUX_BRIDGE_CNI_IMAGE: &str = "quay.io/kubevirt/cni-default-plugins@sha256:5d9442c26f8750d44f97175f36dbd74bef503f782b9adefcfd08215d065c437a";
/// Default bridge marker image
pub const DEFAULT_LINUX_BRIDGE_MARKER_IMAGE: &str = "quay.io/kubevirt/bridge-marker@sha256:5d24c6d1ecb0556896b7b81c7e5260b54173858425777b7a84df8a706c07e6d2";
/// Default KubeMacPool image
pub const DEFAULT_KUBEMACPOOL_IMAGE: &str = "quay.io/kubevirt/kubemacpool@sha256:fb07b1be9e0990e3846ef628e993694bf0765602af5907abf98f7e218db0cb4a";
/// Default OVS CNI plugin image
pub const DEFAULT_OVS_CNI_IMAGE: &str = "quay.io/kubevirt/ovs-cni-plugin@sha256:3654b80dd5e459c3e73dd027d732620ed8b488b8a15dfe7922457d16c7e834c3";
/// Default macvtap CNI image
pub const DEFAULT_MACVTAP_CNI_IMAGE: &str = "quay.io/kubevirt/macvtap-cni@sha256:583a3346cdb04374d4d802d5f5d37c4dc2f6897e6e62010648f8f28c9a5a5a07";
/// Default kube-rbac-proxy image used for the metrics proxy sidecars
pub const DEFAULT_KUBE_RBAC_PROXY_IMAGE: &str = "quay.io/openshift/origin-kube-rbac-proxy@sha256:baedb268ac66456018fb30af395bb3d69af5fff3252ff5d549f0231b1ebb6901";

/// A resolved image: inventory name plus the reference used for pulling
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelatedImage {
    /// Bare image name, e.g. `kubemacpool`
    pub name: String,
    /// Full reference including registry and tag or digest
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Resolve a user-supplied reference, falling back to `default` when absent or blank
pub fn resolve(user_supplied: Option<&str>, default: &str) -> RelatedImage {
    let reference = match user_supplied.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => default,
    };
    RelatedImage {
        name: bare_name(reference),
        reference: reference.to_string(),
    }
}

/// Strip registry host, repository path and tag or digest from a reference.
///
/// The name is the last path segment that is not empty, cut at the first
/// `:` or `@`. Trailing slashes are skipped, so `quay.io/kubevirt/` names
/// `kubevirt`. Never fails: input without any name character is returned
/// whole.
pub fn bare_name(reference: &str) -> String {
    let is_name = |b: u8| !matches!(b, b'/' | b':' | b'@');
    let bytes = reference.as_bytes();
    let after_slash = (2..bytes.len())
        .rev()
        .find(|&i| bytes[i - 1] == b'/' && is_name(bytes[i]));
    let Some(start) = after_slash.or_else(|| bytes.iter().position(|&b| is_name(b))) else {
        return reference.to_string();
    };
    let end = bytes[start..]
        .iter()
        .position(|&b| !is_name(b))
        .map_or(bytes.len(), |len| start + len);
    reference[start..end].to_string()
}

/// Images for every operand the operator can deploy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddonsImages {
    /// Multus daemon
    pub multus: RelatedImage,
    /// Linux bridge CNI plugin installer
    pub linux_bridge_cni: RelatedImage,
    /// Bridge marker daemon
    pub linux_bridge_marker: RelatedImage,
    /// KubeMacPool manager
    pub kube_mac_pool: RelatedImage,
    /// OVS CNI plugin installer
    pub ovs_cni: RelatedImage,
    /// Macvtap CNI and device plugin
    pub macvtap_cni: RelatedImage,
    /// Metrics proxy sidecar
    pub kube_rbac_proxy: RelatedImage,
}

impl Default for AddonsImages {
    fn default() -> Self {
        Self::from_overrides(&ImageOverrides::default())
    }
}

/// Optional per-image overrides, usually read from the environment
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageOverrides {
    /// `MULTUS_IMAGE`
    pub multus: Option<String>,
    /// `LINUX_BRIDGE_IMAGE`
    pub linux_bridge_cni: Option<String>,
    /// `LINUX_BRIDGE_MARKER_IMAGE`
    pub linux_bridge_marker: Option<String>,
    /// `KUBEMACPOOL_IMAGE`
    pub kube_mac_pool: Option<String>,
    /// `OVS_CNI_IMAGE`
    pub ovs_cni: Option<String>,
    /// `MACVTAP_CNI_IMAGE`
    pub macvtap_cni: Option<String>,
    /// `KUBE_RBAC_PROXY_IMAGE`
    pub kube_rbac_proxy: Option<String>,
}

impl AddonsImages {
    /// Resolve every image, filling gaps with the pinned defaults
    pub fn from_overrides(overrides: &ImageOverrides) -> Self {
        Self {
            multus: resolve(overrides.multus.as_deref(), DEFAULT_MULTUS_IMAGE),
            linux_bridge_cni: resolve(
                overrides.linux_bridge_cni.as_deref(),
                DEFAULT_LINUX_BRIDGE_CNI_IMAGE,
            ),
            linux_bridge_marker: resolve(
                overrides.linux_bridge_marker.as_deref(),
                DEFAULT_LINUX_BRIDGE_MARKER_IMAGE,
            ),
            kube_mac_pool: resolve(overrides.kube_mac_pool.as_deref(), DEFAULT_KUBEMACPOOL_IMAGE),
            ovs_cni: resolve(overrides.ovs_cni.as_deref(), DEFAULT_OVS_CNI_IMAGE),
            macvtap_cni: resolve(overrides.macvtap_cni.as_deref(), DEFAULT_MACVTAP_CNI_IMAGE),
            kube_rbac_proxy: resolve(
                overrides.kube_rbac_proxy.as_deref(),
                DEFAULT_KUBE_RBAC_PROXY_IMAGE,
            ),
        }
    }

    /// Environment variable name and reference for each image, in a fixed order
    pub fn env_pairs(&self) -> [(&'static str, &str); 7] {
        [
            ("MULTUS_IMAGE", &self.multus.reference),
            ("LINUX_BRIDGE_IMAGE", &self.linux_bridge_cni.reference),
            ("LINUX_BRIDGE_MARKER_IMAGE", &self.linux_bridge_marker.reference),
            ("OVS_CNI_IMAGE", &self.ovs_cni.reference),
            ("KUBEMACPOOL_IMAGE", &self.kube_mac_pool.reference),
            ("MACVTAP_CNI_IMAGE", &self.macvtap_cni.reference),
            ("KUBE_RBAC_PROXY_IMAGE", &self.kube_rbac_proxy.reference),
        ]
    }

    /// Related-images list for disconnected mirroring, sorted by name
    ///
    /// `extra` carries images outside the operand set, such as the operator's own.
    pub fn related_images(&self, extra: &[&str]) -> Vec<RelatedImage> {
        let mut images = vec![
            self.multus.clone(),
            self.linux_bridge_cni.clone(),
            self.linux_bridge_marker.clone(),
            self.kube_mac_pool.clone(),
            self.ovs_cni.clone(),
            self.macvtap_cni.clone(),
            self.kube_rbac_proxy.clone(),
        ];
        images.extend(extra.iter().map(|r| resolve(Some(r), r)));
        images.sort();
        images.dedup();
        images
    }
}
