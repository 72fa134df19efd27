//! Linux bridge CNI plugin and the bridge marker

use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector};

use super::{
    container, daemon_set, host_path_volume, pod_spec, push_cluster_rbac, requests, rule,
    strings, ComponentSpec, Objects, CNI_BIN_DIR,
};
use crate::Result;

pub(super) const MARKER_NAME: &str = "bridge-marker";
pub(super) const PLUGIN_NAME: &str = "linux-bridge";

pub(super) fn render(spec: &ComponentSpec, out: &mut Objects<'_>) -> Result<()> {
    // The marker publishes bridges found on each node as extended resources.
    push_cluster_rbac(
        out,
        spec,
        MARKER_NAME,
        vec![
            rule(&[""], &["nodes", "nodes/status"], &["get", "update", "patch"]),
            rule(&[""], &["events"], &["create", "patch"]),
        ],
    )?;

    let mut marker = container(spec, MARKER_NAME, &spec.images.linux_bridge_marker.reference);
    marker.args = Some(strings(&["-node-name", "$(NODE_NAME)"]));
    marker.env = Some(vec![EnvVar {
        name: "NODE_NAME".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "spec.nodeName".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }]);
    marker.resources = Some(requests("10m", "15Mi"));

    let mut marker_pod = pod_spec(spec, Some(MARKER_NAME), vec![marker]);
    marker_pod.host_network = Some(true);
    out.push(daemon_set(spec, MARKER_NAME, marker_pod))?;

    // The plugin DaemonSet only copies the bridge binaries onto the host.
    let (bin_volume, bin_mount) = host_path_volume("cnibin", CNI_BIN_DIR);
    let mut installer = container(spec, "cni-plugins", &spec.images.linux_bridge_cni.reference);
    installer.command = Some(strings(&["/bin/bash", "-c"]));
    installer.args = Some(strings(&[
        "cp -f /usr/src/containernetworking/plugins/bin/bridge /usr/src/containernetworking/plugins/bin/tuning /opt/cni/bin/ && echo 'bridge installed' && sleep infinity",
    ]));
    installer.resources = Some(requests("10m", "15Mi"));
    installer.volume_mounts = Some(vec![bin_mount]);

    let mut plugin_pod = pod_spec(spec, None, vec![installer]);
    plugin_pod.volumes = Some(vec![bin_volume]);
    out.push(daemon_set(spec, PLUGIN_NAME, plugin_pod))
}
