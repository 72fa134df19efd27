//! OVS CNI plugin

use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector, VolumeMount};

use super::{
    container, daemon_set, host_path_volume, pod_spec, push_cluster_rbac, requests, rule,
    strings, ComponentSpec, Objects, CNI_BIN_DIR,
};
use crate::Result;

pub(super) const NAME: &str = "ovs-cni-amd64";
const SERVICE_ACCOUNT: &str = "ovs-cni-marker";

pub(super) fn render(spec: &ComponentSpec, out: &mut Objects<'_>) -> Result<()> {
    push_cluster_rbac(
        out,
        spec,
        SERVICE_ACCOUNT,
        vec![rule(&[""], &["nodes", "nodes/status"], &["get", "update", "patch"])],
    )?;

    let (bin_volume, bin_mount) = host_path_volume("cnibin", CNI_BIN_DIR);
    let (ovs_volume, ovs_mount) = host_path_volume("ovs-var-run", "/var/run/openvswitch");

    let mut plugin = container(spec, "ovs-cni-plugin", &spec.images.ovs_cni.reference);
    plugin.command = Some(strings(&["/bin/sh", "-c"]));
    plugin.args = Some(strings(&[
        "cp /ovs /host/opt/cni/bin/ovs && cp /ovs-mirror-producer /host/opt/cni/bin/ovs-mirror-producer && cp /ovs-mirror-consumer /host/opt/cni/bin/ovs-mirror-consumer && sleep infinity",
    ]));
    plugin.resources = Some(requests("10m", "15Mi"));
    plugin.volume_mounts = Some(vec![VolumeMount {
        mount_path: format!("/host{CNI_BIN_DIR}"),
        ..bin_mount
    }]);

    let mut marker = container(spec, "ovs-cni-marker", &spec.images.ovs_cni.reference);
    marker.command = Some(strings(&["/marker"]));
    marker.args = Some(strings(&[
        "-node-name",
        "$(NODE_NAME)",
        "-ovs-socket",
        "unix:/host/var/run/openvswitch/db.sock",
        "-healthcheck-interval=60",
    ]));
    marker.resources = Some(requests("10m", "10Mi"));
    marker.volume_mounts = Some(vec![VolumeMount {
        mount_path: "/host/var/run/openvswitch".to_string(),
        ..ovs_mount
    }]);
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

    let mut pod = pod_spec(spec, Some(SERVICE_ACCOUNT), vec![plugin, marker]);
    pod.host_network = Some(true);
    pod.volumes = Some(vec![bin_volume, ovs_volume]);
    out.push(daemon_set(spec, NAME, pod))
}
