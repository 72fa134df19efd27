//! Multus meta plugin

use super::{
    container, daemon_set, host_path_volume, pod_spec, push_cluster_rbac, requests, rule,
    strings, ComponentSpec, Objects, CNI_BIN_DIR, CNI_CONF_DIR,
};
use crate::Result;

pub(super) const NAME: &str = "multus";

pub(super) fn render(spec: &ComponentSpec, out: &mut Objects<'_>) -> Result<()> {
    push_cluster_rbac(
        out,
        spec,
        NAME,
        vec![
            rule(&["k8s.cni.cncf.io"], &["*"], &["*"]),
            rule(&[""], &["pods", "pods/status"], &["get", "update"]),
            rule(&["", "events.k8s.io"], &["events"], &["create", "patch", "update"]),
        ],
    )?;

    let (bin_volume, bin_mount) = host_path_volume("cni-bin", CNI_BIN_DIR);
    let (conf_volume, conf_mount) = host_path_volume("cni-conf", CNI_CONF_DIR);

    let mut multus = container(spec, "kube-multus", &spec.images.multus.reference);
    multus.command = Some(strings(&["/thin_entrypoint"]));
    multus.args = Some(strings(&[
        "--multus-conf-file=auto",
        "--multus-autoconfig-dir=/etc/cni/net.d",
        "--cni-conf-dir=/etc/cni/net.d",
        "--cleanup-config-on-exit=true",
    ]));
    multus.resources = Some(requests("10m", "15Mi"));
    multus.volume_mounts = Some(vec![bin_mount, conf_mount]);

    let mut pod = pod_spec(spec, Some(NAME), vec![multus]);
    pod.host_network = Some(true);
    pod.volumes = Some(vec![bin_volume, conf_volume]);

    out.push(daemon_set(spec, NAME, pod))
}
