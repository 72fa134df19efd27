//! Macvtap CNI plugin and its device plugin

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, ConfigMapVolumeSource, EnvFromSource, Volume, VolumeMount,
};

use super::{
    container, daemon_set, host_path_volume, meta, pod_spec, requests, strings, ComponentSpec,
    Objects, CNI_BIN_DIR,
};
use crate::Result;

pub(super) const NAME: &str = "macvtap-cni";
pub(super) const CONFIG_MAP: &str = "macvtap-deviceplugin-config";

pub(super) fn render(spec: &ComponentSpec, out: &mut Objects<'_>) -> Result<()> {
    // Empty list: the device plugin exposes no interfaces until the admin configures some.
    out.push(ConfigMap {
        metadata: meta(CONFIG_MAP),
        data: Some(BTreeMap::from([(
            "DP_MACVTAP_CONF".to_string(),
            "[]".to_string(),
        )])),
        ..Default::default()
    })?;

    let (bin_volume, bin_mount) = host_path_volume("cni", CNI_BIN_DIR);
    let (dp_volume, dp_mount) = host_path_volume("deviceplugin", "/var/lib/kubelet/device-plugins");
    let config_volume = Volume {
        name: "config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: CONFIG_MAP.to_string(),
            optional: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut installer = container(spec, "install-cni", &spec.images.macvtap_cni.reference);
    installer.command = Some(strings(&["cp", "/macvtap-cni", "/host/opt/cni/bin/macvtap"]));
    installer.resources = Some(requests("10m", "15Mi"));
    installer.volume_mounts = Some(vec![VolumeMount {
        mount_path: format!("/host{CNI_BIN_DIR}"),
        ..bin_mount
    }]);

    let mut device_plugin = container(spec, NAME, &spec.images.macvtap_cni.reference);
    device_plugin.command = Some(strings(&["/macvtap-deviceplugin", "-v", "3", "-logtostderr"]));
    device_plugin.env_from = Some(vec![EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name: CONFIG_MAP.to_string(),
            optional: Some(true),
        }),
        ..Default::default()
    }]);
    device_plugin.resources = Some(requests("60m", "30Mi"));
    device_plugin.volume_mounts = Some(vec![
        dp_mount,
        VolumeMount {
            name: "config".to_string(),
            mount_path: "/etc/macvtap".to_string(),
            read_only: Some(true),
            ..Default::default()
        },
    ]);

    let mut pod = pod_spec(spec, None, vec![device_plugin]);
    pod.init_containers = Some(vec![installer]);
    pod.host_network = Some(true);
    pod.host_pid = Some(true);
    pod.volumes = Some(vec![bin_volume, dp_volume, config_volume]);
    out.push(daemon_set(spec, NAME, pod))
}
