//! Custom Resource Definitions for the network add-ons operator

mod config;
mod types;

pub use config::{NetworkAddonsConfig, NetworkAddonsConfigSpec, NetworkAddonsConfigStatus};
pub use types::{
    Condition, ConditionStatus, ContainerInfo, CustomTlsProfile, KubeMacPool, LinuxBridge,
    MacvtapCni, Multus, NamedTlsProfile, Ovs, Placement, PlacementConfiguration,
    SelfSignConfiguration, TlsSecurityProfile,
};
