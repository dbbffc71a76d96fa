//! The Container Driver (§4.2/§4.3): a thin adapter over a remote container
//! management daemon.

pub mod driver;
pub mod spec;

pub use driver::{ContainerDriver, DaemonContainerDriver};
pub use spec::{
    ContainerHandle, ContainerInspection, ContainerSpec, ContainerSummary, DaemonHealthStatus,
    HealthcheckSpec, PortBinding, RestartPolicy, VolumeBinding,
};
