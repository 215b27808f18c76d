//! Loopback demo transport
//!
//! Backs `--demo` runs of the CLI: every pod has the same two containers, the
//! image lacks bash like a busybox base, and input is echoed back as output.

use tracing::info;

use super::mock::{ConnectMode, MockTransport};

/// Containers every demo pod reports
pub const DEMO_CONTAINERS: [&str; 2] = ["app", "sidecar"];

/// Shells the demo containers do not ship
pub const DEMO_MISSING_SHELLS: [&str; 1] = ["/bin/bash"];

/// In-process transport standing in for a cluster connection
pub fn loopback_transport(pod: &str, namespace: &str) -> MockTransport {
    info!("Using loopback demo transport for {}/{}", namespace, pod);

    MockTransport::new(ConnectMode::Immediate)
        .with_echo(true)
        .with_containers(pod, namespace, &DEMO_CONTAINERS)
        .with_missing_shells(&DEMO_MISSING_SHELLS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ConnectRequest, ContainerResolver, TransportClient};

    #[tokio::test]
    async fn test_demo_pod_lists_fixed_containers() {
        let transport = loopback_transport("web-7f", "default");

        let containers = transport.list("web-7f", "default").await.unwrap();
        assert_eq!(containers, DEMO_CONTAINERS);
        assert!(transport.list("web-7f", "kube-system").await.is_err());
    }

    #[tokio::test]
    async fn test_demo_shell_falls_back_from_bash() {
        let transport = loopback_transport("web-7f", "default");

        let id = transport
            .connect(ConnectRequest {
                pod: "web-7f".to_string(),
                namespace: "default".to_string(),
                container: "app".to_string(),
                shell_candidates: vec!["/bin/bash".to_string(), "/bin/sh".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(transport.shell_of(id.as_str()).as_deref(), Some("/bin/sh"));
    }
}
