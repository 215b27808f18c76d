//! Container selection for a pod

use tracing::{info, warn};

use super::error::SessionError;
use super::state::Target;
use crate::transport::ContainerResolver;

/// Containers of one pod and the one picked as the session target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSelection {
    pod: String,
    namespace: String,
    containers: Vec<String>,
    selected: usize,
}

impl ContainerSelection {
    /// List the pod's containers, selecting the first one.
    ///
    /// Resolver errors are reported once as `Discovery`; nothing is retried.
    pub async fn discover(
        resolver: &dyn ContainerResolver,
        pod: &str,
        namespace: &str,
    ) -> Result<Self, SessionError> {
        let containers = resolver.list(pod, namespace).await.map_err(|e| {
            warn!("Container discovery for {}/{} failed: {}", namespace, pod, e);
            metrics::increment_counter!("podshell_discovery_errors");
            SessionError::Discovery(e.to_string())
        })?;

        info!(
            "Pod {}/{} has containers: {}",
            namespace,
            pod,
            containers.join(", ")
        );
        Self::from_containers(pod, namespace, containers)
    }

    pub fn from_containers(
        pod: &str,
        namespace: &str,
        containers: Vec<String>,
    ) -> Result<Self, SessionError> {
        if containers.is_empty() {
            return Err(SessionError::Discovery(format!(
                "Pod {}/{} has no containers",
                namespace, pod
            )));
        }

        Ok(Self {
            pod: pod.to_string(),
            namespace: namespace.to_string(),
            containers,
            selected: 0,
        })
    }

    pub fn containers(&self) -> &[String] {
        &self.containers
    }

    /// The container a connect would use
    pub fn selected(&self) -> &str {
        &self.containers[self.selected]
    }

    pub fn default_container(&self) -> &str {
        &self.containers[0]
    }

    /// Switch the selection to a named container
    pub fn select(&mut self, container: &str) -> Result<(), SessionError> {
        match self.containers.iter().position(|c| c == container) {
            Some(index) => {
                self.selected = index;
                Ok(())
            }
            None => Err(SessionError::InvalidTarget(format!(
                "Container '{}' not found in pod {}/{}",
                container, self.namespace, self.pod
            ))),
        }
    }

    pub fn target(&self) -> Target {
        Target::new(&self.pod, &self.namespace, self.selected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[tokio::test]
    async fn test_first_container_is_default() {
        let resolver = MockTransport::default().with_containers("web-7f", "default", &["app", "sidecar"]);

        let selection = ContainerSelection::discover(&resolver, "web-7f", "default")
            .await
            .unwrap();

        assert_eq!(selection.containers(), ["app", "sidecar"]);
        assert_eq!(selection.default_container(), "app");
        assert_eq!(selection.target(), Target::new("web-7f", "default", "app"));
    }

    #[tokio::test]
    async fn test_select_switches_target_container() {
        let resolver = MockTransport::default().with_containers("web-7f", "default", &["app", "sidecar"]);
        let mut selection = ContainerSelection::discover(&resolver, "web-7f", "default")
            .await
            .unwrap();

        selection.select("sidecar").unwrap();
        assert_eq!(selection.target().container, "sidecar");

        assert!(matches!(
            selection.select("missing"),
            Err(SessionError::InvalidTarget(_))
        ));
        assert_eq!(selection.selected(), "sidecar");
    }

    #[tokio::test]
    async fn test_resolver_error_is_discovery_error() {
        let resolver = MockTransport::default();

        let err = ContainerSelection::discover(&resolver, "ghost", "default")
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Discovery(_)));
    }

    #[test]
    fn test_empty_pod_is_rejected() {
        let err = ContainerSelection::from_containers("web-7f", "default", Vec::new()).unwrap_err();
        assert_eq!(
            err,
            SessionError::Discovery("Pod default/web-7f has no containers".to_string())
        );
    }
}
