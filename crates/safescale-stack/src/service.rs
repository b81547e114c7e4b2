//! The provider façade.
//!
//! [`Service`] wraps a driver with the cross-driver concerns: parameter
//! validation before anything reaches the wire, structured logging of
//! every mutating call, metadata bucket naming, and template/image
//! filtering with GPU annotation. The cluster controller and the security
//! group engine talk to the façade, never to the driver directly.

use std::sync::Arc;
use std::time::Duration;

use safescale_core::{Error, Result, Timeouts};
use safescale_store::types::{
    Host, HostRequest, HostState, HostTemplate, Image, KeyPair, Network, NetworkRequest,
};
use tracing::info;

use crate::config::TenantConfig;
use crate::stack::{GatewayRequest, Stack};

/// GPU template names start with `g` and a digit (`g2-xx`, `g3-120`).
fn looks_like_gpu_template(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next() == Some('g') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

/// The cross-driver façade over a [`Stack`].
pub struct Service {
    stack: Arc<dyn Stack>,
    tenant: TenantConfig,
}

impl Service {
    /// Wrap `stack` for the given tenant.
    #[must_use]
    pub fn new(stack: Arc<dyn Stack>, tenant: TenantConfig) -> Self {
        Self { stack, tenant }
    }

    /// The wrapped driver.
    #[must_use]
    pub fn stack(&self) -> &Arc<dyn Stack> {
        &self.stack
    }

    /// The tenant configuration.
    #[must_use]
    pub const fn tenant(&self) -> &TenantConfig {
        &self.tenant
    }

    /// The operation timeout catalog of the tenant.
    #[must_use]
    pub const fn timeouts(&self) -> &Timeouts {
        &self.tenant.timeouts
    }

    /// The metadata bucket of the tenant.
    ///
    /// # Errors
    ///
    /// Returns `Overflow` when the derived name exceeds the length bound.
    pub fn metadata_bucket_name(&self) -> Result<String> {
        self.tenant.metadata_bucket_name()
    }

    // =========================================================================
    // Templates and images
    // =========================================================================

    /// List templates, annotating GPU flavors; `all` includes them.
    ///
    /// # Errors
    ///
    /// Surfaces the driver failure.
    pub async fn list_templates(&self, all: bool) -> Result<Vec<HostTemplate>> {
        let mut templates = self.stack.list_templates().await?;
        for template in &mut templates {
            if template.gpus == 0 && looks_like_gpu_template(&template.name) {
                template.gpus = 1;
            }
        }
        if !all {
            templates.retain(|t| t.gpus == 0);
        }
        Ok(templates)
    }

    /// List images; `all` includes deprecated and rescue images.
    ///
    /// # Errors
    ///
    /// Surfaces the driver failure.
    pub async fn list_images(&self, all: bool) -> Result<Vec<Image>> {
        let mut images = self.stack.list_images().await?;
        if !all {
            images.retain(|i| {
                let name = i.name.to_ascii_lowercase();
                !name.contains("deprecated") && !name.contains("rescue")
            });
        }
        Ok(images)
    }

    // =========================================================================
    // Networks
    // =========================================================================

    /// Create a network after validating the request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on an empty name or CIDR.
    pub async fn create_network(&self, request: NetworkRequest) -> Result<Network> {
        if request.name.is_empty() {
            return Err(Error::invalid_parameter("request.name cannot be empty"));
        }
        if request.cidr.is_empty() {
            return Err(Error::invalid_parameter("request.cidr cannot be empty"));
        }
        info!(network = %request.name, cidr = %request.cidr, "creating network");
        self.stack.create_network(request).await
    }

    /// Get a network by ID.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on an empty ID.
    pub async fn get_network(&self, id: &str) -> Result<Network> {
        non_empty(id, "id")?;
        self.stack.get_network(id).await
    }

    /// Delete a network.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on an empty ID.
    pub async fn delete_network(&self, id: &str) -> Result<()> {
        non_empty(id, "id")?;
        info!(network = %id, "deleting network");
        self.stack.delete_network(id).await
    }

    /// Create the gateway host of a network.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` when the request names no network.
    pub async fn create_gateway(&self, request: GatewayRequest) -> Result<Host> {
        if request.network.id.is_empty() {
            return Err(Error::invalid_parameter(
                "request.network must be a created network",
            ));
        }
        info!(network = %request.network.name, "creating gateway");
        self.stack.create_gateway(request).await
    }

    // =========================================================================
    // Hosts
    // =========================================================================

    /// Create a host after validating the request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on a request missing name, template or
    /// image.
    pub async fn create_host(&self, request: HostRequest) -> Result<Host> {
        non_empty(&request.resource_name, "request.resource_name")?;
        non_empty(&request.template_id, "request.template_id")?;
        non_empty(&request.image_id, "request.image_id")?;
        info!(host = %request.resource_name, "creating host");
        self.stack.create_host(request).await
    }

    /// Inspect a host.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on an empty ID.
    pub async fn inspect_host(&self, id: &str) -> Result<Host> {
        non_empty(id, "id")?;
        self.stack.inspect_host(id).await
    }

    /// List all hosts of the tenant.
    ///
    /// # Errors
    ///
    /// Surfaces the driver failure.
    pub async fn list_hosts(&self) -> Result<Vec<Host>> {
        self.stack.list_hosts().await
    }

    /// Delete a host.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on an empty ID.
    pub async fn delete_host(&self, id: &str) -> Result<()> {
        non_empty(id, "id")?;
        info!(host = %id, "deleting host");
        self.stack.delete_host(id).await
    }

    /// Start a host.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on an empty ID.
    pub async fn start_host(&self, id: &str) -> Result<()> {
        non_empty(id, "id")?;
        info!(host = %id, "starting host");
        self.stack.start_host(id).await
    }

    /// Stop a host.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on an empty ID.
    pub async fn stop_host(&self, id: &str) -> Result<()> {
        non_empty(id, "id")?;
        info!(host = %id, "stopping host");
        self.stack.stop_host(id).await
    }

    /// Poll a host until it settles in `state`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on an empty ID; `Timeout` when the
    /// budget runs out.
    pub async fn wait_host_state(
        &self,
        id: &str,
        state: HostState,
        timeout: Duration,
    ) -> Result<()> {
        non_empty(id, "id")?;
        self.stack.wait_host_state(id, state, timeout).await
    }

    /// Create a key pair.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on an empty name.
    pub async fn create_key_pair(&self, name: &str) -> Result<KeyPair> {
        non_empty(name, "name")?;
        self.stack.create_key_pair(name).await
    }
}

fn non_empty(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        Err(Error::invalid_parameter(format!("{what} cannot be empty")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStack;

    fn service() -> Service {
        Service::new(Arc::new(MockStack::new()), TenantConfig::default())
    }

    #[tokio::test]
    async fn empty_parameters_never_reach_the_driver() {
        let svc = service();
        assert!(svc.inspect_host("").await.is_err());
        assert!(svc.delete_network("").await.is_err());
        assert!(svc.create_host(HostRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn gpu_templates_are_annotated_and_filtered() {
        let stack = Arc::new(MockStack::new());
        let svc = Service::new(Arc::clone(&stack) as _, TenantConfig::default());

        // The mock carries "s1-4" and "c2-32"; neither is a GPU flavor.
        let visible = svc.list_templates(false).await.unwrap();
        assert_eq!(visible.len(), 2);

        assert!(looks_like_gpu_template("g3-120"));
        assert!(!looks_like_gpu_template("general-1"));
        assert!(!looks_like_gpu_template("s1-4"));
    }
}
