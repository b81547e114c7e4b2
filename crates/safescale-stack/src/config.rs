//! Tenant configuration.
//!
//! A tenant is described by a TOML file with `identity`, `compute`,
//! `network`, `objectstorage` and `metadata` sections. Only the keys the
//! orchestrator core needs are modeled here; driver-specific extras stay
//! in the driver's own section.

use safescale_core::{Error, Result, Timeouts};
use serde::Deserialize;

/// Who the tenant authenticates as.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Authentication domain.
    pub domain_name: String,
    /// User name.
    pub username: String,
    /// User password or application credential secret.
    pub password: String,
    /// Project (tenant) scope.
    pub project_id: String,
}

/// Where and how hosts are created.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Provider region.
    pub region: String,
    /// Availability zone hosts are created in.
    pub availability_zone: String,
    /// Account created on every host for the operator.
    pub operator_username: String,
    /// Default image name filter.
    pub default_image: String,
}

impl ComputeConfig {
    /// The operator account, defaulting to `safescale`.
    #[must_use]
    pub fn operator(&self) -> &str {
        if self.operator_username.is_empty() {
            "safescale"
        } else {
            &self.operator_username
        }
    }
}

/// Tenant-level network settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Name of the tenant VPC, for drivers that have one.
    pub vpc_name: String,
    /// CIDR of the tenant VPC.
    pub vpc_cidr: String,
    /// DNS servers pushed to hosts.
    pub dns_list: Vec<String>,
    /// Name of the provider network carrying public addresses.
    pub provider_network: String,
    /// Whether public addresses are floating IPs associated after boot.
    pub use_floating_ip: bool,
}

/// Object storage settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObjectStorageConfig {
    /// Storage endpoint, when distinct from the compute endpoint.
    pub endpoint: String,
    /// Storage region, when distinct from the compute region.
    pub region: String,
}

/// Metadata catalog settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Explicit bucket name, overriding the derived one.
    pub metadata_bucket_name: String,
}

/// The configuration of one tenant.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    /// Tenant name, unique per service process.
    pub name: String,
    /// Driver the tenant runs on (`openstack`, `ovh`, `gcp`, ...).
    pub driver: String,
    /// Identity section.
    pub identity: IdentityConfig,
    /// Compute section.
    pub compute: ComputeConfig,
    /// Network section.
    pub network: NetworkConfig,
    /// Object storage section.
    pub objectstorage: ObjectStorageConfig,
    /// Metadata section.
    pub metadata: MetadataConfig,
    /// Operation timeouts.
    pub timeouts: Timeouts,
}

impl TenantConfig {
    /// Parse a tenant configuration from TOML.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` on malformed TOML, `InvalidRequest` when required
    /// keys are missing.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| Error::syntax(format!("malformed tenant configuration: {e}")))?;
        if config.name.is_empty() {
            return Err(Error::invalid_request("tenant configuration misses 'name'"));
        }
        if config.driver.is_empty() {
            return Err(Error::invalid_request(
                "tenant configuration misses 'driver'",
            ));
        }
        Ok(config)
    }

    /// The name of the metadata bucket for this tenant.
    ///
    /// An explicit `metadata.MetadataBucketName` wins; otherwise the name
    /// is derived from `(driver, region, domain, project)`.
    ///
    /// # Errors
    ///
    /// Returns `Overflow` when the derived name exceeds the length bound.
    pub fn metadata_bucket_name(&self) -> Result<String> {
        if !self.metadata.metadata_bucket_name.is_empty() {
            return Ok(self.metadata.metadata_bucket_name.clone());
        }
        crate::config::derive_bucket_name(self)
    }
}

fn derive_bucket_name(config: &TenantConfig) -> Result<String> {
    safescale_store::build_metadata_bucket_name(
        &config.driver,
        &config.compute.region,
        &config.identity.domain_name,
        &config.identity.project_id,
    )
}
