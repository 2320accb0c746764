//! Platform initialization.
//!
//! Runs once per process before any transport domain is created. Every step
//! only fills in environment variables the user left unset, and the steps are
//! not rolled back: a failure part way through leaves earlier defaults in
//! place, since initialization failure is fatal to the process anyway.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::catalog::{PlatformCapabilityRecord, Protocol};
use super::identity::PlatformCache;
use super::negotiator::{max_message_size, EndpointNegotiator, GdrSupport, NegotiatorSettings};
use super::version::{DynamicSymbolVersionProvider, VersionProvider, VersionQuery};
use crate::config::{Accelerator, Config};
use crate::constants::env_vars::{
    FI_EFA_FORK_SAFE, FI_PROVIDER, NCCL_NET_FORCE_FLUSH, NCCL_NVLSTREE_MAX_CHUNKSIZE,
    NCCL_NVLS_CHUNKSIZE, NCCL_NVLS_ENABLE, NCCL_TOPO_FILE,
};
use crate::constants::transport::{DEFAULT_PROTOCOL, EFA_PROVIDER};
use crate::constants::tuning::{
    DEFAULT_NET_LATENCY_US, FORCE_FLUSH_DISABLED_VALUE, FORK_SAFE_VALUE, NVLS_CHUNK_SIZE,
    NVLS_DISABLED_VALUE, NVLS_FIXED_NCCL_VERSION,
};
use crate::env::{EnvStore, ProcessEnv};
use crate::error::{PlatformError, Result};
use crate::metrics;

/// Effective platform settings produced by initialization.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformInit {
    /// Instance type read from the descriptor file.
    pub platform_type: Option<String>,
    /// Catalog record for the instance type, if known.
    pub platform: Option<&'static PlatformCapabilityRecord>,
    /// Provider filter in effect after initialization.
    pub provider_filter: Option<String>,
    /// Whether the EFA provider is the one selected.
    pub efa_selected: bool,
    pub protocol: Protocol,
    pub nic_dup_conns: u32,
    /// Latency estimate in microseconds.
    pub net_latency: f32,
    pub domain_per_thread: bool,
    /// Topology file NCCL will read, if any.
    pub topology_file: Option<PathBuf>,
    pub accelerator: Accelerator,
    pub max_message_size: usize,
}

impl PlatformInit {
    /// Build the endpoint negotiator for a new transport domain.
    pub fn negotiator(
        &self,
        config: &Config,
        gdr_support: GdrSupport,
        env: Arc<dyn EnvStore>,
    ) -> EndpointNegotiator {
        let settings = NegotiatorSettings {
            protocol: self.protocol,
            platform: self.platform,
            gdr_support,
            disable_gdr_required_check: config.disable_gdr_required_check,
            disable_native_rdma_check: config.disable_native_rdma_check,
            accelerator: self.accelerator,
            max_message_size: self.max_message_size,
        };
        EndpointNegotiator::new(settings, env)
    }
}

/// Builder for a platform initialization run.
pub struct PlatformInitializer<'a> {
    config: &'a Config,
    cache: &'a PlatformCache,
    env: Arc<dyn EnvStore>,
    versions: Arc<dyn VersionProvider>,
}

impl<'a> PlatformInitializer<'a> {
    /// Initializer against the process environment and loaded libraries.
    pub fn new(config: &'a Config, cache: &'a PlatformCache) -> Self {
        Self {
            config,
            cache,
            env: Arc::new(ProcessEnv),
            versions: Arc::new(DynamicSymbolVersionProvider),
        }
    }

    pub fn with_env(mut self, env: Arc<dyn EnvStore>) -> Self {
        self.env = env;
        self
    }

    pub fn with_version_provider(mut self, versions: Arc<dyn VersionProvider>) -> Self {
        self.versions = versions;
        self
    }

    /// Run every initialization step in order.
    pub fn run(self) -> Result<PlatformInit> {
        info!("Initializing EFA platform configuration...");

        let platform_type = self.cache.identity();
        let platform = self.cache.capabilities();
        metrics::record_platform_detected(platform.is_some());
        match (&platform_type, platform) {
            (Some(name), Some(_)) => info!("Platform detected: {}", name),
            (Some(name), None) => info!("No platform-specific settings for {}", name),
            (None, _) => info!("Platform type unknown; using default settings"),
        }

        let (provider_filter, efa_selected) = self.select_provider();

        if self.config.accelerator == Accelerator::Nvidia {
            self.configure_fork_safety()?;
            self.configure_nvls()?;
            if let Some(record) = platform {
                self.configure_net_flush(record)?;
            }
            self.apply_default(NCCL_NVLSTREE_MAX_CHUNKSIZE, NVLS_CHUNK_SIZE)?;
            self.apply_default(NCCL_NVLS_CHUNKSIZE, NVLS_CHUNK_SIZE)?;
        }

        let topology_file = self.configure_topology(platform)?;

        let init = PlatformInit {
            platform_type,
            platform,
            provider_filter,
            efa_selected,
            protocol: self.resolve_protocol(platform, efa_selected),
            nic_dup_conns: self.resolve_dup_conns(platform),
            net_latency: self.resolve_latency(platform),
            domain_per_thread: self.resolve_domain_per_thread(platform),
            topology_file,
            accelerator: self.config.accelerator,
            max_message_size: max_message_size(self.config.eager_max_size),
        };

        log_effective_configuration(&init);
        Ok(init)
    }

    /// Set `name` to `value` unless the user already set it.
    fn apply_default(&self, name: &str, value: &str) -> Result<bool> {
        let applied = self.env.set_default(name, value)?;
        if applied {
            info!("Setting {} to {}", name, value);
            metrics::record_env_default(name);
        } else {
            debug!("{} already set; leaving it unchanged", name);
        }
        Ok(applied)
    }

    /// Provider filter for the plugin's own provider query. Without a user
    /// filter EFA is selected; the environment is left untouched.
    fn select_provider(&self) -> (Option<String>, bool) {
        let filter = self.env.get(FI_PROVIDER).unwrap_or_else(|| {
            debug!("{} unset; selecting the {} provider", FI_PROVIDER, EFA_PROVIDER);
            EFA_PROVIDER.to_string()
        });
        let efa_selected = filter == EFA_PROVIDER;
        (Some(filter), efa_selected)
    }

    fn configure_fork_safety(&self) -> Result<()> {
        let variable = match self.versions.fabric_version() {
            Some(version) => {
                trace!("Libfabric version {}", version);
                version.fork_safe_variable()
            }
            None => FI_EFA_FORK_SAFE,
        };
        self.apply_default(variable, FORK_SAFE_VALUE)?;
        Ok(())
    }

    /// NCCL releases before 2.18.5 can hang or crash with NVLS enabled.
    fn configure_nvls(&self) -> Result<()> {
        if self.env.is_set(NCCL_NVLS_ENABLE) {
            return Ok(());
        }

        match self.versions.collective_version() {
            VersionQuery::Unavailable => {
                debug!("NCCL version query unavailable; skipping NVLS check");
                Ok(())
            }
            VersionQuery::Failed(rc) => Err(PlatformError::VersionQuery(format!(
                "ncclGetVersion failed with {}",
                rc
            ))),
            VersionQuery::Available(version) if version < NVLS_FIXED_NCCL_VERSION => {
                info!("Disabling NVLS support due to NCCL version {}", version);
                self.apply_default(NCCL_NVLS_ENABLE, NVLS_DISABLED_VALUE)?;
                Ok(())
            }
            VersionQuery::Available(version) => {
                trace!("NCCL version {} does not need the NVLS workaround", version);
                Ok(())
            }
        }
    }

    fn configure_net_flush(&self, record: &PlatformCapabilityRecord) -> Result<()> {
        if !record.net_flush_required {
            self.apply_default(NCCL_NET_FORCE_FLUSH, FORCE_FLUSH_DISABLED_VALUE)?;
        }
        Ok(())
    }

    fn configure_topology(
        &self,
        platform: Option<&'static PlatformCapabilityRecord>,
    ) -> Result<Option<PathBuf>> {
        if let Some(existing) = self.env.get(NCCL_TOPO_FILE) {
            debug!("Using user topology file {}", existing);
            return Ok(Some(PathBuf::from(existing)));
        }

        let Some(file) = platform.and_then(|record| record.topology) else {
            trace!("No topology file for this platform; NCCL will auto-detect");
            return Ok(None);
        };

        let path = self.config.topology_dir.join(file);
        info!(
            "Running on {} platform, topology file {}",
            platform.map_or("unknown", |record| record.name),
            path.display()
        );
        self.apply_default(NCCL_TOPO_FILE, &path.to_string_lossy())?;
        Ok(Some(path))
    }

    fn resolve_protocol(
        &self,
        platform: Option<&'static PlatformCapabilityRecord>,
        efa_selected: bool,
    ) -> Protocol {
        if let Some(protocol) = self.config.protocol {
            return protocol;
        }
        match platform {
            Some(record) if efa_selected => record.default_protocol,
            _ => DEFAULT_PROTOCOL,
        }
    }

    fn resolve_dup_conns(&self, platform: Option<&'static PlatformCapabilityRecord>) -> u32 {
        if self.config.nic_dup_conns > 0 {
            return self.config.nic_dup_conns;
        }
        platform.map_or(0, |record| record.default_dup_conns)
    }

    fn resolve_latency(&self, platform: Option<&'static PlatformCapabilityRecord>) -> f32 {
        self.config
            .latency_override()
            .or_else(|| platform.and_then(|record| record.latency))
            .unwrap_or(DEFAULT_NET_LATENCY_US)
    }

    fn resolve_domain_per_thread(&self, platform: Option<&'static PlatformCapabilityRecord>) -> bool {
        self.config
            .domain_per_thread
            .unwrap_or_else(|| platform.is_some_and(|record| record.domain_per_thread))
    }
}

/// Initialize against the real process environment and loaded libraries.
pub fn initialize_platform(config: &Config, cache: &PlatformCache) -> Result<PlatformInit> {
    PlatformInitializer::new(config, cache).run()
}

/// Log the effective configuration after platform defaults are applied
fn log_effective_configuration(init: &PlatformInit) {
    info!("=== Effective Platform Configuration ===");
    info!("Platform type: {}", init.platform_type.as_deref().unwrap_or("unknown"));
    info!("Provider filter: {:?} (EFA selected: {})", init.provider_filter, init.efa_selected);
    info!("Protocol: {}", init.protocol);
    info!("NIC duplicate connections: {}", init.nic_dup_conns);
    info!("Network latency: {} us", init.net_latency);
    info!(
        "Domain scope: {}",
        if init.domain_per_thread { "per thread" } else { "per process" }
    );
    match &init.topology_file {
        Some(path) => info!("Topology file: {}", path.display()),
        None => info!("Topology file: auto-detect"),
    }
    info!("========================================");
}
