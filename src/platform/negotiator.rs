//! Per-domain endpoint capability negotiation.
//!
//! The first EFA endpoint configured on a domain decides whether the domain
//! runs with 128-byte aligned in-order delivery. Every later endpoint must
//! reproduce that outcome: a domain that negotiated ordering fails hard if an
//! endpoint can no longer provide it, while a domain that settled on unordered
//! delivery accepts any endpoint. Neuron builds only run the GDR and
//! emulated-write checks; the domain never leaves `Unconfigured` there.
//!
//! ```text
//!                 set ok                     set ok
//!  Unconfigured ─────────▶ ConfiguredOrdered ◀──────┐
//!       │                         │ unsupported/err  │
//!       │ unsupported             ▼                  │
//!       │ (or misreporting     hard error ───────────┘
//!       │  platform)
//!       ▼
//!  ConfiguredUnordered ──▶ ConfiguredUnordered (always)
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::catalog::{PlatformCapabilityRecord, Protocol};
use super::endpoint::{EndpointOption, OptionValue, TransportEndpoint};
use crate::config::Accelerator;
use crate::constants::env_vars::NCCL_PROTO;
use crate::constants::transport::{
    EFA_PROVIDER, ORDERING_MISREPORTED_PLATFORMS, RDMA_CONNECTION_INFO_SIZE, RDMA_CTRL_MSG_SIZE,
    SAFE_NCCL_PROTO,
};
use crate::env::EnvStore;
use crate::error::{PlatformError, Result};
use crate::metrics;

/// Ordering state of one transport domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NegotiationState {
    /// No endpoint has been configured yet.
    Unconfigured,
    /// In-order delivery was negotiated and is required from every endpoint.
    ConfiguredOrdered,
    /// The domain runs without in-order delivery.
    ConfiguredUnordered,
}

impl NegotiationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Unconfigured => "unconfigured",
            NegotiationState::ConfiguredOrdered => "ordered",
            NegotiationState::ConfiguredUnordered => "unordered",
        }
    }
}

/// GPUDirect RDMA availability for the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum GdrSupport {
    #[default]
    Unknown,
    Supported,
    Unsupported,
}

/// Inputs fixed for the lifetime of a domain.
#[derive(Debug, Clone)]
pub struct NegotiatorSettings {
    /// Protocol selected during platform initialization.
    pub protocol: Protocol,
    /// Catalog record of the host, if known.
    pub platform: Option<&'static PlatformCapabilityRecord>,
    pub gdr_support: GdrSupport,
    pub disable_gdr_required_check: bool,
    pub disable_native_rdma_check: bool,
    pub accelerator: Accelerator,
    /// Largest message the plugin sends with a two-sided operation.
    pub max_message_size: usize,
}

impl NegotiatorSettings {
    /// Settings for `protocol` with every check enabled.
    pub fn new(protocol: Protocol, platform: Option<&'static PlatformCapabilityRecord>) -> Self {
        Self {
            protocol,
            platform,
            gdr_support: GdrSupport::Unknown,
            disable_gdr_required_check: false,
            disable_native_rdma_check: false,
            accelerator: Accelerator::default(),
            max_message_size: max_message_size(0),
        }
    }
}

/// Largest message the RDMA protocol sends given the eager limit.
pub fn max_message_size(eager_max_size: usize) -> usize {
    RDMA_CTRL_MSG_SIZE
        .max(eager_max_size)
        .max(RDMA_CONNECTION_INFO_SIZE)
}

/// Endpoint configuration state machine for one transport domain.
pub struct EndpointNegotiator {
    settings: NegotiatorSettings,
    env: Arc<dyn EnvStore>,
    state: Mutex<NegotiationState>,
}

impl std::fmt::Debug for EndpointNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointNegotiator")
            .field("settings", &self.settings)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl EndpointNegotiator {
    pub fn new(settings: NegotiatorSettings, env: Arc<dyn EnvStore>) -> Self {
        Self {
            settings,
            env,
            state: Mutex::new(NegotiationState::Unconfigured),
        }
    }

    pub fn settings(&self) -> &NegotiatorSettings {
        &self.settings
    }

    /// Current ordering state of the domain.
    pub fn state(&self) -> NegotiationState {
        *self.state.lock()
    }

    /// Validate and configure a freshly created endpoint.
    pub fn configure_endpoint(&self, endpoint: &mut dyn TransportEndpoint) -> Result<()> {
        if endpoint.provider_name() != EFA_PROVIDER {
            trace!(
                "Skipping endpoint configuration for provider {}",
                endpoint.provider_name()
            );
            return Ok(());
        }

        let result = self.configure_efa_endpoint(endpoint);
        if let Err(e) = &result {
            metrics::record_negotiation_failure(e.kind());
        }
        result
    }

    fn configure_efa_endpoint(&self, endpoint: &mut dyn TransportEndpoint) -> Result<()> {
        self.check_gdr_required()?;

        if self.settings.protocol == Protocol::Rdma && !self.settings.disable_native_rdma_check {
            validate_rdma_write(endpoint)?;
        }

        // Ordering and message size only matter to the NCCL protocols.
        if self.settings.accelerator != Accelerator::Nvidia {
            return Ok(());
        }

        // Held across the whole decision so concurrent first calls agree.
        let mut state = self.state.lock();
        let next = self.negotiate_ordering(*state, endpoint)?;
        if next != *state {
            info!(
                "Endpoint ordering negotiated for {} protocol: {}",
                self.settings.protocol,
                next.as_str()
            );
            metrics::record_negotiation(next.as_str());
            *state = next;
        }

        if self.settings.protocol == Protocol::Rdma {
            self.configure_max_msg_size(endpoint)?;
        }

        Ok(())
    }

    fn check_gdr_required(&self) -> Result<()> {
        if self.settings.disable_gdr_required_check {
            return Ok(());
        }
        match self.settings.platform {
            Some(record)
                if record.gdr_required && self.settings.gdr_support != GdrSupport::Supported =>
            {
                warn!("GDR disabled on GDR-supported instance type {}", record.name);
                Err(PlatformError::GdrRequired {
                    platform: record.name.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn negotiate_ordering(
        &self,
        state: NegotiationState,
        endpoint: &mut dyn TransportEndpoint,
    ) -> Result<NegotiationState> {
        let option = self.settings.protocol.in_order_option();

        match state {
            NegotiationState::Unconfigured => {
                if self.ordering_misreported() {
                    info!("Skipping NCCL_PROTO checks on P5 + RDMA");
                    return Ok(NegotiationState::ConfiguredUnordered);
                }
                if try_set_in_order(endpoint, option)? {
                    Ok(NegotiationState::ConfiguredOrdered)
                } else {
                    self.configure_safe_protocol()?;
                    Ok(NegotiationState::ConfiguredUnordered)
                }
            }
            NegotiationState::ConfiguredOrdered => {
                if try_set_in_order(endpoint, option)? {
                    Ok(NegotiationState::ConfiguredOrdered)
                } else {
                    warn!(
                        "Setting {} option failed after succeeding during initialization",
                        option
                    );
                    Err(PlatformError::OrderingMismatch {
                        option: option.name(),
                    })
                }
            }
            NegotiationState::ConfiguredUnordered => Ok(NegotiationState::ConfiguredUnordered),
        }
    }

    /// EFA on these platforms may deliver a correct RDMA write payload twice,
    /// which clears the write ordering flag without breaking buffer reuse.
    fn ordering_misreported(&self) -> bool {
        self.settings.protocol == Protocol::Rdma
            && !self.env.is_set(NCCL_PROTO)
            && self
                .settings
                .platform
                .is_some_and(|record| ORDERING_MISREPORTED_PLATFORMS.contains(&record.name))
    }

    /// Steer NCCL to the protocol that tolerates unordered delivery.
    fn configure_safe_protocol(&self) -> Result<()> {
        match self.env.get(NCCL_PROTO) {
            None => {
                info!("Setting NCCL_PROTO to \"{}\"", SAFE_NCCL_PROTO);
                self.env.set_default(NCCL_PROTO, SAFE_NCCL_PROTO)?;
                metrics::record_env_default(NCCL_PROTO);
            }
            Some(value) if !value.eq_ignore_ascii_case(SAFE_NCCL_PROTO) => {
                warn!(
                    "NCCL_PROTO was set to \"{}\", but the Libfabric endpoint does not support \
                     128 byte in-order aligned stores. This endpoint may corrupt data during \
                     communication",
                    value
                );
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn configure_max_msg_size(&self, endpoint: &mut dyn TransportEndpoint) -> Result<()> {
        let size = self.settings.max_message_size;
        match endpoint.set_option(EndpointOption::MaxMsgSize, OptionValue::Size(size)) {
            Ok(()) => {
                trace!("fi_setopt(FI_OPT_MAX_MSG_SIZE) set to {}", size);
                Ok(())
            }
            Err(e) if e.is_unsupported() => {
                info!("Setting FI_OPT_MAX_MSG_SIZE not supported.");
                Ok(())
            }
            Err(e) => {
                warn!("Could not set FI_OPT_MAX_MSG_SIZE. {}", e);
                Err(PlatformError::EndpointOption {
                    option: EndpointOption::MaxMsgSize.name(),
                    source: e,
                })
            }
        }
    }
}

/// Ask for in-order delivery. `Ok(false)` means the provider does not support it.
fn try_set_in_order(endpoint: &mut dyn TransportEndpoint, option: EndpointOption) -> Result<bool> {
    let have_ordering = match endpoint.set_option(option, OptionValue::Bool(true)) {
        Ok(()) => true,
        Err(e) if e.is_unsupported() => {
            info!("Setting {} not supported.", option);
            false
        }
        Err(e) => {
            warn!("Could not set {}. {}", option, e);
            return Err(PlatformError::EndpointOption {
                option: option.name(),
                source: e,
            });
        }
    };

    trace!(
        "fi_setopt({}) ordering result {}",
        option,
        if have_ordering { "yes" } else { "no" }
    );
    Ok(have_ordering)
}

/// Fail unless RDMA write is native on this endpoint.
fn validate_rdma_write(endpoint: &dyn TransportEndpoint) -> Result<()> {
    let option = EndpointOption::EmulatedWrite;
    match endpoint.get_option(option) {
        Ok(OptionValue::Bool(false)) => {
            debug!("Get endpoint option {}. optval: false", option);
            Ok(())
        }
        Ok(OptionValue::Bool(true)) => {
            warn!("{} is true when the communication protocol is RDMA write.", option);
            Err(PlatformError::EmulatedWrite(format!(
                "{} is true when the communication protocol is RDMA write",
                option
            )))
        }
        Ok(other) => {
            warn!("Unexpected response when checking {}: {:?}", option, other);
            Err(PlatformError::EmulatedWrite(format!(
                "unexpected value {:?} for {}",
                other, option
            )))
        }
        Err(e) => {
            warn!("Couldn't get {}. {}", option, e);
            Err(PlatformError::EndpointOption {
                option: option.name(),
                source: e,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MemoryEnv;
    use crate::platform::catalog::lookup_capabilities;
    use crate::platform::endpoint::{FabricError, ScriptedEndpoint};

    fn negotiator(protocol: Protocol, env: Arc<MemoryEnv>) -> EndpointNegotiator {
        EndpointNegotiator::new(NegotiatorSettings::new(protocol, None), env)
    }

    fn other_error() -> FabricError {
        FabricError::Other {
            code: -5,
            message: "Input/output error".to_string(),
        }
    }

    #[test]
    fn test_first_success_records_ordered() {
        let env = Arc::new(MemoryEnv::new());
        let n = negotiator(Protocol::SendRecv, env.clone());
        let mut ep = ScriptedEndpoint::efa();

        n.configure_endpoint(&mut ep).unwrap();

        assert_eq!(n.state(), NegotiationState::ConfiguredOrdered);
        assert!(ep.was_set(EndpointOption::SendRecvInOrderAligned128Bytes));
        assert!(!ep.was_set(EndpointOption::MaxMsgSize));
        assert!(env.get(NCCL_PROTO).is_none());
    }

    #[test]
    fn test_ordered_domain_is_idempotent() {
        let n = negotiator(Protocol::Rdma, Arc::new(MemoryEnv::new()));

        for _ in 0..101 {
            let mut ep = ScriptedEndpoint::efa();
            n.configure_endpoint(&mut ep).unwrap();
            assert!(ep.was_set(EndpointOption::WriteInOrderAligned128Bytes));
            assert_eq!(n.state(), NegotiationState::ConfiguredOrdered);
        }
    }

    #[test]
    fn test_ordered_domain_rejects_unsupported() {
        let n = negotiator(Protocol::SendRecv, Arc::new(MemoryEnv::new()));
        n.configure_endpoint(&mut ScriptedEndpoint::efa()).unwrap();

        for _ in 0..3 {
            let mut ep = ScriptedEndpoint::efa().on_set(
                EndpointOption::SendRecvInOrderAligned128Bytes,
                Err(FabricError::NotSupported),
            );
            let err = n.configure_endpoint(&mut ep).unwrap_err();
            assert!(matches!(err, PlatformError::OrderingMismatch { .. }));
            assert_eq!(n.state(), NegotiationState::ConfiguredOrdered);
        }
    }

    #[test]
    fn test_ordered_domain_rejects_other_errors() {
        let n = negotiator(Protocol::SendRecv, Arc::new(MemoryEnv::new()));
        n.configure_endpoint(&mut ScriptedEndpoint::efa()).unwrap();

        let mut ep = ScriptedEndpoint::efa()
            .on_set(EndpointOption::SendRecvInOrderAligned128Bytes, Err(other_error()));
        assert!(matches!(
            n.configure_endpoint(&mut ep),
            Err(PlatformError::EndpointOption { .. })
        ));
        assert_eq!(n.state(), NegotiationState::ConfiguredOrdered);
    }

    #[test]
    fn test_unsupported_first_call_falls_back() {
        let env = Arc::new(MemoryEnv::new());
        let n = negotiator(Protocol::SendRecv, env.clone());
        let mut ep = ScriptedEndpoint::efa().on_set(
            EndpointOption::SendRecvInOrderAligned128Bytes,
            Err(FabricError::NoProtocolOption),
        );

        n.configure_endpoint(&mut ep).unwrap();

        assert_eq!(n.state(), NegotiationState::ConfiguredUnordered);
        assert_eq!(env.get(NCCL_PROTO).as_deref(), Some("simple"));

        // Later endpoints are accepted whatever they report.
        let mut failing = ScriptedEndpoint::efa().on_set(
            EndpointOption::SendRecvInOrderAligned128Bytes,
            Err(other_error()),
        );
        n.configure_endpoint(&mut failing).unwrap();
        n.configure_endpoint(&mut ScriptedEndpoint::efa()).unwrap();
        assert!(!failing.was_set(EndpointOption::SendRecvInOrderAligned128Bytes));
        assert_eq!(n.state(), NegotiationState::ConfiguredUnordered);
    }

    #[test]
    fn test_fallback_keeps_user_protocol() {
        let env = Arc::new(MemoryEnv::from_pairs([(NCCL_PROTO, "LL128")]));
        let n = negotiator(Protocol::SendRecv, env.clone());
        let mut ep = ScriptedEndpoint::efa().on_set(
            EndpointOption::SendRecvInOrderAligned128Bytes,
            Err(FabricError::NotSupported),
        );

        n.configure_endpoint(&mut ep).unwrap();

        assert_eq!(n.state(), NegotiationState::ConfiguredUnordered);
        assert_eq!(env.get(NCCL_PROTO).as_deref(), Some("LL128"));
    }

    #[test]
    fn test_neuron_endpoint_skips_ordering() {
        let env = Arc::new(MemoryEnv::new());
        let mut settings = NegotiatorSettings::new(Protocol::Rdma, None);
        settings.accelerator = Accelerator::Neuron;
        let n = EndpointNegotiator::new(settings, env.clone());
        let mut ep = ScriptedEndpoint::efa()
            .on_set(
                EndpointOption::WriteInOrderAligned128Bytes,
                Err(FabricError::Other {
                    code: -22,
                    message: "Invalid argument".to_string(),
                }),
            )
            .on_set(EndpointOption::MaxMsgSize, Err(other_error()));

        n.configure_endpoint(&mut ep).unwrap();

        assert!(ep.set_calls().is_empty());
        assert_eq!(n.state(), NegotiationState::Unconfigured);
        assert!(env.get(NCCL_PROTO).is_none());

        // The emulated-write check still applies.
        let mut emulated = ScriptedEndpoint::efa()
            .on_get(EndpointOption::EmulatedWrite, Ok(OptionValue::Bool(true)));
        assert!(matches!(
            n.configure_endpoint(&mut emulated),
            Err(PlatformError::EmulatedWrite(_))
        ));
    }

    /// Environment that refuses every write.
    struct ReadOnlyEnv;

    impl EnvStore for ReadOnlyEnv {
        fn get(&self, _name: &str) -> Option<String> {
            None
        }

        fn set(&self, name: &str, _value: &str) -> Result<()> {
            Err(PlatformError::Environment {
                name: name.to_string(),
                reason: "read-only environment".to_string(),
            })
        }
    }

    #[test]
    fn test_failed_protocol_write_leaves_domain_unconfigured() {
        let n = EndpointNegotiator::new(
            NegotiatorSettings::new(Protocol::SendRecv, None),
            Arc::new(ReadOnlyEnv),
        );
        let mut ep = ScriptedEndpoint::efa().on_set(
            EndpointOption::SendRecvInOrderAligned128Bytes,
            Err(FabricError::NotSupported),
        );

        let err = n.configure_endpoint(&mut ep).unwrap_err();

        assert!(matches!(err, PlatformError::Environment { ref name, .. } if name == "NCCL_PROTO"));
        assert_eq!(n.state(), NegotiationState::Unconfigured);

        // A later endpoint with ordering support can still settle the domain.
        n.configure_endpoint(&mut ScriptedEndpoint::efa()).unwrap();
        assert_eq!(n.state(), NegotiationState::ConfiguredOrdered);
    }

    #[test]
    fn test_first_call_error_leaves_domain_unconfigured() {
        let n = negotiator(Protocol::SendRecv, Arc::new(MemoryEnv::new()));
        let mut ep = ScriptedEndpoint::efa()
            .on_set(EndpointOption::SendRecvInOrderAligned128Bytes, Err(other_error()));

        assert!(n.configure_endpoint(&mut ep).is_err());
        assert_eq!(n.state(), NegotiationState::Unconfigured);

        n.configure_endpoint(&mut ScriptedEndpoint::efa()).unwrap();
        assert_eq!(n.state(), NegotiationState::ConfiguredOrdered);
    }

    #[test]
    fn test_misreporting_platform_skips_probe() {
        let env = Arc::new(MemoryEnv::new());
        let mut settings = NegotiatorSettings::new(Protocol::Rdma, lookup_capabilities("p5.48xlarge"));
        settings.gdr_support = GdrSupport::Supported;
        let n = EndpointNegotiator::new(settings, env.clone());
        let mut ep = ScriptedEndpoint::efa();

        n.configure_endpoint(&mut ep).unwrap();

        assert_eq!(n.state(), NegotiationState::ConfiguredUnordered);
        assert!(!ep.was_set(EndpointOption::WriteInOrderAligned128Bytes));
        assert!(ep.was_set(EndpointOption::MaxMsgSize));
        assert!(env.get(NCCL_PROTO).is_none());
    }

    #[test]
    fn test_misreporting_platform_probes_with_user_protocol() {
        let env = Arc::new(MemoryEnv::from_pairs([(NCCL_PROTO, "simple")]));
        let mut settings = NegotiatorSettings::new(Protocol::Rdma, lookup_capabilities("p5.48xlarge"));
        settings.gdr_support = GdrSupport::Supported;
        let n = EndpointNegotiator::new(settings, env);
        let mut ep = ScriptedEndpoint::efa();

        n.configure_endpoint(&mut ep).unwrap();

        assert!(ep.was_set(EndpointOption::WriteInOrderAligned128Bytes));
        assert_eq!(n.state(), NegotiationState::ConfiguredOrdered);
    }

    #[test]
    fn test_max_msg_size_is_best_effort() {
        let n = negotiator(Protocol::Rdma, Arc::new(MemoryEnv::new()));
        let mut ep = ScriptedEndpoint::efa()
            .on_set(EndpointOption::MaxMsgSize, Err(FabricError::NotSupported));
        n.configure_endpoint(&mut ep).unwrap();

        let expected = OptionValue::Size(max_message_size(0));
        assert!(ep
            .set_calls()
            .contains(&(EndpointOption::MaxMsgSize, expected)));

        let mut ep = ScriptedEndpoint::efa().on_set(EndpointOption::MaxMsgSize, Err(other_error()));
        assert!(matches!(
            n.configure_endpoint(&mut ep),
            Err(PlatformError::EndpointOption { option: "FI_OPT_MAX_MSG_SIZE", .. })
        ));
    }

    #[test]
    fn test_max_message_size_covers_eager_limit() {
        assert_eq!(max_message_size(65536), 65536);
        assert!(max_message_size(0) >= RDMA_CTRL_MSG_SIZE);
        assert!(max_message_size(0) >= RDMA_CONNECTION_INFO_SIZE);
    }

    #[test]
    fn test_non_efa_provider_is_skipped() {
        let n = negotiator(Protocol::Rdma, Arc::new(MemoryEnv::new()));
        let mut ep = ScriptedEndpoint::new("tcp");

        n.configure_endpoint(&mut ep).unwrap();

        assert!(ep.set_calls().is_empty());
        assert_eq!(n.state(), NegotiationState::Unconfigured);
    }

    #[test]
    fn test_gdr_required_check() {
        let settings = NegotiatorSettings::new(Protocol::SendRecv, lookup_capabilities("p4de.24xlarge"));
        let n = EndpointNegotiator::new(settings.clone(), Arc::new(MemoryEnv::new()));
        assert!(matches!(
            n.configure_endpoint(&mut ScriptedEndpoint::efa()),
            Err(PlatformError::GdrRequired { .. })
        ));
        assert_eq!(n.state(), NegotiationState::Unconfigured);

        let mut disabled = settings.clone();
        disabled.disable_gdr_required_check = true;
        let n = EndpointNegotiator::new(disabled, Arc::new(MemoryEnv::new()));
        assert!(n.configure_endpoint(&mut ScriptedEndpoint::efa()).is_ok());

        let mut supported = settings;
        supported.gdr_support = GdrSupport::Supported;
        let n = EndpointNegotiator::new(supported, Arc::new(MemoryEnv::new()));
        assert!(n.configure_endpoint(&mut ScriptedEndpoint::efa()).is_ok());
    }

    #[test]
    fn test_emulated_write_rejected() {
        let n = negotiator(Protocol::Rdma, Arc::new(MemoryEnv::new()));
        let mut ep = ScriptedEndpoint::efa()
            .on_get(EndpointOption::EmulatedWrite, Ok(OptionValue::Bool(true)));
        assert!(matches!(
            n.configure_endpoint(&mut ep),
            Err(PlatformError::EmulatedWrite(_))
        ));

        let mut ep = ScriptedEndpoint::efa()
            .on_get(EndpointOption::EmulatedWrite, Err(FabricError::NoProtocolOption));
        assert!(matches!(
            n.configure_endpoint(&mut ep),
            Err(PlatformError::EndpointOption { .. })
        ));
        assert_eq!(n.state(), NegotiationState::Unconfigured);

        let mut settings = NegotiatorSettings::new(Protocol::Rdma, None);
        settings.disable_native_rdma_check = true;
        let n = EndpointNegotiator::new(settings, Arc::new(MemoryEnv::new()));
        let mut ep = ScriptedEndpoint::efa()
            .on_get(EndpointOption::EmulatedWrite, Ok(OptionValue::Bool(true)));
        assert!(n.configure_endpoint(&mut ep).is_ok());
    }

    #[test]
    fn test_concurrent_first_calls_agree() {
        let env = Arc::new(MemoryEnv::new());
        let n = negotiator(Protocol::SendRecv, env.clone());
        let barrier = std::sync::Barrier::new(8);

        let results: Vec<Result<()>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let n = &n;
                    let barrier = &barrier;
                    s.spawn(move || {
                        // Half of the endpoints cannot provide ordering.
                        let mut ep = if i % 2 == 0 {
                            ScriptedEndpoint::efa()
                        } else {
                            ScriptedEndpoint::efa().on_set(
                                EndpointOption::SendRecvInOrderAligned128Bytes,
                                Err(FabricError::NotSupported),
                            )
                        };
                        barrier.wait();
                        n.configure_endpoint(&mut ep)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        match n.state() {
            NegotiationState::ConfiguredOrdered => {
                // Only the endpoints that lack ordering may fail.
                let failures = results.iter().filter(|r| r.is_err()).count();
                assert!(failures <= 4);
                assert!(env.get(NCCL_PROTO).is_none());
            }
            NegotiationState::ConfiguredUnordered => {
                assert!(results.iter().all(|r| r.is_ok()));
                assert_eq!(env.get(NCCL_PROTO).as_deref(), Some("simple"));
            }
            NegotiationState::Unconfigured => panic!("domain left unconfigured"),
        }
    }
}
