//! EFA platform detection and transport setup.
//!
//! Identifies the EC2 instance type, looks up its tuning record, fills in
//! environment defaults for NCCL and libfabric, negotiates endpoint ordering
//! per transport domain, and orders multi-rail devices by virtual function.

pub mod catalog;
pub mod endpoint;
pub mod identity;
pub mod init;
pub mod negotiator;
pub mod rails;
pub mod version;

pub use catalog::{lookup_capabilities, PlatformCapabilityRecord, Protocol, PLATFORM_CATALOG};
pub use endpoint::{EndpointOption, FabricError, OptionValue, ScriptedEndpoint, TransportEndpoint};
pub use identity::{get_platform_identity, platform_capabilities, PlatformCache};
pub use init::{initialize_platform, PlatformInit, PlatformInitializer};
pub use negotiator::{EndpointNegotiator, GdrSupport, NegotiationState, NegotiatorSettings};
pub use rails::{assign_rail_positions, sort_rails, NodeGuid, RailDescriptor, RailSorter};
pub use version::{
    DynamicSymbolVersionProvider, FabricVersion, FixedVersionProvider, VersionProvider,
    VersionQuery,
};
