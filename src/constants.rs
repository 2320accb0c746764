//! Domain constants for EFA platform configuration.
//!
//! This module contains compile-time constants used throughout the crate.
//! These are separated from runtime configuration to provide clear distinction
//! between values that never change and those that can be configured.

/// System file locations.
pub mod paths {
    /// DMI descriptor whose first line names the EC2 instance type.
    pub const PRODUCT_NAME_PATH: &str = "/sys/devices/virtual/dmi/id/product_name";

    /// Root of the per-device InfiniBand class tree.
    pub const INFINIBAND_CLASS_DIR: &str = "/sys/class/infiniband";

    /// File under `<class dir>/<device>/` that holds the node GUID.
    pub const NODE_GUID_FILE: &str = "node_guid";

    /// Install location of the static topology XML files.
    pub const TOPOLOGY_DIR: &str = "/usr/share/aws-ofi-nccl/xml";
}

/// Environment variables read or defaulted during platform setup.
pub mod env_vars {
    /// Libfabric provider selection filter.
    pub const FI_PROVIDER: &str = "FI_PROVIDER";

    /// Fork-safety flag understood by libfabric >= 1.13.
    pub const FI_EFA_FORK_SAFE: &str = "FI_EFA_FORK_SAFE";

    /// Fork-safety flag understood by rdma-core for older libfabric releases.
    pub const RDMAV_FORK_SAFE: &str = "RDMAV_FORK_SAFE";

    /// NCCL protocol selection (LL, LL128, Simple).
    pub const NCCL_PROTO: &str = "NCCL_PROTO";

    /// NCCL NVLink SHARP enablement.
    pub const NCCL_NVLS_ENABLE: &str = "NCCL_NVLS_ENABLE";

    /// NCCL network flush override.
    pub const NCCL_NET_FORCE_FLUSH: &str = "NCCL_NET_FORCE_FLUSH";

    /// NCCL NVLS tree maximum chunk size.
    pub const NCCL_NVLSTREE_MAX_CHUNKSIZE: &str = "NCCL_NVLSTREE_MAX_CHUNKSIZE";

    /// NCCL NVLS chunk size.
    pub const NCCL_NVLS_CHUNKSIZE: &str = "NCCL_NVLS_CHUNKSIZE";

    /// NCCL topology description file.
    pub const NCCL_TOPO_FILE: &str = "NCCL_TOPO_FILE";

    /// Prefix of the plugin's own configuration parameters.
    pub const PLUGIN_PREFIX: &str = "OFI_NCCL_";
}

/// Transport provider and protocol values.
pub mod transport {
    use crate::platform::catalog::Protocol;

    /// Libfabric provider name of the Elastic Fabric Adapter.
    pub const EFA_PROVIDER: &str = "efa";

    /// Protocol used when neither the user nor the platform picks one.
    pub const DEFAULT_PROTOCOL: Protocol = Protocol::SendRecv;

    /// NCCL protocol value that tolerates unordered delivery.
    pub const SAFE_NCCL_PROTO: &str = "simple";

    /// Platforms whose EFA devices misreport write ordering under RDMA.
    pub const ORDERING_MISREPORTED_PLATFORMS: &[&str] = &["p5.48xlarge"];

    /// Size of the largest RDMA control message the plugin sends.
    pub const RDMA_CTRL_MSG_SIZE: usize = 1096;

    /// Size of the connection metadata exchanged during connection setup.
    pub const RDMA_CONNECTION_INFO_SIZE: usize = 792;

    /// Default eager message size limit.
    pub const DEFAULT_EAGER_MAX_SIZE: usize = 8192;
}

/// Tuning defaults applied when neither the user nor the platform sets a value.
pub mod tuning {
    /// Inter-node latency estimate in microseconds (historical EFA default).
    pub const DEFAULT_NET_LATENCY_US: f32 = 150.0;

    /// Value written for the fork-safety flag.
    pub const FORK_SAFE_VALUE: &str = "1";

    /// Value that turns NVLS off on affected NCCL releases.
    pub const NVLS_DISABLED_VALUE: &str = "0";

    /// Value that stops NCCL from issuing network flushes.
    pub const FORCE_FLUSH_DISABLED_VALUE: &str = "0";

    /// NCCL chunk size that recovers the NVLS tree regression (512 KiB).
    pub const NVLS_CHUNK_SIZE: &str = "524288";

    /// First NCCL release (2.18.5) without the NVLS topology bug.
    pub const NVLS_FIXED_NCCL_VERSION: u32 = 21805;

    /// First libfabric minor release (1.13) that reads `FI_EFA_FORK_SAFE`.
    pub const FORK_SAFE_FABRIC_VERSION: (u32, u32) = (1, 13);
}

/// Rail layout of multi-VF network cards.
pub mod rails {
    /// Virtual functions exposed per physical card.
    pub const VF_SLOTS_PER_CARD: usize = 2;

    /// First rail position assigned to each VF slot.
    pub const RAIL_BASE_POSITIONS: [usize; VF_SLOTS_PER_CARD] = [0, 1];

    /// Distance between consecutive rails of the same VF slot.
    pub const RAIL_POSITION_STRIDE: usize = VF_SLOTS_PER_CARD;

    /// Length of a rendered node GUID (`XXXX:XXXX:XXXX:XXXX`).
    pub const GUID_STRING_LEN: usize = 19;

    /// Byte offsets of the group separators in a rendered GUID.
    pub const GUID_COLON_POSITIONS: [usize; 3] = [4, 9, 14];
}
