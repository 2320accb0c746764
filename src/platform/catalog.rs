//! Static catalog of known EC2 platform types and their tuning defaults.
//!
//! Adding a platform means extending [`PLATFORM_CATALOG`]; nothing here is
//! loaded at runtime.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::endpoint::EndpointOption;
use crate::error::PlatformError;

/// Communication protocol used by the transport plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Two-sided send/receive.
    SendRecv,
    /// One-sided RDMA write.
    Rdma,
}

impl Protocol {
    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::SendRecv => "SENDRECV",
            Protocol::Rdma => "RDMA",
        }
    }

    /// Endpoint option that requests 128-byte aligned in-order delivery
    /// for this protocol.
    pub fn in_order_option(&self) -> EndpointOption {
        match self {
            Protocol::SendRecv => EndpointOption::SendRecvInOrderAligned128Bytes,
            Protocol::Rdma => EndpointOption::WriteInOrderAligned128Bytes,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("SENDRECV") {
            Ok(Protocol::SendRecv)
        } else if s.eq_ignore_ascii_case("RDMA") {
            Ok(Protocol::Rdma)
        } else {
            Err(PlatformError::InvalidInput(format!(
                "unknown protocol {:?} (expected SENDRECV or RDMA)",
                s
            )))
        }
    }
}

impl Serialize for Protocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Tuning parameters for one EC2 platform type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformCapabilityRecord {
    /// Instance type as reported by DMI, e.g. `p4d.24xlarge`.
    pub name: &'static str,
    /// Topology XML file shipped for this platform.
    pub topology: Option<&'static str>,
    /// Duplicate connections per NIC; 0 defers to the global default.
    pub default_dup_conns: u32,
    /// Inter-node latency estimate in microseconds.
    pub latency: Option<f32>,
    /// Whether GPUDirect RDMA must be available.
    pub gdr_required: bool,
    /// Whether a network flush is needed after GPU receives.
    pub net_flush_required: bool,
    pub default_protocol: Protocol,
    /// One transport domain per thread instead of per process.
    pub domain_per_thread: bool,
}

/// Known platforms.
pub static PLATFORM_CATALOG: &[PlatformCapabilityRecord] = &[
    PlatformCapabilityRecord {
        name: "p4d.24xlarge",
        topology: Some("p4d-24xl-topo.xml"),
        default_dup_conns: 0,
        latency: Some(75.0),
        gdr_required: true,
        net_flush_required: true,
        default_protocol: Protocol::Rdma,
        domain_per_thread: false,
    },
    PlatformCapabilityRecord {
        name: "p4de.24xlarge",
        topology: Some("p4de-24xl-topo.xml"),
        default_dup_conns: 0,
        latency: Some(75.0),
        gdr_required: true,
        net_flush_required: true,
        default_protocol: Protocol::SendRecv,
        domain_per_thread: false,
    },
    PlatformCapabilityRecord {
        name: "p3dn.24xlarge",
        topology: None,
        default_dup_conns: 4,
        latency: Some(150.0),
        gdr_required: false,
        net_flush_required: true,
        default_protocol: Protocol::SendRecv,
        domain_per_thread: false,
    },
    PlatformCapabilityRecord {
        name: "p5.48xlarge",
        topology: Some("p5.48xl-topo.xml"),
        default_dup_conns: 0,
        latency: Some(75.0),
        gdr_required: true,
        net_flush_required: false,
        default_protocol: Protocol::Rdma,
        domain_per_thread: false,
    },
    PlatformCapabilityRecord {
        name: "g5.48xlarge",
        topology: Some("g5.48xl-topo.xml"),
        default_dup_conns: 0,
        latency: None,
        gdr_required: false,
        net_flush_required: true,
        default_protocol: Protocol::SendRecv,
        domain_per_thread: false,
    },
    PlatformCapabilityRecord {
        name: "trn1.32xlarge",
        topology: None,
        default_dup_conns: 0,
        latency: None,
        gdr_required: true,
        net_flush_required: true,
        default_protocol: Protocol::SendRecv,
        domain_per_thread: true,
    },
    PlatformCapabilityRecord {
        name: "trn1n.32xlarge",
        topology: None,
        default_dup_conns: 0,
        latency: None,
        gdr_required: true,
        net_flush_required: true,
        default_protocol: Protocol::SendRecv,
        domain_per_thread: true,
    },
];

/// Look up `identity` in the built-in catalog.
pub fn lookup_capabilities(identity: &str) -> Option<&'static PlatformCapabilityRecord> {
    lookup_in(PLATFORM_CATALOG, identity)
}

/// Look up `identity` in `catalog` by exact name.
///
/// The whole table is scanned and the last matching entry wins, so a later
/// entry shadows an earlier one with the same name.
pub fn lookup_in<'a>(
    catalog: &'a [PlatformCapabilityRecord],
    identity: &str,
) -> Option<&'a PlatformCapabilityRecord> {
    catalog.iter().filter(|record| record.name == identity).last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_p4d_record() {
        let record = lookup_capabilities("p4d.24xlarge").unwrap();
        assert!(record.gdr_required);
        assert!(record.net_flush_required);
        assert_eq!(record.default_protocol, Protocol::Rdma);
        assert_eq!(record.latency, Some(75.0));
        assert_eq!(record.topology, Some("p4d-24xl-topo.xml"));
    }

    #[test]
    fn test_unknown_identity() {
        assert!(lookup_capabilities("c5.xlarge").is_none());
        assert!(lookup_capabilities("").is_none());
        // Lookup is exact, not prefix or case-insensitive.
        assert!(lookup_capabilities("P4D.24XLARGE").is_none());
        assert!(lookup_capabilities("p4d.24xlarge\n").is_none());
    }

    #[test]
    fn test_lookup_is_deterministic() {
        for record in PLATFORM_CATALOG {
            let first = lookup_capabilities(record.name).unwrap();
            let second = lookup_capabilities(record.name).unwrap();
            assert!(std::ptr::eq(first, second));
        }
    }

    #[test]
    fn test_catalog_names_unique() {
        let names: HashSet<_> = PLATFORM_CATALOG.iter().map(|r| r.name).collect();
        assert_eq!(names.len(), PLATFORM_CATALOG.len());
    }

    #[test]
    fn test_last_match_wins() {
        let mut shadow = PLATFORM_CATALOG[0].clone();
        shadow.default_dup_conns = 8;
        let catalog = vec![PLATFORM_CATALOG[0].clone(), shadow];

        let record = lookup_in(&catalog, "p4d.24xlarge").unwrap();
        assert_eq!(record.default_dup_conns, 8);
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("rdma".parse::<Protocol>().unwrap(), Protocol::Rdma);
        assert_eq!("SendRecv".parse::<Protocol>().unwrap(), Protocol::SendRecv);
        assert!("tcp".parse::<Protocol>().is_err());

        let json = serde_json::to_string(&Protocol::Rdma).unwrap();
        assert_eq!(json, "\"RDMA\"");
        let parsed: Protocol = serde_json::from_str("\"sendrecv\"").unwrap();
        assert_eq!(parsed, Protocol::SendRecv);
    }
}
