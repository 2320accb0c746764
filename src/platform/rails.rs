//! Canonical ordering of the rails of a multi-NIC connection.
//!
//! EFA cards expose two virtual functions. The VF index is the low byte of the
//! device's node GUID, read from `<infiniband class dir>/<device>/node_guid`.
//! Rails are placed so that VF 0 and VF 1 alternate: VF 0 rails take positions
//! 0, 2, 4, ... and VF 1 rails take 1, 3, 5, ... in discovery order.
//!
//! This differs from the older layout, which started VF 0 at position 0 and
//! VF 1 at position 2 and advanced each by one. `[vf0, vf0, vf1, vf1]` now
//! yields positions `[0, 2, 1, 3]` where the older map gave `[0, 1, 2, 3]`.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{trace, warn};

use crate::constants::paths::{INFINIBAND_CLASS_DIR, NODE_GUID_FILE};
use crate::constants::rails::{
    GUID_COLON_POSITIONS, GUID_STRING_LEN, RAIL_BASE_POSITIONS, RAIL_POSITION_STRIDE,
    VF_SLOTS_PER_CARD,
};
use crate::error::{IoContext, PlatformError, Result};
use crate::metrics;

/// A 64-bit node GUID rendered as `XXXX:XXXX:XXXX:XXXX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeGuid(u64);

/// Why a GUID string was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuidFormatError(pub &'static str);

impl fmt::Display for GuidFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl NodeGuid {
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Virtual function index (bits 0-7).
    pub fn vf_index(&self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl FromStr for NodeGuid {
    type Err = GuidFormatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != GUID_STRING_LEN {
            return Err(GuidFormatError("wrong size"));
        }

        let mut value = 0u64;
        for (i, &b) in bytes.iter().enumerate() {
            if GUID_COLON_POSITIONS.contains(&i) {
                if b != b':' {
                    return Err(GuidFormatError("wrong colon pos"));
                }
                continue;
            }
            let digit = (b as char)
                .to_digit(16)
                .ok_or(GuidFormatError("non-hexadecimal digit"))?;
            value = (value << 4) | u64::from(digit);
        }

        Ok(NodeGuid(value))
    }
}

impl fmt::Display for NodeGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x}:{:04x}:{:04x}",
            (self.0 >> 48) & 0xffff,
            (self.0 >> 32) & 0xffff,
            (self.0 >> 16) & 0xffff,
            self.0 & 0xffff
        )
    }
}

/// A discovered network interface taking part in a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailDescriptor<H> {
    /// InfiniBand device name, e.g. `rdmap16s27`.
    pub device_name: String,
    /// Caller-owned handle for the interface.
    pub handle: H,
}

impl<H> RailDescriptor<H> {
    pub fn new(device_name: impl Into<String>, handle: H) -> Self {
        Self {
            device_name: device_name.into(),
            handle,
        }
    }
}

/// Orders rails using the node GUIDs found under an InfiniBand class directory.
#[derive(Debug, Clone)]
pub struct RailSorter {
    class_dir: PathBuf,
}

impl Default for RailSorter {
    fn default() -> Self {
        Self::new(INFINIBAND_CLASS_DIR)
    }
}

impl RailSorter {
    /// Sorter reading GUIDs from `class_dir/<device>/node_guid`.
    pub fn new(class_dir: impl Into<PathBuf>) -> Self {
        Self {
            class_dir: class_dir.into(),
        }
    }

    /// GUID file of `device`.
    pub fn guid_path(&self, device: &str) -> PathBuf {
        self.class_dir.join(device).join(NODE_GUID_FILE)
    }

    /// Read and parse the node GUID of `device`.
    pub fn read_node_guid(&self, device: &str) -> Result<NodeGuid> {
        let path = self.guid_path(device);
        let line = read_guid_line(&path)?;
        line.parse().map_err(|GuidFormatError(reason)| {
            warn!("Bad GUID format: {}: {} ({})", reason, line, path.display());
            PlatformError::GuidFormat {
                path: path.clone(),
                value: line.clone(),
                reason,
            }
        })
    }

    /// Reorder `rails` into canonical rail positions.
    ///
    /// On error `rails` is left exactly as it was.
    pub fn sort_rails<H>(&self, rails: &mut [RailDescriptor<H>]) -> Result<()> {
        if rails.is_empty() {
            return Ok(());
        }

        let result = self.rail_targets(rails).map(|targets| apply_permutation(rails, targets));
        metrics::record_rail_sort(rails.len(), result.is_ok());
        result
    }

    fn rail_targets<H>(&self, rails: &[RailDescriptor<H>]) -> Result<Vec<usize>> {
        let slots = rails
            .iter()
            .map(|rail| {
                let guid = self.read_node_guid(&rail.device_name)?;
                Ok((rail.device_name.as_str(), guid.vf_index()))
            })
            .collect::<Result<Vec<_>>>()?;
        assign_rail_positions(&slots)
    }
}

/// Sort `rails` using the system InfiniBand class directory.
pub fn sort_rails<H>(rails: &mut [RailDescriptor<H>]) -> Result<()> {
    RailSorter::default().sort_rails(rails)
}

/// Compute the rail position of each `(device, vf_index)` in discovery order.
///
/// The result is a permutation of `0..slots.len()`.
pub fn assign_rail_positions(slots: &[(&str, u8)]) -> Result<Vec<usize>> {
    let num_rails = slots.len();
    let mut next_position = RAIL_BASE_POSITIONS;
    let mut targets = Vec::with_capacity(num_rails);

    for (i, &(device, vf_index)) in slots.iter().enumerate() {
        let slot = usize::from(vf_index);
        if slot >= VF_SLOTS_PER_CARD {
            warn!("Invalid vf_idx value {} for device {}", vf_index, device);
            return Err(PlatformError::VfIndexOutOfRange {
                device: device.to_string(),
                vf_index,
                limit: VF_SLOTS_PER_CARD,
            });
        }

        let position = next_position[slot];
        next_position[slot] += RAIL_POSITION_STRIDE;

        trace!("Assigning rail index {} to info list idx {}", position, i);

        if position >= num_rails {
            // Slots own disjoint positions, so running past the end means
            // this slot holds more rails than its share of the list.
            let earlier = slots
                .iter()
                .take(i)
                .find(|(_, vf)| *vf == vf_index)
                .map(|(name, _)| *name);
            return Err(match earlier {
                Some(existing) => {
                    warn!("Attempted to fill rail slot {} with duplicate infos", position);
                    PlatformError::DuplicateRail {
                        device: device.to_string(),
                        existing: existing.to_string(),
                        position,
                    }
                }
                None => {
                    warn!(
                        "Rail slot {} for device {} is outside {} rails",
                        position, device, num_rails
                    );
                    PlatformError::RailPositionOutOfRange {
                        device: device.to_string(),
                        vf_index,
                        position,
                        num_rails,
                    }
                }
            });
        }

        targets.push(position);
    }

    Ok(targets)
}

/// Move `rails[i]` to `rails[targets[i]]` for every `i`.
fn apply_permutation<H>(rails: &mut [RailDescriptor<H>], mut targets: Vec<usize>) {
    for i in 0..rails.len() {
        while targets[i] != i {
            let target = targets[i];
            rails.swap(i, target);
            targets.swap(i, target);
        }
    }
}

fn read_guid_line(path: &Path) -> Result<String> {
    let file = File::open(path).with_path(path)?;
    let mut line = String::new();
    let read = BufReader::new(file).read_line(&mut line).with_path(path)?;
    if read == 0 {
        return Err(PlatformError::GuidFormat {
            path: path.to_path_buf(),
            value: String::new(),
            reason: "empty file",
        });
    }
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}
