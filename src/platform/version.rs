//! Library version queries.
//!
//! The collective library may or may not be loaded into the process, so its
//! version is looked up through an optional symbol. [`VersionProvider`] hides
//! that lookup so initialization logic can be exercised with fixed answers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::trace;

use crate::constants::env_vars::{FI_EFA_FORK_SAFE, RDMAV_FORK_SAFE};
use crate::constants::tuning::FORK_SAFE_FABRIC_VERSION;
use crate::error::PlatformError;

/// Outcome of asking the collective library for its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionQuery {
    /// The version query entry point is not present in the process.
    Unavailable,
    /// The query ran and returned a non-zero status code.
    Failed(i32),
    /// Encoded version, e.g. 21805 for 2.18.5.
    Available(u32),
}

/// Libfabric API version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FabricVersion {
    pub major: u32,
    pub minor: u32,
}

impl FabricVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Decode the `FI_VERSION(major, minor)` encoding.
    pub fn from_encoded(encoded: u32) -> Self {
        Self::new(encoded >> 16, encoded & 0xffff)
    }

    /// Environment variable that enables fork safety for this release.
    pub fn fork_safe_variable(&self) -> &'static str {
        let (major, minor) = FORK_SAFE_FABRIC_VERSION;
        if *self >= FabricVersion::new(major, minor) {
            FI_EFA_FORK_SAFE
        } else {
            RDMAV_FORK_SAFE
        }
    }
}

impl fmt::Display for FabricVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for FabricVersion {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PlatformError::InvalidInput(format!("invalid libfabric version {:?}", s));
        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self::new(
            major.trim().parse().map_err(|_| invalid())?,
            minor.trim().parse().map_err(|_| invalid())?,
        ))
    }
}

/// Source of library version information.
pub trait VersionProvider: Send + Sync {
    /// Version of the collective communication library.
    fn collective_version(&self) -> VersionQuery;

    /// Version of libfabric, if it can be determined.
    fn fabric_version(&self) -> Option<FabricVersion>;
}

/// Fixed answers, for tests and for hosts that know their versions up front.
#[derive(Debug, Clone, Copy)]
pub struct FixedVersionProvider {
    pub collective: VersionQuery,
    pub fabric: Option<FabricVersion>,
}

impl FixedVersionProvider {
    pub fn new(collective: VersionQuery, fabric: Option<FabricVersion>) -> Self {
        Self { collective, fabric }
    }

    /// Nothing is known.
    pub fn unavailable() -> Self {
        Self::new(VersionQuery::Unavailable, None)
    }
}

impl VersionProvider for FixedVersionProvider {
    fn collective_version(&self) -> VersionQuery {
        self.collective
    }

    fn fabric_version(&self) -> Option<FabricVersion> {
        self.fabric
    }
}

/// Resolves `ncclGetVersion` and `fi_version` among the symbols already
/// loaded into the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicSymbolVersionProvider;

#[cfg(target_os = "linux")]
mod symbols {
    use std::ffi::CStr;

    pub const NCCL_GET_VERSION: &CStr = c"ncclGetVersion";
    pub const FI_VERSION: &CStr = c"fi_version";

    pub type GetVersionFn = unsafe extern "C" fn(*mut libc::c_int) -> libc::c_int;
    pub type FiVersionFn = unsafe extern "C" fn() -> u32;

    pub fn lookup(name: &CStr) -> Option<*mut libc::c_void> {
        // SAFETY: `name` is NUL-terminated and RTLD_DEFAULT searches the
        // global symbol scope of the running process.
        let ptr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
        (!ptr.is_null()).then_some(ptr)
    }
}

impl VersionProvider for DynamicSymbolVersionProvider {
    #[cfg(target_os = "linux")]
    fn collective_version(&self) -> VersionQuery {
        let Some(ptr) = symbols::lookup(symbols::NCCL_GET_VERSION) else {
            trace!("Could not find ncclGetVersion symbol");
            return VersionQuery::Unavailable;
        };

        let mut version: libc::c_int = 0;
        // SAFETY: ncclGetVersion has the signature `ncclResult_t (int *)`.
        let rc = unsafe {
            let get_version: symbols::GetVersionFn = std::mem::transmute(ptr);
            get_version(&mut version)
        };
        if rc != 0 {
            return VersionQuery::Failed(rc);
        }
        VersionQuery::Available(version.max(0) as u32)
    }

    #[cfg(not(target_os = "linux"))]
    fn collective_version(&self) -> VersionQuery {
        VersionQuery::Unavailable
    }

    #[cfg(target_os = "linux")]
    fn fabric_version(&self) -> Option<FabricVersion> {
        let ptr = symbols::lookup(symbols::FI_VERSION)?;
        // SAFETY: fi_version has the signature `uint32_t (void)`.
        let encoded = unsafe {
            let fi_version: symbols::FiVersionFn = std::mem::transmute(ptr);
            fi_version()
        };
        Some(FabricVersion::from_encoded(encoded))
    }

    #[cfg(not(target_os = "linux"))]
    fn fabric_version(&self) -> Option<FabricVersion> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_safe_variable_selection() {
        assert_eq!(FabricVersion::new(1, 12).fork_safe_variable(), "RDMAV_FORK_SAFE");
        assert_eq!(FabricVersion::new(1, 13).fork_safe_variable(), "FI_EFA_FORK_SAFE");
        assert_eq!(FabricVersion::new(2, 0).fork_safe_variable(), "FI_EFA_FORK_SAFE");
        assert_eq!(FabricVersion::new(0, 99).fork_safe_variable(), "RDMAV_FORK_SAFE");
    }

    #[test]
    fn test_fabric_version_decoding() {
        assert_eq!(FabricVersion::from_encoded((1 << 16) | 22), FabricVersion::new(1, 22));
        assert_eq!("1.13".parse::<FabricVersion>().unwrap(), FabricVersion::new(1, 13));
        assert!("1".parse::<FabricVersion>().is_err());
        assert!("a.b".parse::<FabricVersion>().is_err());
    }

    #[test]
    fn test_dynamic_lookup_does_not_panic() {
        // The test binary links neither NCCL nor libfabric.
        let provider = DynamicSymbolVersionProvider;
        assert_eq!(provider.collective_version(), VersionQuery::Unavailable);
        assert_eq!(provider.fabric_version(), None);
    }
}
