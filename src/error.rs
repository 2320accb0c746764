//! Custom error types for efa-platform.
//!
//! This module provides a centralized error handling system using the `thiserror` crate
//! to define structured, typed errors with enough context (paths, values, expected
//! formats) to diagnose a failure from the log alone.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::platform::endpoint::FabricError;

/// Primary error type for the crate, covering all possible error cases.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// A system file could not be opened or read.
    #[error("Error reading file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A node GUID did not match `XXXX:XXXX:XXXX:XXXX`.
    #[error("Bad GUID format in {path}: {reason}: {value:?} (expected XXXX:XXXX:XXXX:XXXX)")]
    GuidFormat {
        path: PathBuf,
        value: String,
        reason: &'static str,
    },

    /// The VF index extracted from a GUID is outside the supported layout.
    #[error("Invalid vf_idx value {vf_index} for device {device} (supported: 0..{limit})")]
    VfIndexOutOfRange {
        device: String,
        vf_index: u8,
        limit: usize,
    },

    /// A rail's VF slot has no position left within the rail count.
    #[error("Rail slot {position} for device {device} (vf_idx {vf_index}) is outside the {num_rails} available rails")]
    RailPositionOutOfRange {
        device: String,
        vf_index: u8,
        position: usize,
        num_rails: usize,
    },

    /// Two rails resolved to the same rail slot.
    #[error("Attempted to fill rail slot {position} with duplicate device {device} (conflicts with {existing})")]
    DuplicateRail {
        device: String,
        existing: String,
        position: usize,
    },

    /// An endpoint option call failed for a reason other than "unsupported".
    #[error("Could not set {option}: {source}")]
    EndpointOption {
        option: &'static str,
        #[source]
        source: FabricError,
    },

    /// An endpoint disagreed with the ordering outcome recorded for its domain.
    #[error("Setting {option} option failed after succeeding during initialization")]
    OrderingMismatch { option: &'static str },

    /// GPUDirect RDMA is required on this platform but not available.
    #[error("GDR disabled on GDR-supported instance type {platform}")]
    GdrRequired { platform: String },

    /// RDMA write is emulated by the provider instead of native.
    #[error("Native RDMA write validation failed: {0}")]
    EmulatedWrite(String),

    /// An environment variable could not be written.
    #[error("Unable to set environment variable {name}: {reason}")]
    Environment { name: String, reason: String },

    /// A dynamically resolved version query reported failure.
    #[error("Version query failed: {0}")]
    VersionQuery(String),

    /// Errors from invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from invalid input data or parameters.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Error classes used to decide between fallback and hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Identity or GUID file unreadable.
    ConfigurationSource,
    /// Malformed GUID, out-of-range slot, or duplicate slot.
    Format,
    /// An endpoint contradicted an earlier negotiation outcome.
    NonDeterminism,
    /// An override variable could not be written.
    Environment,
    /// The transport or collective library reported a failure.
    Transport,
    /// Invalid user configuration or input.
    Configuration,
}

impl ErrorKind {
    /// Short label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigurationSource => "configuration_source",
            ErrorKind::Format => "format",
            ErrorKind::NonDeterminism => "non_determinism",
            ErrorKind::Environment => "environment",
            ErrorKind::Transport => "transport",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl PlatformError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlatformError::Io { .. } => ErrorKind::ConfigurationSource,
            PlatformError::GuidFormat { .. }
            | PlatformError::VfIndexOutOfRange { .. }
            | PlatformError::RailPositionOutOfRange { .. }
            | PlatformError::DuplicateRail { .. } => ErrorKind::Format,
            PlatformError::OrderingMismatch { .. } => ErrorKind::NonDeterminism,
            PlatformError::Environment { .. } => ErrorKind::Environment,
            PlatformError::EndpointOption { .. }
            | PlatformError::EmulatedWrite(_)
            | PlatformError::VersionQuery(_) => ErrorKind::Transport,
            PlatformError::GdrRequired { .. }
            | PlatformError::Config(_)
            | PlatformError::InvalidInput(_) => ErrorKind::Configuration,
        }
    }
}

/// Convenience type alias for Results with PlatformError.
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Extension trait for attaching a file path to I/O errors.
pub trait IoContext<T> {
    /// Convert into a [`PlatformError::Io`] naming `path`.
    fn with_path(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_path(self, path: &Path) -> Result<T> {
        self.map_err(|source| PlatformError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
