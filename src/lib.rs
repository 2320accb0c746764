//! The `efa_platform` core library.
//!
//! Platform support for collective-communication transports running over the
//! AWS Elastic Fabric Adapter: instance-type detection, per-platform tuning
//! defaults, endpoint ordering negotiation and multi-rail device ordering.

pub mod config;
pub mod constants;
pub mod env;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod platform;

pub use error::{PlatformError, Result};
