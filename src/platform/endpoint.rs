//! Transport endpoint abstraction.
//!
//! Platform code never creates or destroys endpoints. It only reads and writes
//! a handful of endpoint options, which is all [`TransportEndpoint`] exposes.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Endpoint-level options touched during endpoint configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointOption {
    /// 128-byte aligned in-order delivery for send/receive.
    SendRecvInOrderAligned128Bytes,
    /// 128-byte aligned in-order delivery for RDMA write.
    WriteInOrderAligned128Bytes,
    /// Maximum message size the endpoint must handle.
    MaxMsgSize,
    /// Whether RDMA write is emulated by the provider.
    EmulatedWrite,
}

impl EndpointOption {
    /// Libfabric name of the option.
    pub fn name(&self) -> &'static str {
        match self {
            EndpointOption::SendRecvInOrderAligned128Bytes => {
                "FI_OPT_EFA_SENDRECV_IN_ORDER_ALIGNED_128_BYTES"
            }
            EndpointOption::WriteInOrderAligned128Bytes => {
                "FI_OPT_EFA_WRITE_IN_ORDER_ALIGNED_128_BYTES"
            }
            EndpointOption::MaxMsgSize => "FI_OPT_MAX_MSG_SIZE",
            EndpointOption::EmulatedWrite => "FI_OPT_EFA_EMULATED_WRITE",
        }
    }
}

impl fmt::Display for EndpointOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value of an endpoint option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Size(usize),
}

/// Failure reported by the transport library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FabricError {
    /// The operation is not implemented (`FI_EOPNOTSUPP`).
    #[error("operation not supported")]
    NotSupported,
    /// The option is unknown to the provider (`FI_ENOPROTOOPT`).
    #[error("protocol option not available")]
    NoProtocolOption,
    /// Any other failure.
    #[error("RC: {code}, ERROR: {message}")]
    Other { code: i32, message: String },
}

impl FabricError {
    /// Whether this error means "feature not implemented" rather than failure.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, FabricError::NotSupported | FabricError::NoProtocolOption)
    }
}

/// Option primitives of a transport endpoint.
pub trait TransportEndpoint {
    /// Name of the provider backing this endpoint, e.g. `efa`.
    fn provider_name(&self) -> &str;

    /// Set an endpoint option.
    fn set_option(&mut self, option: EndpointOption, value: OptionValue)
        -> Result<(), FabricError>;

    /// Read an endpoint option.
    fn get_option(&self, option: EndpointOption) -> Result<OptionValue, FabricError>;
}

/// Endpoint with scripted option responses.
///
/// By default every `set_option` succeeds and `EmulatedWrite` reads as
/// `false`. All `set_option` calls are recorded.
#[derive(Debug, Clone)]
pub struct ScriptedEndpoint {
    provider: String,
    set_responses: HashMap<EndpointOption, Result<(), FabricError>>,
    get_responses: HashMap<EndpointOption, Result<OptionValue, FabricError>>,
    set_calls: Vec<(EndpointOption, OptionValue)>,
}

impl ScriptedEndpoint {
    /// An endpoint for `provider`.
    pub fn new(provider: impl Into<String>) -> Self {
        let mut get_responses = HashMap::new();
        get_responses.insert(EndpointOption::EmulatedWrite, Ok(OptionValue::Bool(false)));
        Self {
            provider: provider.into(),
            set_responses: HashMap::new(),
            get_responses,
            set_calls: Vec::new(),
        }
    }

    /// An EFA endpoint.
    pub fn efa() -> Self {
        Self::new(crate::constants::transport::EFA_PROVIDER)
    }

    /// Make `set_option(option, _)` return `response`.
    pub fn on_set(mut self, option: EndpointOption, response: Result<(), FabricError>) -> Self {
        self.set_responses.insert(option, response);
        self
    }

    /// Make `get_option(option)` return `response`.
    pub fn on_get(
        mut self,
        option: EndpointOption,
        response: Result<OptionValue, FabricError>,
    ) -> Self {
        self.get_responses.insert(option, response);
        self
    }

    /// Every `set_option` call made so far.
    pub fn set_calls(&self) -> &[(EndpointOption, OptionValue)] {
        &self.set_calls
    }

    /// Whether `option` was ever set.
    pub fn was_set(&self, option: EndpointOption) -> bool {
        self.set_calls.iter().any(|(o, _)| *o == option)
    }
}

impl TransportEndpoint for ScriptedEndpoint {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn set_option(
        &mut self,
        option: EndpointOption,
        value: OptionValue,
    ) -> Result<(), FabricError> {
        self.set_calls.push((option, value));
        self.set_responses.get(&option).cloned().unwrap_or(Ok(()))
    }

    fn get_option(&self, option: EndpointOption) -> Result<OptionValue, FabricError> {
        self.get_responses
            .get(&option)
            .cloned()
            .unwrap_or(Err(FabricError::NoProtocolOption))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_classification() {
        assert!(FabricError::NotSupported.is_unsupported());
        assert!(FabricError::NoProtocolOption.is_unsupported());
        assert!(!FabricError::Other {
            code: -22,
            message: "Invalid argument".to_string()
        }
        .is_unsupported());
    }

    #[test]
    fn test_scripted_endpoint_records_calls() {
        let mut ep = ScriptedEndpoint::efa()
            .on_set(EndpointOption::MaxMsgSize, Err(FabricError::NotSupported));

        assert!(ep
            .set_option(EndpointOption::WriteInOrderAligned128Bytes, OptionValue::Bool(true))
            .is_ok());
        assert_eq!(
            ep.set_option(EndpointOption::MaxMsgSize, OptionValue::Size(8192)),
            Err(FabricError::NotSupported)
        );
        assert_eq!(ep.set_calls().len(), 2);
        assert!(ep.was_set(EndpointOption::MaxMsgSize));
        assert_eq!(
            ep.get_option(EndpointOption::EmulatedWrite),
            Ok(OptionValue::Bool(false))
        );
    }
}
