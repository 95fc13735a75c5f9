//! Definitions of errors that can occur during the execution of the deployment scripts

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

use alloy::primitives::Address;

use crate::constants::ALREADY_VERIFIED_MARKER;

/// Errors that can occur during the execution of the deployment scripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// Missing or malformed signing key
    Credential(String),
    /// The RPC endpoint is unreachable or misbehaving
    Connection(String),
    /// A contract creation reverted or could not be confirmed
    ContractDeployment(String),
    /// The dependent contract did not land on its predicted address
    AddressMismatch {
        /// Address the governor was built against
        predicted: Address,
        /// Address the token was really deployed at
        actual: Address,
    },
    /// A user supplied address could not be parsed
    InvalidAddress(String),
    /// A compiled contract artifact is missing or unreadable
    Artifact(String),
    /// The explorer rejected or failed a verification
    Verification(String),
    /// Error when reading or writing the deployment record
    JsonOutputError(String),
    /// A bounded wait ran out of time
    Timeout(String),
    /// The run was cancelled while waiting
    Cancelled(String),
}

impl ScriptError {
    /// Whether this error is the explorer telling us the contract is already verified
    pub fn is_already_verified(&self) -> bool {
        match self {
            ScriptError::Verification(msg) => {
                msg.to_lowercase().contains(ALREADY_VERIFIED_MARKER)
            }
            _ => false,
        }
    }
}

impl Display for ScriptError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Credential(s) => write!(f, "invalid signing credential: {}", s),
            ScriptError::Connection(s) => write!(f, "error talking to the rpc endpoint: {}", s),
            ScriptError::ContractDeployment(s) => write!(f, "error deploying contract: {}", s),
            ScriptError::AddressMismatch { predicted, actual } => write!(
                f,
                "token deployed at {} but governor was built against {}",
                actual, predicted
            ),
            ScriptError::InvalidAddress(s) => write!(f, "invalid address: {}", s),
            ScriptError::Artifact(s) => write!(f, "error loading contract artifact: {}", s),
            ScriptError::Verification(s) => write!(f, "error verifying contract: {}", s),
            ScriptError::JsonOutputError(s) => write!(f, "error writing json output: {}", s),
            ScriptError::Timeout(s) => write!(f, "timed out {}", s),
            ScriptError::Cancelled(s) => write!(f, "cancelled {}", s),
        }
    }
}

impl Error for ScriptError {}
