//! Best effort source verification of the deployed contracts.

mod etherscan;

pub use etherscan::EtherscanVerifier;

use alloy::primitives::Address;
use tracing::{info, warn};

use crate::{
    build::artifacts::ContractArtifact,
    deploy::ContractKind,
    errors::ScriptError,
    utils::{poll_with_backoff, BackoffPolicy, Cancellation},
};

/// A contract to publish on the explorer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub kind: ContractKind,
    pub address: Address,
    /// The constructor arguments really used at deployment, in order
    pub constructor_args: Vec<Address>,
    pub artifact: ContractArtifact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    AlreadyVerified,
    /// Reason reported by the explorer
    Failed(String),
}

impl VerificationOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, VerificationOutcome::Failed(_))
    }
}

/// An explorer able to check for indexed bytecode and verify sources
#[allow(async_fn_in_trait)]
pub trait ContractVerifier {
    /// Whether the explorer already sees bytecode at `address`
    async fn is_indexed(&self, address: Address) -> Result<bool, ScriptError>;

    /// Submit the request and wait for the explorer verdict
    async fn verify(&self, request: &VerificationRequest) -> Result<(), ScriptError>;
}

/// Map a verification result onto its outcome, an already verified contract counts as success
pub fn classify(result: Result<(), ScriptError>) -> VerificationOutcome {
    match result {
        Ok(()) => VerificationOutcome::Verified,
        Err(e) if e.is_already_verified() => VerificationOutcome::AlreadyVerified,
        Err(e) => VerificationOutcome::Failed(e.to_string()),
    }
}

/// Wait for the explorer to index `request.address`, then verify it.
///
/// Only cancellation is returned as an error, every other failure ends up in
/// the outcome.
pub async fn verify_contract<V: ContractVerifier>(
    verifier: &V,
    request: &VerificationRequest,
    indexing: &BackoffPolicy,
    cancel: &Cancellation,
) -> Result<VerificationOutcome, ScriptError> {
    info!("Verifying {} contract at {}", request.kind, request.address);

    let address = request.address;
    let what = format!("waiting for the explorer to index {}", address);
    let indexed = poll_with_backoff(indexing, cancel, &what, move || async move {
        Ok(verifier.is_indexed(address).await?.then_some(()))
    })
    .await;

    let result = match indexed {
        Ok(()) => verifier.verify(request).await,
        Err(e) => Err(e),
    };

    let outcome = match result {
        Err(e @ ScriptError::Cancelled(_)) => return Err(e),
        result => classify(result),
    };
    match &outcome {
        VerificationOutcome::Verified => info!("{} contract verified", request.kind),
        VerificationOutcome::AlreadyVerified => info!("{} contract already verified!", request.kind),
        VerificationOutcome::Failed(reason) => {
            warn!("{} contract verification failed: {}", request.kind, reason)
        }
    }
    Ok(outcome)
}

/// Verify every request in order, one failure never prevents the next attempt
pub async fn verify_contracts<V: ContractVerifier>(
    verifier: &V,
    requests: &[VerificationRequest],
    indexing: &BackoffPolicy,
    cancel: &Cancellation,
) -> Result<Vec<(ContractKind, VerificationOutcome)>, ScriptError> {
    let mut outcomes = Vec::with_capacity(requests.len());
    for request in requests {
        let outcome = verify_contract(verifier, request, indexing, cancel).await?;
        outcomes.push((request.kind, outcome));
    }
    Ok(outcomes)
}
