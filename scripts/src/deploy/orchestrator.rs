//! Ordered deployment of the Governor / Token pair.
//!
//! The Governor needs the Token address in its constructor and the Token needs
//! the Governor one, so the Token address is predicted from the deployer nonce
//! before anything is sent:
//!
//! - nonce `k`: Governor, built against `predict(deployer, k + 1)`
//! - nonce `k + 1`: Token, built against the real Governor address
//!
//! Both nonces are pinned on the transactions. Running two deployments from the
//! same account at once is not supported, the account nonce is the only
//! serialization point and nothing here locks it.

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    time::Duration,
};

use alloy::primitives::Address;
use tracing::{info, warn};

use crate::{
    build::artifacts::ContractArtifact,
    constants::{
        DEFAULT_INDEX_TIMEOUT_SECS, DEFAULT_MINING_TIMEOUT_SECS, INDEX_INITIAL_DELAY_SECS,
        INDEX_MAX_DELAY_SECS, PREDICTED_NONCE_OFFSET,
    },
    deploy::{predict_contract_address, ContractKind, DeployedContract},
    errors::ScriptError,
    output_writer::record_deployment,
    tx::{abi::deployment_code, client::ChainClient},
    utils::{with_deadline, BackoffPolicy, Cancellation},
    verify::{verify_contract, ContractVerifier, VerificationOutcome, VerificationRequest},
};

/// The compiled pair to deploy
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub governor: ContractArtifact,
    pub token: ContractArtifact,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Bound on every wait for the node, mining included
    pub mining_timeout: Duration,
    /// Polling of the explorer until it indexed a contract
    pub indexing: BackoffPolicy,
    /// Deployment record updated after each confirmed contract
    pub output_file: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            mining_timeout: Duration::from_secs(DEFAULT_MINING_TIMEOUT_SECS),
            indexing: BackoffPolicy::new(
                Duration::from_secs(INDEX_INITIAL_DELAY_SECS),
                Duration::from_secs(INDEX_MAX_DELAY_SECS),
                Duration::from_secs(DEFAULT_INDEX_TIMEOUT_SECS),
            ),
            output_file: None,
        }
    }
}

/// Progress of a run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStage {
    Init,
    SignerResolved,
    AddressPredicted,
    GovernorDeployed,
    TokenDeployed,
    Verifying(ContractKind),
    Done,
}

/// Everything a successful run produced
#[derive(Debug, Clone)]
pub struct DeploymentReport {
    pub deployer: Address,
    /// Deployer nonce when the run started
    pub nonce: u64,
    pub predicted_token: Address,
    pub governor: DeployedContract,
    pub token: DeployedContract,
    /// Empty when verification was not requested
    pub verifications: Vec<(ContractKind, VerificationOutcome)>,
}

/// A run that stopped early.
///
/// Contracts are never rolled back, `deployed` lists what is live on chain.
#[derive(Debug, Clone)]
pub struct DeploymentFailure {
    pub error: ScriptError,
    /// Last stage reached before the error
    pub stage: DeploymentStage,
    pub predicted_token: Option<Address>,
    pub deployed: Vec<DeployedContract>,
}

impl Display for DeploymentFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after stage {:?}", self.error, self.stage)?;
        if self.deployed.is_empty() {
            write!(f, ", nothing deployed)")
        } else {
            let deployed = self
                .deployed
                .iter()
                .map(|c| format!("{} at {}", c.kind, c.address))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, ", already deployed: {})", deployed)
        }
    }
}

impl Error for DeploymentFailure {}

/// Bookkeeping kept alive across errors so a failure can say what happened
struct Progress {
    stage: DeploymentStage,
    predicted_token: Option<Address>,
    deployed: Vec<DeployedContract>,
}

impl Progress {
    fn advance(&mut self, stage: DeploymentStage) {
        info!("Deployment stage {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }
}

/// Drives the deploy then verify sequence
pub struct Orchestrator<C, V> {
    client: C,
    verifier: Option<V>,
    settings: OrchestratorSettings,
    cancel: Cancellation,
}

impl<C: ChainClient, V: ContractVerifier> Orchestrator<C, V> {
    pub fn new(
        client: C,
        verifier: Option<V>,
        settings: OrchestratorSettings,
        cancel: Cancellation,
    ) -> Self {
        Self {
            client,
            verifier,
            settings,
            cancel,
        }
    }

    /// Deploy both contracts then verify them if a verifier is set.
    ///
    /// Any deployment error ends the run, verification errors never do.
    pub async fn run(&self, plan: &DeploymentPlan) -> Result<DeploymentReport, DeploymentFailure> {
        let mut progress = Progress {
            stage: DeploymentStage::Init,
            predicted_token: None,
            deployed: Vec::new(),
        };

        match self.execute(plan, &mut progress).await {
            Ok(report) => Ok(report),
            Err(error) => Err(DeploymentFailure {
                error,
                stage: progress.stage,
                predicted_token: progress.predicted_token,
                deployed: progress.deployed,
            }),
        }
    }

    async fn execute(
        &self,
        plan: &DeploymentPlan,
        progress: &mut Progress,
    ) -> Result<DeploymentReport, ScriptError> {
        let deployer = self.client.deployer();
        let nonce = with_deadline(
            &self.cancel,
            self.settings.mining_timeout,
            "fetching the deployer nonce",
            self.client.transaction_count(),
        )
        .await?;
        info!("Deployer {} is at nonce {}", deployer, nonce);
        progress.advance(DeploymentStage::SignerResolved);

        // The governor goes out with `nonce`, the token right after it
        let predicted_token = predict_contract_address(deployer, nonce + PREDICTED_NONCE_OFFSET);
        progress.predicted_token = Some(predicted_token);
        info!("Future Token address {}", predicted_token);
        progress.advance(DeploymentStage::AddressPredicted);

        let governor = self
            .deploy_contract(ContractKind::Governor, &plan.governor, predicted_token, nonce)
            .await?;
        progress.deployed.push(governor.clone());
        progress.advance(DeploymentStage::GovernorDeployed);

        let token = self
            .deploy_contract(
                ContractKind::Token,
                &plan.token,
                governor.address,
                nonce + PREDICTED_NONCE_OFFSET,
            )
            .await?;
        progress.deployed.push(token.clone());
        progress.advance(DeploymentStage::TokenDeployed);

        if token.address != predicted_token {
            return Err(ScriptError::AddressMismatch {
                predicted: predicted_token,
                actual: token.address,
            });
        }

        info!("Governor deployed to {}", governor.address);
        info!("Token deployed to {}", token.address);

        let mut verifications = Vec::new();
        if let Some(verifier) = &self.verifier {
            info!("Awaiting contract verification, this may take a while");
            let requests = [
                VerificationRequest {
                    kind: ContractKind::Governor,
                    address: governor.address,
                    constructor_args: governor.constructor_args.clone(),
                    artifact: plan.governor.clone(),
                },
                VerificationRequest {
                    kind: ContractKind::Token,
                    address: token.address,
                    constructor_args: token.constructor_args.clone(),
                    artifact: plan.token.clone(),
                },
            ];
            for request in &requests {
                progress.advance(DeploymentStage::Verifying(request.kind));
                let outcome =
                    verify_contract(verifier, request, &self.settings.indexing, &self.cancel)
                        .await?;
                verifications.push((request.kind, outcome));
            }
        }
        progress.advance(DeploymentStage::Done);

        Ok(DeploymentReport {
            deployer,
            nonce,
            predicted_token,
            governor,
            token,
            verifications,
        })
    }

    /// Create one contract with a single address constructor argument and wait for its code
    async fn deploy_contract(
        &self,
        kind: ContractKind,
        artifact: &ContractArtifact,
        constructor_arg: Address,
        nonce: u64,
    ) -> Result<DeployedContract, ScriptError> {
        info!(
            "Deploying {} ({}) with nonce {} and constructor argument {}",
            kind, artifact.contract_name, nonce, constructor_arg
        );
        let init_code = deployment_code(&artifact.bytecode, &[constructor_arg]);

        let what = format!("waiting for the {} deployment to be mined", kind);
        let receipt = with_deadline(
            &self.cancel,
            self.settings.mining_timeout,
            &what,
            self.client.deploy(init_code, nonce),
        )
        .await?;

        let code = with_deadline(
            &self.cancel,
            self.settings.mining_timeout,
            "fetching the deployed code",
            self.client.code_at(receipt.address),
        )
        .await?;
        if code.is_empty() {
            return Err(ScriptError::ContractDeployment(format!(
                "no code at {} after {} deployment {}",
                receipt.address, kind, receipt.tx_hash
            )));
        }

        let contract = DeployedContract {
            kind,
            address: receipt.address,
            constructor_args: vec![constructor_arg],
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
        };
        info!(
            "{} deployed at {} in block {:?}",
            kind, contract.address, contract.block_number
        );

        if let Some(output_file) = &self.settings.output_file {
            // The contract is live whatever happens to the record
            if let Err(e) = record_deployment(output_file, &contract) {
                warn!("Could not record the {} deployment: {}", kind, e);
            }
        }

        Ok(contract)
    }
}
