use std::fmt::{self, Display, Formatter};

use alloy::primitives::{Address, TxHash};

mod address;
mod orchestrator;

pub use address::predict_contract_address;
pub use orchestrator::{
    DeploymentFailure, DeploymentPlan, DeploymentReport, DeploymentStage, Orchestrator,
    OrchestratorSettings,
};

/// The two contracts of the governance pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractKind {
    Governor,
    Token,
}

impl ContractKind {
    /// Key of the contract in the deployment record
    pub fn output_key(&self) -> &'static str {
        match self {
            ContractKind::Governor => "governor",
            ContractKind::Token => "token",
        }
    }
}

impl Display for ContractKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ContractKind::Governor => write!(f, "Governor"),
            ContractKind::Token => write!(f, "Token"),
        }
    }
}

/// A contract confirmed on chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedContract {
    pub kind: ContractKind,
    pub address: Address,
    pub constructor_args: Vec<Address>,
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}
