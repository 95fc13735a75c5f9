//! Definitions of CLI arguments and commands for deploy scripts

use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::{
    commands::{deploy_contracts, predict_address, verify_deployed_contracts},
    constants::{
        DEFAULT_ARTIFACTS_DIR, DEFAULT_EXPLORER_API, DEFAULT_INDEX_TIMEOUT_SECS,
        DEFAULT_MINING_TIMEOUT_SECS, DEFAULT_OUTPUT_FILE, GOVERNOR_CONTRACT,
        PREDICTED_NONCE_OFFSET, TOKEN_CONTRACT,
    },
    errors::ScriptError,
};

/// Scripts for deploying & verifying the Governor and its governance Token
#[derive(Parser)]
pub struct Cli {
    /// Private key of the deployer
    #[arg(short, long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub priv_key: Option<String>,

    /// Network RPC URL
    #[arg(short, long, env = "RPC_URL")]
    pub rpc_url: Option<String>,

    /// Explorer API key, verification is skipped without it
    #[arg(long, env = "ETHERSCAN_API_KEY", hide_env_values = true)]
    pub etherscan_api_key: Option<String>,

    /// Etherscan compatible API endpoint
    #[arg(long, env = "EXPLORER_API_URL", default_value = DEFAULT_EXPLORER_API)]
    pub explorer_api_url: String,

    /// The command to run
    #[command(subcommand)]
    pub command: Command,
}

/// The possible CLI commands
#[derive(Subcommand)]
pub enum Command {
    /// Deploy the Governor and the Token, then verify them
    DeployContracts(DeployContractsArgs),
    /// Print the address a deployer will create a contract at
    PredictAddress(PredictAddressArgs),
    /// Verify already deployed contracts from the deployment record
    VerifyContracts(VerifyContractsArgs),
}

impl Command {
    /// Run the command
    pub async fn run(self, globals: GlobalArgs) -> Result<(), ScriptError> {
        match self {
            Command::DeployContracts(args) => {
                info!("Deploying contracts...");
                deploy_contracts(args, &globals).await
            }
            Command::PredictAddress(args) => predict_address(args, &globals).await,
            Command::VerifyContracts(args) => {
                info!("Verifying contracts...");
                verify_deployed_contracts(args, &globals).await
            }
        }
    }
}

/// Options shared by every command
pub struct GlobalArgs {
    pub priv_key: Option<String>,
    pub rpc_url: Option<String>,
    pub etherscan_api_key: Option<String>,
    pub explorer_api_url: String,
}

impl GlobalArgs {
    /// The deployer key, failing when none was configured
    pub fn priv_key(&self) -> Result<&str, ScriptError> {
        self.priv_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ScriptError::Credential("PRIVATE_KEY is not set".to_string()))
    }

    /// The network endpoint, only required by commands talking to the chain
    pub fn rpc_url(&self) -> Result<&str, ScriptError> {
        self.rpc_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ScriptError::Connection("RPC_URL is not set".to_string()))
    }
}

impl Cli {
    /// Split the global options from the command
    pub fn into_parts(self) -> (GlobalArgs, Command) {
        let globals = GlobalArgs {
            priv_key: self.priv_key,
            rpc_url: self.rpc_url.filter(|url| !url.trim().is_empty()),
            etherscan_api_key: self.etherscan_api_key.filter(|key| !key.trim().is_empty()),
            explorer_api_url: self.explorer_api_url,
        };
        (globals, self.command)
    }
}

/// Where the compiled contracts are
#[derive(Args)]
pub struct ArtifactArgs {
    /// Hardhat artifacts directory
    #[arg(long, default_value = DEFAULT_ARTIFACTS_DIR)]
    pub artifacts: String,
    /// Contract name of the Governor
    #[arg(long, default_value = GOVERNOR_CONTRACT)]
    pub governor: String,
    /// Contract name of the Token
    #[arg(long, default_value = TOKEN_CONTRACT)]
    pub token: String,
}

/// Deploy contracts
#[derive(Args)]
pub struct DeployContractsArgs {
    #[command(flatten)]
    pub artifacts: ArtifactArgs,
    /// Deployment record to write
    #[arg(short, long, default_value = DEFAULT_OUTPUT_FILE)]
    pub output: String,
    /// Seconds to wait for each transaction to be mined
    #[arg(long, default_value_t = DEFAULT_MINING_TIMEOUT_SECS)]
    pub mining_timeout: u64,
    /// Seconds to wait for the explorer to index each contract
    #[arg(long, default_value_t = DEFAULT_INDEX_TIMEOUT_SECS)]
    pub index_timeout: u64,
    /// Never verify, even with an explorer API key
    #[arg(long)]
    pub skip_verify: bool,
}

/// Predict a contract address
#[derive(Args)]
pub struct PredictAddressArgs {
    /// Deployer address, derived from the private key when absent
    #[arg(long)]
    pub deployer: Option<String>,
    /// Current deployer nonce, fetched from the RPC when absent
    #[arg(long)]
    pub nonce: Option<u64>,
    /// Transactions sent before the contract creation
    #[arg(long, default_value_t = PREDICTED_NONCE_OFFSET)]
    pub offset: u64,
}

/// Verify deployed contracts
#[derive(Args)]
pub struct VerifyContractsArgs {
    #[command(flatten)]
    pub artifacts: ArtifactArgs,
    /// Deployment record to read
    #[arg(short, long, default_value = DEFAULT_OUTPUT_FILE)]
    pub output: String,
    /// Seconds to wait for the explorer to index each contract
    #[arg(long, default_value_t = DEFAULT_INDEX_TIMEOUT_SECS)]
    pub index_timeout: u64,
}
