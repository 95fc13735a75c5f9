//! Constants used in the deploy scripts

/// Default Etherscan compatible API endpoint, the multichain api pinned on Sepolia
pub const DEFAULT_EXPLORER_API: &str = "https://api.etherscan.io/v2/api?chainid=11155111";

/// Root of the Hardhat compilation output
pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

/// Where the deployed addresses are recorded
pub const DEFAULT_OUTPUT_FILE: &str = "deployed.json";

/// Contract names of the governance pair
pub const GOVERNOR_CONTRACT: &str = "MyGovernor";
pub const TOKEN_CONTRACT: &str = "MyToken";

/// The token is created by the transaction right after the governor one
pub const PREDICTED_NONCE_OFFSET: u64 = 1;

/// Lowercased fragment of the explorer message for an already verified contract
pub const ALREADY_VERIFIED_MARKER: &str = "already verified";

/// Explorer status while a verification is still queued
pub const VERIFICATION_PENDING_MARKER: &str = "pending in queue";

/// Timing defaults, in seconds
pub const DEFAULT_MINING_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_INDEX_TIMEOUT_SECS: u64 = 300;
pub const INDEX_INITIAL_DELAY_SECS: u64 = 5;
pub const INDEX_MAX_DELAY_SECS: u64 = 30;
pub const STATUS_INITIAL_DELAY_SECS: u64 = 3;
pub const STATUS_MAX_DELAY_SECS: u64 = 15;
pub const STATUS_TIMEOUT_SECS: u64 = 180;

/// Budget of the first rpc round trips, before the deployment starts
pub const RPC_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Per request timeout of the explorer http client
pub const EXPLORER_REQUEST_TIMEOUT_SECS: u64 = 30;
