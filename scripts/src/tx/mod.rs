pub mod abi;
pub mod client;
