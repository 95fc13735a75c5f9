use alloy::primitives::{keccak256, Address};
use ethers::{prelude::U256, utils::rlp};

/// Predict the address of the contract created by `deployer` with transaction `nonce`.
///
/// This is the CREATE rule: the last 20 bytes of `keccak256(rlp([deployer, nonce]))`.
/// The result is only meaningful if `deployer` really sends its creation
/// transaction with that exact nonce.
pub fn predict_contract_address(deployer: Address, nonce: u64) -> Address {
    // Ethers RLP
    let mut stream = rlp::RlpStream::new();
    stream.begin_list(2);
    stream.append(&deployer.to_vec());
    stream.append(&U256::from(nonce));
    let hash = keccak256(stream.out());

    Address::from_slice(&hash[12..])
}
