use alloy::{
    primitives::{Address, Bytes},
    sol_types::SolValue,
};

/// ABI encode a list of `address` constructor arguments, one 32 bytes word each
pub fn encode_constructor_args(args: &[Address]) -> Vec<u8> {
    args.iter().flat_map(|arg| arg.abi_encode()).collect()
}

/// Build the init code of a contract creation: creation bytecode followed by its encoded arguments
pub fn deployment_code(bytecode: &Bytes, args: &[Address]) -> Bytes {
    let mut code = bytecode.to_vec();
    code.extend(encode_constructor_args(args));
    Bytes::from(code)
}
