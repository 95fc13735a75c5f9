use std::{fmt::LowerHex, fs, fs::File, io::Read, path::PathBuf};

use alloy::primitives::Address;
use json::JsonValue;

use crate::{
    deploy::{ContractKind, DeployedContract},
    errors::ScriptError,
};

pub enum OutputKeys {
    // Address a contract got deployed at
    Deployment { key: &'static str },
    // Address argument given to its constructor
    ConstructorArg { key: &'static str },
    // Hash of the creation transaction
    Tx { key: &'static str },
}

/// Read a recorded value
pub fn read_output_file(file_path: &str, key: OutputKeys) -> Result<String, ScriptError> {
    if !PathBuf::from(file_path).exists() {
        return Err(ScriptError::JsonOutputError(format!(
            "Deployed addresses file {} not found",
            file_path
        )));
    }

    // Parse it's json content into objects
    let parsed_json = get_json_from_file(file_path)?;
    let (key, field) = match key {
        OutputKeys::Deployment { key } => (key, "deploy"),
        OutputKeys::ConstructorArg { key } => (key, "constructorArg"),
        OutputKeys::Tx { key } => (key, "tx"),
    };

    parsed_json[key][field]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ScriptError::JsonOutputError(format!("no {}.{} in {}", key, field, file_path)))
}

/// Writes the given value under the given key
pub fn write_output_file<T: LowerHex>(
    file_path: &str,
    key: OutputKeys,
    value: T,
) -> Result<(), ScriptError> {
    // If the file doesn't exist, create it
    if !PathBuf::from(file_path).exists() {
        fs::write(file_path, "{}").map_err(|e| ScriptError::JsonOutputError(e.to_string()))?;
    }

    // Parse it's json content into objects
    let mut parsed_json = get_json_from_file(file_path)?;

    // Update the right key
    match key {
        OutputKeys::Deployment { key } => {
            parsed_json[key]["deploy"] = JsonValue::String(format!("{value:#x}"))
        }
        OutputKeys::ConstructorArg { key } => {
            parsed_json[key]["constructorArg"] = JsonValue::String(format!("{value:#x}"))
        }
        OutputKeys::Tx { key } => parsed_json[key]["tx"] = JsonValue::String(format!("{value:#x}")),
    };

    // Write the updated json back to the file
    fs::write(file_path, json::stringify_pretty(parsed_json, 4))
        .map_err(|e| ScriptError::JsonOutputError(e.to_string()))?;

    Ok(())
}

/// Record a confirmed deployment
pub fn record_deployment(file_path: &str, contract: &DeployedContract) -> Result<(), ScriptError> {
    let key = contract.kind.output_key();
    write_output_file(file_path, OutputKeys::Deployment { key }, contract.address)?;
    if let Some(arg) = contract.constructor_args.first() {
        write_output_file(file_path, OutputKeys::ConstructorArg { key }, *arg)?;
    }
    write_output_file(file_path, OutputKeys::Tx { key }, contract.tx_hash)
}

/// Read back the address and constructor argument recorded for `kind`
pub fn read_deployment(
    file_path: &str,
    kind: ContractKind,
) -> Result<(Address, Address), ScriptError> {
    let key = kind.output_key();
    let address = parse_address(&read_output_file(file_path, OutputKeys::Deployment { key })?)?;
    let arg = parse_address(&read_output_file(
        file_path,
        OutputKeys::ConstructorArg { key },
    )?)?;
    Ok((address, arg))
}

fn parse_address(raw: &str) -> Result<Address, ScriptError> {
    raw.parse::<Address>()
        .map_err(|e| ScriptError::JsonOutputError(format!("invalid address {}: {}", raw, e)))
}

/// Parses the JSON file at the given path
fn get_json_from_file(file_path: &str) -> Result<JsonValue, ScriptError> {
    let mut file_contents = String::new();
    File::open(file_path)
        .map_err(|e| ScriptError::JsonOutputError(e.to_string()))?
        .read_to_string(&mut file_contents)
        .map_err(|e| ScriptError::JsonOutputError(e.to_string()))?;

    json::parse(&file_contents).map_err(|e| ScriptError::JsonOutputError(e.to_string()))
}
