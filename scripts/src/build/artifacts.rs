use std::{
    fs,
    path::{Path, PathBuf},
};

use alloy::{hex, primitives::Bytes};
use json::JsonValue;
use tracing::warn;

use crate::errors::ScriptError;

/// Compiler inputs needed to verify a contract on an explorer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    /// Full solc version, e.g. `0.8.17+commit.8df45f5f`
    pub solc_long_version: String,
    /// Serialized solc standard json input
    pub input: String,
}

/// A compiled contract, as emitted by Hardhat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifact {
    pub contract_name: String,
    pub source_name: String,
    /// Creation bytecode, without constructor arguments
    pub bytecode: Bytes,
    pub build_info: Option<BuildInfo>,
}

impl ContractArtifact {
    /// `path/to/Source.sol:Name`, the identifier explorers expect
    pub fn fully_qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }
}

/// Locates artifacts under a Hardhat `artifacts/` directory
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Load the artifact of `contract_name`, with its build info when available
    pub fn load(&self, contract_name: &str) -> Result<ContractArtifact, ScriptError> {
        let artifact_path = find_artifact(&self.root, &format!("{contract_name}.json"))?
            .ok_or_else(|| {
                ScriptError::Artifact(format!(
                    "no artifact for {} under {}",
                    contract_name,
                    self.root.display()
                ))
            })?;
        let parsed = read_json(&artifact_path)?;

        let bytecode_hex = parsed["bytecode"].as_str().ok_or_else(|| {
            ScriptError::Artifact(format!("{} has no bytecode", artifact_path.display()))
        })?;
        let bytecode = hex::decode(bytecode_hex.trim_start_matches("0x"))
            .map_err(|e| ScriptError::Artifact(e.to_string()))?;
        if bytecode.is_empty() {
            // Interfaces and abstract contracts compile to nothing
            return Err(ScriptError::Artifact(format!(
                "{} is not deployable, its bytecode is empty",
                contract_name
            )));
        }

        // Only verification needs the build info, a broken link must not block a deployment
        let build_info = match load_build_info(&artifact_path.with_extension("dbg.json")) {
            Ok(build_info) => build_info,
            Err(e) => {
                warn!("No build info for {}, it cannot be verified: {}", contract_name, e);
                None
            }
        };

        Ok(ContractArtifact {
            contract_name: parsed["contractName"]
                .as_str()
                .unwrap_or(contract_name)
                .to_string(),
            source_name: parsed["sourceName"].as_str().unwrap_or_default().to_string(),
            bytecode: Bytes::from(bytecode),
            build_info,
        })
    }
}

/// Follow the `.dbg.json` link to the build info holding the compiler input
fn load_build_info(dbg_path: &Path) -> Result<Option<BuildInfo>, ScriptError> {
    if !dbg_path.exists() {
        return Ok(None);
    }

    let dbg = read_json(dbg_path)?;
    let Some(relative) = dbg["buildInfo"].as_str() else {
        return Ok(None);
    };
    let base = dbg_path.parent().unwrap_or_else(|| Path::new("."));
    let build_info = read_json(&base.join(relative))?;

    let solc_long_version = build_info["solcLongVersion"]
        .as_str()
        .ok_or_else(|| ScriptError::Artifact(format!("{} has no solcLongVersion", relative)))?
        .to_string();
    if build_info["input"].is_null() {
        return Err(ScriptError::Artifact(format!("{} has no compiler input", relative)));
    }

    Ok(Some(BuildInfo {
        solc_long_version,
        input: json::stringify(build_info["input"].clone()),
    }))
}

/// Depth first search for `file_name`, skipping the build info directory
fn find_artifact(dir: &Path, file_name: &str) -> Result<Option<PathBuf>, ScriptError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| ScriptError::Artifact(format!("{}: {}", dir.display(), e)))?;

    let mut subdirs = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| ScriptError::Artifact(e.to_string()))?
            .path();
        if path.is_dir() {
            if !path.ends_with("build-info") {
                subdirs.push(path);
            }
        } else if path.file_name().is_some_and(|name| name == file_name) {
            return Ok(Some(path));
        }
    }

    // Sorted so the same tree always resolves to the same artifact
    subdirs.sort();
    for subdir in subdirs {
        if let Some(found) = find_artifact(&subdir, file_name)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Parses the JSON file at the given path
fn read_json(path: &Path) -> Result<JsonValue, ScriptError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ScriptError::Artifact(format!("{}: {}", path.display(), e)))?;
    json::parse(&contents).map_err(|e| ScriptError::Artifact(format!("{}: {}", path.display(), e)))
}
