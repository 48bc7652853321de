//! Compiled contract artifacts (hardhat layout).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use derive_more::Deref;
use serde::Deserialize;

use super::ContractName;
use crate::DeployError;

/// Compiled output of a single contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifact {
    pub name: ContractName,
    /// Source path relative to the project root, e.g. `contracts/Merchant.sol`.
    pub source_name: String,
    /// Creation code without constructor arguments.
    pub bytecode: Bytes,
    /// Compiler build info holding the standard JSON input, if available.
    pub build_info: Option<PathBuf>,
}

impl ContractArtifact {
    pub fn new(name: ContractName, bytecode: impl Into<Bytes>) -> Self {
        Self {
            name,
            source_name: format!("contracts/{}.sol", name),
            bytecode: bytecode.into(),
            build_info: None,
        }
    }

    /// Fully qualified name, `<source>:<contract>`.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.name)
    }

    /// Load the compiler build info for source verification.
    pub fn load_build_info(&self) -> Result<BuildInfo> {
        let path = self
            .build_info
            .as_ref()
            .with_context(|| format!("No build info recorded for {}", self.name))?;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read build info {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse build info {}", path.display()))
    }
}

/// Compiler input and version, as hardhat writes them to `build-info/*.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    /// e.g. `0.8.2+commit.661d1103`.
    pub solc_long_version: String,
    /// Standard JSON compiler input.
    pub input: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatArtifact {
    contract_name: String,
    source_name: String,
    bytecode: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatDebugFile {
    build_info: PathBuf,
}

/// Artifacts for every [`ContractName`] found on disk.
#[derive(Debug, Clone, Default, Deref)]
pub struct Artifacts(HashMap<ContractName, ContractArtifact>);

impl Artifacts {
    /// Walk a hardhat `artifacts/` directory and load the known contracts.
    ///
    /// Files whose name is not a [`ContractName`] are ignored.
    pub fn load_hardhat(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            anyhow::bail!("Artifacts directory not found: {}", dir.display());
        }

        let mut artifacts = HashMap::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let entries = std::fs::read_dir(&current)
                .with_context(|| format!("Failed to list {}", current.display()))?;

            for entry in entries {
                let path = entry.context("Failed to read directory entry")?.path();

                if path.is_dir() {
                    if path.file_name().is_some_and(|n| n != "build-info") {
                        pending.push(path);
                    }
                    continue;
                }

                let Some(name) = artifact_name(&path) else {
                    continue;
                };

                let artifact = load_artifact(&path, name)?;
                tracing::debug!(
                    contract = %name,
                    path = %path.display(),
                    has_build_info = artifact.build_info.is_some(),
                    "Loaded artifact"
                );
                artifacts.insert(name, artifact);
            }
        }

        tracing::info!(
            dir = %dir.display(),
            count = artifacts.len(),
            "Contract artifacts loaded"
        );

        Ok(Self(artifacts))
    }

    /// The artifact for `name`.
    pub fn artifact(&self, name: ContractName) -> Result<&ContractArtifact, DeployError> {
        self.0.get(&name).ok_or_else(|| DeployError::Artifact {
            contract: name.to_string(),
            source: format!("no compiled artifact named {}", name).into(),
        })
    }
}

impl FromIterator<ContractArtifact> for Artifacts {
    fn from_iter<I: IntoIterator<Item = ContractArtifact>>(iter: I) -> Self {
        Self(iter.into_iter().map(|a| (a.name, a)).collect())
    }
}

/// `<Name>.json` for a known contract, excluding `<Name>.dbg.json`.
fn artifact_name(path: &Path) -> Option<ContractName> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.strip_suffix(".json")?;
    if stem.ends_with(".dbg") {
        return None;
    }
    ContractName::from_str(stem).ok()
}

fn load_artifact(path: &Path, name: ContractName) -> Result<ContractArtifact> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read artifact {}", path.display()))?;
    let raw: HardhatArtifact = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

    if raw.contract_name != name.to_string() {
        anyhow::bail!(
            "Artifact {} declares contract {}, expected {}",
            path.display(),
            raw.contract_name,
            name
        );
    }

    if raw.bytecode.is_empty() {
        anyhow::bail!(
            "Artifact {} has no creation code (abstract contract or interface?)",
            path.display()
        );
    }

    // The debug file points at the build info relative to itself.
    let debug_path = path.with_extension("dbg.json");
    let build_info = if debug_path.exists() {
        let content = std::fs::read_to_string(&debug_path)
            .with_context(|| format!("Failed to read {}", debug_path.display()))?;
        let debug: HardhatDebugFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", debug_path.display()))?;
        path.parent().map(|parent| parent.join(debug.build_info))
    } else {
        None
    };

    Ok(ContractArtifact {
        name,
        source_name: raw.source_name,
        bytecode: raw.bytecode,
        build_info,
    })
}
