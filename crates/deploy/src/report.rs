//! Run summary for the operator.

use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Table, presets::UTF8_FULL};
use serde::{Deserialize, Serialize};

use crate::{
    AddressRegistry,
    executor::{ConfirmationState, DeployedContract, ProxyDeployment, SubmittedTx},
    registry::{Binding, Role},
    sequencer::InitializationReport,
    verify::VerificationOutcome,
};

/// A role binding at the end of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRecord {
    pub role: Role,
    pub address: Address,
    pub binding: Binding,
}

/// Outcome of a verification stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub role: Role,
    pub address: Address,
    pub outcome: VerificationOutcome,
}

/// Everything a run did, in the order it happened.
///
/// The bindings section is what an operator copies into the config as attach
/// addresses before re-running after a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub chain_id: u64,
    pub signer: Address,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub contracts: Vec<DeployedContract>,
    pub proxies: Vec<ProxyDeployment>,
    pub transactions: Vec<SubmittedTx>,
    pub verifications: Vec<VerificationRecord>,
    pub initializations: Vec<InitializationReport>,
    pub bindings: Vec<BindingRecord>,
}

impl RunReport {
    pub fn new(chain_id: u64, signer: Address) -> Self {
        Self {
            chain_id,
            signer,
            started_at: Utc::now(),
            finished_at: None,
            contracts: Vec::new(),
            proxies: Vec::new(),
            transactions: Vec::new(),
            verifications: Vec::new(),
            initializations: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Snapshot the registry and stamp the end time.
    pub fn finish(&mut self, registry: &AddressRegistry) {
        self.bindings = registry
            .iter()
            .map(|(role, address, binding)| BindingRecord {
                role,
                address,
                binding,
            })
            .collect();
        self.finished_at = Some(Utc::now());
    }

    pub fn contract(&self, role: Role) -> Option<&DeployedContract> {
        self.contracts.iter().find(|c| c.role == role)
    }

    pub fn proxy(&self, role: Role) -> Option<&ProxyDeployment> {
        self.proxies.iter().find(|p| p.role == role)
    }

    pub fn binding(&self, role: Role) -> Option<&BindingRecord> {
        self.bindings.iter().find(|b| b.role == role)
    }

    /// Number of transactions the run broadcast, reverted ones included.
    pub fn transaction_count(&self) -> usize {
        self.contracts.len()
            + self.proxies.len()
            + self.transactions.len()
            + self
                .initializations
                .iter()
                .map(|init| init.sent())
                .sum::<usize>()
    }

    /// Bindings and verification results as a table.
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["Role", "Address", "Binding", "State", "Tx"]);

        for record in &self.bindings {
            let (state, tx) = match (self.contract(record.role), self.proxy(record.role)) {
                (Some(contract), _) => (contract.state.to_string(), contract.tx_hash.to_string()),
                (None, Some(proxy)) => (
                    ConfirmationState::Mined.to_string(),
                    proxy.tx_hash.to_string(),
                ),
                (None, None) => ("-".to_string(), "-".to_string()),
            };
            let binding = match record.binding {
                Binding::Deployed => "deployed",
                Binding::Attached => "attached",
            };
            table.add_row(vec![
                record.role.to_string(),
                record.address.to_string(),
                binding.to_string(),
                state,
                tx,
            ]);
        }

        for tx in &self.transactions {
            table.add_row(vec![
                tx.label.clone(),
                tx.to.to_string(),
                "call".to_string(),
                "mined".to_string(),
                tx.tx_hash.to_string(),
            ]);
        }

        for init in &self.initializations {
            table.add_row(vec![
                "initialize".to_string(),
                init.factory_address.to_string(),
                "call".to_string(),
                format!("{}/{} mined", init.mined(), init.entries.len()),
                "-".to_string(),
            ]);
        }

        table
    }

    /// Write the report as `run-<timestamp>.json` under `dir`.
    pub fn save_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;

        let path = dir.join(format!(
            "run-{}.json",
            self.started_at.format("%Y%m%dT%H%M%SZ")
        ));
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize run report")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;

        tracing::info!(path = %path.display(), "Run report saved");

        Ok(path)
    }
}
