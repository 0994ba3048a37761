//! Extension modules that can be attached to a token
//!
//! Each module has its own settings and an `enabled` flag. The deployment
//! backend takes them as one flat key/value map.

use super::TokenStandard;
use crate::error::{DeployerError, DeployerResult};

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Basis points in 100%
pub const MAX_BPS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Compliance,
    Vesting,
    Document,
    PolicyEngine,
    Fees,
    FlashMint,
    Permit,
    Snapshot,
    Timelock,
    Votes,
    PayableToken,
    TemporaryApproval,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 12] = [
        ModuleKind::Compliance,
        ModuleKind::Vesting,
        ModuleKind::Document,
        ModuleKind::PolicyEngine,
        ModuleKind::Fees,
        ModuleKind::FlashMint,
        ModuleKind::Permit,
        ModuleKind::Snapshot,
        ModuleKind::Timelock,
        ModuleKind::Votes,
        ModuleKind::PayableToken,
        ModuleKind::TemporaryApproval,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ModuleKind::Compliance => "compliance",
            ModuleKind::Vesting => "vesting",
            ModuleKind::Document => "document",
            ModuleKind::PolicyEngine => "policy_engine",
            ModuleKind::Fees => "fees",
            ModuleKind::FlashMint => "flash_mint",
            ModuleKind::Permit => "permit",
            ModuleKind::Snapshot => "snapshot",
            ModuleKind::Timelock => "timelock",
            ModuleKind::Votes => "votes",
            ModuleKind::PayableToken => "payable_token",
            ModuleKind::TemporaryApproval => "temporary_approval",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModuleKind::Compliance => "Compliance",
            ModuleKind::Vesting => "Vesting",
            ModuleKind::Document => "Document Management",
            ModuleKind::PolicyEngine => "Policy Engine",
            ModuleKind::Fees => "Transfer Fees",
            ModuleKind::FlashMint => "Flash Mint",
            ModuleKind::Permit => "Permit (EIP-2612)",
            ModuleKind::Snapshot => "Snapshots",
            ModuleKind::Timelock => "Timelock",
            ModuleKind::Votes => "Governance Votes",
            ModuleKind::PayableToken => "Payable Token (ERC-1363)",
            ModuleKind::TemporaryApproval => "Temporary Approval (EIP-7674)",
        }
    }

    /// Modules built on ERC-20 allowances and balances need a fungible token
    pub fn applicable_to(&self, standard: TokenStandard) -> bool {
        match self {
            ModuleKind::FlashMint
            | ModuleKind::Permit
            | ModuleKind::Votes
            | ModuleKind::PayableToken
            | ModuleKind::TemporaryApproval => standard.is_fungible(),
            _ => true,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ModuleKind {
    type Err = DeployerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleKind::ALL
            .into_iter()
            .find(|kind| kind.key() == s)
            .ok_or_else(|| DeployerError::validation("module", format!("unknown module '{}'", s)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceModule {
    pub enabled: bool,
    pub kyc_required: bool,
    pub whitelist_required: bool,
    pub max_holders: Option<u64>,
    /// ISO country codes allowed to hold the token; empty allows all
    pub jurisdictions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VestingModule {
    pub enabled: bool,
    pub beneficiary: Option<String>,
    /// Unix timestamp; deployment time when absent
    pub start_time: Option<u64>,
    pub cliff_seconds: u64,
    pub duration_seconds: u64,
    pub revocable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub name: String,
    pub uri: String,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentModule {
    pub enabled: bool,
    pub documents: Vec<DocumentEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyEngineModule {
    pub enabled: bool,
    /// Existing policy contract; a new one is deployed when absent
    pub policy_address: Option<String>,
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeesModule {
    pub enabled: bool,
    pub transfer_fee_bps: u32,
    pub recipient: Option<String>,
    pub exempt_addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashMintModule {
    pub enabled: bool,
    pub fee_bps: u32,
    /// Whole tokens; unlimited when absent
    pub max_loan: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermitModule {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotModule {
    pub enabled: bool,
    /// Automatic snapshot interval; manual only when absent
    pub interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelockModule {
    pub enabled: bool,
    pub min_delay_seconds: u64,
    pub proposers: Vec<String>,
    pub executors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotesModule {
    pub enabled: bool,
    pub quorum_percent: u8,
    pub voting_delay_blocks: u64,
    pub voting_period_blocks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayableTokenModule {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporaryApprovalModule {
    pub enabled: bool,
    pub duration_seconds: u64,
}

/// Settings for every extension module; all start disabled
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionModuleConfigs {
    pub compliance: ComplianceModule,
    pub vesting: VestingModule,
    pub document: DocumentModule,
    pub policy_engine: PolicyEngineModule,
    pub fees: FeesModule,
    pub flash_mint: FlashMintModule,
    pub permit: PermitModule,
    pub snapshot: SnapshotModule,
    pub timelock: TimelockModule,
    pub votes: VotesModule,
    pub payable_token: PayableTokenModule,
    pub temporary_approval: TemporaryApprovalModule,
}

impl ExtensionModuleConfigs {
    pub fn is_enabled(&self, kind: ModuleKind) -> bool {
        match kind {
            ModuleKind::Compliance => self.compliance.enabled,
            ModuleKind::Vesting => self.vesting.enabled,
            ModuleKind::Document => self.document.enabled,
            ModuleKind::PolicyEngine => self.policy_engine.enabled,
            ModuleKind::Fees => self.fees.enabled,
            ModuleKind::FlashMint => self.flash_mint.enabled,
            ModuleKind::Permit => self.permit.enabled,
            ModuleKind::Snapshot => self.snapshot.enabled,
            ModuleKind::Timelock => self.timelock.enabled,
            ModuleKind::Votes => self.votes.enabled,
            ModuleKind::PayableToken => self.payable_token.enabled,
            ModuleKind::TemporaryApproval => self.temporary_approval.enabled,
        }
    }

    /// Toggle a module; its other settings are kept
    pub fn set_enabled(&mut self, kind: ModuleKind, enabled: bool) {
        let flag = match kind {
            ModuleKind::Compliance => &mut self.compliance.enabled,
            ModuleKind::Vesting => &mut self.vesting.enabled,
            ModuleKind::Document => &mut self.document.enabled,
            ModuleKind::PolicyEngine => &mut self.policy_engine.enabled,
            ModuleKind::Fees => &mut self.fees.enabled,
            ModuleKind::FlashMint => &mut self.flash_mint.enabled,
            ModuleKind::Permit => &mut self.permit.enabled,
            ModuleKind::Snapshot => &mut self.snapshot.enabled,
            ModuleKind::Timelock => &mut self.timelock.enabled,
            ModuleKind::Votes => &mut self.votes.enabled,
            ModuleKind::PayableToken => &mut self.payable_token.enabled,
            ModuleKind::TemporaryApproval => &mut self.temporary_approval.enabled,
        };
        *flag = enabled;
    }

    pub fn enabled_modules(&self) -> Vec<ModuleKind> {
        ModuleKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// Validate the settings of every enabled module
    pub fn validate(&self) -> DeployerResult<()> {
        if self.vesting.enabled {
            let v = &self.vesting;
            optional_address("vesting.beneficiary", v.beneficiary.as_deref())?;
            if v.duration_seconds == 0 {
                return Err(invalid("vesting.duration_seconds", "must be greater than zero"));
            }
            if v.cliff_seconds > v.duration_seconds {
                return Err(invalid(
                    "vesting.cliff_seconds",
                    "cliff cannot be longer than the vesting duration",
                ));
            }
        }

        if self.compliance.enabled {
            if self.compliance.max_holders == Some(0) {
                return Err(invalid("compliance.max_holders", "must be greater than zero"));
            }
            if let Some(code) = self
                .compliance
                .jurisdictions
                .iter()
                .find(|c| c.len() != 2 || !c.chars().all(|ch| ch.is_ascii_uppercase()))
            {
                return Err(invalid(
                    "compliance.jurisdictions",
                    format!("'{}' is not a two-letter country code", code),
                ));
            }
        }

        if self.document.enabled {
            for doc in &self.document.documents {
                if doc.name.trim().is_empty() || doc.uri.trim().is_empty() {
                    return Err(invalid("document.documents", "every document needs a name and URI"));
                }
            }
        }

        if self.policy_engine.enabled {
            optional_address(
                "policy_engine.policy_address",
                self.policy_engine.policy_address.as_deref(),
            )?;
        }

        if self.fees.enabled {
            if self.fees.transfer_fee_bps > MAX_BPS {
                return Err(invalid(
                    "fees.transfer_fee_bps",
                    format!("cannot exceed {} basis points", MAX_BPS),
                ));
            }
            let recipient = self.fees.recipient.as_deref().filter(|r| !r.trim().is_empty());
            if recipient.is_none() {
                return Err(invalid("fees.recipient", "a fee recipient is required"));
            }
            optional_address("fees.recipient", recipient)?;
            for exempt in &self.fees.exempt_addresses {
                optional_address("fees.exempt_addresses", Some(exempt.as_str()))?;
            }
        }

        if self.flash_mint.enabled && self.flash_mint.fee_bps > MAX_BPS {
            return Err(invalid(
                "flash_mint.fee_bps",
                format!("cannot exceed {} basis points", MAX_BPS),
            ));
        }

        if self.snapshot.enabled && self.snapshot.interval_seconds == Some(0) {
            return Err(invalid("snapshot.interval_seconds", "must be greater than zero"));
        }

        if self.timelock.enabled {
            if self.timelock.min_delay_seconds == 0 {
                return Err(invalid("timelock.min_delay_seconds", "must be greater than zero"));
            }
            for address in self.timelock.proposers.iter().chain(&self.timelock.executors) {
                optional_address("timelock.roles", Some(address.as_str()))?;
            }
        }

        if self.votes.enabled {
            if self.votes.quorum_percent == 0 || self.votes.quorum_percent > 100 {
                return Err(invalid("votes.quorum_percent", "must be between 1 and 100"));
            }
            if self.votes.voting_period_blocks == 0 {
                return Err(invalid("votes.voting_period_blocks", "must be greater than zero"));
            }
        }

        if self.temporary_approval.enabled && self.temporary_approval.duration_seconds == 0 {
            return Err(invalid(
                "temporary_approval.duration_seconds",
                "must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Fail when an enabled module cannot be attached to `standard`
    pub fn check_applicable(&self, standard: TokenStandard) -> DeployerResult<()> {
        let unsupported: Vec<&str> = self
            .enabled_modules()
            .into_iter()
            .filter(|kind| !kind.applicable_to(standard))
            .map(|kind| kind.key())
            .collect();

        if unsupported.is_empty() {
            Ok(())
        } else {
            Err(DeployerError::validation(
                "modules",
                format!(
                    "{} cannot be used with {} tokens",
                    unsupported.join(", "),
                    standard
                ),
            ))
        }
    }

    /// Flat map for the deployment backend: `<module>_enabled` for every
    /// module plus `<module>_<field>` for each field of enabled modules
    pub fn flatten(&self) -> DeployerResult<BTreeMap<String, Value>> {
        let mut flat = BTreeMap::new();

        for kind in ModuleKind::ALL {
            let enabled = self.is_enabled(kind);
            flat.insert(format!("{}_enabled", kind.key()), Value::Bool(enabled));
            if !enabled {
                continue;
            }

            if let Value::Object(fields) = self.module_value(kind)? {
                for (field, value) in fields {
                    if field != "enabled" {
                        flat.insert(format!("{}_{}", kind.key(), field), value);
                    }
                }
            }
        }

        Ok(flat)
    }

    fn module_value(&self, kind: ModuleKind) -> DeployerResult<Value> {
        let value = match kind {
            ModuleKind::Compliance => serde_json::to_value(&self.compliance),
            ModuleKind::Vesting => serde_json::to_value(&self.vesting),
            ModuleKind::Document => serde_json::to_value(&self.document),
            ModuleKind::PolicyEngine => serde_json::to_value(&self.policy_engine),
            ModuleKind::Fees => serde_json::to_value(&self.fees),
            ModuleKind::FlashMint => serde_json::to_value(&self.flash_mint),
            ModuleKind::Permit => serde_json::to_value(&self.permit),
            ModuleKind::Snapshot => serde_json::to_value(&self.snapshot),
            ModuleKind::Timelock => serde_json::to_value(&self.timelock),
            ModuleKind::Votes => serde_json::to_value(&self.votes),
            ModuleKind::PayableToken => serde_json::to_value(&self.payable_token),
            ModuleKind::TemporaryApproval => serde_json::to_value(&self.temporary_approval),
        };
        value.map_err(|e| DeployerError::Internal(format!("serializing {}: {}", kind, e)))
    }
}

/// Catalog entry shown to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInfo {
    pub key: ModuleKind,
    pub name: &'static str,
    pub standards: Vec<TokenStandard>,
}

pub fn catalog() -> Vec<ModuleInfo> {
    ModuleKind::ALL
        .into_iter()
        .map(|kind| ModuleInfo {
            key: kind,
            name: kind.display_name(),
            standards: TokenStandard::ALL
                .into_iter()
                .filter(|s| kind.applicable_to(*s))
                .collect(),
        })
        .collect()
}

fn invalid(field: &str, message: impl Into<String>) -> DeployerError {
    DeployerError::validation(field, message)
}

fn optional_address(field: &str, value: Option<&str>) -> DeployerResult<()> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v
            .parse::<Address>()
            .map(|_| ())
            .map_err(|_| invalid(field, format!("'{}' is not an address", v))),
        None => Ok(()),
    }
}
