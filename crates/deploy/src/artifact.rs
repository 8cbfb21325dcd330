//! Deployable artifacts and deployment plans.
//!
//! An [`ArtifactSpec`] names a contract, the bytecode to deploy, the account to deploy it
//! from and its constructor arguments. Arguments are either literal values or a reference
//! to the address of an artifact declared earlier in the same [`DeploymentPlan`].

use std::{fmt, path::Path, str::FromStr};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, U256},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::AccountRole;

/// Batch size passed to the upkeep contract by the built-in plan.
pub const DEFAULT_UPKEEP_BATCH_SIZE: u64 = 5;

/// Name of the registry artifact in the built-in plan.
pub const PRIZE_POOL_REGISTRY: &str = "PrizePoolRegistry";

/// Name of the upkeep artifact in the built-in plan.
pub const PRIZE_STRATEGY_UPKEEP: &str = "PrizeStrategyUpkeep";

/// A concrete constructor argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgValue {
    Address(Address),
    Uint(#[serde(with = "decimal_u256")] U256),
    Bool(bool),
    String(String),
    Bytes(Bytes),
}

impl ArgValue {
    /// The Solidity type this value is encoded as.
    pub fn sol_type(&self) -> &'static str {
        match self {
            ArgValue::Address(_) => "address",
            ArgValue::Uint(_) => "uint256",
            ArgValue::Bool(_) => "bool",
            ArgValue::String(_) => "string",
            ArgValue::Bytes(_) => "bytes",
        }
    }

    /// ABI-encode a list of constructor arguments.
    pub fn abi_encode_params(args: &[ArgValue]) -> Vec<u8> {
        if args.is_empty() {
            return Vec::new();
        }
        DynSolValue::Tuple(args.iter().map(DynSolValue::from).collect()).abi_encode_params()
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Address(address) => write!(f, "{address}"),
            ArgValue::Uint(value) => write!(f, "{value}"),
            ArgValue::Bool(value) => write!(f, "{value}"),
            ArgValue::String(value) => write!(f, "{value:?}"),
            ArgValue::Bytes(value) => write!(f, "{value}"),
        }
    }
}

impl From<&ArgValue> for DynSolValue {
    fn from(value: &ArgValue) -> Self {
        match value {
            ArgValue::Address(address) => DynSolValue::Address(*address),
            ArgValue::Uint(value) => DynSolValue::Uint(*value, 256),
            ArgValue::Bool(value) => DynSolValue::Bool(*value),
            ArgValue::String(value) => DynSolValue::String(value.clone()),
            ArgValue::Bytes(value) => DynSolValue::Bytes(value.to_vec()),
        }
    }
}

impl From<Address> for ArgValue {
    fn from(value: Address) -> Self {
        ArgValue::Address(value)
    }
}

impl From<U256> for ArgValue {
    fn from(value: U256) -> Self {
        ArgValue::Uint(value)
    }
}

impl From<u64> for ArgValue {
    fn from(value: u64) -> Self {
        ArgValue::Uint(U256::from(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::String(value.to_string())
    }
}

impl From<Bytes> for ArgValue {
    fn from(value: Bytes) -> Self {
        ArgValue::Bytes(value)
    }
}

/// A constructor argument descriptor.
///
/// In a TOML plan, a reference is written `{ address_of = "Registry" }` and a literal as
/// `{ uint = "5" }`, `{ address = "0x..." }`, `{ bool = true }`, `{ string = "..." }` or
/// `{ bytes = "0x..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgTemplate {
    /// The address of an artifact declared earlier in the plan.
    AddressOf { address_of: String },
    /// A literal value.
    Literal(ArgValue),
}

impl ArgTemplate {
    pub fn address_of(artifact: impl Into<String>) -> Self {
        ArgTemplate::AddressOf {
            address_of: artifact.into(),
        }
    }

    /// The artifact this argument depends on, if any.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            ArgTemplate::AddressOf { address_of } => Some(address_of),
            ArgTemplate::Literal(_) => None,
        }
    }
}

impl From<ArgValue> for ArgTemplate {
    fn from(value: ArgValue) -> Self {
        ArgTemplate::Literal(value)
    }
}

macro_rules! literal_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ArgTemplate {
                fn from(value: $ty) -> Self {
                    ArgTemplate::Literal(value.into())
                }
            }
        )*
    };
}

literal_from!(Address, U256, u64, bool, &str, Bytes);

fn default_skip_if_deployed() -> bool {
    true
}

/// One deployable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Unique name within a plan, also the key of its deployment record.
    pub name: String,
    /// Compiled artifact to deploy. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytecode: Option<String>,
    /// Constructor arguments, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ArgTemplate>,
    /// Account role that signs the deployment.
    #[serde(default)]
    pub deployer_account: AccountRole,
    /// Whether an existing deployment record for this name satisfies the artifact.
    #[serde(default = "default_skip_if_deployed")]
    pub skip_if_deployed: bool,
}

impl ArtifactSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytecode: None,
            args: Vec::new(),
            deployer_account: AccountRole::Deployer,
            skip_if_deployed: true,
        }
    }

    pub fn bytecode(mut self, bytecode: impl Into<String>) -> Self {
        self.bytecode = Some(bytecode.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<ArgTemplate>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a reference to the address of an earlier artifact.
    pub fn address_of(self, artifact: impl Into<String>) -> Self {
        self.arg(ArgTemplate::address_of(artifact))
    }

    pub fn from_account(mut self, role: AccountRole) -> Self {
        self.deployer_account = role;
        self
    }

    pub fn skip_if_deployed(mut self, skip: bool) -> Self {
        self.skip_if_deployed = skip;
        self
    }

    /// The compiled artifact to load.
    pub fn bytecode_ref(&self) -> &str {
        self.bytecode.as_deref().unwrap_or(&self.name)
    }

    /// Names of the artifacts whose addresses this one consumes.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(ArgTemplate::dependency)
    }
}

/// An ordered list of artifacts to deploy.
///
/// Order is significant: an artifact may only reference addresses of artifacts declared
/// before it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
}

impl DeploymentPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, artifact: ArtifactSpec) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// The prize pool registry followed by the upkeep contract that batches over it.
    pub fn prize_pool(batch_size: u64) -> Self {
        Self::new()
            .then(ArtifactSpec::new(PRIZE_POOL_REGISTRY))
            .then(
                ArtifactSpec::new(PRIZE_STRATEGY_UPKEEP)
                    .address_of(PRIZE_POOL_REGISTRY)
                    .arg(batch_size),
            )
    }

    /// Disable `skip_if_deployed` on every artifact.
    pub fn force_redeploy(mut self) -> Self {
        for artifact in &mut self.artifacts {
            artifact.skip_if_deployed = false;
        }
        self
    }

    /// Save the plan to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize deployment plan to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write deployment plan to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Deployment plan saved");
        Ok(())
    }

    /// Load a plan from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deployment plan from {}", path.display()))?;
        let plan: Self =
            toml::from_str(&content).context("Failed to parse deployment plan as TOML")?;
        tracing::debug!(path = %path.display(), artifacts = plan.artifacts.len(), "Deployment plan loaded");
        Ok(plan)
    }
}

/// Serde helpers writing `U256` as a decimal string and reading decimal, `0x` hex or
/// plain integers.
mod decimal_u256 {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    pub fn serialize<S: Serializer>(
        value: &U256,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<U256, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Int(value) => Ok(U256::from(value)),
            Raw::Str(value) => U256::from_str(value.trim()).map_err(serde::de::Error::custom),
        }
    }
}
