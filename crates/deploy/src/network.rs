//! Network profile resolution.
//!
//! [`resolve`] turns a flat configuration environment into the list of networks a run can
//! target. Public networks are only produced when both the RPC API key and the mnemonic are
//! available; local networks are always produced so that development keeps working without
//! remote credentials. Resolution performs no network I/O.

use std::{collections::BTreeMap, fmt, str::FromStr};

use derive_more::{Deref, From};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use url::Url;

use crate::{AccountRoles, AccountSource, DEFAULT_DERIVATION_PATH, DeployOptions, ResolveError};

/// Environment key holding the Infura API key.
pub const ENV_INFURA_API_KEY: &str = "INFURA_API_KEY";
/// Environment key holding the HD wallet mnemonic.
pub const ENV_HDWALLET_MNEMONIC: &str = "HDWALLET_MNEMONIC";
/// Environment key overriding the derivation path prefix.
pub const ENV_HDWALLET_DERIVATION_PATH: &str = "HDWALLET_DERIVATION_PATH";
/// Environment key enabling the `multisig` role at the given account index.
pub const ENV_MULTISIG_ACCOUNT_INDEX: &str = "MULTISIG_ACCOUNT_INDEX";
/// Environment key overriding the local node URL.
pub const ENV_LOCAL_RPC_URL: &str = "LOCAL_RPC_URL";
/// Environment key overriding the local block gas limit.
pub const ENV_LOCAL_BLOCK_GAS_LIMIT: &str = "LOCAL_BLOCK_GAS_LIMIT";
/// Environment key toggling unlimited contract size on `localhost`.
pub const ENV_LOCAL_ALLOW_UNLIMITED_CONTRACT_SIZE: &str = "LOCAL_ALLOW_UNLIMITED_CONTRACT_SIZE";

/// Default URL of a local development node.
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";
/// Block gas limit applied to the `localhost` network.
pub const DEFAULT_LOCAL_BLOCK_GAS_LIMIT: u64 = 200_000_000;

/// Flat mapping of named configuration values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, From)]
pub struct ConfigEnv(BTreeMap<String, String>);

impl ConfigEnv {
    /// Snapshot the process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    pub fn from_process() -> Self {
        Self(
            std::env::vars_os()
                .filter_map(|(key, value)| {
                    Some((key.into_string().ok()?, value.into_string().ok()?))
                })
                .collect(),
        )
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Look up a key, treating blank values as absent.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Public networks reachable through Infura.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum PublicNetwork {
    Kovan,
    Ropsten,
    Rinkeby,
    Mainnet,
}

impl PublicNetwork {
    pub fn chain_id(&self) -> u64 {
        match self {
            PublicNetwork::Kovan => 42,
            PublicNetwork::Ropsten => 3,
            PublicNetwork::Rinkeby => 4,
            PublicNetwork::Mainnet => 1,
        }
    }

    /// Infura endpoint for this network. The API key is appended as a single, escaped
    /// path segment.
    pub fn infura_url(&self, api_key: &str) -> Result<Url, ResolveError> {
        let invalid = |reason: String| ResolveError::InvalidProfile {
            network: self.to_string(),
            reason,
        };

        if matches!(api_key, "." | "..") {
            return Err(invalid(format!("`{api_key}` is not a valid API key")));
        }

        let mut url = Url::parse(&format!("https://{self}.infura.io/v3"))
            .map_err(|e| invalid(format!("invalid RPC endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| invalid("RPC endpoint cannot carry an API key".to_string()))?
            .push(api_key);
        Ok(url)
    }
}

/// Networks backed by a local node.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum LocalNetwork {
    /// A local development node with relaxed engine limits.
    Localhost,
    /// A local node forking a remote chain.
    Fork,
}

/// Engine overrides applied to local targets only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_gas_limit: Option<u64>,
    #[serde(default)]
    pub allow_unlimited_contract_size: bool,
}

/// A resolved deployment target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    /// Network identifier, also the namespace of persisted records.
    pub name: String,
    /// Expected chain ID, when known ahead of time.
    pub chain_id: Option<u64>,
    /// URL of the chain node.
    pub rpc_endpoint: Option<Url>,
    /// Where signing keys come from.
    pub account_source: AccountSource,
    /// Account indices assigned to each role.
    pub roles: AccountRoles,
    /// Whether deployment results are durably recorded.
    pub persist_records: bool,
    /// Local-only engine overrides.
    pub overrides: EngineOverrides,
}

impl NetworkProfile {
    /// Build a profile, enforcing that persisted profiles have an endpoint and accounts.
    pub fn new(
        name: impl Into<String>,
        rpc_endpoint: Option<Url>,
        account_source: AccountSource,
        persist_records: bool,
    ) -> Result<Self, ResolveError> {
        let name = name.into();
        let invalid = |reason: &str| ResolveError::InvalidProfile {
            network: name.clone(),
            reason: reason.to_string(),
        };

        if name.trim().is_empty() {
            return Err(invalid("network name must not be empty"));
        }

        if persist_records {
            let has_endpoint = rpc_endpoint
                .as_ref()
                .and_then(Url::host_str)
                .is_some_and(|host| !host.is_empty());
            if !has_endpoint {
                return Err(invalid("a persisted profile requires an RPC endpoint"));
            }
            if account_source.is_empty() {
                return Err(invalid("a persisted profile requires an account source"));
            }
        }

        Ok(Self {
            name,
            chain_id: None,
            rpc_endpoint,
            account_source,
            roles: AccountRoles::default(),
            persist_records,
            overrides: EngineOverrides::default(),
        })
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_roles(mut self, roles: AccountRoles) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_overrides(mut self, overrides: EngineOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Options forwarded to the chain client for every deployment on this network.
    pub fn deploy_options(&self) -> DeployOptions {
        DeployOptions {
            block_gas_limit: self.overrides.block_gas_limit,
            allow_unlimited_contract_size: self.overrides.allow_unlimited_contract_size,
        }
    }
}

/// Non-fatal conditions found during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveWarning {
    /// Remote credentials are missing; only local networks are available.
    MissingCredentials { missing: Vec<&'static str> },
    /// An override value could not be parsed and its default was used instead.
    IgnoredOverride { key: &'static str, value: String },
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredentials { missing } => write!(
                f,
                "Missing {}; only local networks are available",
                missing.join(" and ")
            ),
            Self::IgnoredOverride { key, value } => {
                write!(f, "Ignoring unparseable value `{value}` for {key}")
            }
        }
    }
}

/// Output of [`resolve`]: the available profiles, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedNetworks {
    profiles: Vec<NetworkProfile>,
    warnings: Vec<ResolveWarning>,
}

impl ResolvedNetworks {
    pub fn get(&self, name: &str) -> Option<&NetworkProfile> {
        self.profiles.iter().find(|profile| profile.name == name)
    }

    pub fn profiles(&self) -> &[NetworkProfile] {
        &self.profiles
    }

    pub fn warnings(&self) -> &[ResolveWarning] {
        &self.warnings
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }

    /// True when no remote network could be configured.
    pub fn is_local_only(&self) -> bool {
        self.profiles.iter().all(|p| !p.persist_records)
    }
}

/// Resolve every network available from `env`.
///
/// Never fails because of missing credentials: in that case only local networks are
/// returned and a [`ResolveWarning::MissingCredentials`] is attached.
pub fn resolve(env: &ConfigEnv) -> Result<ResolvedNetworks, ResolveError> {
    let mut resolved = ResolvedNetworks::default();

    let roles = AccountRoles {
        multisig: parse_override(env, ENV_MULTISIG_ACCOUNT_INDEX, &mut resolved.warnings),
        ..AccountRoles::default()
    };

    let local_url = match env.value(ENV_LOCAL_RPC_URL).map(|raw| (raw, Url::parse(raw))) {
        Some((_, Ok(url))) => url,
        Some((raw, Err(_))) => {
            resolved.warnings.push(ResolveWarning::IgnoredOverride {
                key: ENV_LOCAL_RPC_URL,
                value: raw.to_string(),
            });
            default_local_url()?
        }
        None => default_local_url()?,
    };

    let block_gas_limit = parse_override(env, ENV_LOCAL_BLOCK_GAS_LIMIT, &mut resolved.warnings)
        .unwrap_or(DEFAULT_LOCAL_BLOCK_GAS_LIMIT);
    let allow_unlimited_contract_size = parse_override(
        env,
        ENV_LOCAL_ALLOW_UNLIMITED_CONTRACT_SIZE,
        &mut resolved.warnings,
    )
    .unwrap_or(true);

    for local in LocalNetwork::iter() {
        let overrides = match local {
            LocalNetwork::Localhost => EngineOverrides {
                block_gas_limit: Some(block_gas_limit),
                allow_unlimited_contract_size,
            },
            LocalNetwork::Fork => EngineOverrides::default(),
        };

        let profile = NetworkProfile::new(
            local.to_string(),
            Some(local_url.clone()),
            AccountSource::Unlocked,
            false,
        )?
        .with_roles(roles)
        .with_overrides(overrides);

        resolved.profiles.push(profile);
    }

    let api_key = env.value(ENV_INFURA_API_KEY);
    let mnemonic = env.value(ENV_HDWALLET_MNEMONIC);

    match (api_key, mnemonic) {
        (Some(api_key), Some(mnemonic)) => {
            tracing::debug!("Loading public networks");

            let derivation_path = env
                .value(ENV_HDWALLET_DERIVATION_PATH)
                .unwrap_or(DEFAULT_DERIVATION_PATH)
                .to_string();
            let account_source = AccountSource::Mnemonic {
                phrase: mnemonic.to_string(),
                derivation_path,
            };

            for network in PublicNetwork::iter() {
                let url = network.infura_url(api_key)?;

                let profile = NetworkProfile::new(
                    network.to_string(),
                    Some(url),
                    account_source.clone(),
                    true,
                )?
                .with_chain_id(network.chain_id())
                .with_roles(roles);

                resolved.profiles.push(profile);
            }
        }
        (api_key, mnemonic) => {
            let missing = [
                (api_key.is_none(), ENV_INFURA_API_KEY),
                (mnemonic.is_none(), ENV_HDWALLET_MNEMONIC),
            ]
            .into_iter()
            .filter_map(|(absent, key)| absent.then_some(key))
            .collect();

            resolved
                .warnings
                .push(ResolveWarning::MissingCredentials { missing });
        }
    }

    for warning in &resolved.warnings {
        tracing::warn!("{warning}");
    }

    Ok(resolved)
}

fn default_local_url() -> Result<Url, ResolveError> {
    Url::parse(DEFAULT_LOCAL_RPC_URL).map_err(|e| ResolveError::InvalidProfile {
        network: LocalNetwork::Localhost.to_string(),
        reason: format!("invalid RPC endpoint: {e}"),
    })
}

fn parse_override<T: FromStr>(
    env: &ConfigEnv,
    key: &'static str,
    warnings: &mut Vec<ResolveWarning>,
) -> Option<T> {
    let raw = env.value(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warnings.push(ResolveWarning::IgnoredOverride {
                key,
                value: raw.to_string(),
            });
            None
        }
    }
}
