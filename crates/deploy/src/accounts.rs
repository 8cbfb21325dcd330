//! Deployer accounts.
//!
//! An [`AccountSource`] describes where signing keys come from: either the node itself
//! (unlocked, node-managed accounts such as the ones exposed by a local dev node) or a
//! mnemonic from which signers are derived locally. [`NamedAccounts`] maps the roles an
//! artifact can be deployed from to concrete [`AccountHandle`]s.

use std::{collections::HashMap, fmt, future::Future};

use alloy_core::primitives::Address;
use alloy_signer_local::{LocalSignerError, MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default BIP-44 derivation path prefix. The account index is appended.
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/60'/0'/0/";

/// Account index used for the `deployer` role.
pub const DEPLOYER_ACCOUNT_INDEX: u32 = 0;

/// Roles an artifact can be deployed from.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    #[default]
    Deployer,
    Multisig,
}

/// Where the signing keys of a network profile come from.
#[derive(Clone, PartialEq, Eq)]
pub enum AccountSource {
    /// Accounts managed and unlocked by the node itself.
    Unlocked,
    /// Accounts derived locally from a mnemonic.
    Mnemonic {
        phrase: String,
        derivation_path: String,
    },
}

impl AccountSource {
    /// Create a mnemonic source using [`DEFAULT_DERIVATION_PATH`].
    pub fn mnemonic(phrase: impl Into<String>) -> Self {
        Self::Mnemonic {
            phrase: phrase.into(),
            derivation_path: DEFAULT_DERIVATION_PATH.to_string(),
        }
    }

    /// Whether the source cannot yield any account.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Unlocked => false,
            Self::Mnemonic { phrase, .. } => phrase.trim().is_empty(),
        }
    }
}

impl fmt::Debug for AccountSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => f.write_str("Unlocked"),
            Self::Mnemonic {
                derivation_path, ..
            } => f
                .debug_struct("Mnemonic")
                .field("phrase", &"<redacted>")
                .field("derivation_path", derivation_path)
                .finish(),
        }
    }
}

/// Account indices assigned to each role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRoles {
    pub deployer: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multisig: Option<u32>,
}

impl Default for AccountRoles {
    fn default() -> Self {
        Self {
            deployer: DEPLOYER_ACCOUNT_INDEX,
            multisig: None,
        }
    }
}

impl AccountRoles {
    /// Iterate over configured `(role, index)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (AccountRole, u32)> {
        std::iter::once((AccountRole::Deployer, self.deployer))
            .chain(self.multisig.map(|index| (AccountRole::Multisig, index)))
    }
}

/// A handle the chain client can send transactions from.
#[derive(Clone)]
pub enum AccountHandle {
    /// An account unlocked on the node; transactions are signed node-side.
    Unlocked(Address),
    /// A locally held key; transactions are signed before broadcast.
    Local(PrivateKeySigner),
}

impl AccountHandle {
    pub fn address(&self) -> Address {
        match self {
            Self::Unlocked(address) => *address,
            Self::Local(signer) => signer.address(),
        }
    }
}

impl fmt::Debug for AccountHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked(address) => f.debug_tuple("Unlocked").field(address).finish(),
            Self::Local(signer) => f.debug_tuple("Local").field(&signer.address()).finish(),
        }
    }
}

/// Errors raised while producing account handles.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Failed to derive account {index} from mnemonic: {source}")]
    Derivation {
        index: u32,
        #[source]
        source: LocalSignerError,
    },

    #[error("Node exposes {available} unlocked accounts, but account index {index} was requested")]
    NotEnoughAccounts { index: u32, available: usize },

    #[error("Failed to list node accounts: {0:#}")]
    Rpc(#[from] anyhow::Error),
}

/// Accounts available to a run, keyed by role.
#[derive(Debug, Clone, Default)]
pub struct NamedAccounts {
    accounts: HashMap<AccountRole, AccountHandle>,
}

impl NamedAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, role: AccountRole, handle: AccountHandle) -> Self {
        self.accounts.insert(role, handle);
        self
    }

    pub fn get(&self, role: AccountRole) -> Option<&AccountHandle> {
        self.accounts.get(&role)
    }

    pub fn contains(&self, role: AccountRole) -> bool {
        self.accounts.contains_key(&role)
    }

    /// Derive every configured role from a mnemonic.
    pub fn from_mnemonic(
        phrase: &str,
        derivation_path: &str,
        roles: &AccountRoles,
    ) -> Result<Self, AccountError> {
        roles.iter().try_fold(Self::new(), |accounts, (role, index)| {
            let signer = derive_signer(phrase, derivation_path, index)?;
            Ok(accounts.with(role, AccountHandle::Local(signer)))
        })
    }

    /// Map every configured role onto a list of node-unlocked addresses.
    pub fn from_unlocked(
        addresses: &[Address],
        roles: &AccountRoles,
    ) -> Result<Self, AccountError> {
        roles.iter().try_fold(Self::new(), |accounts, (role, index)| {
            let address = addresses.get(index as usize).copied().ok_or(
                AccountError::NotEnoughAccounts {
                    index,
                    available: addresses.len(),
                },
            )?;
            Ok(accounts.with(role, AccountHandle::Unlocked(address)))
        })
    }
}

/// Derive the signer at `index` below `derivation_path`.
pub fn derive_signer(
    phrase: &str,
    derivation_path: &str,
    index: u32,
) -> Result<PrivateKeySigner, AccountError> {
    MnemonicBuilder::<English>::default()
        .phrase(phrase)
        .derivation_path(format!("{derivation_path}{index}"))
        .and_then(|builder| builder.build())
        .map_err(|source| AccountError::Derivation { index, source })
}

/// Yields named signer handles for an account source.
pub trait AccountProvider {
    fn named_accounts(
        &self,
        source: &AccountSource,
        roles: &AccountRoles,
    ) -> impl Future<Output = Result<NamedAccounts, AccountError>> + Send;
}
