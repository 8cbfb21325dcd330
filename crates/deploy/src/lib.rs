//! hatchery-deploy - Idempotent contract deployment library.
//!
//! This crate resolves deployment targets from configuration and deploys an ordered list
//! of contract artifacts onto one of them, wiring the addresses of earlier artifacts into
//! the constructor arguments of later ones.

mod accounts;
pub use accounts::{
    AccountError, AccountHandle, AccountProvider, AccountRole, AccountRoles, AccountSource,
    DEFAULT_DERIVATION_PATH, DEPLOYER_ACCOUNT_INDEX, NamedAccounts, derive_signer,
};

mod artifact;
pub use artifact::{
    ArgTemplate, ArgValue, ArtifactSpec, DEFAULT_UPKEEP_BATCH_SIZE, DeploymentPlan,
    PRIZE_POOL_REGISTRY, PRIZE_STRATEGY_UPKEEP,
};

mod chain;
pub use chain::{
    ChainClient, ChainClientError, DEFAULT_RECEIPT_POLL_ATTEMPTS, DEFAULT_RECEIPT_POLL_INTERVAL,
    DeployOptions, DeployReceipt, DeployRequest, JsonRpcChainClient, MAX_INITCODE_SIZE,
    load_bytecode, sign_legacy_transaction,
};

mod error;
pub use error::{OrchestratorError, ResolveError};

mod fingerprint;
pub use fingerprint::DeploymentFingerprint;

pub mod network;
pub use network::{
    ConfigEnv, EngineOverrides, LocalNetwork, NetworkProfile, PublicNetwork, ResolveWarning,
    ResolvedNetworks, resolve,
};

mod orchestrator;
pub use orchestrator::{DeploymentReport, Orchestrator};

mod record;
pub use record::{
    DeploymentRecord, DeploymentStatus, FileRecordStore, MemoryRecordStore, RecordStore,
    RecordStoreError,
};

pub mod rpc;
