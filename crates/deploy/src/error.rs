//! Error kinds surfaced while resolving profiles and running deployments.

use thiserror::Error;

use crate::{AccountRole, ChainClientError, RecordStoreError};

/// Errors raised while assembling network profiles.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A profile that persists records is missing an RPC endpoint or an account source.
    #[error("Invalid network profile `{network}`: {reason}")]
    InvalidProfile { network: String, reason: String },
}

/// Errors raised by the deployment orchestrator.
///
/// Plan-level errors (`UnresolvedDependency`, `DuplicateArtifact`, `MissingAccount`) are
/// detected before any store or chain interaction. Per-artifact errors
/// (`DeploymentFailed`, `RecordStoreUnavailable`) halt the run and are reported alongside
/// the records produced so far.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(
        "Artifact `{artifact}` references the address of `{dependency}`, which is not declared earlier in the plan"
    )]
    UnresolvedDependency { artifact: String, dependency: String },

    #[error("Artifact `{0}` is declared more than once in the plan")]
    DuplicateArtifact(String),

    #[error("Artifact `{artifact}` is deployed from the `{role}` account, which is not configured")]
    MissingAccount { artifact: String, role: AccountRole },

    #[error("Failed to deploy `{artifact}`: {source}")]
    DeploymentFailed {
        artifact: String,
        #[source]
        source: ChainClientError,
    },

    #[error("Deployment record store unavailable while processing `{artifact}`: {source}")]
    RecordStoreUnavailable {
        artifact: String,
        #[source]
        source: RecordStoreError,
    },
}

impl OrchestratorError {
    /// The artifact this error is attached to, if any.
    pub fn artifact(&self) -> &str {
        match self {
            Self::UnresolvedDependency { artifact, .. }
            | Self::MissingAccount { artifact, .. }
            | Self::DeploymentFailed { artifact, .. }
            | Self::RecordStoreUnavailable { artifact, .. } => artifact,
            Self::DuplicateArtifact(artifact) => artifact,
        }
    }
}
