//! Sequential, fail-fast deployment of a list of artifacts onto one network.
//!
//! Artifacts are processed strictly in declaration order. An artifact may consume the
//! address of any artifact declared before it; forward references are rejected before
//! anything is read from the record store or sent to the chain.

use std::collections::{HashMap, HashSet};

use alloy_core::primitives::Address;

use crate::{
    ArgTemplate, ArgValue, ArtifactSpec, ChainClient, DeployRequest, DeploymentFingerprint,
    DeploymentRecord, NamedAccounts, NetworkProfile, OrchestratorError, RecordStore,
};

/// Outcome of one orchestrator run.
#[derive(Debug)]
pub struct DeploymentReport {
    pub network: String,
    /// One record per artifact, in declaration order.
    pub records: Vec<DeploymentRecord>,
    /// The error that stopped the run early, if any.
    pub halted: Option<OrchestratorError>,
}

impl DeploymentReport {
    /// True iff every artifact was deployed or already deployed.
    pub fn is_success(&self) -> bool {
        self.halted.is_none() && self.records.iter().all(|r| r.status.is_success())
    }

    /// Address of an artifact processed during the run.
    pub fn address_of(&self, artifact: &str) -> Option<Address> {
        self.records
            .iter()
            .find(|r| r.artifact_name == artifact)
            .and_then(DeploymentRecord::deployed_address)
    }

    pub fn record(&self, artifact: &str) -> Option<&DeploymentRecord> {
        self.records.iter().find(|r| r.artifact_name == artifact)
    }
}

/// Drives deployments through a chain client and a record store.
#[derive(Debug)]
pub struct Orchestrator<'a, C, S> {
    client: &'a C,
    store: &'a S,
    accounts: &'a NamedAccounts,
}

impl<'a, C: ChainClient, S: RecordStore> Orchestrator<'a, C, S> {
    pub fn new(client: &'a C, store: &'a S, accounts: &'a NamedAccounts) -> Self {
        Self {
            client,
            store,
            accounts,
        }
    }

    /// Check a plan without touching the store or the chain.
    pub fn validate(&self, specs: &[ArtifactSpec]) -> Result<(), OrchestratorError> {
        let mut declared = HashSet::with_capacity(specs.len());

        for spec in specs {
            if let Some(dependency) = spec.dependencies().find(|dep| !declared.contains(dep)) {
                return Err(OrchestratorError::UnresolvedDependency {
                    artifact: spec.name.clone(),
                    dependency: dependency.to_string(),
                });
            }

            if !self.accounts.contains(spec.deployer_account) {
                return Err(OrchestratorError::MissingAccount {
                    artifact: spec.name.clone(),
                    role: spec.deployer_account,
                });
            }

            if !declared.insert(spec.name.as_str()) {
                return Err(OrchestratorError::DuplicateArtifact(spec.name.clone()));
            }
        }

        Ok(())
    }

    /// Deploy `specs` onto `profile`.
    ///
    /// Returns `Err` only when the plan is invalid. Once processing starts, the first
    /// failing artifact halts the run: its error is kept in [`DeploymentReport::halted`]
    /// and every later artifact is reported as not attempted.
    pub async fn run(
        &self,
        profile: &NetworkProfile,
        specs: &[ArtifactSpec],
    ) -> Result<DeploymentReport, OrchestratorError> {
        self.validate(specs)?;

        tracing::info!(
            network = %profile.name,
            artifacts = specs.len(),
            persist_records = profile.persist_records,
            "Starting deployment"
        );

        let mut addresses: HashMap<&str, Address> = HashMap::with_capacity(specs.len());
        let mut records = Vec::with_capacity(specs.len());
        let mut halted = None;

        for (index, spec) in specs.iter().enumerate() {
            let (record, error) = self.process(profile, spec, &addresses).await;

            if let Some(address) = record.deployed_address() {
                addresses.insert(spec.name.as_str(), address);
            }
            records.push(record);

            if let Some(error) = error {
                records.extend(
                    specs[index + 1..]
                        .iter()
                        .map(|later| DeploymentRecord::not_attempted(&later.name, &profile.name)),
                );
                halted = Some(error);
                break;
            }
        }

        Ok(DeploymentReport {
            network: profile.name.clone(),
            records,
            halted,
        })
    }

    /// Process one artifact. A returned error halts the run.
    async fn process(
        &self,
        profile: &NetworkProfile,
        spec: &ArtifactSpec,
        addresses: &HashMap<&str, Address>,
    ) -> (DeploymentRecord, Option<OrchestratorError>) {
        let halt = |error: OrchestratorError, fingerprint: Option<String>| {
            tracing::error!(artifact = %spec.name, network = %profile.name, "{error}");
            (
                DeploymentRecord::failed(&spec.name, &profile.name, fingerprint, error.to_string()),
                Some(error),
            )
        };

        let args = match resolve_args(spec, addresses) {
            Ok(args) => args,
            Err(error) => return halt(error, None),
        };
        let fingerprint = DeploymentFingerprint::new(spec.bytecode_ref(), &args).compute_hash();

        if spec.skip_if_deployed {
            match self.store.get(&spec.name, &profile.name).await {
                Ok(Some(prior)) if prior.deployed_address().is_some() => {
                    if prior.fingerprint.as_deref().is_some_and(|f| f != fingerprint) {
                        tracing::warn!(
                            artifact = %spec.name,
                            network = %profile.name,
                            "Recorded deployment was built from different bytecode or arguments, reusing it anyway"
                        );
                    }
                    let record = DeploymentRecord::skipped(&prior);
                    tracing::info!(
                        artifact = %spec.name,
                        address = ?record.address,
                        "Reusing existing deployment"
                    );
                    return (record, None);
                }
                Ok(Some(prior)) => {
                    tracing::debug!(artifact = %spec.name, status = %prior.status, "Prior attempt did not deploy, deploying again");
                }
                Ok(None) => {}
                Err(source) if profile.persist_records => {
                    let error = OrchestratorError::RecordStoreUnavailable {
                        artifact: spec.name.clone(),
                        source,
                    };
                    return halt(error, Some(fingerprint));
                }
                Err(e) => {
                    tracing::warn!(artifact = %spec.name, error = %e, "Record store unavailable, deploying without a prior record");
                }
            }
        }

        let Some(from) = self.accounts.get(spec.deployer_account) else {
            let error = OrchestratorError::MissingAccount {
                artifact: spec.name.clone(),
                role: spec.deployer_account,
            };
            return halt(error, Some(fingerprint));
        };

        let request = DeployRequest {
            artifact: &spec.name,
            bytecode: spec.bytecode_ref(),
            args: &args,
            from,
            options: profile.deploy_options(),
        };

        let receipt = match self.client.deploy_contract(request).await {
            Ok(receipt) => receipt,
            Err(source) => {
                let record = DeploymentRecord::failed(
                    &spec.name,
                    &profile.name,
                    Some(fingerprint),
                    source.to_string(),
                );
                let error = OrchestratorError::DeploymentFailed {
                    artifact: spec.name.clone(),
                    source,
                };
                tracing::error!(artifact = %spec.name, network = %profile.name, "{error}");

                if profile.persist_records {
                    self.record_failure(&record).await;
                }
                return (record, Some(error));
            }
        };

        tracing::info!(
            artifact = %spec.name,
            address = %receipt.address,
            tx_hash = ?receipt.tx_hash,
            "Deployed artifact"
        );

        let record = DeploymentRecord::deployed(
            &spec.name,
            &profile.name,
            receipt.address,
            fingerprint,
            receipt.tx_hash,
        );

        if !profile.persist_records {
            return (record, None);
        }

        match self.store.put(&record).await {
            Ok(()) => (record, None),
            Err(source) => {
                let error = OrchestratorError::RecordStoreUnavailable {
                    artifact: spec.name.clone(),
                    source,
                };
                tracing::error!(artifact = %spec.name, network = %profile.name, "{error}");
                (record, Some(error))
            }
        }
    }

    /// Persist a failed attempt unless it would replace a live deployment.
    ///
    /// A forced redeploy does not read the store up front, so the stored record is checked
    /// here before anything is overwritten.
    async fn record_failure(&self, record: &DeploymentRecord) {
        let artifact = record.artifact_name.as_str();

        match self.store.get(artifact, &record.network).await {
            Ok(Some(prior)) if prior.deployed_address().is_some() => {
                tracing::warn!(
                    artifact,
                    address = ?prior.address,
                    "Keeping the existing deployment record"
                );
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(artifact, error = %e, "Failed to read the existing record, not recording deployment failure");
                return;
            }
        }

        if let Err(e) = self.store.put(record).await {
            tracing::warn!(artifact, error = %e, "Failed to record deployment failure");
        }
    }
}

/// Substitute address references with addresses produced earlier in the run.
fn resolve_args(
    spec: &ArtifactSpec,
    addresses: &HashMap<&str, Address>,
) -> Result<Vec<ArgValue>, OrchestratorError> {
    spec.args
        .iter()
        .map(|arg| match arg {
            ArgTemplate::Literal(value) => Ok(value.clone()),
            ArgTemplate::AddressOf { address_of } => addresses
                .get(address_of.as_str())
                .copied()
                .map(ArgValue::Address)
                .ok_or_else(|| OrchestratorError::UnresolvedDependency {
                    artifact: spec.name.clone(),
                    dependency: address_of.clone(),
                }),
        })
        .collect()
}
