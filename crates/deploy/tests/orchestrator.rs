//! Integration tests for the deployment orchestrator.
//!
//! The chain client and the record store are in-process doubles, so no node is needed.
//! Run with: cargo test --test orchestrator

use std::{
    collections::HashMap,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use alloy_core::primitives::{Address, B256, U256};
use hatchery_deploy::{
    AccountHandle, AccountRole, AccountSource, ArgValue, ArtifactSpec, ChainClient,
    ChainClientError, DeployOptions, DeployReceipt, DeployRequest, DeploymentPlan,
    DeploymentRecord, DeploymentStatus, EngineOverrides, FileRecordStore, MemoryRecordStore,
    NamedAccounts, NetworkProfile, Orchestrator, OrchestratorError, PRIZE_POOL_REGISTRY,
    PRIZE_STRATEGY_UPKEEP, RecordStore, RecordStoreError,
};
use tempdir::TempDir;
use tracing_subscriber::fmt::MakeWriter;
use url::Url;

const DEV_MNEMONIC: &str = "test test test test test test test test test test test junk";

/// A deployment as seen by the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeployCall {
    artifact: String,
    bytecode: String,
    args: Vec<ArgValue>,
    from: Address,
    options: DeployOptions,
}

/// Chain client that records every deployment and hands out deterministic addresses.
#[derive(Default)]
struct RecordingClient {
    calls: Mutex<Vec<DeployCall>>,
    addresses: HashMap<String, Address>,
    fail_on: Option<String>,
}

impl RecordingClient {
    fn new() -> Self {
        Self::default()
    }

    fn with_address(mut self, artifact: &str, address: Address) -> Self {
        self.addresses.insert(artifact.to_string(), address);
        self
    }

    fn failing_on(mut self, artifact: &str) -> Self {
        self.fail_on = Some(artifact.to_string());
        self
    }

    fn calls(&self) -> Vec<DeployCall> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ChainClient for RecordingClient {
    async fn deploy_contract(
        &self,
        request: DeployRequest<'_>,
    ) -> Result<DeployReceipt, ChainClientError> {
        let nonce = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(DeployCall {
                artifact: request.artifact.to_string(),
                bytecode: request.bytecode.to_string(),
                args: request.args.to_vec(),
                from: request.from.address(),
                options: request.options,
            });
            calls.len() as u8
        };

        let tx_hash = B256::with_last_byte(nonce);
        if self.fail_on.as_deref() == Some(request.artifact) {
            return Err(ChainClientError::Reverted { tx_hash });
        }

        let address = self
            .addresses
            .get(request.artifact)
            .copied()
            .unwrap_or_else(|| Address::with_last_byte(nonce));

        Ok(DeployReceipt {
            address,
            tx_hash: Some(tx_hash),
        })
    }
}

/// Record store wrapper counting accesses, optionally failing reads or writes.
#[derive(Default)]
struct CountingStore {
    inner: MemoryRecordStore,
    gets: AtomicUsize,
    puts: AtomicUsize,
    fail_reads: bool,
    fail_writes: bool,
}

impl CountingStore {
    fn new() -> Self {
        Self::default()
    }

    fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl RecordStore for CountingStore {
    async fn get(
        &self,
        artifact: &str,
        network: &str,
    ) -> Result<Option<DeploymentRecord>, RecordStoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            return Err(RecordStoreError::Backend("store offline".to_string()));
        }
        self.inner.get(artifact, network).await
    }

    async fn put(&self, record: &DeploymentRecord) -> Result<(), RecordStoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            return Err(RecordStoreError::Backend("store offline".to_string()));
        }
        self.inner.put(record).await
    }
}

/// Log sink shared between a test and the subscriber it installs.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn persisted_profile() -> NetworkProfile {
    NetworkProfile::new(
        "testnet",
        Some(Url::parse("https://testnet.example.org/v3/key").unwrap()),
        AccountSource::mnemonic(DEV_MNEMONIC),
        true,
    )
    .unwrap()
}

fn ephemeral_profile() -> NetworkProfile {
    NetworkProfile::new(
        "localhost",
        Some(Url::parse("http://127.0.0.1:8545").unwrap()),
        AccountSource::Unlocked,
        false,
    )
    .unwrap()
}

fn deployer() -> Address {
    Address::with_last_byte(0xd0)
}

fn accounts() -> NamedAccounts {
    NamedAccounts::new().with(AccountRole::Deployer, AccountHandle::Unlocked(deployer()))
}

fn statuses(records: &[DeploymentRecord]) -> Vec<&DeploymentStatus> {
    records.iter().map(|r| &r.status).collect()
}

fn three_artifacts() -> Vec<ArtifactSpec> {
    vec![
        ArtifactSpec::new("A"),
        ArtifactSpec::new("B").address_of("A"),
        ArtifactSpec::new("C").address_of("B"),
    ]
}

#[tokio::test]
async fn test_argument_substitution() {
    init_tracing();
    let a_address: Address = "0x0000000000000000000000000000000000000aaa".parse().unwrap();
    let client = RecordingClient::new().with_address("A", a_address);
    let store = MemoryRecordStore::new();
    let accounts = accounts();

    let specs = vec![
        ArtifactSpec::new("A"),
        ArtifactSpec::new("B").address_of("A").arg(5u64),
    ];

    let report = Orchestrator::new(&client, &store, &accounts)
        .run(&ephemeral_profile(), &specs)
        .await
        .unwrap();

    assert!(report.is_success());
    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[1].args,
        vec![ArgValue::Address(a_address), ArgValue::Uint(U256::from(5))]
    );
    assert_eq!(report.address_of("A"), Some(a_address));
}

#[tokio::test]
async fn test_second_run_skips_every_deployed_artifact() {
    init_tracing();
    let client = RecordingClient::new();
    let store = MemoryRecordStore::new();
    let accounts = accounts();
    let profile = persisted_profile();
    let specs = DeploymentPlan::prize_pool(5).artifacts;
    let orchestrator = Orchestrator::new(&client, &store, &accounts);

    let first = orchestrator.run(&profile, &specs).await.unwrap();
    assert!(first.is_success());
    assert_eq!(
        statuses(&first.records),
        vec![&DeploymentStatus::Deployed, &DeploymentStatus::Deployed]
    );

    let second = orchestrator.run(&profile, &specs).await.unwrap();
    assert!(second.is_success());
    assert_eq!(
        statuses(&second.records),
        vec![
            &DeploymentStatus::SkippedAlreadyDeployed,
            &DeploymentStatus::SkippedAlreadyDeployed
        ]
    );

    for name in [PRIZE_POOL_REGISTRY, PRIZE_STRATEGY_UPKEEP] {
        assert!(first.address_of(name).is_some());
        assert_eq!(first.address_of(name), second.address_of(name));
    }
    assert_eq!(client.call_count(), 2, "second run must not touch the chain");

    // Skips are not written back.
    let stored = store.get(PRIZE_POOL_REGISTRY, "testnet").await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Deployed);
}

#[tokio::test]
async fn test_forward_reference_fails_before_any_interaction() {
    init_tracing();
    let client = RecordingClient::new();
    let store = CountingStore::new();
    let accounts = accounts();

    let specs = vec![ArtifactSpec::new("B").address_of("A"), ArtifactSpec::new("A")];

    let result = Orchestrator::new(&client, &store, &accounts)
        .run(&persisted_profile(), &specs)
        .await;

    assert!(matches!(
        result,
        Err(OrchestratorError::UnresolvedDependency { ref artifact, ref dependency })
            if artifact == "B" && dependency == "A"
    ));
    assert_eq!(client.call_count(), 0);
    assert_eq!(store.gets(), 0);
    assert_eq!(store.puts(), 0);
}

#[tokio::test]
async fn test_fail_fast_stops_after_failed_artifact() {
    init_tracing();
    let client = RecordingClient::new().failing_on("B");
    let store = MemoryRecordStore::new();
    let accounts = accounts();

    let report = Orchestrator::new(&client, &store, &accounts)
        .run(&persisted_profile(), &three_artifacts())
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.records.len(), 3);
    assert_eq!(report.records[0].status, DeploymentStatus::Deployed);
    assert!(matches!(
        report.records[1].status,
        DeploymentStatus::Failed { .. }
    ));
    assert_eq!(report.records[2].status, DeploymentStatus::NotAttempted);

    assert!(matches!(
        report.halted,
        Some(OrchestratorError::DeploymentFailed { ref artifact, .. }) if artifact == "B"
    ));

    let artifacts: Vec<_> = client.calls().into_iter().map(|c| c.artifact).collect();
    assert_eq!(artifacts, vec!["A", "B"]);

    // The earlier success stays recorded, the failure is recorded, C is untouched.
    let a = store.get("A", "testnet").await.unwrap().unwrap();
    assert_eq!(a.status, DeploymentStatus::Deployed);
    let b = store.get("B", "testnet").await.unwrap().unwrap();
    assert!(matches!(b.status, DeploymentStatus::Failed { .. }));
    assert!(store.get("C", "testnet").await.unwrap().is_none());
}

#[tokio::test]
async fn test_ephemeral_profile_never_writes_records() {
    init_tracing();
    let client = RecordingClient::new();
    let store = CountingStore::new();
    let accounts = accounts();

    let report = Orchestrator::new(&client, &store, &accounts)
        .run(&ephemeral_profile(), &three_artifacts())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(store.puts(), 0);

    // Substitution still uses the in-run addresses.
    let calls = client.calls();
    assert_eq!(
        calls[2].args,
        vec![ArgValue::Address(report.address_of("B").unwrap())]
    );
}

#[tokio::test]
async fn test_prior_failed_record_is_retried() {
    init_tracing();
    let client = RecordingClient::new();
    let store = MemoryRecordStore::new();
    let accounts = accounts();

    store
        .put(&DeploymentRecord::failed("A", "testnet", None, "out of gas"))
        .await
        .unwrap();

    let report = Orchestrator::new(&client, &store, &accounts)
        .run(&persisted_profile(), &[ArtifactSpec::new("A")])
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.records[0].status, DeploymentStatus::Deployed);
    assert_eq!(client.call_count(), 1);

    let stored = store.get("A", "testnet").await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Deployed);
}

#[tokio::test]
async fn test_unreadable_store_halts_persisted_run() {
    init_tracing();
    let client = RecordingClient::new();
    let store = CountingStore::new().failing_reads();
    let accounts = accounts();

    let report = Orchestrator::new(&client, &store, &accounts)
        .run(&persisted_profile(), &three_artifacts())
        .await
        .unwrap();

    assert!(!report.is_success());
    assert!(matches!(
        report.halted,
        Some(OrchestratorError::RecordStoreUnavailable { ref artifact, .. }) if artifact == "A"
    ));
    assert!(matches!(
        report.records[0].status,
        DeploymentStatus::Failed { .. }
    ));
    assert_eq!(report.records[1].status, DeploymentStatus::NotAttempted);
    assert_eq!(report.records[2].status, DeploymentStatus::NotAttempted);
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn test_unreadable_store_does_not_block_ephemeral_run() {
    init_tracing();
    let client = RecordingClient::new();
    let store = CountingStore::new().failing_reads();
    let accounts = accounts();

    let report = Orchestrator::new(&client, &store, &accounts)
        .run(&ephemeral_profile(), &three_artifacts())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(client.call_count(), 3);
    assert_eq!(store.puts(), 0);
}

#[tokio::test]
async fn test_unwritable_store_keeps_deployed_record_and_halts() {
    init_tracing();
    let client = RecordingClient::new();
    let store = CountingStore::new().failing_writes();
    let accounts = accounts();

    let report = Orchestrator::new(&client, &store, &accounts)
        .run(&persisted_profile(), &three_artifacts())
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.records[0].status, DeploymentStatus::Deployed);
    assert!(report.address_of("A").is_some());
    assert_eq!(report.records[1].status, DeploymentStatus::NotAttempted);
    assert!(matches!(
        report.halted,
        Some(OrchestratorError::RecordStoreUnavailable { ref artifact, .. }) if artifact == "A"
    ));
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn test_missing_account_role_is_rejected_up_front() {
    init_tracing();
    let client = RecordingClient::new();
    let store = CountingStore::new();
    let accounts = accounts();

    let specs = vec![
        ArtifactSpec::new("A"),
        ArtifactSpec::new("Vault").from_account(AccountRole::Multisig),
    ];

    let result = Orchestrator::new(&client, &store, &accounts)
        .run(&persisted_profile(), &specs)
        .await;

    assert!(matches!(
        result,
        Err(OrchestratorError::MissingAccount { ref artifact, role: AccountRole::Multisig })
            if artifact == "Vault"
    ));
    assert_eq!(client.call_count(), 0);
    assert_eq!(store.gets(), 0);
}

#[tokio::test]
async fn test_duplicate_artifact_is_rejected() {
    init_tracing();
    let client = RecordingClient::new();
    let store = MemoryRecordStore::new();
    let accounts = accounts();

    let specs = vec![ArtifactSpec::new("A"), ArtifactSpec::new("A")];

    let result = Orchestrator::new(&client, &store, &accounts)
        .run(&persisted_profile(), &specs)
        .await;

    assert!(matches!(result, Err(OrchestratorError::DuplicateArtifact(ref name)) if name == "A"));
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn test_forced_redeploy_ignores_existing_records() {
    init_tracing();
    let client = RecordingClient::new();
    let store = CountingStore::new();
    let accounts = accounts();
    let profile = persisted_profile();
    let orchestrator = Orchestrator::new(&client, &store, &accounts);

    let plan = DeploymentPlan::prize_pool(5);
    let first = orchestrator.run(&profile, &plan.artifacts).await.unwrap();
    let reads_after_first = store.gets();

    let second = orchestrator
        .run(&profile, &plan.force_redeploy().artifacts)
        .await
        .unwrap();

    assert!(second.is_success());
    assert_eq!(
        statuses(&second.records),
        vec![&DeploymentStatus::Deployed, &DeploymentStatus::Deployed]
    );
    assert_ne!(
        first.address_of(PRIZE_POOL_REGISTRY),
        second.address_of(PRIZE_POOL_REGISTRY)
    );
    assert_eq!(client.call_count(), 4);
    assert_eq!(store.gets(), reads_after_first);

    // The upkeep was wired to the new registry.
    let calls = client.calls();
    assert_eq!(
        calls[3].args[0],
        ArgValue::Address(second.address_of(PRIZE_POOL_REGISTRY).unwrap())
    );
}

#[tokio::test]
async fn test_changed_arguments_still_skip() {
    init_tracing();
    let client = RecordingClient::new();
    let store = MemoryRecordStore::new();
    let accounts = accounts();
    let profile = persisted_profile();
    let orchestrator = Orchestrator::new(&client, &store, &accounts);

    let first = orchestrator
        .run(&profile, &DeploymentPlan::prize_pool(5).artifacts)
        .await
        .unwrap();
    let second = orchestrator
        .run(&profile, &DeploymentPlan::prize_pool(10).artifacts)
        .await
        .unwrap();

    assert_eq!(
        second.record(PRIZE_STRATEGY_UPKEEP).map(|r| &r.status),
        Some(&DeploymentStatus::SkippedAlreadyDeployed)
    );
    assert_eq!(
        first.record(PRIZE_STRATEGY_UPKEEP).map(|r| &r.fingerprint),
        second.record(PRIZE_STRATEGY_UPKEEP).map(|r| &r.fingerprint)
    );
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn test_changed_arguments_log_a_drift_warning() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let client = RecordingClient::new();
    let store = MemoryRecordStore::new();
    let accounts = accounts();
    let profile = persisted_profile();
    let orchestrator = Orchestrator::new(&client, &store, &accounts);

    orchestrator
        .run(&profile, &DeploymentPlan::prize_pool(5).artifacts)
        .await
        .unwrap();
    assert!(!logs.contents().contains("different bytecode or arguments"));

    orchestrator
        .run(&profile, &DeploymentPlan::prize_pool(10).artifacts)
        .await
        .unwrap();

    let output = logs.contents();
    let drift: Vec<_> = output
        .lines()
        .filter(|line| line.contains("different bytecode or arguments"))
        .collect();
    assert_eq!(drift.len(), 1, "only the upkeep changed: {output}");
    assert!(drift[0].contains("WARN"));
    assert!(drift[0].contains(&format!("artifact={PRIZE_STRATEGY_UPKEEP}")));
}

#[tokio::test]
async fn test_failed_forced_redeploy_keeps_deployed_record() {
    init_tracing();
    let live: Address = "0x00000000000000000000000000000000000000aa".parse().unwrap();
    let store = MemoryRecordStore::new();
    let accounts = accounts();
    let profile = persisted_profile();

    store
        .put(&DeploymentRecord::deployed(
            "A",
            "testnet",
            live,
            "fingerprint".to_string(),
            Some(B256::with_last_byte(1)),
        ))
        .await
        .unwrap();

    let failing = RecordingClient::new().failing_on("A");
    let report = Orchestrator::new(&failing, &store, &accounts)
        .run(&profile, &[ArtifactSpec::new("A").skip_if_deployed(false)])
        .await
        .unwrap();

    assert!(!report.is_success());
    assert!(matches!(
        report.records[0].status,
        DeploymentStatus::Failed { .. }
    ));
    assert_eq!(failing.call_count(), 1);

    let stored = store.get("A", "testnet").await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Deployed);
    assert_eq!(stored.address, Some(live));

    // A normal run still reuses the live contract.
    let client = RecordingClient::new();
    let next = Orchestrator::new(&client, &store, &accounts)
        .run(&profile, &[ArtifactSpec::new("A")])
        .await
        .unwrap();

    assert_eq!(
        next.records[0].status,
        DeploymentStatus::SkippedAlreadyDeployed
    );
    assert_eq!(next.address_of("A"), Some(live));
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn test_request_carries_account_bytecode_and_engine_options() {
    init_tracing();
    let client = RecordingClient::new();
    let store = MemoryRecordStore::new();
    let accounts = accounts();

    let overrides = EngineOverrides {
        block_gas_limit: Some(200_000_000),
        allow_unlimited_contract_size: true,
    };
    let profile = ephemeral_profile().with_overrides(overrides);
    let specs = vec![ArtifactSpec::new("Registry").bytecode("registry/Registry")];

    Orchestrator::new(&client, &store, &accounts)
        .run(&profile, &specs)
        .await
        .unwrap();

    let calls = client.calls();
    assert_eq!(
        calls,
        vec![DeployCall {
            artifact: "Registry".to_string(),
            bytecode: "registry/Registry".to_string(),
            args: vec![],
            from: deployer(),
            options: DeployOptions {
                block_gas_limit: Some(200_000_000),
                allow_unlimited_contract_size: true,
            },
        }]
    );
}

#[tokio::test]
async fn test_file_store_makes_runs_idempotent() {
    init_tracing();
    let temp_dir = TempDir::new("hatchery-test").expect("Failed to create temp dir");
    let client = RecordingClient::new();
    let accounts = accounts();
    let profile = persisted_profile();
    let specs = DeploymentPlan::prize_pool(5).artifacts;

    let first = {
        let store = FileRecordStore::new(temp_dir.path());
        Orchestrator::new(&client, &store, &accounts)
            .run(&profile, &specs)
            .await
            .unwrap()
    };
    assert!(first.is_success());
    assert!(
        temp_dir
            .path()
            .join("testnet")
            .join(format!("{PRIZE_POOL_REGISTRY}.json"))
            .exists()
    );

    let store = FileRecordStore::new(temp_dir.path());
    let second = Orchestrator::new(&client, &store, &accounts)
        .run(&profile, &specs)
        .await
        .unwrap();

    assert!(
        second
            .records
            .iter()
            .all(|r| r.status == DeploymentStatus::SkippedAlreadyDeployed)
    );
    assert_eq!(
        first.address_of(PRIZE_STRATEGY_UPKEEP),
        second.address_of(PRIZE_STRATEGY_UPKEEP)
    );
    assert_eq!(client.call_count(), 2);
}
