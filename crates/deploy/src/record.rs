//! Deployment records and the stores that persist them.
//!
//! A record is keyed by `(artifact name, network name)`. The [`RecordStore`] trait only
//! needs lookups and single-record writes; [`MemoryRecordStore`] backs ephemeral runs and
//! tests, [`FileRecordStore`] keeps one JSON file per record under a deployments
//! directory.

use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_core::primitives::{Address, B256};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs, sync::RwLock};

/// Outcome of processing one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentStatus {
    /// A new instance was deployed during this run.
    Deployed,
    /// A prior record satisfied the artifact; nothing was sent.
    SkippedAlreadyDeployed,
    /// The deployment was attempted and failed.
    Failed { reason: String },
    /// A previous artifact failed and this one was never attempted.
    NotAttempted,
}

impl DeploymentStatus {
    /// Whether the artifact has a usable address after this status.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Deployed | Self::SkippedAlreadyDeployed)
    }
}

/// The durable outcome of deploying one artifact on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub artifact_name: String,
    pub network: String,
    /// Present iff the status is a success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    pub status: DeploymentStatus,
    /// Hash of the bytecode reference and constructor arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    /// Unix timestamp (seconds).
    pub recorded_at: u64,
}

fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

impl DeploymentRecord {
    pub fn deployed(
        artifact_name: impl Into<String>,
        network: impl Into<String>,
        address: Address,
        fingerprint: String,
        tx_hash: Option<B256>,
    ) -> Self {
        Self {
            artifact_name: artifact_name.into(),
            network: network.into(),
            address: Some(address),
            status: DeploymentStatus::Deployed,
            fingerprint: Some(fingerprint),
            tx_hash,
            recorded_at: now(),
        }
    }

    /// A run-local record for an artifact satisfied by `prior`.
    pub fn skipped(prior: &DeploymentRecord) -> Self {
        Self {
            status: DeploymentStatus::SkippedAlreadyDeployed,
            recorded_at: now(),
            ..prior.clone()
        }
    }

    pub fn failed(
        artifact_name: impl Into<String>,
        network: impl Into<String>,
        fingerprint: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            artifact_name: artifact_name.into(),
            network: network.into(),
            address: None,
            status: DeploymentStatus::Failed {
                reason: reason.into(),
            },
            fingerprint,
            tx_hash: None,
            recorded_at: now(),
        }
    }

    pub fn not_attempted(artifact_name: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            artifact_name: artifact_name.into(),
            network: network.into(),
            address: None,
            status: DeploymentStatus::NotAttempted,
            fingerprint: None,
            tx_hash: None,
            recorded_at: now(),
        }
    }

    /// The address of a prior successful deployment this record proves, if any.
    pub fn deployed_address(&self) -> Option<Address> {
        self.status.is_success().then_some(self.address).flatten()
    }
}

/// Errors raised by record store backends.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed deployment record {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Record store backend error: {0}")]
    Backend(String),
}

/// Durable mapping from `(artifact name, network name)` to deployment records.
pub trait RecordStore: Send + Sync {
    /// Look up the record for an artifact on a network.
    fn get(
        &self,
        artifact: &str,
        network: &str,
    ) -> impl Future<Output = Result<Option<DeploymentRecord>, RecordStoreError>> + Send;

    /// Insert or replace the record for `(record.artifact_name, record.network)`.
    fn put(
        &self,
        record: &DeploymentRecord,
    ) -> impl Future<Output = Result<(), RecordStoreError>> + Send;
}

/// In-memory record store.
///
/// Data is lost when the store is dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<HashMap<(String, String), DeploymentRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// All records currently held, in no particular order.
    pub async fn records(&self) -> Vec<DeploymentRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

impl RecordStore for MemoryRecordStore {
    async fn get(
        &self,
        artifact: &str,
        network: &str,
    ) -> Result<Option<DeploymentRecord>, RecordStoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(&(artifact.to_string(), network.to_string()))
            .cloned())
    }

    async fn put(&self, record: &DeploymentRecord) -> Result<(), RecordStoreError> {
        let mut records = self.records.write().await;
        records.insert(
            (record.artifact_name.clone(), record.network.clone()),
            record.clone(),
        );
        Ok(())
    }
}

/// File-backed record store.
///
/// Records live at `<root>/<network>/<artifact>.json` as pretty-printed JSON. Writes go
/// through a temporary file and a rename while holding an exclusive lock on
/// `<root>/<network>/.lock`, so concurrent runs against the same directory never observe
/// a partially written record.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    root: PathBuf,
}

impl FileRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record for an artifact on a network.
    pub fn record_path(&self, artifact: &str, network: &str) -> Result<PathBuf, RecordStoreError> {
        Ok(self
            .network_dir(network)?
            .join(format!("{}.json", path_segment(artifact)?)))
    }

    fn network_dir(&self, network: &str) -> Result<PathBuf, RecordStoreError> {
        Ok(self.root.join(path_segment(network)?))
    }
}

/// Reject names that would escape their directory.
fn path_segment(name: &str) -> Result<&str, RecordStoreError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0')
    {
        return Err(RecordStoreError::Backend(format!(
            "`{name}` cannot be used as a record name"
        )));
    }
    Ok(name)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RecordStoreError + '_ {
    move |source| RecordStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl RecordStore for FileRecordStore {
    async fn get(
        &self,
        artifact: &str,
        network: &str,
    ) -> Result<Option<DeploymentRecord>, RecordStoreError> {
        let path = self.record_path(artifact, network)?;

        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path)(e)),
        };

        let record = serde_json::from_slice(&content)
            .map_err(|source| RecordStoreError::Malformed { path, source })?;
        Ok(Some(record))
    }

    async fn put(&self, record: &DeploymentRecord) -> Result<(), RecordStoreError> {
        let dir = self.network_dir(&record.network)?;
        let path = self.record_path(&record.artifact_name, &record.network)?;
        let content = serde_json::to_vec_pretty(record).map_err(|source| {
            RecordStoreError::Malformed {
                path: path.clone(),
                source,
            }
        })?;

        fs::create_dir_all(&dir).await.map_err(io_error(&dir))?;

        let lock_path = dir.join(".lock");
        let lock_file = tokio::task::spawn_blocking(move || {
            let lock_file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)
                .map_err(io_error(&lock_path))?;
            FileExt::lock_exclusive(&lock_file).map_err(io_error(&lock_path))?;
            Ok::<_, RecordStoreError>(lock_file)
        })
        .await
        .map_err(|e| RecordStoreError::Backend(format!("Lock task failed: {e}")))??;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content)
            .await
            .map_err(io_error(&temp_path))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(io_error(&path))?;

        // Dropping the handle releases the lock.
        drop(lock_file);

        tracing::debug!(
            artifact = %record.artifact_name,
            network = %record.network,
            path = %path.display(),
            "Deployment record written"
        );
        Ok(())
    }
}
