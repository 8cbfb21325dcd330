//! Chain client used by the orchestrator to create contracts.
//!
//! [`ChainClient`] is the seam between the orchestrator and a chain node.
//! [`JsonRpcChainClient`] implements it over plain Ethereum JSON-RPC: node-managed
//! accounts go through `eth_sendTransaction`, locally derived keys sign an EIP-155 legacy
//! transaction and broadcast it with `eth_sendRawTransaction`.

use std::{
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_core::primitives::{Address, B256, Bytes, TxKind, U256};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::TxSignerSync;
use alloy_signer_local::PrivateKeySigner;
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::OnceCell;
use url::Url;

use crate::{
    AccountError, AccountHandle, AccountProvider, AccountRoles, AccountSource, ArgValue,
    NamedAccounts, NetworkProfile, rpc,
};

/// Largest init code accepted by mainnet engines (EIP-3860).
pub const MAX_INITCODE_SIZE: usize = 49_152;

/// Default interval between receipt polls.
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default number of receipt polls before giving up.
pub const DEFAULT_RECEIPT_POLL_ATTEMPTS: usize = 150;

/// Engine options applied to every deployment on a network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Block gas limit to request from a local node before the first deployment.
    pub block_gas_limit: Option<u64>,
    /// Whether init code above [`MAX_INITCODE_SIZE`] is expected to be accepted.
    pub allow_unlimited_contract_size: bool,
}

/// A single contract creation.
#[derive(Debug, Clone, Copy)]
pub struct DeployRequest<'a> {
    /// Artifact name, for logging.
    pub artifact: &'a str,
    /// Compiled artifact reference.
    pub bytecode: &'a str,
    /// Concrete constructor arguments.
    pub args: &'a [ArgValue],
    pub from: &'a AccountHandle,
    pub options: DeployOptions,
}

/// Result of a successful contract creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployReceipt {
    pub address: Address,
    pub tx_hash: Option<B256>,
}

/// Errors raised by a chain client.
#[derive(Debug, Error)]
pub enum ChainClientError {
    #[error("Failed to load bytecode `{reference}`: {reason}")]
    Bytecode { reference: String, reason: String },

    #[error("RPC request failed: {0:#}")]
    Rpc(#[from] anyhow::Error),

    #[error("Failed to sign transaction: {0}")]
    Signing(#[from] alloy_signer::Error),

    #[error("Node reports chain ID {actual}, expected {expected}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },

    #[error("Timed out waiting for the receipt of transaction {tx_hash}")]
    ReceiptTimeout { tx_hash: B256 },

    #[error("Receipt of transaction {tx_hash} has no contract address")]
    MissingContractAddress { tx_hash: B256 },
}

/// Creates contracts on a chain.
pub trait ChainClient: Send + Sync {
    /// Deploy one contract and wait until its address is known.
    fn deploy_contract(
        &self,
        request: DeployRequest<'_>,
    ) -> impl Future<Output = Result<DeployReceipt, ChainClientError>> + Send;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    contract_address: Option<Address>,
}

/// Chain client speaking Ethereum JSON-RPC over HTTP.
#[derive(Debug)]
pub struct JsonRpcChainClient {
    client: reqwest::Client,
    rpc_url: Url,
    artifacts_dir: PathBuf,
    expected_chain_id: Option<u64>,
    poll_interval: Duration,
    poll_attempts: usize,
    chain_id: OnceCell<u64>,
    engine_configured: OnceCell<bool>,
}

impl JsonRpcChainClient {
    /// Create a client for a network profile, loading compiled artifacts from
    /// `artifacts_dir`.
    pub fn new(profile: &NetworkProfile, artifacts_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let Some(rpc_url) = profile.rpc_endpoint.clone() else {
            anyhow::bail!("Network `{}` has no RPC endpoint", profile.name);
        };

        Ok(Self {
            client: rpc::create_client()?,
            rpc_url,
            artifacts_dir: artifacts_dir.into(),
            expected_chain_id: profile.chain_id,
            poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            poll_attempts: DEFAULT_RECEIPT_POLL_ATTEMPTS,
            chain_id: OnceCell::new(),
            engine_configured: OnceCell::new(),
        })
    }

    pub fn with_receipt_polling(mut self, interval: Duration, attempts: usize) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts;
        self
    }

    pub fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> anyhow::Result<T> {
        rpc::json_rpc_call(&self.client, self.rpc_url.as_str(), method, params).await
    }

    /// Chain ID reported by the node, checked against the profile once.
    pub async fn chain_id(&self) -> Result<u64, ChainClientError> {
        self.chain_id
            .get_or_try_init(|| async {
                let raw: String = self.call("eth_chainId", vec![]).await?;
                let actual = rpc::parse_quantity_u64(&raw)?;
                match self.expected_chain_id {
                    Some(expected) if expected != actual => {
                        Err(ChainClientError::ChainIdMismatch { expected, actual })
                    }
                    _ => Ok::<_, ChainClientError>(actual),
                }
            })
            .await
            .copied()
    }

    /// Ask the node to raise its block gas limit, once per client.
    ///
    /// Returns whether the node accepted the override. Nodes that do not support it keep
    /// their own limits.
    async fn configure_engine(&self, options: DeployOptions) -> bool {
        let Some(gas_limit) = options.block_gas_limit else {
            return false;
        };

        *self
            .engine_configured
            .get_or_init(|| async {
                let result: anyhow::Result<Value> = self
                    .call("evm_setBlockGasLimit", vec![json!(format!("0x{gas_limit:x}"))])
                    .await;
                match result {
                    Ok(_) => {
                        tracing::debug!(gas_limit, "Block gas limit applied");
                        true
                    }
                    Err(e) => {
                        tracing::warn!(gas_limit, error = %e, "Node rejected block gas limit override");
                        false
                    }
                }
            })
            .await
    }

    async fn estimate_gas(&self, from: Address, data: &Bytes) -> Result<u64, ChainClientError> {
        let raw: String = self
            .call("eth_estimateGas", vec![json!({ "from": from, "data": data })])
            .await?;
        Ok(rpc::parse_quantity_u64(&raw)?)
    }

    async fn send_unlocked(
        &self,
        from: Address,
        data: &Bytes,
        gas: u64,
    ) -> Result<B256, ChainClientError> {
        let tx_hash = self
            .call(
                "eth_sendTransaction",
                vec![json!({
                    "from": from,
                    "data": data,
                    "gas": format!("0x{gas:x}"),
                })],
            )
            .await?;
        Ok(tx_hash)
    }

    async fn send_signed(
        &self,
        signer: &PrivateKeySigner,
        data: Bytes,
        gas: u64,
    ) -> Result<B256, ChainClientError> {
        let chain_id = self.chain_id().await?;
        let nonce: String = self
            .call(
                "eth_getTransactionCount",
                vec![json!(signer.address()), json!("pending")],
            )
            .await?;
        let gas_price: String = self.call("eth_gasPrice", vec![]).await?;

        let tx = TxLegacy {
            chain_id: Some(chain_id),
            nonce: rpc::parse_quantity_u64(&nonce)?,
            gas_price: rpc::parse_quantity_u128(&gas_price)?,
            gas_limit: gas,
            to: TxKind::Create,
            value: U256::ZERO,
            input: data,
        };
        let raw = sign_legacy_transaction(signer, tx)?;

        let tx_hash = self
            .call(
                "eth_sendRawTransaction",
                vec![json!(format!("0x{}", hex::encode(raw)))],
            )
            .await?;
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TransactionReceipt, ChainClientError> {
        let client = &self.client;
        let url = self.rpc_url.as_str();

        (|| async move {
            let receipt: Option<TransactionReceipt> = rpc::json_rpc_call(
                client,
                url,
                "eth_getTransactionReceipt",
                vec![json!(tx_hash)],
            )
            .await?;
            receipt.ok_or(ChainClientError::ReceiptTimeout { tx_hash })
        })
        .retry(
            ConstantBuilder::default()
                .with_delay(self.poll_interval)
                .with_max_times(self.poll_attempts),
        )
        .sleep(tokio::time::sleep)
        .when(|e| matches!(e, ChainClientError::ReceiptTimeout { .. }))
        .notify(|_, after| tracing::trace!(%tx_hash, ?after, "Receipt pending"))
        .await
    }
}

impl ChainClient for JsonRpcChainClient {
    async fn deploy_contract(
        &self,
        request: DeployRequest<'_>,
    ) -> Result<DeployReceipt, ChainClientError> {
        let bytecode = load_bytecode(&self.artifacts_dir, request.bytecode).await?;

        let mut initcode = bytecode.to_vec();
        initcode.extend(ArgValue::abi_encode_params(request.args));
        let initcode = Bytes::from(initcode);

        if initcode.len() > MAX_INITCODE_SIZE && !request.options.allow_unlimited_contract_size {
            tracing::warn!(
                artifact = request.artifact,
                size = initcode.len(),
                limit = MAX_INITCODE_SIZE,
                "Init code exceeds the engine size limit, the node may reject it"
            );
        }

        let from = request.from.address();
        let engine_configured = self.configure_engine(request.options).await;
        let gas = match request.options.block_gas_limit {
            Some(gas_limit) if engine_configured => gas_limit,
            _ => self.estimate_gas(from, &initcode).await?,
        };

        let tx_hash = match request.from {
            AccountHandle::Unlocked(address) => self.send_unlocked(*address, &initcode, gas).await?,
            AccountHandle::Local(signer) => self.send_signed(signer, initcode, gas).await?,
        };
        tracing::debug!(artifact = request.artifact, %tx_hash, gas, "Deployment transaction sent");

        let receipt = self.wait_for_receipt(tx_hash).await?;
        if receipt.status.as_deref() == Some("0x0") {
            return Err(ChainClientError::Reverted { tx_hash });
        }

        let address = receipt
            .contract_address
            .ok_or(ChainClientError::MissingContractAddress { tx_hash })?;

        Ok(DeployReceipt {
            address,
            tx_hash: Some(tx_hash),
        })
    }
}

impl AccountProvider for JsonRpcChainClient {
    async fn named_accounts(
        &self,
        source: &AccountSource,
        roles: &AccountRoles,
    ) -> Result<NamedAccounts, AccountError> {
        match source {
            AccountSource::Unlocked => {
                let addresses: Vec<Address> = self.call("eth_accounts", vec![]).await?;
                NamedAccounts::from_unlocked(&addresses, roles)
            }
            AccountSource::Mnemonic {
                phrase,
                derivation_path,
            } => NamedAccounts::from_mnemonic(phrase, derivation_path, roles),
        }
    }
}

/// Load the creation bytecode of a compiled artifact.
///
/// Looks for `<dir>/<reference>.json` first, then the Foundry layout
/// `<dir>/<reference>.sol/<reference>.json`. The `bytecode` field may be a hex string or
/// an object with an `object` field.
pub async fn load_bytecode(dir: &Path, reference: &str) -> Result<Bytes, ChainClientError> {
    let bytecode_error = |reason: String| ChainClientError::Bytecode {
        reference: reference.to_string(),
        reason,
    };

    let name = Path::new(reference)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(reference);
    let candidates = [
        dir.join(format!("{reference}.json")),
        dir.join(format!("{reference}.sol")).join(format!("{name}.json")),
    ];

    let mut content = None;
    for candidate in &candidates {
        match tokio::fs::read(candidate).await {
            Ok(bytes) => {
                content = Some(bytes);
                break;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(bytecode_error(format!("{}: {e}", candidate.display()))),
        }
    }
    let content = content.ok_or_else(|| {
        bytecode_error(format!("no compiled artifact found in {}", dir.display()))
    })?;

    let artifact: Value = serde_json::from_slice(&content)
        .map_err(|e| bytecode_error(format!("invalid artifact JSON: {e}")))?;

    let raw = match &artifact["bytecode"] {
        Value::String(raw) => raw.as_str(),
        Value::Object(object) => object
            .get("object")
            .and_then(Value::as_str)
            .ok_or_else(|| bytecode_error("`bytecode.object` is missing".to_string()))?,
        _ => return Err(bytecode_error("`bytecode` is missing".to_string())),
    };

    let bytes = hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| bytecode_error(format!("invalid hex: {e}")))?;
    if bytes.is_empty() {
        return Err(bytecode_error(
            "bytecode is empty, the contract may be abstract".to_string(),
        ));
    }

    Ok(bytes.into())
}

/// Sign a legacy transaction and return its raw encoding.
///
/// The signature commits to `tx.chain_id` as described in EIP-155.
pub fn sign_legacy_transaction(
    signer: &PrivateKeySigner,
    mut tx: TxLegacy,
) -> Result<Vec<u8>, ChainClientError> {
    let signature = signer.sign_transaction_sync(&mut tx)?;
    Ok(TxEnvelope::from(tx.into_signed(signature)).encoded_2718())
}
