//! Shared RPC utilities for interacting with Ethereum JSON-RPC endpoints.

use std::time::Duration;

use alloy_core::primitives::U256;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error naming `method` if the request failed or returned
/// an error response. A `null` result deserializes into `None` when `T` is an option, which
/// is how nodes report pending receipts.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error in {}: {}",
            method,
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .with_context(|| format!("No result in {} response", method))?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Parse a hex-encoded JSON-RPC quantity such as `0x1a`.
///
/// # Arguments
/// * `raw` - The quantity as returned by the node, with its `0x` prefix
///
/// # Returns
/// The decoded value, or an error if the prefix or the digits are missing or invalid.
pub fn parse_quantity(raw: &str) -> Result<U256, anyhow::Error> {
    let digits = raw
        .strip_prefix("0x")
        .with_context(|| format!("Quantity `{raw}` is missing the 0x prefix"))?;
    if digits.is_empty() {
        anyhow::bail!("Quantity `{raw}` has no digits");
    }
    U256::from_str_radix(digits, 16).with_context(|| format!("Invalid hex quantity `{raw}`"))
}

/// Parse a hex-encoded JSON-RPC quantity that must fit in a `u64`.
pub fn parse_quantity_u64(raw: &str) -> Result<u64, anyhow::Error> {
    let value = parse_quantity(raw)?;
    if value > U256::from(u64::MAX) {
        anyhow::bail!("Quantity `{raw}` does not fit in 64 bits");
    }
    Ok(value.to::<u64>())
}

/// Parse a hex-encoded JSON-RPC quantity that must fit in a `u128`, such as a gas price.
pub fn parse_quantity_u128(raw: &str) -> Result<u128, anyhow::Error> {
    let value = parse_quantity(raw)?;
    if value > U256::from(u128::MAX) {
        anyhow::bail!("Quantity `{raw}` does not fit in 128 bits");
    }
    Ok(value.to::<u128>())
}
