use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ArgValue;

/// Deployment-relevant inputs of an artifact.
///
/// Two deployments with the same fingerprint were built from the same bytecode reference
/// and received the same constructor arguments. The fingerprint is stored in the
/// deployment record so that a later run can detect that a skipped artifact would have
/// been deployed differently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentFingerprint<'a> {
    /// Compiled artifact reference.
    pub bytecode: &'a str,
    /// Constructor arguments after address substitution.
    pub args: &'a [ArgValue],
}

impl<'a> DeploymentFingerprint<'a> {
    pub fn new(bytecode: &'a str, args: &'a [ArgValue]) -> Self {
        Self { bytecode, args }
    }

    /// Compute a SHA-256 hash of the inputs.
    ///
    /// Each argument is hashed as `type:value` so that values of different types with the
    /// same rendering never collide.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.bytecode.as_bytes());
        for arg in self.args {
            hasher.update([0u8]);
            hasher.update(arg.sol_type().as_bytes());
            hasher.update(b":");
            hasher.update(arg.to_string().as_bytes());
        }

        hex::encode(hasher.finalize())
    }
}
