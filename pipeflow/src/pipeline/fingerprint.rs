//! Content fingerprints for cache reuse across re-runs.
//!
//! A node's fingerprint covers its body source, the fingerprints of its
//! dependencies and the digests of enclosing-environment values it reads.
//! Equal fingerprints imply equal results for a deterministic evaluator.

use sha2::{Digest, Sha256};

use crate::artifact;
use crate::evaluator::NodeBody;
use crate::value::Value;

const FINGERPRINT_DOMAIN: &[u8] = b"pipeflow-node-v1";

/// Returns a stable SHA-256 digest of a value, or `None` for values
/// without a content identity (pipelines).
#[must_use]
pub fn value_digest(value: &Value) -> Option<String> {
    let mut hasher = Sha256::new();
    if feed_value(&mut hasher, value) {
        Some(hex::encode(hasher.finalize()))
    } else {
        None
    }
}

fn feed_value(hasher: &mut Sha256, value: &Value) -> bool {
    match value {
        Value::Null => hasher.update([0u8]),
        Value::Bool(b) => hasher.update([1u8, u8::from(*b)]),
        Value::Int(i) => {
            hasher.update([2u8]);
            hasher.update(i.to_le_bytes());
        }
        Value::Float(x) => {
            hasher.update([3u8]);
            hasher.update(x.to_bits().to_le_bytes());
        }
        Value::Str(s) => {
            hasher.update([4u8]);
            feed_str(hasher, s);
        }
        Value::List(items) => {
            hasher.update([5u8]);
            hasher.update((items.len() as u64).to_le_bytes());
            for item in items {
                if !feed_value(hasher, item) {
                    return false;
                }
            }
        }
        Value::Dict(map) => {
            hasher.update([6u8]);
            hasher.update((map.len() as u64).to_le_bytes());
            for (k, v) in map {
                feed_str(hasher, k);
                if !feed_value(hasher, v) {
                    return false;
                }
            }
        }
        Value::Table(table) => match artifact::table_to_ipc(table) {
            Ok(bytes) => {
                hasher.update([7u8]);
                hasher.update((bytes.len() as u64).to_le_bytes());
                hasher.update(&bytes);
            }
            Err(_) => return false,
        },
        Value::Function(func) => {
            hasher.update([8u8]);
            for p in &func.params {
                feed_str(hasher, p);
            }
            feed_str(hasher, &func.body);
            for (k, v) in &func.captured {
                feed_str(hasher, k);
                if !feed_value(hasher, v) {
                    return false;
                }
            }
        }
        Value::Pipeline(_) => return false,
    }
    true
}

fn feed_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

/// Incremental builder for a node fingerprint.
#[derive(Debug, Clone)]
pub(crate) struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    pub(crate) fn new(body: &NodeBody) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_DOMAIN);
        feed_str(&mut hasher, body.source());
        Self { hasher }
    }

    pub(crate) fn dependency(&mut self, name: &str, fingerprint: &str) {
        self.hasher.update(b"dep");
        feed_str(&mut self.hasher, name);
        feed_str(&mut self.hasher, fingerprint);
    }

    pub(crate) fn external(&mut self, name: &str, digest: &str) {
        self.hasher.update(b"env");
        feed_str(&mut self.hasher, name);
        feed_str(&mut self.hasher, digest);
    }

    pub(crate) fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}
