//! Quorum resolution — turn N raw provider answers into one trusted answer.
//!
//! ```text
//! ProviderResult[] ─▶ drop errored ─▶ canonical hash ─▶ tally ─▶ first to `quorum` wins
//!                                                          └──▶ QuorumError::NotReached
//! ```
//!
//! Equality is semantic: correlation ids and the `jsonrpc` tag are ignored and
//! object keys are sorted before hashing, so two providers returning the same
//! JSON with a different key order agree.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::QuorumError;
use crate::fanout::{BatchClient, ProviderResult};
use crate::provider::{ProviderId, ProviderRegistry};
use crate::request::{JsonRpcResponse, RpcCall};

/// The canonical answer for one batch.
#[derive(Debug, Clone)]
pub struct QuorumDecision {
    /// Provider whose responses were adopted.
    pub provider: ProviderId,
    /// Responses in request order.
    pub responses: Vec<JsonRpcResponse>,
    /// Providers whose payload hashed identically to the adopted one.
    pub agreeing: usize,
    /// Providers without transport or per-request errors.
    pub usable: usize,
    /// `true` when the answer was accepted through the lenient path.
    pub lenient: bool,
}

impl QuorumDecision {
    /// The `result` values in request order (`null` where absent).
    pub fn results(&self) -> Vec<&Value> {
        self.responses.iter().map(JsonRpcResponse::result_or_null).collect()
    }

    /// Consume the decision, returning owned `result` values in request order.
    pub fn into_results(self) -> Vec<Value> {
        self.responses
            .into_iter()
            .map(|r| r.result.unwrap_or(Value::Null))
            .collect()
    }
}

/// Picks one canonical `ProviderResult` out of many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumResolver {
    quorum: usize,
    lenient: bool,
}

impl QuorumResolver {
    /// `quorum` is clamped to at least 1.
    pub fn new(quorum: usize, lenient: bool) -> Self {
        Self {
            quorum: quorum.max(1),
            lenient,
        }
    }

    /// Majority of the registry unless `quorum_override` is given.
    pub fn for_registry(
        registry: &ProviderRegistry,
        quorum_override: Option<usize>,
        lenient: bool,
    ) -> Self {
        Self::new(quorum_override.unwrap_or_else(|| registry.majority()), lenient)
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn is_lenient(&self) -> bool {
        self.lenient
    }

    /// Resolve a set of provider results into one decision.
    pub fn resolve(&self, results: Vec<ProviderResult>) -> Result<QuorumDecision, QuorumError> {
        if results.is_empty() {
            return Err(QuorumError::NoResults);
        }
        let total = results.len();
        let mut usable: Vec<ProviderResult> = results
            .into_iter()
            .filter(|r| {
                let ok = r.is_usable();
                if !ok {
                    match &r.error {
                        Some(e) => tracing::debug!(provider = %r.provider, error = %e, "discarding provider result"),
                        None => tracing::debug!(provider = %r.provider, "discarding provider result with per-request error"),
                    }
                }
                ok
            })
            .collect();
        let usable_count = usable.len();

        if usable_count < self.quorum && self.lenient && usable_count > 0 {
            let first = usable.swap_remove(0);
            tracing::warn!(
                provider = %first.provider,
                usable = usable_count,
                required = self.quorum,
                "too few providers answered; accepting first result under lenient quorum"
            );
            return Ok(QuorumDecision {
                provider: first.provider,
                responses: first.responses,
                agreeing: 1,
                usable: usable_count,
                lenient: true,
            });
        }

        let mut tally: HashMap<[u8; 32], usize> = HashMap::new();
        let mut best = 0;
        for result in usable {
            let count = tally.entry(payload_hash(&result.responses)).or_insert(0);
            *count += 1;
            best = best.max(*count);
            if *count >= self.quorum {
                return Ok(QuorumDecision {
                    provider: result.provider,
                    responses: result.responses,
                    agreeing: *count,
                    usable: usable_count,
                    lenient: false,
                });
            }
        }

        tracing::warn!(
            required = self.quorum,
            agreeing = best,
            usable = usable_count,
            total,
            groups = tally.len(),
            "quorum not reached"
        );
        Err(QuorumError::NotReached {
            required: self.quorum,
            agreeing: best,
            usable: usable_count,
            total,
        })
    }
}

/// SHA-256 over the canonical form of every response's `result`.
///
/// Ids are excluded: they are provider-local bookkeeping, not payload.
pub fn payload_hash(responses: &[JsonRpcResponse]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(256);
    buf.push(b'[');
    for (i, resp) in responses.iter().enumerate() {
        if i > 0 {
            buf.push(b',');
        }
        write_canonical(resp.result_or_null(), &mut buf);
    }
    buf.push(b']');
    Sha256::digest(&buf).into()
}

/// Serialize `value` with object keys sorted at every depth.
///
/// `serde_json::Map` may preserve insertion order depending on crate features
/// enabled elsewhere in the dependency graph, so ordering is done here
/// explicitly.
pub fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(&Value::String(key.clone()), out);
                out.push(b':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut Vec<u8>) {
    // Scalars serialize deterministically; this cannot fail for an in-memory Value.
    if serde_json::to_writer(&mut *out, value).is_err() {
        out.extend_from_slice(b"null");
    }
}

/// Batch client + resolver + timeout: the one call every consumer makes.
pub struct QuorumClient {
    batch: BatchClient,
    resolver: QuorumResolver,
    timeout: Duration,
}

impl QuorumClient {
    pub fn new(batch: BatchClient, resolver: QuorumResolver, timeout: Duration) -> Self {
        Self {
            batch,
            resolver,
            timeout,
        }
    }

    /// Convenience: majority (or overridden) quorum over `registry`.
    pub fn for_registry(
        registry: Arc<ProviderRegistry>,
        quorum_override: Option<usize>,
        lenient: bool,
        timeout: Duration,
    ) -> Self {
        let resolver = QuorumResolver::for_registry(&registry, quorum_override, lenient);
        Self::new(BatchClient::new(registry), resolver, timeout)
    }

    pub fn batch(&self) -> &BatchClient {
        &self.batch
    }

    pub fn resolver(&self) -> &QuorumResolver {
        &self.resolver
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `calls` to every provider and quorum-resolve the answers.
    pub async fn call(&self, calls: &[RpcCall]) -> Result<QuorumDecision, QuorumError> {
        let results = self.batch.send(calls, self.timeout).await;
        self.resolver.resolve(results)
    }
}
