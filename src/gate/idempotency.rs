//! Idempotency-key response replay.
//!
//! A client retrying a request (with a fresh nonce and signature) under the
//! same `Idempotency-Key` gets the first response back instead of running the
//! handler again. Records are scoped to client, method and path, and remember a
//! fingerprint of the request that created them:
//!
//! - `pending` while the first request is being handled. This record has its
//!   own short lifetime, so a handler that never finished releases the key soon.
//! - `completed` with the serialized [`Response`] once it finished.
//!
//! A key reused for a different query or body is rejected, never replayed.

use std::sync::Arc;
use std::time::Duration;

use ring::digest;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GateError, StoreError};
use crate::protocol::{GateRequest, Response};
use crate::store::CacheStore;

const MAX_KEY_LEN: usize = 255;

/// State of an idempotency key when a request arrives.
#[derive(Debug)]
pub enum IdempotencySlot {
    /// First use: the caller owns the key and must complete or abandon it.
    Fresh,
    /// Another request with this key has not finished yet.
    InFlight,
    /// A previous request finished; its response is replayed.
    Completed(Box<Response>),
}

/// Stored form of an idempotency key.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum Record {
    Pending { fingerprint: String },
    Completed { fingerprint: String, response: Response },
}

impl Record {
    fn fingerprint(&self) -> &str {
        match self {
            Record::Pending { fingerprint } | Record::Completed { fingerprint, .. } => fingerprint,
        }
    }
}

/// An idempotency key bound to the request that presented it.
#[derive(Debug, Clone)]
pub struct IdempotencyClaim {
    key: String,
    store_key: String,
    fingerprint: String,
}

impl IdempotencyClaim {
    /// Bind `key` to `request`.
    ///
    /// # Errors
    /// `Validation` if the key is empty, too long or not printable ASCII.
    pub fn new(request: &GateRequest, key: &str) -> Result<Self, GateError> {
        IdempotencyCache::validate_key(key)?;
        let method = request.method.to_ascii_uppercase();

        Ok(Self {
            key: key.to_string(),
            store_key: format!(
                "idem:{}:{}:{}:{}",
                request.client_identifier(),
                method,
                request.path,
                key
            ),
            fingerprint: fingerprint(&method, request),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// SHA-256 over the length-prefixed method, path, query and body.
fn fingerprint(method: &str, request: &GateRequest) -> String {
    let mut context = digest::Context::new(&digest::SHA256);
    for field in [
        method.as_bytes(),
        request.path.as_bytes(),
        request.query.as_bytes(),
        &request.body,
    ] {
        context.update(&(field.len() as u64).to_be_bytes());
        context.update(field);
    }
    hex::encode(context.finish().as_ref())
}

/// Store-backed idempotency records.
pub struct IdempotencyCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    pending_ttl: Duration,
}

impl IdempotencyCache {
    /// Completed responses live for `ttl`, in-flight markers for `pending_ttl`.
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration, pending_ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            pending_ttl,
        }
    }

    /// Reject keys that are empty, too long or not printable ASCII.
    pub fn validate_key(key: &str) -> Result<(), GateError> {
        if key.is_empty()
            || key.len() > MAX_KEY_LEN
            || !key.bytes().all(|b| b.is_ascii_graphic())
        {
            return Err(GateError::Validation {
                message: "invalid Idempotency-Key header".to_string(),
            });
        }
        Ok(())
    }

    /// Claim the key, or report who already holds it.
    ///
    /// # Errors
    /// `IdempotencyMismatch` if the key belongs to a request with a different
    /// fingerprint.
    pub async fn begin(&self, claim: &IdempotencyClaim) -> Result<IdempotencySlot, GateError> {
        let pending = serde_json::to_string(&Record::Pending {
            fingerprint: claim.fingerprint.clone(),
        })?;
        if self
            .store
            .add(&claim.store_key, &pending, self.pending_ttl)
            .await?
        {
            return Ok(IdempotencySlot::Fresh);
        }

        let Some(value) = self.store.get(&claim.store_key).await? else {
            // Expired between the two calls: treat as in flight, the client retries.
            return Ok(IdempotencySlot::InFlight);
        };
        let record: Record = serde_json::from_str(&value).map_err(|_| StoreError::Corrupt {
            key: claim.store_key.clone(),
        })?;

        if record.fingerprint() != claim.fingerprint {
            return Err(GateError::IdempotencyMismatch {
                key: claim.key.clone(),
            });
        }

        match record {
            Record::Pending { .. } => Ok(IdempotencySlot::InFlight),
            Record::Completed { response, .. } => {
                Ok(IdempotencySlot::Completed(Box::new(response)))
            }
        }
    }

    /// Record the response for a key claimed with [`IdempotencyCache::begin`].
    pub async fn complete(
        &self,
        claim: &IdempotencyClaim,
        response: &Response,
    ) -> Result<(), GateError> {
        let value = serde_json::to_string(&Record::Completed {
            fingerprint: claim.fingerprint.clone(),
            response: response.clone(),
        })?;
        self.store.set(&claim.store_key, &value, self.ttl).await?;
        Ok(())
    }

    /// Release a claimed key so a retry can run.
    pub async fn abandon(&self, claim: &IdempotencyClaim) {
        if let Err(e) = self.store.delete(&claim.store_key).await {
            warn!(key = %claim.key, error = %e, "Failed to release idempotency key");
        }
    }
}
