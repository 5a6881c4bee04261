//! The enforcement gate.
//!
//! Every request runs through the same ordered checks. The first failing check
//! decides the rejection, and nothing after it runs:
//!
//! 1. method allow-list (protected paths only)
//! 2. rate limit (every path)
//! 3. authentication headers present, timestamp well formed
//! 4. timestamp within the skew window
//! 5. nonce well formed and not yet used
//! 6. shared secret available
//! 7. signature matches
//! 8. nonce marked as used
//!
//! The nonce is only recorded once the signature verified, so a forged request
//! cannot burn a nonce that a legitimate client is about to send. Two requests
//! racing with the same valid nonce are settled by the atomic mark in step 8.

use std::sync::Arc;

use serde::de::IgnoredAny;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth::{verify, RateLimiter, ReplayGuard, SecretProvider, SkewValidator};
use crate::clock::Clock;
use crate::error::{AuthErrorKind, GateError};
use crate::protocol::{GateRequest, Response, SignedRequest, IDEMPOTENCY_HEADER};
use crate::store::CacheStore;

use super::handler::Handler;
use super::idempotency::{IdempotencyCache, IdempotencyClaim, IdempotencySlot};
use super::policy::GateConfig;

/// How a request got past the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The path is not protected; only the rate limit applied.
    Open,
    /// Signature, timestamp and nonce all checked out.
    Authenticated,
}

/// HMAC enforcement middleware in front of a [`Handler`].
pub struct Gate {
    config: GateConfig,
    skew: SkewValidator,
    replay: ReplayGuard,
    limiter: RateLimiter,
    idempotency: Option<IdempotencyCache>,
    secrets: Arc<dyn SecretProvider>,
}

impl Gate {
    /// Create a gate whose nonce, rate and idempotency records share `store`.
    pub fn new(
        config: GateConfig,
        store: Arc<dyn CacheStore>,
        secrets: Arc<dyn SecretProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let idempotency = config.idempotency_ttl.map(|ttl| {
            IdempotencyCache::new(Arc::clone(&store), ttl, config.idempotency_pending_ttl)
        });

        Self {
            skew: SkewValidator::new(config.max_skew_seconds, clock),
            replay: ReplayGuard::new(Arc::clone(&store), config.nonce_ttl),
            limiter: RateLimiter::new(store),
            idempotency,
            secrets,
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Run the admission checks without invoking a handler.
    pub async fn admit(&self, request: &GateRequest) -> Result<Admission, GateError> {
        let protected = self.config.is_protected(&request.path);

        if protected && !self.config.method_allowed(&request.method) {
            return Err(GateError::MethodNotAllowed {
                method: request.method.to_ascii_uppercase(),
            });
        }

        self.check_rate(request).await?;

        if !protected {
            return Ok(Admission::Open);
        }

        self.authenticate(request).await?;
        Ok(Admission::Authenticated)
    }

    async fn check_rate(&self, request: &GateRequest) -> Result<(), GateError> {
        let Some(policy) = &self.config.rate_limit else {
            return Ok(());
        };

        let rule = policy.rule_for(&request.path);
        let identifier = format!("{}:{}", request.client_identifier(), rule.path);
        let decision = self
            .limiter
            .allow(&identifier, rule.limit, rule.window_seconds)
            .await?;

        if decision.allowed {
            Ok(())
        } else {
            Err(GateError::RateLimited {
                retry_after: decision.retry_after,
            })
        }
    }

    async fn authenticate(&self, request: &GateRequest) -> Result<(), GateError> {
        let signed = SignedRequest::extract(request)?;
        self.skew.check(signed.timestamp)?;

        ReplayGuard::validate_nonce(signed.nonce)?;
        if self.replay.is_used(signed.path, signed.nonce).await? {
            return Err(GateError::auth(AuthErrorKind::NonceReused));
        }

        let secret = self.secrets.secret()?;
        if !verify(signed.signing_message().as_bytes(), signed.signature, &secret) {
            return Err(GateError::auth(AuthErrorKind::InvalidSignature));
        }

        if !self
            .replay
            .check_and_mark(signed.path, signed.nonce, self.replay.ttl())
            .await?
        {
            return Err(GateError::auth(AuthErrorKind::NonceReused));
        }

        Ok(())
    }

    /// Admit `request` and hand it to `handler`, always producing a response.
    pub async fn process<H>(&self, request: &GateRequest, handler: &H) -> Response
    where
        H: Handler + ?Sized,
    {
        let request_id = Uuid::new_v4();

        match self.process_admitted(request_id, request, handler).await {
            Ok(response) => response,
            Err(e) => {
                if e.status_code() >= 500 {
                    error!(
                        request_id = %request_id,
                        path = %request.path,
                        code = e.error_code(),
                        reason = e.config_reason().map(|r| r.as_str()),
                        error = %e,
                        "Request failed"
                    );
                } else {
                    warn!(
                        request_id = %request_id,
                        method = %request.method,
                        path = %request.path,
                        client = request.client_identifier(),
                        code = e.error_code(),
                        error = %e,
                        "Request rejected"
                    );
                }
                Response::rejected(request_id, &e, self.config.detailed_errors)
            }
        }
    }

    async fn process_admitted<H>(
        &self,
        request_id: Uuid,
        request: &GateRequest,
        handler: &H,
    ) -> Result<Response, GateError>
    where
        H: Handler + ?Sized,
    {
        let admission = self.admit(request).await?;
        debug!(
            request_id = %request_id,
            path = %request.path,
            ?admission,
            "Request admitted"
        );

        if admission == Admission::Authenticated {
            validate_json_body(request)?;

            let key = request.header(IDEMPOTENCY_HEADER);
            if let (Some(cache), Some(key)) = (&self.idempotency, key) {
                let claim = IdempotencyClaim::new(request, key)?;
                return replay_or_dispatch(cache, &claim, request_id, request, handler).await;
            }
        }

        dispatch(request_id, request, handler).await
    }
}

/// Replay the stored response for `claim`, or run the handler and store its
/// response.
async fn replay_or_dispatch<H>(
    cache: &IdempotencyCache,
    claim: &IdempotencyClaim,
    request_id: Uuid,
    request: &GateRequest,
    handler: &H,
) -> Result<Response, GateError>
where
    H: Handler + ?Sized,
{
    match cache.begin(claim).await? {
        IdempotencySlot::Completed(response) => {
            debug!(request_id = %request_id, key = claim.key(), "Replaying stored response");
            Ok((*response).into_replayed())
        }
        IdempotencySlot::InFlight => Err(GateError::IdempotencyConflict {
            key: claim.key().to_string(),
        }),
        IdempotencySlot::Fresh => match dispatch(request_id, request, handler).await {
            Ok(response) => {
                if let Err(e) = cache.complete(claim, &response).await {
                    warn!(
                        request_id = %request_id,
                        error = %e,
                        "Failed to store idempotent response, releasing key"
                    );
                    cache.abandon(claim).await;
                }
                Ok(response)
            }
            Err(e) => {
                cache.abandon(claim).await;
                Err(e)
            }
        },
    }
}

async fn dispatch<H>(
    request_id: Uuid,
    request: &GateRequest,
    handler: &H,
) -> Result<Response, GateError>
where
    H: Handler + ?Sized,
{
    match handler.call(request_id, request).await {
        Ok(response) => Ok(response),
        Err(e @ GateError::Validation { .. }) => Err(e),
        Err(e) => Err(GateError::Internal {
            message: e.to_string(),
        }),
    }
}

/// Reject a declared-JSON body that does not parse. Empty bodies pass.
fn validate_json_body(request: &GateRequest) -> Result<(), GateError> {
    if !request.is_json() || request.body.is_empty() {
        return Ok(());
    }
    serde_json::from_slice::<IgnoredAny>(&request.body)
        .map(|_| ())
        .map_err(|e| GateError::Validation {
            message: format!("malformed JSON body: {}", e),
        })
}
