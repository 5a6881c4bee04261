//! Downstream handlers invoked for admitted requests.

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::error::GateError;
use crate::protocol::{GateRequest, Response};

/// The protected handler behind the gate.
///
/// Errors other than [`GateError::Validation`] are reported to the caller as a
/// generic internal error.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request_id: Uuid, request: &GateRequest) -> Result<Response, GateError>;
}

/// Handler used by the daemon: the gate only renders a verdict, and the web
/// tier forwards the request itself once it sees `allowed: true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmitHandler;

#[async_trait]
impl Handler for AdmitHandler {
    async fn call(&self, request_id: Uuid, request: &GateRequest) -> Result<Response, GateError> {
        Ok(Response::success(
            request_id,
            json!({
                "allowed": true,
                "client_id": request.client_identifier(),
            }),
        ))
    }
}
