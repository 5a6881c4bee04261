//! Per-connection handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLogger};
use crate::error::{GateError, ProtocolErrorKind};
use crate::gate::{Gate, Handler};
use crate::protocol::{
    read_frame_with_timeout, write_frame_with_timeout, GateRequest, Response,
};

use super::listener::GateMetrics;

/// Shared state every connection task needs.
pub struct ConnectionContext {
    pub gate: Arc<Gate>,
    pub handler: Arc<dyn Handler>,
    pub audit_logger: Option<Arc<AuditLogger>>,
    pub metrics: Arc<GateMetrics>,
    pub max_message_size: usize,
    pub socket_timeout: Duration,
}

/// Handle a single client connection until it closes.
pub async fn handle_connection(
    stream: UnixStream,
    context: Arc<ConnectionContext>,
) -> Result<(), GateError> {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        match process_request(&mut reader, &mut writer, &context).await {
            Ok(()) => continue,
            Err(GateError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            }) => {
                debug!("Client disconnected");
                return Ok(());
            }
            Err(GateError::Protocol {
                kind: ProtocolErrorKind::ConnectionTimeout,
            }) => {
                warn!("Connection timed out");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

/// Read one request frame, decide it, and write the response frame.
async fn process_request<R, W>(
    reader: &mut R,
    writer: &mut W,
    context: &ConnectionContext,
) -> Result<(), GateError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let frame = read_frame_with_timeout(reader, context.max_message_size, context.socket_timeout);
    let msg = match frame.await {
        Ok(msg) => msg,
        Err(
            err @ GateError::Protocol {
                kind: ProtocolErrorKind::MessageTooLarge { .. },
            },
        ) => {
            // The payload is left unread, so the connection cannot continue.
            warn!(error = %err, "Rejecting oversized request frame");
            context.metrics.record_request(false);
            let response = Response::rejected(Uuid::new_v4(), &err, true);
            let response_bytes = serde_json::to_vec(&response)?;
            if let Err(e) =
                write_frame_with_timeout(writer, &response_bytes, context.socket_timeout).await
            {
                debug!(error = %e, "Failed to send oversized frame rejection");
            }
            return Err(err);
        }
        Err(e) => return Err(e),
    };
    let start_time = Instant::now();

    let response = match serde_json::from_slice::<GateRequest>(&msg) {
        Ok(request) => {
            let request = Arc::new(request);
            info!(
                method = %request.method,
                path = %request.path,
                client = request.client_identifier(),
                "Received request"
            );

            let response = run_gate(context, Arc::clone(&request)).await;
            context.metrics.record_request(response.success);

            if let Some(logger) = &context.audit_logger {
                let duration_ms =
                    u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX);
                if let Err(e) = logger.log(&AuditEntry::new(&request, &response, duration_ms)) {
                    error!(error = %e, "Failed to write audit log entry");
                }
            }
            response
        }
        Err(e) => {
            let err = GateError::Protocol {
                kind: ProtocolErrorKind::InvalidMessageFormat {
                    message: format!("Invalid JSON: {}", e),
                },
            };
            warn!(error = %err, "Rejecting malformed request frame");
            context.metrics.record_request(false);
            Response::rejected(Uuid::new_v4(), &err, true)
        }
    };

    let response_bytes = serde_json::to_vec(&response)?;
    write_frame_with_timeout(writer, &response_bytes, context.socket_timeout).await?;

    Ok(())
}

/// Run the gate on its own task so a panicking handler becomes a 500.
async fn run_gate(context: &ConnectionContext, request: Arc<GateRequest>) -> Response {
    let gate = Arc::clone(&context.gate);
    let handler = Arc::clone(&context.handler);
    let task_request = Arc::clone(&request);

    match tokio::spawn(async move { gate.process(&task_request, handler.as_ref()).await }).await {
        Ok(response) => response,
        Err(e) => {
            error!(path = %request.path, error = %e, "Request task panicked");
            Response::rejected(
                Uuid::new_v4(),
                &GateError::Internal {
                    message: "request task panicked".to_string(),
                },
                false,
            )
        }
    }
}
