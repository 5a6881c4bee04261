//! Unix socket listener.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::audit::AuditLogger;
use crate::config::Settings;
use crate::error::{GateError, ProtocolErrorKind};
use crate::gate::{Gate, Handler};

use super::connection::{handle_connection, ConnectionContext};

/// Request metrics for monitoring.
#[derive(Debug, Default)]
pub struct GateMetrics {
    /// Total requests decided.
    pub requests_total: AtomicU64,
    /// Requests that did not get a successful response.
    pub requests_rejected: AtomicU64,
    /// Currently active connections.
    pub active_connections: AtomicUsize,
}

impl GateMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a decided request.
    pub fn record_request(&self, admitted: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if !admitted {
            self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn rejected_requests(&self) -> u64 {
        self.requests_rejected.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Unix socket server in front of a [`Gate`].
pub struct SocketListener {
    listener: UnixListener,
    context: Arc<ConnectionContext>,
    max_connections: usize,
    connection_semaphore: Arc<Semaphore>,
}

impl SocketListener {
    /// Create and bind a new socket listener.
    pub async fn bind(
        settings: &Settings,
        gate: Arc<Gate>,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, GateError> {
        let socket_path = &settings.socket.path;

        // Never follow a symlink when clearing a stale socket.
        if let Ok(metadata) = std::fs::symlink_metadata(socket_path) {
            if metadata.file_type().is_symlink() {
                return Err(GateError::Socket {
                    message: format!(
                        "Socket path {} is a symlink, refusing to remove it",
                        socket_path.display()
                    ),
                });
            }

            std::fs::remove_file(socket_path).map_err(|e| GateError::Socket {
                message: format!(
                    "Failed to remove existing socket file {}: {}",
                    socket_path.display(),
                    e
                ),
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GateError::Socket {
                message: format!(
                    "Failed to create socket directory {}: {}",
                    parent.display(),
                    e
                ),
            })?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| GateError::Socket {
            message: format!("Failed to bind to socket {}: {}", socket_path.display(), e),
        })?;

        Self::set_socket_permissions(socket_path, &settings.socket.permissions)?;

        let max_connections = settings.limits.max_concurrent_requests;
        let connection_semaphore = Arc::new(Semaphore::new(max_connections));
        info!(max_connections, "Connection limiting enabled");

        let audit_logger = if settings.audit.enabled {
            match AuditLogger::new(&settings.audit.log_path) {
                Ok(logger) => {
                    info!(
                        path = %settings.audit.log_path.display(),
                        "Audit logging enabled"
                    );
                    Some(Arc::new(logger))
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %settings.audit.log_path.display(),
                        "Failed to create audit logger, audit logging disabled"
                    );
                    None
                }
            }
        } else {
            info!("Audit logging disabled");
            None
        };

        let context = Arc::new(ConnectionContext {
            gate,
            handler,
            audit_logger,
            metrics: Arc::new(GateMetrics::new()),
            max_message_size: settings.limits.max_message_size,
            socket_timeout: Duration::from_secs(settings.limits.socket_timeout_seconds),
        });

        info!(path = %socket_path.display(), "Socket listener bound");

        Ok(Self {
            listener,
            context,
            max_connections,
            connection_semaphore,
        })
    }

    /// Get request metrics.
    pub fn metrics(&self) -> Arc<GateMetrics> {
        Arc::clone(&self.context.metrics)
    }

    fn set_socket_permissions(path: &Path, permissions_str: &str) -> Result<(), GateError> {
        let mode = u32::from_str_radix(permissions_str, 8).map_err(|e| GateError::Socket {
            message: format!("Invalid socket permissions '{}': {}", permissions_str, e),
        })?;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            GateError::Socket {
                message: format!(
                    "Failed to set socket permissions on {}: {}",
                    path.display(),
                    e
                ),
            }
        })?;

        Ok(())
    }

    /// Run the socket listener, accepting connections.
    ///
    /// The listener stops accepting new connections when `shutdown` is notified.
    /// Active connections continue until they complete.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<(), GateError> {
        info!("Socket listener running, waiting for connections...");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let semaphore = Arc::clone(&self.connection_semaphore);
                            let permit = match semaphore.try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        max = self.max_connections,
                                        "Connection limit reached, rejecting connection"
                                    );
                                    continue;
                                }
                            };

                            let context = Arc::clone(&self.context);
                            context.metrics.active_connections.fetch_add(1, Ordering::Relaxed);
                            debug!(active = context.metrics.active(), "New connection accepted");

                            tokio::spawn(async move {
                                let _permit = permit;
                                let result = handle_connection(stream, Arc::clone(&context)).await;
                                if let Err(e) = result {
                                    if !matches!(
                                        &e,
                                        GateError::Protocol {
                                            kind: ProtocolErrorKind::ConnectionClosed
                                        }
                                    ) {
                                        error!(error = %e, "Connection handler error");
                                    }
                                }

                                context.metrics.active_connections.fetch_sub(1, Ordering::Relaxed);
                                debug!(active = context.metrics.active(), "Connection closed");
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Wait for all active connections to drain.
    ///
    /// Returns immediately if there are no active connections.
    pub async fn wait_for_drain(&self) {
        let poll_interval = Duration::from_millis(100);

        while self.context.metrics.active() > 0 {
            debug!(
                active = self.context.metrics.active(),
                "Waiting for connections to drain"
            );
            tokio::time::sleep(poll_interval).await;
        }

        info!(
            total = self.context.metrics.total_requests(),
            rejected = self.context.metrics.rejected_requests(),
            "All connections drained"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counting() {
        let metrics = GateMetrics::new();
        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_request(false);
        assert_eq!(metrics.total_requests(), 3);
        assert_eq!(metrics.rejected_requests(), 2);
        assert_eq!(metrics.active(), 0);
    }
}
