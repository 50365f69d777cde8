//! Lifecycle reporting for the daemon and its connections.

use std::sync::Arc;

use poets_ext_config::Config;
use poets_ext_protocol::connection::{ConnectionId, ConnectionState};

use crate::bootstrap::BootstrapError;
use crate::transport::ListenerError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer notified of daemon lifecycle events.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked once configuration, telemetry and the socket are ready.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked when the reactor admits a new connection.
    fn connection_opened(&self, connection: ConnectionId);

    /// Invoked when a connection's channel has closed and it is dropped.
    fn connection_closed(&self, connection: ConnectionId, state: ConnectionState);

    /// Invoked when the socket listener cannot be bound or started.
    fn listener_failed(&self, error: &ListenerError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn connection_opened(&self, connection: ConnectionId) {
        (**self).connection_opened(connection);
    }

    fn connection_closed(&self, connection: ConnectionId, state: ConnectionState) {
        (**self).connection_closed(connection, state);
    }

    fn listener_failed(&self, error: &ListenerError) {
        (**self).listener_failed(error);
    }
}

/// Reporter that records lifecycle events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            listen = %config.listen(),
            stdio = config.stdio(),
            echo_devices = config.echo_devices(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn connection_opened(&self, connection: ConnectionId) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "connection_opened",
            %connection,
            "connection admitted"
        );
    }

    fn connection_closed(&self, connection: ConnectionId, state: ConnectionState) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "connection_closed",
            %connection,
            %state,
            "connection closed"
        );
    }

    fn listener_failed(&self, error: &ListenerError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "listener_failed",
            error = %error,
            "socket listener failed"
        );
    }
}
