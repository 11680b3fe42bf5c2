//! Decorates a connection with per-call default options.
//!
//! Adapter layers hold a wrapper per request context so that dataset and
//! timeout defaults travel with the connection without being re-threaded
//! through every call site. Dropping the wrapper releases its references;
//! the wrapped connection stays open for other holders.

use std::sync::{Arc, OnceLock};

use tracing::warn;

use crate::connection::Connection;
use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::options::EmitOptions;

pub struct ConnectionWrapper {
    connection: Arc<Connection>,
    defaults: EmitOptions,
    route_to_self: OnceLock<String>,
}

impl ConnectionWrapper {
    pub fn new(connection: Arc<Connection>, defaults: EmitOptions) -> Self {
        Self {
            connection,
            defaults,
            route_to_self: OnceLock::new(),
        }
    }

    pub fn tag(&self) -> &str {
        self.connection.tag()
    }

    pub fn host_name(&self) -> &str {
        self.connection.host_name()
    }

    pub fn port(&self) -> u16 {
        self.connection.port()
    }

    /// Derived once per wrapper lifetime; a rebuilt wrapper recomputes it.
    pub fn route_to_self(&self) -> &str {
        self.route_to_self
            .get_or_init(|| self.connection.route_to_self())
    }

    /// Sends a request with the wrapper defaults, overlaid (never replaced)
    /// by the per-call options.
    pub async fn emit_message(
        &self,
        message_type: &str,
        body: serde_json::Value,
        options: Option<&EmitOptions>,
    ) -> Result<Envelope, ProtocolError> {
        if self.connection.is_closed() {
            warn!(host = %self.host_name(), "connection is already closed");
            return Err(ProtocolError::ConnectionClosed);
        }
        let merged = self.merged_options(options);
        self.connection
            .emit_message(message_type, body, &merged)
            .await
    }

    /// Fire-and-forget variant of [`Self::emit_message`].
    pub async fn emit_notification(
        &self,
        message_type: &str,
        body: serde_json::Value,
        options: Option<&EmitOptions>,
    ) -> Result<(), ProtocolError> {
        if self.connection.is_closed() {
            warn!(host = %self.host_name(), "connection is already closed");
            return Err(ProtocolError::ConnectionClosed);
        }
        let merged = self.merged_options(options);
        self.connection
            .emit_notification(message_type, body, &merged)
            .await
    }

    fn merged_options(&self, options: Option<&EmitOptions>) -> EmitOptions {
        match options {
            Some(overrides) => self.defaults.merged_with(overrides),
            None => self.defaults.clone(),
        }
    }
}
