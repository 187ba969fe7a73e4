//! The single entry point for engine invocations
//!
//! Args are checked against the command schema before any transport is
//! touched, so a caller contract violation never reaches the engine.

mod companion;
mod diagnostics;
mod retry;
mod schema;
mod subprocess;

pub use companion::CompanionTransport;
pub use diagnostics::DiagnosticsMirror;
pub use retry::retry_with_backoff;
pub use schema::{ArgKind, ArgSpec, CommandArgs, EngineCommand};
pub use subprocess::SubprocessTransport;

use crate::config::{Config, Transport};
use crate::error::EngineError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, info, warn};

#[async_trait]
pub trait EngineTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one validated command and return its stdout.
    async fn dispatch(
        &self,
        command: EngineCommand,
        args: &CommandArgs,
    ) -> Result<String, EngineError>;
}

/// Create the transport selected by configuration
pub fn create_transport(config: &Config) -> Arc<dyn EngineTransport> {
    match config.engine.transport {
        Transport::Subprocess => Arc::new(SubprocessTransport {
            binary: config.engine.binary.clone(),
        }),
        Transport::Companion => Arc::new(CompanionTransport {
            socket_path: config.engine.socket_path.clone(),
            retry: config.engine.retry.clone(),
        }),
    }
}

pub struct Gateway {
    transport: Arc<dyn EngineTransport>,
    default_timeout: Duration,
    long_timeout: Duration,
    diagnostics: Option<DiagnosticsMirror>,
}

impl Gateway {
    pub fn new(config: &Config) -> Self {
        Self::with_transport(create_transport(config), config)
    }

    pub fn with_transport(transport: Arc<dyn EngineTransport>, config: &Config) -> Self {
        Self {
            transport,
            default_timeout: config.default_timeout(),
            long_timeout: config.predict_timeout(),
            diagnostics: config.diagnostics_dir().map(DiagnosticsMirror::new),
        }
    }

    pub fn with_timeouts(mut self, default_timeout: Duration, long_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self.long_timeout = long_timeout;
        self
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn timeout_for(&self, command: EngineCommand) -> Duration {
        if command.is_long_running() {
            self.long_timeout
        } else {
            self.default_timeout
        }
    }

    /// Validate, dispatch under the command's deadline and return raw stdout.
    ///
    /// Timeouts are reported, never retried.
    pub async fn invoke(
        &self,
        command: EngineCommand,
        args: &CommandArgs,
    ) -> Result<String, EngineError> {
        args.validate(command)?;

        let timeout = self.timeout_for(command);
        info!(
            "Invoking engine '{}' via {} (timeout {:?})",
            command,
            self.transport.name(),
            timeout
        );

        if let Some(mirror) = &self.diagnostics {
            mirror.capture_inputs(command, args);
        }

        let start = Instant::now();
        let result = match tokio_timeout(timeout, self.transport.dispatch(command, args)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Engine '{}' timed out after {:?}", command, timeout);
                Err(EngineError::Timeout(timeout))
            }
        };

        match &result {
            Ok(stdout) => {
                debug!(
                    "Engine '{}' finished in {:?} ({} bytes)",
                    command,
                    start.elapsed(),
                    stdout.len()
                );
                if let Some(mirror) = &self.diagnostics {
                    mirror.capture_written_output(command, args);
                    mirror.capture_stdout(command, stdout);
                }
            }
            Err(e) => warn!("Engine '{}' failed after {:?}: {}", command, start.elapsed(), e),
        }

        result
    }
}
